//! Permission repository for database operations

use anyhow::Result;
use sqlx::{PgPool, Row, postgres::PgRow};
use std::collections::HashSet;
use tracing::info;
use uuid::Uuid;

use crate::models::{NewPermission, Permission};

fn map_permission(row: &PgRow) -> Permission {
    Permission {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Permission repository
#[derive(Clone)]
pub struct PermissionRepository {
    pool: PgPool,
}

impl PermissionRepository {
    /// Create a new permission repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new permission
    pub async fn create(&self, new_permission: &NewPermission) -> Result<Permission> {
        info!("Creating new permission: {}", new_permission.name);

        let row = sqlx::query(
            r#"
            INSERT INTO permissions (id, name, description)
            VALUES ($1, $2, $3)
            RETURNING id, name, description, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new_permission.name)
        .bind(&new_permission.description)
        .fetch_one(&self.pool)
        .await?;

        Ok(map_permission(&row))
    }

    /// Get all permissions
    pub async fn find_all(&self) -> Result<Vec<Permission>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, created_at, updated_at
            FROM permissions
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(map_permission).collect())
    }

    /// Find a permission by ID
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Permission>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, description, created_at, updated_at
            FROM permissions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(map_permission))
    }

    /// Find all permissions matching the given names
    pub async fn find_by_names(&self, names: &[String]) -> Result<Vec<Permission>> {
        if names.is_empty() {
            return Ok(vec![]);
        }

        let rows = sqlx::query(
            r#"
            SELECT id, name, description, created_at, updated_at
            FROM permissions
            WHERE name = ANY($1)
            "#,
        )
        .bind(names.to_vec())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(map_permission).collect())
    }

    /// Resolve permission IDs to names
    ///
    /// Dangling IDs resolve to absence and are simply not in the result.
    pub async fn find_names_by_ids(&self, ids: &[Uuid]) -> Result<Vec<String>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let rows = sqlx::query("SELECT name FROM permissions WHERE id = ANY($1)")
            .bind(ids.to_vec())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|row| row.get("name")).collect())
    }

    /// Return the set of `ids` that name existing permissions
    pub async fn existing_ids(&self, ids: &[Uuid]) -> Result<HashSet<Uuid>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let rows = sqlx::query("SELECT id FROM permissions WHERE id = ANY($1)")
            .bind(ids.to_vec())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    /// Persist a permission's current state
    pub async fn update(&self, permission: &Permission) -> Result<Option<Permission>> {
        let row = sqlx::query(
            r#"
            UPDATE permissions
            SET name = $2, description = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, description, created_at, updated_at
            "#,
        )
        .bind(permission.id)
        .bind(&permission.name)
        .bind(&permission.description)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(map_permission))
    }

    /// Delete a permission by ID
    ///
    /// Roles referencing the permission are not checked; their references
    /// resolve to absence afterwards.
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        info!("Deleting permission: {}", id);

        let result = sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
