//! Role repository for database operations

use anyhow::Result;
use sqlx::types::Json;
use sqlx::{PgPool, Row, postgres::PgRow};
use std::collections::HashSet;
use tracing::info;
use uuid::Uuid;

use crate::models::{NewRole, Role};

fn map_role(row: &PgRow) -> Role {
    let permissions: Json<Vec<Uuid>> = row.get("permissions");

    Role {
        id: row.get("id"),
        name: row.get("name"),
        permissions: permissions.0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Role repository
#[derive(Clone)]
pub struct RoleRepository {
    pool: PgPool,
}

impl RoleRepository {
    /// Create a new role repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new role
    pub async fn create(&self, new_role: &NewRole) -> Result<Role> {
        info!("Creating new role: {}", new_role.name);

        let row = sqlx::query(
            r#"
            INSERT INTO roles (id, name, permissions)
            VALUES ($1, $2, $3)
            RETURNING id, name, permissions, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new_role.name)
        .bind(Json(&new_role.permissions))
        .fetch_one(&self.pool)
        .await?;

        Ok(map_role(&row))
    }

    /// Get all roles
    pub async fn find_all(&self) -> Result<Vec<Role>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, permissions, created_at, updated_at
            FROM roles
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(map_role).collect())
    }

    /// Find a role by ID
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Role>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, permissions, created_at, updated_at
            FROM roles
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(map_role))
    }

    /// Find a role by name
    pub async fn find_by_name(&self, name: &str) -> Result<Option<Role>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, permissions, created_at, updated_at
            FROM roles
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(map_role))
    }

    /// Find all roles matching the given IDs
    ///
    /// IDs that resolve to nothing are silently absent from the result;
    /// callers decide whether dangling references matter.
    pub async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Role>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let rows = sqlx::query(
            r#"
            SELECT id, name, permissions, created_at, updated_at
            FROM roles
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids.to_vec())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(map_role).collect())
    }

    /// Return the set of `ids` that name existing roles
    pub async fn existing_ids(&self, ids: &[Uuid]) -> Result<HashSet<Uuid>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let rows = sqlx::query("SELECT id FROM roles WHERE id = ANY($1)")
            .bind(ids.to_vec())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    /// Persist a role's current state
    pub async fn update(&self, role: &Role) -> Result<Option<Role>> {
        let row = sqlx::query(
            r#"
            UPDATE roles
            SET name = $2, permissions = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, permissions, created_at, updated_at
            "#,
        )
        .bind(role.id)
        .bind(&role.name)
        .bind(Json(&role.permissions))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(map_role))
    }

    /// Delete a role by ID
    ///
    /// Users referencing the role are not checked; their references
    /// resolve to absence afterwards.
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        info!("Deleting role: {}", id);

        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
