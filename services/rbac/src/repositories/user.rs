//! User repository for database operations

use anyhow::Result;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use sqlx::types::Json;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::info;
use uuid::Uuid;

use crate::models::{NewUser, User, UserStatus};

/// Hash a password with a fresh random salt
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();

    Ok(password_hash)
}

/// Verify a password against a user's stored digest
pub fn verify_password(user: &User, password: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|e| anyhow::anyhow!("Failed to parse password hash: {}", e))?;

    let argon2 = Argon2::default();
    let result = argon2.verify_password(password.as_bytes(), &parsed_hash);

    Ok(result.is_ok())
}

fn map_user(row: &PgRow) -> Result<User> {
    let status: String = row.get("status");
    let roles: Json<Vec<Uuid>> = row.get("roles");

    Ok(User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        roles: roles.0,
        status: status
            .parse::<UserStatus>()
            .map_err(|e| anyhow::anyhow!("Failed to parse user status: {}", e))?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// User repository
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    /// Create a new user repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new user
    ///
    /// The plaintext password is hashed here; it is never persisted.
    pub async fn create(&self, new_user: &NewUser) -> Result<User> {
        info!("Creating new user: {}", new_user.username);

        let password_hash = hash_password(&new_user.password)?;

        let row = sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, roles, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, username, email, password_hash, roles, status, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new_user.username)
        .bind(&new_user.email)
        .bind(&password_hash)
        .bind(Json(&new_user.roles))
        .bind(new_user.status.as_str())
        .fetch_one(&self.pool)
        .await?;

        map_user(&row)
    }

    /// Get all users
    pub async fn find_all(&self) -> Result<Vec<User>> {
        let rows = sqlx::query(
            r#"
            SELECT id, username, email, password_hash, roles, status, created_at, updated_at
            FROM users
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_user).collect()
    }

    /// Find a user by ID
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, username, email, password_hash, roles, status, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_user).transpose()
    }

    /// Find a user by email
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        info!("Finding user by email: {}", email);

        let row = sqlx::query(
            r#"
            SELECT id, username, email, password_hash, roles, status, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_user).transpose()
    }

    /// Persist a user's current state
    ///
    /// Full-row write: the caller reads, computes, and saves. The last
    /// write wins; no version check is performed.
    pub async fn update(&self, user: &User) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            UPDATE users
            SET username = $2, email = $3, password_hash = $4, roles = $5,
                status = $6, updated_at = NOW()
            WHERE id = $1
            RETURNING id, username, email, password_hash, roles, status, created_at, updated_at
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(Json(&user.roles))
        .bind(user.status.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_user).transpose()
    }

    /// Delete a user by ID
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        info!("Deleting user: {}", id);

        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_and_verify() {
        let hash = hash_password("Str0ngPassword").unwrap();
        assert_ne!(hash, "Str0ngPassword");

        let user = User {
            id: Uuid::new_v4(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: hash,
            roles: vec![],
            status: UserStatus::Active,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        assert!(verify_password(&user, "Str0ngPassword").unwrap());
        assert!(!verify_password(&user, "WrongPassword1").unwrap());
    }

    #[test]
    fn test_hashes_are_salted() {
        let a = hash_password("Str0ngPassword").unwrap();
        let b = hash_password("Str0ngPassword").unwrap();
        assert_ne!(a, b);
    }
}
