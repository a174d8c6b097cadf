//! Role-based access control service
//!
//! Users hold roles, roles hold permissions, and the request pipeline
//! gates endpoints by role name or permission membership. State lives in
//! PostgreSQL; every gate re-resolves role and permission records from
//! the store, so revocations take effect on the next request.

use sqlx::PgPool;

pub mod error;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod reconcile;
pub mod repositories;
pub mod routes;
pub mod validation;

use crate::jwt::JwtService;
use crate::repositories::{PermissionRepository, RoleRepository, UserRepository};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub jwt_service: JwtService,
    pub user_repository: UserRepository,
    pub role_repository: RoleRepository,
    pub permission_repository: PermissionRepository,
}

impl AppState {
    /// Build the application state from an initialized pool and JWT
    /// service
    pub fn new(db_pool: PgPool, jwt_service: JwtService) -> Self {
        let user_repository = UserRepository::new(db_pool.clone());
        let role_repository = RoleRepository::new(db_pool.clone());
        let permission_repository = PermissionRepository::new(db_pool.clone());

        AppState {
            db_pool,
            jwt_service,
            user_repository,
            role_repository,
            permission_repository,
        }
    }
}
