//! Middleware for authentication and the authorization gates
//!
//! The authentication gate verifies the bearer credential and attaches
//! the resolved identity to the request; the role and permission gates
//! consult the stores on every request, so a revocation takes effect on
//! the next request. Gate configuration is an explicit value carried in
//! the middleware state, not a captured closure.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use std::collections::HashSet;
use tracing::error;
use uuid::Uuid;

use crate::{
    AppState,
    error::ApiError,
    models::{Role, User},
};

/// Authenticated identity attached to the request after credential
/// verification
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
}

/// Configuration for the role-name gate: the set of role names allowed
/// through
#[derive(Debug, Clone)]
pub struct RoleGate {
    allowed: Vec<String>,
}

impl RoleGate {
    pub fn allow(roles: &[&str]) -> Self {
        Self {
            allowed: roles.iter().map(|role| role.to_string()).collect(),
        }
    }
}

/// Configuration for the permission gate: the permission name a request
/// must hold
#[derive(Debug, Clone)]
pub struct PermissionGate {
    required: String,
}

impl PermissionGate {
    pub fn require(permission: &str) -> Self {
        Self {
            required: permission.to_string(),
        }
    }
}

/// Extract and validate the bearer token, then resolve the identity
///
/// Fails with 401 when the token is absent, malformed, expired, or
/// signature-invalid; with 404 when the embedded identifier no longer
/// resolves to a user. On success the resolved identity is attached to
/// the request extensions for downstream gates and handlers.
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(ApiError::Unauthorized)?;

    let claims = state.jwt_service.validate_token(token).map_err(|e| {
        error!("Failed to validate token: {}", e);
        ApiError::Unauthorized
    })?;

    let user = state
        .user_repository
        .find_by_id(claims.sub)
        .await
        .map_err(|e| {
            error!("Failed to load user for token: {}", e);
            ApiError::InternalServerError
        })?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    req.extensions_mut().insert(AuthUser { user });

    Ok(next.run(req).await)
}

/// Allow the request through when the identity holds one of the allowed
/// role names
pub async fn require_role(
    State((state, gate)): State<(AppState, RoleGate)>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let role_ids = match req.extensions().get::<AuthUser>() {
        Some(auth_user) => auth_user.user.roles.clone(),
        None => return Err(ApiError::Unauthorized),
    };

    let roles = state
        .role_repository
        .find_by_ids(&role_ids)
        .await
        .map_err(|e| {
            error!("Failed to resolve roles: {}", e);
            ApiError::InternalServerError
        })?;

    if roles.is_empty() {
        return Err(ApiError::Forbidden("Role not found".to_string()));
    }

    if !role_allowed(&roles, &gate.allowed) {
        return Err(ApiError::Forbidden("Forbidden".to_string()));
    }

    Ok(next.run(req).await)
}

/// Allow the request through when the required permission is in the
/// union of the identity's resolved roles' permissions
pub async fn require_permission(
    State((state, gate)): State<(AppState, PermissionGate)>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let user_id = match req.extensions().get::<AuthUser>() {
        Some(auth_user) => auth_user.user.id,
        None => return Err(ApiError::Unauthorized),
    };

    // Re-resolve the identity from the store of record; it may have been
    // deleted after token issuance.
    let user = state
        .user_repository
        .find_by_id(user_id)
        .await
        .map_err(|e| {
            error!("Failed to load user: {}", e);
            ApiError::InternalServerError
        })?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let roles = state
        .role_repository
        .find_by_ids(&user.roles)
        .await
        .map_err(|e| {
            error!("Failed to resolve roles: {}", e);
            ApiError::InternalServerError
        })?;

    let permission_ids = collect_permission_ids(&roles);
    let permission_names = state
        .permission_repository
        .find_names_by_ids(&permission_ids)
        .await
        .map_err(|e| {
            error!("Failed to resolve permissions: {}", e);
            ApiError::InternalServerError
        })?;

    if !permission_names.iter().any(|name| *name == gate.required) {
        return Err(ApiError::Forbidden(
            "Forbidden: Insufficient permissions".to_string(),
        ));
    }

    Ok(next.run(req).await)
}

/// Check whether the caller resolves to the admin role
///
/// Used by handlers that allow self-or-admin access, where the admin-only
/// methods share a path with self-service ones.
pub async fn is_admin(state: &AppState, user: &User) -> Result<bool, ApiError> {
    let roles = state
        .role_repository
        .find_by_ids(&user.roles)
        .await
        .map_err(|e| {
            error!("Failed to resolve roles: {}", e);
            ApiError::InternalServerError
        })?;

    Ok(role_allowed(&roles, &["admin".to_string()]))
}

/// Decide whether any resolved role carries an allowed name
pub(crate) fn role_allowed(roles: &[Role], allowed: &[String]) -> bool {
    roles
        .iter()
        .any(|role| allowed.iter().any(|name| name == &role.name))
}

/// Union the permission references across roles, dropping duplicates
pub(crate) fn collect_permission_ids(roles: &[Role]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    roles
        .iter()
        .flat_map(|role| role.permissions.iter())
        .filter(|id| seen.insert(**id))
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(name: &str, permissions: Vec<Uuid>) -> Role {
        Role {
            id: Uuid::new_v4(),
            name: name.to_string(),
            permissions,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_role_allowed_on_exact_match() {
        let roles = vec![role("editor", vec![]), role("viewer", vec![])];
        let allowed = vec!["admin".to_string(), "editor".to_string()];

        assert!(role_allowed(&roles, &allowed));
    }

    #[test]
    fn test_role_denied_when_name_absent() {
        let roles = vec![role("viewer", vec![])];
        let allowed = vec!["admin".to_string()];

        assert!(!role_allowed(&roles, &allowed));
        assert!(!role_allowed(&[], &allowed));
    }

    #[test]
    fn test_collect_permission_ids_unions_and_dedups() {
        let shared = Uuid::new_v4();
        let only_a = Uuid::new_v4();
        let only_b = Uuid::new_v4();
        let roles = vec![
            role("a", vec![shared, only_a]),
            role("b", vec![only_b, shared]),
        ];

        let ids = collect_permission_ids(&roles);

        assert_eq!(ids, vec![shared, only_a, only_b]);
    }
}
