//! RBAC service routes

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, patch, post},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    AppState,
    error::{ApiError, ApiResult},
    middleware::{AuthUser, PermissionGate, RoleGate, authenticate, is_admin, require_permission, require_role},
    models::{NewPermission, NewRole, NewUser, UserStatus},
    reconcile::{self, ReconcileError},
    repositories::user::{hash_password, verify_password},
    validation::{validate_email, validate_password, validate_username},
};

/// Request for user login
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request for user creation
#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub status: Option<String>,
}

/// Request for user update; all fields optional
#[derive(Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
    pub status: Option<String>,
}

/// Request for user role reconciliation
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRolesRequest {
    #[serde(default)]
    pub add_roles: Vec<String>,
    #[serde(default)]
    pub remove_roles: Vec<String>,
}

/// Request for role creation; permissions are referenced by name
#[derive(Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Request for role update; permissions are appended by name
#[derive(Deserialize)]
pub struct UpdateRoleRequest {
    pub name: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Request for role permission reconciliation
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRolePermissionsRequest {
    #[serde(default)]
    pub add_permissions: Vec<String>,
    #[serde(default)]
    pub remove_permissions: Vec<String>,
}

/// Request for permission creation
#[derive(Deserialize)]
pub struct CreatePermissionRequest {
    pub name: String,
    pub description: Option<String>,
}

/// Request for permission update
#[derive(Deserialize)]
pub struct UpdatePermissionRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Create the router for the RBAC service
pub fn create_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/users", post(create_user).get(get_users))
        .route("/users/:id", delete(delete_user).patch(update_user_roles))
        .route("/roles", post(create_role).get(get_roles))
        .route(
            "/roles/:id",
            get(get_role).put(update_role).delete(delete_role),
        )
        .route("/roles/role/:id/permissions", patch(update_role_permissions))
        .route("/permissions", post(create_permission).get(get_permissions))
        .route(
            "/permissions/:id",
            get(get_permission)
                .put(update_permission)
                .delete(delete_permission),
        )
        .route_layer(middleware::from_fn_with_state(
            (state.clone(), RoleGate::allow(&["admin"])),
            require_role,
        ))
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate));

    let user_routes = Router::new()
        .route("/users/:id", get(get_user).put(update_user))
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate));

    let restricted_routes = Router::new()
        .route("/protected/restricted", get(restricted))
        .route_layer(middleware::from_fn_with_state(
            (state.clone(), PermissionGate::require("viewRestrictedData")),
            require_permission,
        ))
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate));

    Router::new()
        .route("/health", get(health_check))
        .route("/auth/login", post(login))
        .merge(admin_routes)
        .merge(user_routes)
        .merge(restricted_routes)
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = common::database::health_check(&state.db_pool)
        .await
        .unwrap_or(false);

    Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "service": "rbac-service"
    }))
}

/// User login endpoint
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    info!("Login attempt for: {}", payload.email);

    let user = state
        .user_repository
        .find_by_email(&payload.email)
        .await
        .map_err(|e| {
            error!("Failed to look up user: {}", e);
            ApiError::InternalServerError
        })?
        .ok_or_else(|| ApiError::BadRequest("Invalid credentials".to_string()))?;

    let password_matches = verify_password(&user, &payload.password).map_err(|e| {
        error!("Failed to verify password: {}", e);
        ApiError::InternalServerError
    })?;

    if !password_matches {
        return Err(ApiError::BadRequest("Invalid credentials".to_string()));
    }

    let token = state.jwt_service.generate_token(&user).map_err(|e| {
        error!("Failed to generate token: {}", e);
        ApiError::InternalServerError
    })?;

    Ok(Json(json!({ "token": token })))
}

/// Create a new user (admin only)
pub async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    validate_username(&payload.username).map_err(ApiError::BadRequest)?;
    validate_email(&payload.email).map_err(ApiError::BadRequest)?;
    validate_password(&payload.password).map_err(ApiError::BadRequest)?;

    // Suspended is a manual state applied later, never part of creation
    let status = match payload.status.as_deref() {
        None => UserStatus::Active,
        Some(raw) => match raw.parse::<UserStatus>() {
            Ok(UserStatus::Suspended) | Err(_) => {
                return Err(ApiError::BadRequest(
                    "Status must be either \"Active\" or \"Inactive\"".to_string(),
                ));
            }
            Ok(status) => status,
        },
    };

    let role = state
        .role_repository
        .find_by_name(&payload.role)
        .await
        .map_err(|e| {
            error!("Failed to look up role: {}", e);
            ApiError::InternalServerError
        })?
        .ok_or_else(|| ApiError::BadRequest("Role does not exist".to_string()))?;

    let new_user = NewUser {
        username: payload.username,
        email: payload.email,
        password: payload.password,
        roles: vec![role.id],
        status,
    };

    let user = state.user_repository.create(&new_user).await.map_err(|e| {
        error!("Failed to create user: {}", e);
        ApiError::InternalServerError
    })?;

    Ok((StatusCode::CREATED, Json(user)))
}

/// Get all users (admin only)
pub async fn get_users(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let users = state.user_repository.find_all().await.map_err(|e| {
        error!("Failed to fetch users: {}", e);
        ApiError::InternalServerError
    })?;

    Ok(Json(users))
}

/// Get a user by ID (self or admin)
pub async fn get_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let user = state
        .user_repository
        .find_by_id(id)
        .await
        .map_err(|e| {
            error!("Failed to fetch user: {}", e);
            ApiError::InternalServerError
        })?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    if auth.user.id != id && !is_admin(&state, &auth.user).await? {
        return Err(ApiError::Forbidden("Forbidden".to_string()));
    }

    Ok(Json(user))
}

/// Update a user (admin any field, self a subset)
pub async fn update_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut user = state
        .user_repository
        .find_by_id(id)
        .await
        .map_err(|e| {
            error!("Failed to fetch user: {}", e);
            ApiError::InternalServerError
        })?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let admin = is_admin(&state, &auth.user).await?;
    if !admin && auth.user.id != id {
        return Err(ApiError::Forbidden("Forbidden".to_string()));
    }

    // Role and status stay admin-only even on self-updates
    if !admin && (payload.role.is_some() || payload.status.is_some()) {
        return Err(ApiError::Forbidden("Forbidden".to_string()));
    }

    if let Some(username) = payload.username {
        validate_username(&username).map_err(ApiError::BadRequest)?;
        user.username = username;
    }

    if let Some(email) = payload.email {
        validate_email(&email).map_err(ApiError::BadRequest)?;
        user.email = email;
    }

    if let Some(password) = payload.password {
        validate_password(&password).map_err(ApiError::BadRequest)?;
        user.password_hash = hash_password(&password).map_err(|e| {
            error!("Failed to hash password: {}", e);
            ApiError::InternalServerError
        })?;
    }

    if let Some(role_name) = payload.role {
        let role = state
            .role_repository
            .find_by_name(&role_name)
            .await
            .map_err(|e| {
                error!("Failed to look up role: {}", e);
                ApiError::InternalServerError
            })?
            .ok_or_else(|| ApiError::BadRequest("Invalid role name".to_string()))?;

        // Scalar-shaped update path: the single role becomes the whole set
        user.roles = vec![role.id];
    }

    if let Some(status) = payload.status {
        user.status = status.parse::<UserStatus>().map_err(ApiError::BadRequest)?;
    }

    let updated = state
        .user_repository
        .update(&user)
        .await
        .map_err(|e| {
            error!("Failed to update user: {}", e);
            ApiError::InternalServerError
        })?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(Json(updated))
}

/// Delete a user (admin only)
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let deleted = state.user_repository.delete(id).await.map_err(|e| {
        error!("Failed to delete user: {}", e);
        ApiError::InternalServerError
    })?;

    if !deleted {
        return Err(ApiError::NotFound("User not found".to_string()));
    }

    Ok(Json(json!({ "message": "User deleted" })))
}

/// Reconcile a user's role set (admin only)
pub async fn update_user_roles(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserRolesRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut user = state
        .user_repository
        .find_by_id(id)
        .await
        .map_err(|e| {
            error!("Failed to fetch user: {}", e);
            ApiError::InternalServerError
        })?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let adds = reconcile::parse_candidates(&payload.add_roles).map_err(role_delta_error)?;
    let removes = reconcile::parse_candidates(&payload.remove_roles).map_err(role_delta_error)?;

    let candidates: Vec<Uuid> = adds.iter().chain(removes.iter()).copied().collect();
    let known = state
        .role_repository
        .existing_ids(&candidates)
        .await
        .map_err(|e| {
            error!("Failed to check role existence: {}", e);
            ApiError::InternalServerError
        })?;

    let new_roles =
        reconcile::reconcile(&user.roles, &adds, &removes, &known).map_err(role_delta_error)?;

    user.status = reconcile::derive_status(&new_roles);
    user.roles = new_roles;

    let updated = state
        .user_repository
        .update(&user)
        .await
        .map_err(|e| {
            error!("Failed to update user roles: {}", e);
            ApiError::InternalServerError
        })?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(Json(json!({
        "message": "Roles updated successfully",
        "user": updated
    })))
}

/// Create a new role (admin only)
pub async fn create_role(
    State(state): State<AppState>,
    Json(payload): Json<CreateRoleRequest>,
) -> ApiResult<impl IntoResponse> {
    let permission_docs = state
        .permission_repository
        .find_by_names(&payload.permissions)
        .await
        .map_err(|e| {
            error!("Failed to look up permissions: {}", e);
            ApiError::InternalServerError
        })?;

    if permission_docs.len() != payload.permissions.len() {
        return Err(ApiError::BadRequest(
            "Some permissions not found".to_string(),
        ));
    }

    let new_role = NewRole {
        name: payload.name,
        permissions: permission_docs.iter().map(|p| p.id).collect(),
    };

    let role = state.role_repository.create(&new_role).await.map_err(|e| {
        error!("Failed to create role: {}", e);
        ApiError::InternalServerError
    })?;

    Ok((StatusCode::CREATED, Json(role)))
}

/// Get all roles (admin only)
pub async fn get_roles(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let roles = state.role_repository.find_all().await.map_err(|e| {
        error!("Failed to fetch roles: {}", e);
        ApiError::InternalServerError
    })?;

    Ok(Json(roles))
}

/// Get a role by ID (admin only)
pub async fn get_role(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let role = state
        .role_repository
        .find_by_id(id)
        .await
        .map_err(|e| {
            error!("Failed to fetch role: {}", e);
            ApiError::InternalServerError
        })?
        .ok_or_else(|| ApiError::NotFound("Role not found".to_string()))?;

    Ok(Json(role))
}

/// Update a role (admin only)
///
/// Permissions listed by name are appended; a name that is unknown or
/// already held rejects the whole update.
pub async fn update_role(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateRoleRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut role = state
        .role_repository
        .find_by_id(id)
        .await
        .map_err(|e| {
            error!("Failed to fetch role: {}", e);
            ApiError::InternalServerError
        })?
        .ok_or_else(|| ApiError::NotFound("Role not found".to_string()))?;

    if !payload.permissions.is_empty() {
        let permission_docs = state
            .permission_repository
            .find_by_names(&payload.permissions)
            .await
            .map_err(|e| {
                error!("Failed to look up permissions: {}", e);
                ApiError::InternalServerError
            })?;

        if permission_docs.len() != payload.permissions.len() {
            return Err(ApiError::BadRequest(
                "Some permissions not found".to_string(),
            ));
        }

        let duplicates: Vec<&str> = permission_docs
            .iter()
            .filter(|p| role.permissions.contains(&p.id))
            .map(|p| p.name.as_str())
            .collect();

        if !duplicates.is_empty() {
            return Err(ApiError::BadRequest(format!(
                "Permissions already exist: {}",
                duplicates.join(", ")
            )));
        }

        role.permissions
            .extend(permission_docs.iter().map(|p| p.id));
    }

    if let Some(name) = payload.name {
        role.name = name;
    }

    let updated = state
        .role_repository
        .update(&role)
        .await
        .map_err(|e| {
            error!("Failed to update role: {}", e);
            ApiError::InternalServerError
        })?
        .ok_or_else(|| ApiError::NotFound("Role not found".to_string()))?;

    Ok(Json(updated))
}

/// Delete a role (admin only)
pub async fn delete_role(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let deleted = state.role_repository.delete(id).await.map_err(|e| {
        error!("Failed to delete role: {}", e);
        ApiError::InternalServerError
    })?;

    if !deleted {
        return Err(ApiError::NotFound("Role not found".to_string()));
    }

    Ok(Json(json!({ "message": "Role deleted" })))
}

/// Reconcile a role's permission set (admin only)
pub async fn update_role_permissions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateRolePermissionsRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut role = state
        .role_repository
        .find_by_id(id)
        .await
        .map_err(|e| {
            error!("Failed to fetch role: {}", e);
            ApiError::InternalServerError
        })?
        .ok_or_else(|| ApiError::NotFound("Role not found".to_string()))?;

    let adds =
        reconcile::parse_candidates(&payload.add_permissions).map_err(permission_delta_error)?;
    let removes =
        reconcile::parse_candidates(&payload.remove_permissions).map_err(permission_delta_error)?;

    let candidates: Vec<Uuid> = adds.iter().chain(removes.iter()).copied().collect();
    let known = state
        .permission_repository
        .existing_ids(&candidates)
        .await
        .map_err(|e| {
            error!("Failed to check permission existence: {}", e);
            ApiError::InternalServerError
        })?;

    role.permissions = reconcile::reconcile(&role.permissions, &adds, &removes, &known)
        .map_err(permission_delta_error)?;

    let updated = state
        .role_repository
        .update(&role)
        .await
        .map_err(|e| {
            error!("Failed to update role permissions: {}", e);
            ApiError::InternalServerError
        })?
        .ok_or_else(|| ApiError::NotFound("Role not found".to_string()))?;

    Ok(Json(json!({
        "message": "Permissions updated successfully",
        "role": updated
    })))
}

/// Create a new permission (admin only)
pub async fn create_permission(
    State(state): State<AppState>,
    Json(payload): Json<CreatePermissionRequest>,
) -> ApiResult<impl IntoResponse> {
    let new_permission = NewPermission {
        name: payload.name,
        description: payload.description,
    };

    let permission = state
        .permission_repository
        .create(&new_permission)
        .await
        .map_err(|e| {
            error!("Failed to create permission: {}", e);
            ApiError::InternalServerError
        })?;

    Ok((StatusCode::CREATED, Json(permission)))
}

/// Get all permissions (admin only)
pub async fn get_permissions(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let permissions = state.permission_repository.find_all().await.map_err(|e| {
        error!("Failed to fetch permissions: {}", e);
        ApiError::InternalServerError
    })?;

    Ok(Json(permissions))
}

/// Get a permission by ID (admin only)
pub async fn get_permission(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let permission = state
        .permission_repository
        .find_by_id(id)
        .await
        .map_err(|e| {
            error!("Failed to fetch permission: {}", e);
            ApiError::InternalServerError
        })?
        .ok_or_else(|| ApiError::NotFound("Permission not found".to_string()))?;

    Ok(Json(permission))
}

/// Update a permission (admin only); only provided fields change
pub async fn update_permission(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdatePermissionRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut permission = state
        .permission_repository
        .find_by_id(id)
        .await
        .map_err(|e| {
            error!("Failed to fetch permission: {}", e);
            ApiError::InternalServerError
        })?
        .ok_or_else(|| ApiError::NotFound("Permission not found".to_string()))?;

    if let Some(name) = payload.name {
        permission.name = name;
    }

    if let Some(description) = payload.description {
        permission.description = Some(description);
    }

    let updated = state
        .permission_repository
        .update(&permission)
        .await
        .map_err(|e| {
            error!("Failed to update permission: {}", e);
            ApiError::InternalServerError
        })?
        .ok_or_else(|| ApiError::NotFound("Permission not found".to_string()))?;

    Ok(Json(updated))
}

/// Delete a permission (admin only)
pub async fn delete_permission(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let deleted = state.permission_repository.delete(id).await.map_err(|e| {
        error!("Failed to delete permission: {}", e);
        ApiError::InternalServerError
    })?;

    if !deleted {
        return Err(ApiError::NotFound("Permission not found".to_string()));
    }

    Ok(Json(json!({ "message": "Permission deleted" })))
}

/// Permission-gated example endpoint
pub async fn restricted() -> impl IntoResponse {
    Json(json!({ "message": "Access granted to restricted data" }))
}

fn role_delta_error(err: ReconcileError) -> ApiError {
    match err {
        ReconcileError::InvalidId(raw) => ApiError::BadRequest(format!("Invalid Role ID: {}", raw)),
        ReconcileError::UnknownId(id) => {
            ApiError::BadRequest(format!("Role ID {} does not exist", id))
        }
    }
}

fn permission_delta_error(err: ReconcileError) -> ApiError {
    match err {
        ReconcileError::InvalidId(raw) => {
            ApiError::BadRequest(format!("Invalid Permission ID: {}", raw))
        }
        ReconcileError::UnknownId(id) => {
            ApiError::BadRequest(format!("Permission ID {} does not exist", id))
        }
    }
}
