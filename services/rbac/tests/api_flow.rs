//! End-to-end flows against a live service instance
//!
//! These tests need a running PostgreSQL reachable through DATABASE_URL;
//! they bootstrap the schema, wipe the three tables, and drive the HTTP
//! surface with a real client.

use rbac::jwt::{JwtConfig, JwtService};
use rbac::models::{NewRole, NewUser, UserStatus};
use rbac::{AppState, routes};

use common::database::{DatabaseConfig, init_pool};
use serde_json::{Value, json};

async fn start_service() -> Result<(AppState, String), Box<dyn std::error::Error>> {
    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;

    sqlx::raw_sql(include_str!("../schema.sql"))
        .execute(&pool)
        .await?;
    sqlx::raw_sql("TRUNCATE users, roles, permissions")
        .execute(&pool)
        .await?;

    let jwt_service = JwtService::new(JwtConfig {
        secret: "end-to-end-test-secret".to_string(),
        token_expiry: 3600,
    });

    let state = AppState::new(pool, jwt_service);
    let app = routes::create_router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server failed");
    });

    Ok((state, format!("http://{}", addr)))
}

/// Seed an admin role and user directly through the repositories and
/// return a login token.
async fn seed_admin(
    state: &AppState,
    base: &str,
    client: &reqwest::Client,
) -> Result<String, Box<dyn std::error::Error>> {
    let admin_role = state
        .role_repository
        .create(&NewRole {
            name: "admin".to_string(),
            permissions: vec![],
        })
        .await?;

    state
        .user_repository
        .create(&NewUser {
            username: "admin".to_string(),
            email: "admin@example.com".to_string(),
            password: "Adm1nPassword".to_string(),
            roles: vec![admin_role.id],
            status: UserStatus::Active,
        })
        .await?;

    login(base, client, "admin@example.com", "Adm1nPassword").await
}

async fn login(
    base: &str,
    client: &reqwest::Client,
    email: &str,
    password: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    let response = client
        .post(format!("{}/auth/login", base))
        .json(&json!({ "email": email, "password": password }))
        .send()
        .await?;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await?;
    Ok(body["token"].as_str().expect("token missing").to_string())
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL instance and DATABASE_URL"]
async fn test_permission_revocation_takes_effect_next_request()
-> Result<(), Box<dyn std::error::Error>> {
    let (state, base) = start_service().await?;
    let client = reqwest::Client::new();
    let admin_token = seed_admin(&state, &base, &client).await?;

    // Create the permission
    let response = client
        .post(format!("{}/permissions", base))
        .bearer_auth(&admin_token)
        .json(&json!({ "name": "viewRestrictedData", "description": "read restricted data" }))
        .send()
        .await?;
    assert_eq!(response.status(), 201);
    let permission: Value = response.json().await?;
    let permission_id = permission["id"].as_str().unwrap().to_string();

    // Create a role holding it
    let response = client
        .post(format!("{}/roles", base))
        .bearer_auth(&admin_token)
        .json(&json!({ "name": "editor", "permissions": ["viewRestrictedData"] }))
        .send()
        .await?;
    assert_eq!(response.status(), 201);
    let role: Value = response.json().await?;
    let role_id = role["id"].as_str().unwrap().to_string();

    // Create a user with that role
    let response = client
        .post(format!("{}/users", base))
        .bearer_auth(&admin_token)
        .json(&json!({
            "username": "editor_user",
            "email": "editor@example.com",
            "password": "Ed1torPassword",
            "role": "editor"
        }))
        .send()
        .await?;
    assert_eq!(response.status(), 201);

    let editor_token = login(&base, &client, "editor@example.com", "Ed1torPassword").await?;

    // The permission admits the request
    let response = client
        .get(format!("{}/protected/restricted", base))
        .bearer_auth(&editor_token)
        .send()
        .await?;
    assert_eq!(response.status(), 200);

    // Revoke the permission from the role
    let response = client
        .patch(format!("{}/roles/role/{}/permissions", base, role_id))
        .bearer_auth(&admin_token)
        .json(&json!({ "removePermissions": [permission_id] }))
        .send()
        .await?;
    assert_eq!(response.status(), 200);

    // The same token is now refused
    let response = client
        .get(format!("{}/protected/restricted", base))
        .bearer_auth(&editor_token)
        .send()
        .await?;
    assert_eq!(response.status(), 403);

    Ok(())
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL instance and DATABASE_URL"]
async fn test_removing_last_role_deactivates_user() -> Result<(), Box<dyn std::error::Error>> {
    let (state, base) = start_service().await?;
    let client = reqwest::Client::new();
    let admin_token = seed_admin(&state, &base, &client).await?;

    let viewer_role = state
        .role_repository
        .create(&NewRole {
            name: "viewer".to_string(),
            permissions: vec![],
        })
        .await?;

    let response = client
        .post(format!("{}/users", base))
        .bearer_auth(&admin_token)
        .json(&json!({
            "username": "viewer_user",
            "email": "viewer@example.com",
            "password": "V1ewerPassword",
            "role": "viewer"
        }))
        .send()
        .await?;
    assert_eq!(response.status(), 201);
    let user: Value = response.json().await?;
    let user_id = user["id"].as_str().unwrap().to_string();
    assert_eq!(user["status"], "Active");

    // Remove the only role the user holds
    let response = client
        .patch(format!("{}/users/{}", base, user_id))
        .bearer_auth(&admin_token)
        .json(&json!({ "removeRoles": [viewer_role.id.to_string()] }))
        .send()
        .await?;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await?;
    assert_eq!(body["user"]["status"], "Inactive");
    assert_eq!(body["user"]["roles"].as_array().unwrap().len(), 0);

    // The stored record agrees
    let stored = state
        .user_repository
        .find_by_id(user_id.parse()?)
        .await?
        .expect("user still exists");
    assert_eq!(stored.status, UserStatus::Inactive);

    Ok(())
}
