use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, HeaderMap, StatusCode},
    Json,
};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::error::ApiError;
use super::validation::{validate_profile, validate_register, validate_uuid};
use crate::db::{
    now_rfc3339, DbPool, LoginRequest, LoginResponse, RegisterRequest, Role, Session,
    UpdateProfileRequest, UpdateUserStatusRequest, User, UserResponse, UserStatus,
};
use crate::policy::{grants, AccessContext, Capability};
use crate::AppState;

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a random opaque token
pub(crate) fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Create a bearer session for `user_id` and return the raw token
async fn create_session(pool: &DbPool, user_id: &str, ttl_hours: i64) -> Result<String, ApiError> {
    let token = generate_token();
    let token_hash = hash_token(&token);

    let expires_at = chrono::Utc::now()
        .checked_add_signed(chrono::Duration::hours(ttl_hours))
        .ok_or_else(|| ApiError::internal("Session lifetime out of range"))?
        .to_rfc3339();

    sqlx::query(
        "INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(&token_hash)
    .bind(&expires_at)
    .bind(now_rfc3339())
    .execute(pool)
    .await?;

    Ok(token)
}

/// Delete sessions whose expiry has passed. Returns the number removed.
pub async fn cleanup_expired_sessions(pool: &DbPool) -> Result<u64, sqlx::Error> {
    let sessions: Vec<Session> = sqlx::query_as("SELECT * FROM sessions")
        .fetch_all(pool)
        .await?;
    let now = chrono::Utc::now();

    let mut removed = 0;
    for session in sessions.iter().filter(|s| !session_is_live(s, now)) {
        removed += sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(&session.id)
            .execute(pool)
            .await?
            .rows_affected();
    }
    Ok(removed)
}

fn session_is_live(session: &Session, now: chrono::DateTime<chrono::Utc>) -> bool {
    chrono::DateTime::parse_from_rfc3339(&session.expires_at)
        .map(|expires| expires > now)
        .unwrap_or(false)
}

/// Create the bootstrap administrator if configured and not yet present
pub async fn ensure_admin_user(
    pool: &DbPool,
    email: &str,
    password: &Option<String>,
) -> anyhow::Result<()> {
    let Some(password) = password else {
        tracing::debug!("No admin password configured, skipping admin bootstrap");
        return Ok(());
    };

    let email = normalize_email(email);
    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        return Ok(());
    }

    let password_hash = hash_password(password)
        .map_err(|e| anyhow::anyhow!("Failed to hash admin password: {}", e))?;
    let now = now_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO users (id, name, email, password_hash, role, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind("Administrator")
    .bind(&email)
    .bind(&password_hash)
    .bind(Role::Admin)
    .bind(UserStatus::Active)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    tracing::info!(email = %email, "Created bootstrap admin user");
    Ok(())
}

async fn find_user(pool: &DbPool, id: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

async fn email_taken(pool: &DbPool, email: &str, except_id: Option<&str>) -> Result<bool, sqlx::Error> {
    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;
    Ok(match (existing, except_id) {
        (Some((id,)), Some(except)) => id != except,
        (Some(_), None) => true,
        (None, _) => false,
    })
}

/// Login endpoint
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let email = normalize_email(&request.email);
    if email.is_empty() || request.password.is_empty() {
        return Err(ApiError::validation_field(
            "email",
            "Email and password are required",
        ));
    }

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;

    let user = match user {
        Some(user) if verify_password(&request.password, &user.password_hash) => user,
        _ => {
            tracing::info!(email = %email, "Failed login attempt");
            return Err(ApiError::unauthorized("Invalid email or password"));
        }
    };

    let token = create_session(&state.db, &user.id, state.config.auth.session_ttl_hours).await?;
    tracing::info!(user_id = %user.id, "User logged in");

    Ok(Json(LoginResponse {
        token,
        user: UserResponse::from(user),
    }))
}

/// Registration endpoint. New accounts always get the `user` role.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<LoginResponse>), ApiError> {
    validate_register(&request)?;

    let email = normalize_email(&request.email);
    if email_taken(&state.db, &email, None).await? {
        return Err(ApiError::conflict("An account with this email already exists"));
    }

    let password_hash = hash_password(&request.password)
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))?;
    let phone = request
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string);

    let now = now_rfc3339();
    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        name: request.name.trim().to_string(),
        email,
        password_hash,
        phone,
        role: Role::User,
        status: UserStatus::Active,
        created_at: now.clone(),
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO users (id, name, email, password_hash, phone, role, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&user.id)
    .bind(&user.name)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.phone)
    .bind(user.role)
    .bind(user.status)
    .bind(&user.created_at)
    .bind(&user.updated_at)
    .execute(&state.db)
    .await?;

    let token = create_session(&state.db, &user.id, state.config.auth.session_ttl_hours).await?;
    tracing::info!(user_id = %user.id, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(LoginResponse {
            token,
            user: UserResponse::from(user),
        }),
    ))
}

/// Current profile of the bearer token's owner
pub async fn me(user: User) -> Json<UserResponse> {
    Json(UserResponse::from(user))
}

pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    validate_profile(&request)?;

    let email = request.email.as_deref().map(normalize_email);
    if let Some(email) = &email {
        if email_taken(&state.db, email, Some(&user.id)).await? {
            return Err(ApiError::conflict("An account with this email already exists"));
        }
    }

    let name = request.name.as_deref().map(str::trim).map(str::to_string);
    let phone = match request.phone.as_deref().map(str::trim) {
        Some("") => None,
        Some(phone) => Some(phone.to_string()),
        None => user.phone.clone(),
    };

    sqlx::query(
        r#"
        UPDATE users
        SET name = COALESCE(?, name), email = COALESCE(?, email), phone = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&name)
    .bind(&email)
    .bind(&phone)
    .bind(now_rfc3339())
    .bind(&user.id)
    .execute(&state.db)
    .await?;

    let updated = find_user(&state.db, &user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    tracing::info!(user_id = %user.id, "Profile updated");
    Ok(Json(UserResponse::from(updated)))
}

/// Reject callers whose role lacks `capability`
pub fn require_capability(user: &User, capability: Capability) -> Result<(), ApiError> {
    if grants(AccessContext::Authenticated(user.role), capability) {
        Ok(())
    } else {
        Err(ApiError::forbidden("Admin access required"))
    }
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    require_capability(&user, Capability::ManageUsers)?;

    let users: Vec<User> = sqlx::query_as("SELECT * FROM users ORDER BY created_at DESC")
        .fetch_all(&state.db)
        .await?;

    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

pub async fn update_user_status(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
    Json(request): Json<UpdateUserStatusRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    require_capability(&user, Capability::ManageUsers)?;
    validate_uuid(&id, "id").map_err(|e| ApiError::validation_field("id", e))?;

    let status: UserStatus = request
        .status
        .parse()
        .map_err(|e: String| ApiError::validation_field("status", e))?;
    if id == user.id {
        return Err(ApiError::bad_request("You cannot change your own status"));
    }

    let result = sqlx::query("UPDATE users SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status)
        .bind(now_rfc3339())
        .bind(&id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("User not found"));
    }

    let updated = find_user(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    tracing::info!(user_id = %id, status = status.as_str(), admin = %user.id, "User status changed");
    Ok(Json(UserResponse::from(updated)))
}

/// Delete an account. Bookings keep their `user_id`; accounts holding
/// active bookings must have them resolved first.
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_capability(&user, Capability::ManageUsers)?;
    validate_uuid(&id, "id").map_err(|e| ApiError::validation_field("id", e))?;

    if id == user.id {
        return Err(ApiError::bad_request("You cannot delete your own account"));
    }
    if find_user(&state.db, &id).await?.is_none() {
        return Err(ApiError::not_found("User not found"));
    }

    let active: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM test_drives WHERE user_id = ? AND status IN ('pending', 'confirmed')",
    )
    .bind(&id)
    .fetch_one(&state.db)
    .await?;
    if active.0 > 0 {
        return Err(ApiError::conflict(format!(
            "User has {} active test drive booking(s)",
            active.0
        )));
    }

    sqlx::query("DELETE FROM sessions WHERE user_id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;
    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    tracing::info!(user_id = %id, admin = %user.id, "User deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Extract the bearer token from request headers
fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Get the current user from a bearer token
pub async fn get_current_user(pool: &DbPool, token: &str) -> Result<User, ApiError> {
    let token_hash = hash_token(token);
    let session: Option<Session> = sqlx::query_as("SELECT * FROM sessions WHERE token_hash = ?")
        .bind(&token_hash)
        .fetch_optional(pool)
        .await?;

    let session = session
        .filter(|s| session_is_live(s, chrono::Utc::now()))
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;

    find_user(pool, &session.user_id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))
}

/// Extractor for getting the current authenticated user from a request
#[async_trait]
impl FromRequestParts<Arc<AppState>> for User {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
        get_current_user(&state.db, &token).await
    }
}
