use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::config::AuthConfig;
use crate::db::{
    email_taken_by_other, find_user_by_email, find_user_by_id, format_timestamp, now_timestamp, parse_timestamp,
    EmailOnlyRequest, LoginRequest, LoginResponse, MessageResponse, RegisterRequest, RegisterResponse,
    ResetPasswordRequest, UpdateProfileRequest, User, UserResponse, VerifyEmailRequest, ROLE_ADMIN, ROLE_USER,
};
use crate::engine::enqueue_email;
use crate::notifications::templates;
use crate::AppState;

use super::error::{ApiError, ValidationErrorBuilder};
use super::tokens::{issue_token_pair, verify_access_token, verify_refresh_token, TokenError, TokenPair};
use super::validation::{require_uuid, validate_email, validate_name, validate_password, validate_phone};

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

const RESET_REQUESTED_MESSAGE: &str = "If an account exists for that email, a reset link has been sent";

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

/// Generate a random token
fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Six-digit email verification code
fn generate_verification_code() -> String {
    rand::rng().random_range(100_000..1_000_000u32).to_string()
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

/// True while `expires_at` lies in the future
fn still_valid(expires_at: Option<&str>) -> bool {
    expires_at
        .and_then(parse_timestamp)
        .map(|at| at > Utc::now())
        .unwrap_or(false)
}

fn expiry_after(minutes: i64) -> String {
    format_timestamp(Utc::now() + Duration::minutes(minutes))
}

fn hashing_failed(e: argon2::password_hash::Error) -> ApiError {
    tracing::error!(error = %e, "Failed to hash password");
    ApiError::internal("Failed to process password")
}

fn auth_cookie(name: &'static str, value: String, max_age: time::Duration, secure: bool) -> Cookie<'static> {
    // Cross-site frontends only receive SameSite=None cookies, which browsers require to be Secure.
    let same_site = if secure { SameSite::None } else { SameSite::Lax };
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(same_site)
        .max_age(max_age)
        .build()
}

fn set_auth_cookies(jar: CookieJar, state: &AppState, pair: TokenPair) -> CookieJar {
    let secure = state.config.server.secure_cookies;
    let auth = &state.config.auth;
    jar.add(auth_cookie(
        ACCESS_COOKIE,
        pair.access_token,
        time::Duration::minutes(auth.access_token_ttl_minutes),
        secure,
    ))
    .add(auth_cookie(
        REFRESH_COOKIE,
        pair.refresh_token,
        time::Duration::days(auth.refresh_token_ttl_days),
        secure,
    ))
}

fn clear_auth_cookies(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(ACCESS_COOKIE).path("/"))
        .remove(Cookie::build(REFRESH_COOKIE).path("/"))
}

/// Issue a new token pair and remember the refresh token's hash, replacing the previous one
async fn start_session(db: &SqlitePool, config: &AuthConfig, user: &User) -> Result<TokenPair, ApiError> {
    let pair = issue_token_pair(config, &user.id, &user.role).map_err(|e| {
        tracing::error!(user_id = %user.id, error = %e, "Failed to issue tokens");
        ApiError::internal("Failed to issue session tokens")
    })?;

    sqlx::query("UPDATE users SET refresh_token_hash = ?, updated_at = ? WHERE id = ?")
        .bind(hash_token(&pair.refresh_token))
        .bind(now_timestamp())
        .bind(&user.id)
        .execute(db)
        .await?;

    Ok(pair)
}

/// Register a new account and email a verification code
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_name(&req.name) {
        errors.add("name", e);
    }
    if let Err(e) = validate_email(&req.email) {
        errors.add("email", e);
    }
    if let Err(e) = validate_password(&req.password) {
        errors.add("password", e);
    }
    errors.finish()?;

    let email = req.email.trim().to_lowercase();
    if find_user_by_email(&state.db, &email).await?.is_some() {
        return Err(ApiError::conflict("An account with this email already exists"));
    }

    let password_hash = hash_password(&req.password).map_err(hashing_failed)?;
    let id = uuid::Uuid::new_v4().to_string();
    let name = req.name.trim().to_string();
    let code = generate_verification_code();
    let ttl = state.config.auth.verification_code_ttl_minutes;
    let now = now_timestamp();

    let mut tx = state.db.begin().await?;
    sqlx::query(
        "INSERT INTO users (id, email, name, password_hash, role, is_verified, email_code, \
         email_code_expires_at, created_at, updated_at) VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&email)
    .bind(&name)
    .bind(&password_hash)
    .bind(ROLE_USER)
    .bind(&code)
    .bind(expiry_after(ttl))
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;
    enqueue_email(&mut tx, templates::verification_code(&email, &name, &code, ttl), None, None).await?;
    tx.commit().await?;

    tracing::info!(user_id = %id, "Registered new user");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "Registration successful. Check your email for the verification code".to_string(),
            user_id: id,
        }),
    ))
}

pub async fn verify_email(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VerifyEmailRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let invalid = || ApiError::bad_request("Invalid or expired verification code");

    let user = find_user_by_email(&state.db, &req.email).await?.ok_or_else(invalid)?;
    if user.is_verified {
        return Ok(Json(MessageResponse::new("Email already verified")));
    }

    let matches = user
        .email_code
        .as_deref()
        .map(|stored| constant_time_eq(stored, req.code.trim()))
        .unwrap_or(false);
    if !matches || !still_valid(user.email_code_expires_at.as_deref()) {
        return Err(invalid());
    }

    sqlx::query(
        "UPDATE users SET is_verified = 1, email_code = NULL, email_code_expires_at = NULL, updated_at = ? \
         WHERE id = ?",
    )
    .bind(now_timestamp())
    .bind(&user.id)
    .execute(&state.db)
    .await?;

    tracing::info!(user_id = %user.id, "Email verified");
    Ok(Json(MessageResponse::new("Email verified successfully")))
}

pub async fn resend_verification(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EmailOnlyRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let user = find_user_by_email(&state.db, &req.email)
        .await?
        .ok_or_else(|| ApiError::not_found("No account found for this email"))?;
    if user.is_verified {
        return Err(ApiError::bad_request("Email is already verified"));
    }

    let code = generate_verification_code();
    let ttl = state.config.auth.verification_code_ttl_minutes;

    let mut tx = state.db.begin().await?;
    sqlx::query("UPDATE users SET email_code = ?, email_code_expires_at = ?, updated_at = ? WHERE id = ?")
        .bind(&code)
        .bind(expiry_after(ttl))
        .bind(now_timestamp())
        .bind(&user.id)
        .execute(&mut *tx)
        .await?;
    enqueue_email(
        &mut tx,
        templates::verification_code(&user.email, &user.name, &code, ttl),
        None,
        None,
    )
    .await?;
    tx.commit().await?;

    Ok(Json(MessageResponse::new("A new verification code has been sent")))
}

/// Login endpoint
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let user = find_user_by_email(&state.db, &req.email)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    if !verify_password(&req.password, &user.password_hash) {
        return Err(ApiError::unauthorized("Invalid credentials"));
    }
    if !user.is_verified {
        return Err(ApiError::forbidden("Please verify your email before logging in"));
    }

    let pair = start_session(&state.db, &state.config.auth, &user).await?;
    tracing::info!(user_id = %user.id, "User logged in");

    Ok((
        set_auth_cookies(jar, &state, pair),
        Json(LoginResponse {
            user: UserResponse::from(user),
        }),
    ))
}

/// Exchange the refresh cookie for a new token pair
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let token = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or_else(|| ApiError::unauthorized("Refresh token missing"))?;

    let rejected = || ApiError::forbidden("Invalid refresh token");
    let claims = verify_refresh_token(&state.config.auth, &token).map_err(|_| rejected())?;
    let user = find_user_by_id(&state.db, &claims.sub).await?.ok_or_else(rejected)?;

    // Only the most recently issued refresh token is accepted
    let current = user
        .refresh_token_hash
        .as_deref()
        .map(|stored| constant_time_eq(stored, &hash_token(&token)))
        .unwrap_or(false);
    if !current {
        tracing::warn!(user_id = %user.id, "Refresh token reuse rejected");
        return Err(rejected());
    }

    let pair = start_session(&state.db, &state.config.auth, &user).await?;
    Ok((
        set_auth_cookies(jar, &state, pair),
        Json(LoginResponse {
            user: UserResponse::from(user),
        }),
    ))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    user: User,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), ApiError> {
    sqlx::query("UPDATE users SET refresh_token_hash = NULL, updated_at = ? WHERE id = ?")
        .bind(now_timestamp())
        .bind(&user.id)
        .execute(&state.db)
        .await?;

    tracing::info!(user_id = %user.id, "User logged out");
    Ok((clear_auth_cookies(jar), StatusCode::NO_CONTENT))
}

/// Current user
pub async fn me(user: User) -> Json<UserResponse> {
    Json(UserResponse::from(user))
}

pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Some(ref name) = req.name {
        if let Err(e) = validate_name(name) {
            errors.add("name", e);
        }
    }
    if let Some(ref email) = req.email {
        if let Err(e) = validate_email(email) {
            errors.add("email", e);
        }
    }
    if let Some(phone) = req.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        if let Err(e) = validate_phone(phone) {
            errors.add("phone", e);
        }
    }
    errors.finish()?;

    let mut updated = user;
    if let Some(name) = req.name {
        updated.name = name.trim().to_string();
    }
    if let Some(email) = req.email {
        let email = email.trim().to_lowercase();
        if email != updated.email && email_taken_by_other(&state.db, &email, &updated.id).await? {
            return Err(ApiError::conflict("Email is already in use"));
        }
        updated.email = email;
    }
    if let Some(phone) = req.phone {
        updated.phone = Some(phone.trim().to_string()).filter(|p| !p.is_empty());
    }
    if let Some(address) = req.address {
        updated.address = Some(address.trim().to_string()).filter(|a| !a.is_empty());
    }
    updated.updated_at = now_timestamp();

    sqlx::query("UPDATE users SET name = ?, email = ?, phone = ?, address = ?, updated_at = ? WHERE id = ?")
        .bind(&updated.name)
        .bind(&updated.email)
        .bind(&updated.phone)
        .bind(&updated.address)
        .bind(&updated.updated_at)
        .bind(&updated.id)
        .execute(&state.db)
        .await?;

    Ok(Json(UserResponse::from(updated)))
}

/// Start a password reset. The response is the same whether or not the account exists.
pub async fn request_reset(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EmailOnlyRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    validate_email(&req.email).map_err(|e| ApiError::validation_field("email", e))?;

    let Some(user) = find_user_by_email(&state.db, &req.email).await? else {
        tracing::debug!("Password reset requested for unknown email");
        return Ok(Json(MessageResponse::new(RESET_REQUESTED_MESSAGE)));
    };

    let token = generate_token();
    let ttl = state.config.auth.reset_token_ttl_minutes;
    let link = format!(
        "{}/reset-password?token={}&id={}",
        state.config.server.client_url.trim_end_matches('/'),
        token,
        user.id
    );

    let mut tx = state.db.begin().await?;
    sqlx::query("UPDATE users SET reset_token_hash = ?, reset_token_expires_at = ?, updated_at = ? WHERE id = ?")
        .bind(hash_token(&token))
        .bind(expiry_after(ttl))
        .bind(now_timestamp())
        .bind(&user.id)
        .execute(&mut *tx)
        .await?;
    enqueue_email(
        &mut tx,
        templates::password_reset(&user.email, &user.name, &link, ttl),
        None,
        None,
    )
    .await?;
    tx.commit().await?;

    tracing::info!(user_id = %user.id, "Password reset requested");
    Ok(Json(MessageResponse::new(RESET_REQUESTED_MESSAGE)))
}

pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    require_uuid(&req.id, "id")?;
    validate_password(&req.password).map_err(|e| ApiError::validation_field("password", e))?;

    let invalid = || ApiError::bad_request("Invalid or expired reset token");
    let user = find_user_by_id(&state.db, &req.id).await?.ok_or_else(invalid)?;

    let matches = user
        .reset_token_hash
        .as_deref()
        .map(|stored| constant_time_eq(stored, &hash_token(req.token.trim())))
        .unwrap_or(false);
    if !matches || !still_valid(user.reset_token_expires_at.as_deref()) {
        return Err(invalid());
    }

    let password_hash = hash_password(&req.password).map_err(hashing_failed)?;
    sqlx::query(
        "UPDATE users SET password_hash = ?, reset_token_hash = NULL, reset_token_expires_at = NULL, \
         refresh_token_hash = NULL, updated_at = ? WHERE id = ?",
    )
    .bind(&password_hash)
    .bind(now_timestamp())
    .bind(&user.id)
    .execute(&state.db)
    .await?;

    tracing::info!(user_id = %user.id, "Password reset completed");
    Ok(Json(MessageResponse::new("Password has been reset. Please log in")))
}

/// Create the configured bootstrap admin if it does not exist yet.
/// Returns true when an account was created.
pub async fn ensure_admin_user(db: &SqlitePool, config: &AuthConfig) -> anyhow::Result<bool> {
    let (Some(email), Some(password)) = (config.admin_email.as_deref(), config.admin_password.as_deref()) else {
        return Ok(false);
    };

    let email = email.trim().to_lowercase();
    if let Some(existing) = find_user_by_email(db, &email).await? {
        if !existing.is_admin() {
            tracing::warn!(user_id = %existing.id, "Configured admin email belongs to a non-admin account");
        }
        return Ok(false);
    }

    let password_hash =
        hash_password(password).map_err(|e| anyhow::anyhow!("Failed to hash admin password: {}", e))?;
    let id = uuid::Uuid::new_v4().to_string();
    let now = now_timestamp();
    sqlx::query(
        "INSERT INTO users (id, email, name, password_hash, role, is_verified, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(&id)
    .bind(&email)
    .bind("Administrator")
    .bind(&password_hash)
    .bind(ROLE_ADMIN)
    .bind(&now)
    .bind(&now)
    .execute(db)
    .await?;

    tracing::info!(email = %email, "Created admin user");
    Ok(true)
}

/// Extract the access token: the auth cookie first, then a Bearer header
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(cookie) = CookieJar::from_headers(headers).get(ACCESS_COOKIE) {
        return Some(cookie.value().to_string());
    }

    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Resolve an access token to the user it belongs to.
/// The row is re-read so deleted accounts lose access immediately.
pub async fn get_current_user(db: &SqlitePool, config: &AuthConfig, token: &str) -> Result<User, ApiError> {
    let claims = verify_access_token(config, token).map_err(|e| match e {
        TokenError::Expired => ApiError::unauthorized("Session expired"),
        _ => ApiError::unauthorized("Invalid access token"),
    })?;

    find_user_by_id(db, &claims.sub)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Account no longer exists"))
}

/// Extractor for getting the current authenticated user from a request
#[async_trait]
impl FromRequestParts<Arc<AppState>> for User {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers).ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
        get_current_user(&state.db, &state.config.auth, &token).await
    }
}

/// An authenticated user with the admin role
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let user = User::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(ApiError::forbidden("Admin access required"));
        }
        Ok(AdminUser(user))
    }
}

/// The caller if a valid access token was sent; anonymous otherwise
#[derive(Debug, Clone)]
pub struct OptionalUser(pub Option<User>);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for OptionalUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let Some(token) = extract_token(&parts.headers) else {
            return Ok(OptionalUser(None));
        };
        match get_current_user(&state.db, &state.config.auth, &token).await {
            Ok(user) => Ok(OptionalUser(Some(user))),
            Err(e) if e.status() == StatusCode::UNAUTHORIZED => Ok(OptionalUser(None)),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_password_hash_roundtrip() {
        let hash = hash_password("secret123").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("secret123", &hash));
        assert!(!verify_password("secret124", &hash));
        assert!(!verify_password("secret123", "not-a-hash"));
    }

    #[test]
    fn test_verification_code_shape() {
        for _ in 0..20 {
            let code = generate_verification_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_token_hash_is_stable() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert_eq!(hash_token(&token), hash_token(&token));
        assert_ne!(hash_token(&token), token);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("123456", "123456"));
        assert!(!constant_time_eq("123456", "123457"));
        assert!(!constant_time_eq("123456", "12345"));
    }

    #[test]
    fn test_still_valid() {
        assert!(still_valid(Some(&expiry_after(5))));
        assert!(!still_valid(Some(&expiry_after(-5))));
        assert!(!still_valid(Some("garbage")));
        assert!(!still_valid(None));
    }

    #[test]
    fn test_extract_token_prefers_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer header-token"));
        assert_eq!(extract_token(&headers).as_deref(), Some("header-token"));

        headers.insert("cookie", HeaderValue::from_static("theme=dark; accessToken=cookie-token"));
        assert_eq!(extract_token(&headers).as_deref(), Some("cookie-token"));

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_token(&headers), None);
    }

    #[test]
    fn test_auth_cookie_attributes() {
        let cookie = auth_cookie(ACCESS_COOKIE, "t".to_string(), time::Duration::minutes(15), true);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::None));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(time::Duration::minutes(15)));

        let dev = auth_cookie(ACCESS_COOKIE, "t".to_string(), time::Duration::minutes(15), false);
        assert_eq!(dev.same_site(), Some(SameSite::Lax));
    }

    #[tokio::test]
    async fn test_ensure_admin_user_is_idempotent() {
        let db = crate::db::init_memory().await.unwrap();
        let config = AuthConfig {
            admin_email: Some("Owner@Example.com".to_string()),
            admin_password: Some("owner-pass-1".to_string()),
            ..Default::default()
        };

        assert!(ensure_admin_user(&db, &config).await.unwrap());
        assert!(!ensure_admin_user(&db, &config).await.unwrap());

        let admin = find_user_by_email(&db, "owner@example.com").await.unwrap().unwrap();
        assert!(admin.is_admin());
        assert!(admin.is_verified);
        assert!(verify_password("owner-pass-1", &admin.password_hash));

        assert!(!ensure_admin_user(&db, &AuthConfig::default()).await.unwrap());
    }
}
