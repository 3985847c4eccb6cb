//! Admin user management and the dashboard summary.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Local;
use std::sync::Arc;

use crate::db::{
    email_taken_by_other, find_user_by_id, list_users, load_dashboard_stats, now_timestamp, AdminUpdateUserRequest,
    DashboardStats, Paginated, UserListQuery, UserResponse, ROLE_ADMIN, ROLE_USER,
};
use crate::AppState;

use super::auth::AdminUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{require_uuid, validate_email, validate_name, validate_one_of, validate_phone};

pub async fn list_users_admin(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<UserListQuery>,
) -> Result<Json<Paginated<UserResponse>>, ApiError> {
    let users = list_users(&state.db, &query).await?;
    Ok(Json(users))
}

pub async fn get_user_admin(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, ApiError> {
    require_uuid(&id, "id")?;
    let user = find_user_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(UserResponse::from(user)))
}

pub async fn update_user_admin(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    Json(req): Json<AdminUpdateUserRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    require_uuid(&id, "id")?;

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
    if let Some(ref role) = req.role {
        if let Err(e) = validate_one_of(role, &[ROLE_USER, ROLE_ADMIN], "role") {
            errors.add("role", e);
        }
    }
    errors.finish()?;

    let mut user = find_user_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if let Some(role) = req.role {
        if user.id == admin.id && role != ROLE_ADMIN {
            return Err(ApiError::bad_request("You cannot remove your own admin role"));
        }
        user.role = role;
    }
    if let Some(name) = req.name {
        user.name = name.trim().to_string();
    }
    if let Some(email) = req.email {
        let email = email.trim().to_lowercase();
        if email != user.email && email_taken_by_other(&state.db, &email, &user.id).await? {
            return Err(ApiError::conflict("Email is already in use"));
        }
        user.email = email;
    }
    if let Some(phone) = req.phone {
        user.phone = Some(phone.trim().to_string()).filter(|p| !p.is_empty());
    }
    if let Some(address) = req.address {
        user.address = Some(address.trim().to_string()).filter(|a| !a.is_empty());
    }
    if let Some(is_verified) = req.is_verified {
        user.is_verified = is_verified;
    }
    user.updated_at = now_timestamp();

    sqlx::query(
        "UPDATE users SET name = ?, email = ?, phone = ?, address = ?, role = ?, is_verified = ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind(&user.name)
    .bind(&user.email)
    .bind(&user.phone)
    .bind(&user.address)
    .bind(&user.role)
    .bind(user.is_verified)
    .bind(&user.updated_at)
    .bind(&user.id)
    .execute(&state.db)
    .await?;

    tracing::info!(user_id = %user.id, admin_id = %admin.id, "User updated by admin");
    Ok(Json(UserResponse::from(user)))
}

/// Hard delete. Measurements and notifications go with the account; orders
/// keep their customer snapshot.
pub async fn delete_user_admin(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_uuid(&id, "id")?;
    if id == admin.id {
        return Err(ApiError::bad_request("You cannot delete your own account"));
    }

    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("User not found"));
    }

    tracing::info!(user_id = %id, admin_id = %admin.id, "User deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn dashboard_stats(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> Result<Json<DashboardStats>, ApiError> {
    let today = Local::now().format("%Y-%m-%d").to_string();
    let stats = load_dashboard_stats(&state.db, &today).await?;
    Ok(Json(stats))
}
