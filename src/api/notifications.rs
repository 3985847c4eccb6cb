//! In-app notification inbox endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use crate::db::{
    count_unread, find_notification, list_user_notifications, mark_all_read, mark_read, MarkAllReadResponse,
    Notification, UnreadCountResponse, User,
};
use crate::AppState;

use super::error::ApiError;
use super::validation::require_uuid;

/// Latest notifications for the caller, newest first
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<Vec<Notification>>, ApiError> {
    let notifications = list_user_notifications(&state.db, &user.id).await?;
    Ok(Json(notifications))
}

pub async fn unread_count(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<UnreadCountResponse>, ApiError> {
    let count = count_unread(&state.db, &user.id).await?;
    Ok(Json(UnreadCountResponse { count }))
}

pub async fn mark_all_notifications_read(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<MarkAllReadResponse>, ApiError> {
    let updated_count = mark_all_read(&state.db, &user.id).await?;
    tracing::debug!(user_id = %user.id, updated_count, "Notifications marked read");
    Ok(Json(MarkAllReadResponse { updated_count }))
}

pub async fn mark_notification_read(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<Json<Notification>, ApiError> {
    require_uuid(&id, "id")?;
    let mut notification = find_notification(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Notification not found"))?;
    if notification.user_id != user.id {
        return Err(ApiError::forbidden("You cannot modify this notification"));
    }

    if !notification.read {
        mark_read(&state.db, &notification.id).await?;
        notification.read = true;
    }
    Ok(Json(notification))
}
