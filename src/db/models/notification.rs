//! In-app notifications shown to customers.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use std::fmt;

use super::common::now_timestamp;

/// Number of notifications returned by the inbox listing
pub const INBOX_LIMIT: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum NotificationKind {
    General,
    OrderStatus,
    PaymentStatus,
    OrderProgress,
    DeliveryImminent,
    Appointment,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::General => write!(f, "general"),
            Self::OrderStatus => write!(f, "order_status"),
            Self::PaymentStatus => write!(f, "payment_status"),
            Self::OrderProgress => write!(f, "order_progress"),
            Self::DeliveryImminent => write!(f, "delivery_imminent"),
            Self::Appointment => write!(f, "appointment"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub order_id: Option<String>,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub read: bool,
    pub created_at: String,
}

/// A notification about to be written
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: String,
    pub order_id: Option<String>,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
}

impl NewNotification {
    pub fn new(
        user_id: impl Into<String>,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            order_id: None,
            title: title.into(),
            message: message.into(),
            kind,
        }
    }

    pub fn for_order(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }
}

#[derive(Debug, Serialize)]
pub struct MarkAllReadResponse {
    pub updated_count: u64,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub count: i64,
}

/// Append a notification; returns its id
pub async fn insert_notification(
    conn: &mut SqliteConnection,
    notification: &NewNotification,
) -> Result<String, sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO notifications (id, user_id, order_id, title, message, kind, read, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, 0, ?)",
    )
    .bind(&id)
    .bind(&notification.user_id)
    .bind(&notification.order_id)
    .bind(&notification.title)
    .bind(&notification.message)
    .bind(notification.kind)
    .bind(now_timestamp())
    .execute(conn)
    .await?;

    tracing::debug!(
        notification_id = %id,
        user_id = %notification.user_id,
        kind = %notification.kind,
        "Notification recorded"
    );

    Ok(id)
}

pub async fn list_user_notifications(
    db: &SqlitePool,
    user_id: &str,
) -> Result<Vec<Notification>, sqlx::Error> {
    sqlx::query_as(
        "SELECT * FROM notifications WHERE user_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
    )
    .bind(user_id)
    .bind(INBOX_LIMIT)
    .fetch_all(db)
    .await
}

pub async fn count_unread(db: &SqlitePool, user_id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = ? AND read = 0")
        .bind(user_id)
        .fetch_one(db)
        .await
}

pub async fn mark_all_read(db: &SqlitePool, user_id: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE notifications SET read = 1 WHERE user_id = ? AND read = 0")
        .bind(user_id)
        .execute(db)
        .await?;
    Ok(result.rows_affected())
}

pub async fn find_notification(db: &SqlitePool, id: &str) -> Result<Option<Notification>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM notifications WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await
}

/// Flag one notification as read. Marking it twice is harmless.
pub async fn mark_read(db: &SqlitePool, id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE notifications SET read = 1 WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    async fn seed_user(db: &SqlitePool, id: &str) {
        sqlx::query(
            "INSERT INTO users (id, name, email, password_hash, role, is_verified, created_at, updated_at) \
             VALUES (?, 'Ada', ?, 'x', 'user', 1, '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z')",
        )
        .bind(id)
        .bind(format!("{}@example.com", id))
        .execute(db)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_unread_count_and_mark_read() {
        let db = init_memory().await.unwrap();
        seed_user(&db, "u1").await;

        let mut conn = db.acquire().await.unwrap();
        let first = insert_notification(
            &mut conn,
            &NewNotification::new("u1", NotificationKind::General, "Hello", "First"),
        )
        .await
        .unwrap();
        insert_notification(
            &mut conn,
            &NewNotification::new("u1", NotificationKind::OrderStatus, "Order", "Second"),
        )
        .await
        .unwrap();
        drop(conn);

        assert_eq!(count_unread(&db, "u1").await.unwrap(), 2);

        mark_read(&db, &first).await.unwrap();
        mark_read(&db, &first).await.unwrap();
        assert_eq!(count_unread(&db, "u1").await.unwrap(), 1);
        assert!(find_notification(&db, &first).await.unwrap().unwrap().read);

        assert_eq!(mark_all_read(&db, "u1").await.unwrap(), 1);
        assert_eq!(mark_all_read(&db, "u1").await.unwrap(), 0);

        let inbox = list_user_notifications(&db, "u1").await.unwrap();
        assert_eq!(inbox.len(), 2);
        assert!(inbox.iter().all(|n| n.read));
    }
}
