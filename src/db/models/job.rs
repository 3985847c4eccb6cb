//! Durable delayed jobs (reminders, progress updates, outbound email).

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use std::fmt;

use super::common::now_timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum JobKind {
    /// Email to the shop a few days before an order is due
    AdminDeliveryReminder,
    /// In-app progress update for the customer
    OrderProgress,
    /// Reminder on the day of an in-person appointment
    AppointmentReminder,
    /// Queued outbound email
    Email,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdminDeliveryReminder => write!(f, "admin_delivery_reminder"),
            Self::OrderProgress => write!(f, "order_progress"),
            Self::AppointmentReminder => write!(f, "appointment_reminder"),
            Self::Email => write!(f, "email"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScheduledJob {
    /// Job name; unique, so re-scheduling the same job is a no-op
    pub id: String,
    pub kind: JobKind,
    pub order_id: Option<String>,
    pub appointment_id: Option<String>,
    pub payload: String,
    pub run_at: String,
    pub status: JobStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A job about to be queued
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub id: String,
    pub kind: JobKind,
    pub order_id: Option<String>,
    pub appointment_id: Option<String>,
    pub payload: serde_json::Value,
    pub run_at: String,
}

/// Queue a job unless one with the same name already exists.
/// Returns whether a row was inserted.
pub async fn insert_job(conn: &mut SqliteConnection, job: &NewJob) -> Result<bool, sqlx::Error> {
    let now = now_timestamp();
    let result = sqlx::query(
        "INSERT OR IGNORE INTO scheduled_jobs \
         (id, kind, order_id, appointment_id, payload, run_at, status, attempts, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, 'pending', 0, ?, ?)",
    )
    .bind(&job.id)
    .bind(job.kind)
    .bind(&job.order_id)
    .bind(&job.appointment_id)
    .bind(job.payload.to_string())
    .bind(&job.run_at)
    .bind(&now)
    .bind(&now)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Remove the reminders of an order, including one a runner has claimed.
/// The runner's outcome update then matches no row. Queued emails are left alone.
pub async fn delete_order_jobs(conn: &mut SqliteConnection, order_id: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM scheduled_jobs WHERE order_id = ? AND kind != 'email'",
    )
    .bind(order_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn delete_appointment_jobs(
    conn: &mut SqliteConnection,
    appointment_id: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM scheduled_jobs WHERE appointment_id = ? AND kind != 'email'",
    )
    .bind(appointment_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn list_order_jobs(db: &SqlitePool, order_id: &str) -> Result<Vec<ScheduledJob>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM scheduled_jobs WHERE order_id = ? ORDER BY run_at, id")
        .bind(order_id)
        .fetch_all(db)
        .await
}

pub async fn list_appointment_jobs(
    db: &SqlitePool,
    appointment_id: &str,
) -> Result<Vec<ScheduledJob>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM scheduled_jobs WHERE appointment_id = ? ORDER BY run_at, id")
        .bind(appointment_id)
        .fetch_all(db)
        .await
}

/// Pending jobs whose time has come, oldest first
pub async fn due_jobs(db: &SqlitePool, now: &str, limit: i64) -> Result<Vec<ScheduledJob>, sqlx::Error> {
    sqlx::query_as(
        "SELECT * FROM scheduled_jobs WHERE status = 'pending' AND run_at <= ? ORDER BY run_at, id LIMIT ?",
    )
    .bind(now)
    .bind(limit)
    .fetch_all(db)
    .await
}

/// Compare-and-set `pending -> running`. Only one caller can win a job.
pub async fn claim_job(db: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE scheduled_jobs SET status = 'running', attempts = attempts + 1, updated_at = ? \
         WHERE id = ? AND status = 'pending'",
    )
    .bind(now_timestamp())
    .bind(id)
    .execute(db)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn mark_job_done(db: &SqlitePool, id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE scheduled_jobs SET status = 'done', last_error = NULL, updated_at = ? WHERE id = ?")
        .bind(now_timestamp())
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

/// Put a failed job back in the queue for another attempt at `run_at`
pub async fn mark_job_retry(db: &SqlitePool, id: &str, error: &str, run_at: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE scheduled_jobs SET status = 'pending', last_error = ?, run_at = ?, updated_at = ? WHERE id = ?",
    )
    .bind(error)
    .bind(run_at)
    .bind(now_timestamp())
    .bind(id)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn mark_job_failed(db: &SqlitePool, id: &str, error: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE scheduled_jobs SET status = 'failed', last_error = ?, updated_at = ? WHERE id = ?")
        .bind(error)
        .bind(now_timestamp())
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

/// Jobs left `running` by a crashed process go back to `pending`
pub async fn reset_stale_jobs(db: &SqlitePool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE scheduled_jobs SET status = 'pending', updated_at = ? WHERE status = 'running'")
        .bind(now_timestamp())
        .execute(db)
        .await?;
    Ok(result.rows_affected())
}
