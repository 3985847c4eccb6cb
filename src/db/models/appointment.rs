//! In-person appointments (fitting / measurement visits).

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::fmt;
use std::str::FromStr;

use super::common::{Paginated, Pagination};

/// Storage format of `appointments.scheduled_at` (wall-clock time of the shop)
pub const SLOT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "in-progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!(
                "Unknown appointment status '{}'. Expected one of: pending, confirmed, in-progress, completed, cancelled",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Appointment {
    pub id: String,
    pub user_id: Option<String>,
    pub name: String,
    pub phone: String,
    pub address: String,
    pub email: Option<String>,
    #[sqlx(rename = "appointment_date")]
    pub date: String,
    #[sqlx(rename = "appointment_time")]
    pub time: String,
    pub scheduled_at: String,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Appointment {
    pub fn slot(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.scheduled_at, SLOT_FORMAT).ok()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub name: String,
    pub phone: String,
    pub address: String,
    pub email: Option<String>,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM` or `h:mm AM`
    pub time: String,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AdminUpdateAppointmentRequest {
    pub status: Option<String>,
    pub notes: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AppointmentResponse {
    pub message: String,
    pub appointment: Appointment,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppointmentListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DateRangeQuery {
    /// Inclusive `YYYY-MM-DD`
    pub start: String,
    /// Inclusive `YYYY-MM-DD`
    pub end: String,
}

pub async fn find_appointment(db: &SqlitePool, id: &str) -> Result<Option<Appointment>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM appointments WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await
}

pub async fn list_user_appointments(
    db: &SqlitePool,
    user_id: &str,
) -> Result<Vec<Appointment>, sqlx::Error> {
    sqlx::query_as(
        "SELECT * FROM appointments WHERE user_id = ? ORDER BY scheduled_at DESC, rowid DESC",
    )
    .bind(user_id)
    .fetch_all(db)
    .await
}

/// Non-cancelled appointments on `date`, optionally excluding one id
pub async fn list_active_on_date(
    db: &SqlitePool,
    date: &str,
    exclude_id: Option<&str>,
) -> Result<Vec<Appointment>, sqlx::Error> {
    sqlx::query_as(
        "SELECT * FROM appointments WHERE appointment_date = ? AND status != 'cancelled' \
         AND (? IS NULL OR id != ?) ORDER BY scheduled_at",
    )
    .bind(date)
    .bind(exclude_id)
    .bind(exclude_id)
    .fetch_all(db)
    .await
}

pub async fn list_appointments_admin(
    db: &SqlitePool,
    query: &AppointmentListQuery,
) -> Result<Paginated<Appointment>, sqlx::Error> {
    let pagination = Pagination::new(query.page, query.limit, 20);

    let (where_clause, binding) = match &query.status {
        Some(status) => ("WHERE status = ?", Some(status.clone())),
        None => ("", None),
    };

    let count_sql = format!("SELECT COUNT(*) FROM appointments {}", where_clause);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(b) = &binding {
        count_query = count_query.bind(b);
    }
    let total = count_query.fetch_one(db).await?;

    let sql = format!(
        "SELECT * FROM appointments {} ORDER BY scheduled_at DESC, rowid DESC LIMIT ? OFFSET ?",
        where_clause
    );
    let mut list_query = sqlx::query_as::<_, Appointment>(&sql);
    if let Some(b) = &binding {
        list_query = list_query.bind(b);
    }
    let items = list_query
        .bind(pagination.per_page)
        .bind(pagination.offset())
        .fetch_all(db)
        .await?;

    Ok(Paginated::new(items, total, pagination))
}

pub async fn list_appointments_between(
    db: &SqlitePool,
    start: &str,
    end: &str,
) -> Result<Vec<Appointment>, sqlx::Error> {
    sqlx::query_as(
        "SELECT * FROM appointments WHERE appointment_date >= ? AND appointment_date <= ? \
         ORDER BY scheduled_at",
    )
    .bind(start)
    .bind(end)
    .fetch_all(db)
    .await
}
