//! In-person appointment slots.
//!
//! Two non-cancelled appointments on the same day must be at least
//! `booking_gap_minutes` apart. The handler runs [`check_availability`] first
//! to report which booking is in the way, then writes with a conditional
//! statement so two racing requests cannot both take the slot.

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;

use crate::db::{list_active_on_date, now_timestamp, Appointment, SLOT_FORMAT};

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("Date must be in YYYY-MM-DD format")]
    InvalidDate,
    #[error("Time must be HH:MM or h:mm AM/PM")]
    InvalidTime,
    #[error("Appointment time is in the past")]
    InPast,
    #[error("Another appointment is booked too close to this time")]
    Conflict {
        /// Time of the appointment in the way, when known
        existing_time: Option<String>,
    },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// A validated date and time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl Slot {
    pub fn at(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }

    pub fn date_string(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    /// Normalised `HH:MM`
    pub fn time_string(&self) -> String {
        self.time.format("%H:%M").to_string()
    }

    pub fn scheduled_at(&self) -> String {
        self.at().format(SLOT_FORMAT).to_string()
    }

    pub fn is_past(&self) -> bool {
        self.at() <= Local::now().naive_local()
    }
}

const TIME_FORMATS: &[&str] = &["%H:%M", "%H:%M:%S", "%I:%M %p", "%I:%M%p"];

pub fn parse_slot(date: &str, time: &str) -> Result<Slot, BookingError> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").map_err(|_| BookingError::InvalidDate)?;
    let time = time.trim();
    let time = TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(time, fmt).ok())
        .ok_or(BookingError::InvalidTime)?;
    Ok(Slot { date, time })
}

/// First appointment closer than `gap_minutes` to `slot`.
/// Exactly `gap_minutes` apart is allowed.
pub fn find_conflict(slot: NaiveDateTime, existing: &[Appointment], gap_minutes: i64) -> Option<&Appointment> {
    existing.iter().find(|other| match other.slot() {
        Some(other_slot) => (slot - other_slot).num_minutes().abs() < gap_minutes,
        None => false,
    })
}

/// Reject a slot that collides with a same-day booking
pub async fn check_availability(
    db: &SqlitePool,
    slot: &Slot,
    exclude_id: Option<&str>,
    gap_minutes: i64,
) -> Result<(), BookingError> {
    let same_day = list_active_on_date(db, &slot.date_string(), exclude_id).await?;
    match find_conflict(slot.at(), &same_day, gap_minutes) {
        Some(existing) => Err(BookingError::Conflict {
            existing_time: Some(existing.time.clone()),
        }),
        None => Ok(()),
    }
}

const GAP_GUARD: &str = "NOT EXISTS (SELECT 1 FROM appointments other \
     WHERE other.appointment_date = ? AND other.status != 'cancelled' AND other.id != ? \
     AND abs(strftime('%s', other.scheduled_at) - strftime('%s', ?)) < ?)";

/// Insert the appointment only if its slot is still free
pub async fn insert_if_free(
    conn: &mut SqliteConnection,
    appointment: &Appointment,
    gap_minutes: i64,
) -> Result<(), BookingError> {
    let sql = format!(
        "INSERT INTO appointments \
         (id, user_id, name, phone, address, email, appointment_date, appointment_time, scheduled_at, \
          status, notes, created_at, updated_at) \
         SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ? WHERE {}",
        GAP_GUARD
    );
    let result = sqlx::query(&sql)
        .bind(&appointment.id)
        .bind(&appointment.user_id)
        .bind(&appointment.name)
        .bind(&appointment.phone)
        .bind(&appointment.address)
        .bind(&appointment.email)
        .bind(&appointment.date)
        .bind(&appointment.time)
        .bind(&appointment.scheduled_at)
        .bind(appointment.status)
        .bind(&appointment.notes)
        .bind(&appointment.created_at)
        .bind(&appointment.updated_at)
        .bind(&appointment.date)
        .bind(&appointment.id)
        .bind(&appointment.scheduled_at)
        .bind(gap_minutes * 60)
        .execute(conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(BookingError::Conflict { existing_time: None });
    }
    Ok(())
}

/// Move an existing appointment to `slot` if nothing else is too close
pub async fn move_if_free(
    conn: &mut SqliteConnection,
    appointment_id: &str,
    slot: &Slot,
    gap_minutes: i64,
) -> Result<(), BookingError> {
    let sql = format!(
        "UPDATE appointments SET appointment_date = ?, appointment_time = ?, scheduled_at = ?, updated_at = ? \
         WHERE id = ? AND {}",
        GAP_GUARD
    );
    let date = slot.date_string();
    let scheduled_at = slot.scheduled_at();
    let result = sqlx::query(&sql)
        .bind(&date)
        .bind(slot.time_string())
        .bind(&scheduled_at)
        .bind(now_timestamp())
        .bind(appointment_id)
        .bind(&date)
        .bind(appointment_id)
        .bind(&scheduled_at)
        .bind(gap_minutes * 60)
        .execute(conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(BookingError::Conflict { existing_time: None });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::AppointmentStatus;

    fn appointment(id: &str, date: &str, time: &str) -> Appointment {
        let slot = parse_slot(date, time).unwrap();
        Appointment {
            id: id.to_string(),
            user_id: None,
            name: "Ada".to_string(),
            phone: "08012345678".to_string(),
            address: "1 Marina, Lagos".to_string(),
            email: None,
            date: slot.date_string(),
            time: slot.time_string(),
            scheduled_at: slot.scheduled_at(),
            status: AppointmentStatus::Pending,
            notes: None,
            created_at: "2025-01-01T00:00:00Z".to_string(),
            updated_at: "2025-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_parse_slot_formats() {
        let slot = parse_slot("2099-05-01", "14:30").unwrap();
        assert_eq!(slot.time_string(), "14:30");
        assert_eq!(slot.scheduled_at(), "2099-05-01 14:30:00");

        let slot = parse_slot("2099-05-01", "2:30 PM").unwrap();
        assert_eq!(slot.time_string(), "14:30");

        let slot = parse_slot("2099-05-01", "09:05 am").unwrap();
        assert_eq!(slot.time_string(), "09:05");

        assert!(matches!(parse_slot("01/05/2099", "10:00"), Err(BookingError::InvalidDate)));
        assert!(matches!(parse_slot("2099-05-01", "25:00"), Err(BookingError::InvalidTime)));
        assert!(matches!(parse_slot("2099-05-01", "noon"), Err(BookingError::InvalidTime)));
    }

    #[test]
    fn test_conflict_window() {
        let existing = vec![appointment("a", "2099-05-01", "10:00")];
        let at = |t: &str| parse_slot("2099-05-01", t).unwrap().at();

        assert!(find_conflict(at("10:45"), &existing, 60).is_some());
        assert!(find_conflict(at("09:01"), &existing, 60).is_some());
        assert!(find_conflict(at("10:00"), &existing, 60).is_some());
        assert!(find_conflict(at("11:00"), &existing, 60).is_none());
        assert!(find_conflict(at("09:00"), &existing, 60).is_none());
    }

    #[test]
    fn test_past_slot() {
        assert!(parse_slot("2000-01-01", "10:00").unwrap().is_past());
        assert!(!parse_slot("2099-01-01", "10:00").unwrap().is_past());
    }

    #[tokio::test]
    async fn test_conditional_insert_enforces_gap() {
        let db = crate::db::init_memory().await.unwrap();
        let mut conn = db.acquire().await.unwrap();

        insert_if_free(&mut conn, &appointment("a", "2099-05-01", "10:00"), 60).await.unwrap();

        let too_close = insert_if_free(&mut conn, &appointment("b", "2099-05-01", "10:45"), 60).await;
        assert!(matches!(too_close, Err(BookingError::Conflict { .. })));

        insert_if_free(&mut conn, &appointment("c", "2099-05-01", "11:00"), 60).await.unwrap();
        insert_if_free(&mut conn, &appointment("d", "2099-05-02", "10:15"), 60).await.unwrap();

        sqlx::query("UPDATE appointments SET status = 'cancelled' WHERE id = 'a'")
            .execute(&mut *conn)
            .await
            .unwrap();
        insert_if_free(&mut conn, &appointment("e", "2099-05-01", "09:30"), 60).await.unwrap();
    }

    #[tokio::test]
    async fn test_move_ignores_itself() {
        let db = crate::db::init_memory().await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        insert_if_free(&mut conn, &appointment("a", "2099-05-01", "10:00"), 60).await.unwrap();
        insert_if_free(&mut conn, &appointment("b", "2099-05-01", "12:00"), 60).await.unwrap();

        let nudge = parse_slot("2099-05-01", "10:30").unwrap();
        move_if_free(&mut conn, "a", &nudge, 60).await.unwrap();

        let clash = parse_slot("2099-05-01", "11:30").unwrap();
        assert!(matches!(
            move_if_free(&mut conn, "a", &clash, 60).await,
            Err(BookingError::Conflict { .. })
        ));
        drop(conn);

        let moved = crate::db::find_appointment(&db, "a").await.unwrap().unwrap();
        assert_eq!(moved.time, "10:30");
        assert_eq!(moved.scheduled_at, "2099-05-01 10:30:00");
    }
}
