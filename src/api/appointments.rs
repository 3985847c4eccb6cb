//! In-person appointment booking for walk-in fittings.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use sqlx::SqliteConnection;
use std::sync::Arc;

use crate::db::{
    find_appointment, insert_notification, list_appointments_admin, list_appointments_between,
    list_user_appointments, now_timestamp, AdminUpdateAppointmentRequest, Appointment, AppointmentListQuery,
    AppointmentResponse, AppointmentStatus, CreateAppointmentRequest, DateRangeQuery, NewNotification,
    NotificationKind, Paginated, User,
};
use crate::engine::{
    cancel_appointment_jobs, check_availability, enqueue_email, insert_if_free, move_if_free, parse_slot,
    schedule_appointment_reminders, BookingError, Slot,
};
use crate::notifications::templates;
use crate::AppState;

use super::auth::{AdminUser, OptionalUser};
use super::error::{ApiError, ValidationErrorBuilder};
use super::metrics::record_appointment_event;
use super::validation::{normalize_optional, require_uuid, validate_email, validate_phone, validate_required_text};

fn appointment_not_found() -> ApiError {
    ApiError::not_found("Appointment not found")
}

fn parse_status(value: &str) -> Result<AppointmentStatus, ApiError> {
    value
        .parse::<AppointmentStatus>()
        .map_err(|e| ApiError::validation_field("status", e))
}

async fn notify_booker(
    conn: &mut SqliteConnection,
    appointment: &Appointment,
    title: &str,
    message: String,
) -> Result<(), sqlx::Error> {
    if let Some(user_id) = appointment.user_id.as_deref() {
        insert_notification(conn, &NewNotification::new(user_id, NotificationKind::Appointment, title, message))
            .await?;
    }
    Ok(())
}

/// Book an in-person visit. Guests may book; a signed-in caller is linked
/// to the appointment.
pub async fn create_appointment(
    State(state): State<Arc<AppState>>,
    OptionalUser(user): OptionalUser,
    Json(req): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<AppointmentResponse>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_required_text(&req.name, "Name", 100) {
        errors.add("name", e);
    }
    if let Err(e) = validate_phone(req.phone.trim()) {
        errors.add("phone", e);
    }
    if let Err(e) = validate_required_text(&req.address, "Address", 300) {
        errors.add("address", e);
    }
    if let Some(email) = req.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
        if let Err(e) = validate_email(email) {
            errors.add("email", e);
        }
    }
    errors.finish()?;

    let slot = parse_slot(&req.date, &req.time)?;
    if slot.is_past() {
        return Err(BookingError::InPast.into());
    }

    let gap = state.config.scheduler.booking_gap_minutes;
    check_availability(&state.db, &slot, None, gap).await?;

    let email = normalize_optional(req.email)
        .map(|e| e.to_lowercase())
        .or_else(|| user.as_ref().map(|u| u.email.clone()));
    let now = now_timestamp();
    let appointment = Appointment {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user.as_ref().map(|u| u.id.clone()),
        name: req.name.trim().to_string(),
        phone: req.phone.trim().to_string(),
        address: req.address.trim().to_string(),
        email,
        date: slot.date_string(),
        time: slot.time_string(),
        scheduled_at: slot.scheduled_at(),
        status: AppointmentStatus::Pending,
        notes: normalize_optional(req.notes),
        created_at: now.clone(),
        updated_at: now,
    };

    let mut tx = state.db.begin().await?;
    insert_if_free(&mut tx, &appointment, gap).await?;
    notify_booker(
        &mut tx,
        &appointment,
        "Appointment booked",
        format!(
            "Your appointment on {} at {} has been booked",
            appointment.date, appointment.time
        ),
    )
    .await?;
    if let Some(to) = appointment.email.as_deref() {
        enqueue_email(
            &mut tx,
            templates::appointment_confirmation(to, &appointment),
            None,
            Some(&appointment.id),
        )
        .await?;
    }
    if let Some(admin_email) = state.config.email.admin_email.as_deref() {
        enqueue_email(
            &mut tx,
            templates::appointment_admin_alert(admin_email, &appointment),
            None,
            Some(&appointment.id),
        )
        .await?;
    }
    schedule_appointment_reminders(&mut tx, &appointment, &state.config.scheduler).await?;
    tx.commit().await?;

    record_appointment_event("booked");
    tracing::info!(
        appointment_id = %appointment.id,
        slot = %appointment.scheduled_at,
        guest = appointment.user_id.is_none(),
        "Appointment booked"
    );

    Ok((
        StatusCode::CREATED,
        Json(AppointmentResponse {
            message: "Appointment booked successfully".to_string(),
            appointment,
        }),
    ))
}

pub async fn list_appointments(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<Vec<Appointment>>, ApiError> {
    let appointments = list_user_appointments(&state.db, &user.id).await?;
    Ok(Json(appointments))
}

pub async fn get_appointment(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<Json<Appointment>, ApiError> {
    require_uuid(&id, "id")?;
    let appointment = find_appointment(&state.db, &id)
        .await?
        .filter(|a| a.user_id.as_deref() == Some(user.id.as_str()))
        .ok_or_else(appointment_not_found)?;
    Ok(Json(appointment))
}

/// The booker cancels their own appointment
pub async fn cancel_appointment(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<Json<AppointmentResponse>, ApiError> {
    require_uuid(&id, "id")?;
    let mut appointment = find_appointment(&state.db, &id)
        .await?
        .filter(|a| a.user_id.as_deref() == Some(user.id.as_str()))
        .ok_or_else(appointment_not_found)?;

    if matches!(
        appointment.status,
        AppointmentStatus::Completed | AppointmentStatus::Cancelled
    ) {
        return Err(ApiError::bad_request(format!(
            "Appointment cannot be cancelled (status: {})",
            appointment.status
        )));
    }

    appointment.status = AppointmentStatus::Cancelled;
    appointment.updated_at = now_timestamp();

    let mut tx = state.db.begin().await?;
    sqlx::query("UPDATE appointments SET status = ?, updated_at = ? WHERE id = ?")
        .bind(appointment.status)
        .bind(&appointment.updated_at)
        .bind(&appointment.id)
        .execute(&mut *tx)
        .await?;
    cancel_appointment_jobs(&mut tx, &appointment.id).await?;
    notify_booker(
        &mut tx,
        &appointment,
        "Appointment cancelled",
        format!(
            "Your appointment on {} at {} has been cancelled",
            appointment.date, appointment.time
        ),
    )
    .await?;
    tx.commit().await?;

    record_appointment_event("cancelled");
    tracing::info!(appointment_id = %appointment.id, "Appointment cancelled by booker");

    Ok(Json(AppointmentResponse {
        message: "Appointment cancelled successfully".to_string(),
        appointment,
    }))
}

pub async fn list_appointments_for_admin(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<AppointmentListQuery>,
) -> Result<Json<Paginated<Appointment>>, ApiError> {
    if let Some(ref status) = query.status {
        parse_status(status)?;
    }
    let appointments = list_appointments_admin(&state.db, &query).await?;
    Ok(Json(appointments))
}

/// Calendar view: every appointment between two dates, inclusive
pub async fn appointments_in_range(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(range): Query<DateRangeQuery>,
) -> Result<Json<Vec<Appointment>>, ApiError> {
    let start = NaiveDate::parse_from_str(range.start.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::validation_field("start", "Start date must be in YYYY-MM-DD format"))?;
    let end = NaiveDate::parse_from_str(range.end.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::validation_field("end", "End date must be in YYYY-MM-DD format"))?;
    if end < start {
        return Err(ApiError::validation_field("end", "End date must not be before start date"));
    }

    let appointments = list_appointments_between(
        &state.db,
        &start.format("%Y-%m-%d").to_string(),
        &end.format("%Y-%m-%d").to_string(),
    )
    .await?;
    Ok(Json(appointments))
}

pub async fn get_appointment_admin(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<Json<Appointment>, ApiError> {
    require_uuid(&id, "id")?;
    let appointment = find_appointment(&state.db, &id)
        .await?
        .ok_or_else(appointment_not_found)?;
    Ok(Json(appointment))
}

/// Admin edit: status, notes and rescheduling. A new slot goes through the
/// same gap check as a booking.
pub async fn update_appointment_admin(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    Json(req): Json<AdminUpdateAppointmentRequest>,
) -> Result<Json<AppointmentResponse>, ApiError> {
    require_uuid(&id, "id")?;
    let new_status = req.status.as_deref().map(parse_status).transpose()?;

    let mut appointment = find_appointment(&state.db, &id)
        .await?
        .ok_or_else(appointment_not_found)?;
    let previous_status = appointment.status;
    let previous_slot = appointment.scheduled_at.clone();

    let slot: Option<Slot> = if req.date.is_some() || req.time.is_some() {
        let date = req.date.as_deref().unwrap_or(&appointment.date);
        let time = req.time.as_deref().unwrap_or(&appointment.time);
        let slot = parse_slot(date, time)?;
        if slot.scheduled_at() != previous_slot && slot.is_past() {
            return Err(BookingError::InPast.into());
        }
        Some(slot)
    } else {
        None
    };

    if let Some(status) = new_status {
        appointment.status = status;
    }
    if req.notes.is_some() {
        appointment.notes = normalize_optional(req.notes);
    }

    let rescheduled = slot.map(|s| s.scheduled_at() != previous_slot).unwrap_or(false);
    let reactivated =
        previous_status == AppointmentStatus::Cancelled && appointment.status != AppointmentStatus::Cancelled;
    let cancelled =
        previous_status != AppointmentStatus::Cancelled && appointment.status == AppointmentStatus::Cancelled;

    // The slot the appointment will occupy, when it has to be checked again
    let claim = if appointment.status == AppointmentStatus::Cancelled {
        None
    } else if rescheduled {
        slot
    } else if reactivated {
        Some(parse_slot(&appointment.date, &appointment.time)?)
    } else {
        None
    };

    let gap = state.config.scheduler.booking_gap_minutes;
    if let Some(ref target) = claim {
        check_availability(&state.db, target, Some(&appointment.id), gap).await?;
    }
    if let Some(target) = slot.filter(|_| rescheduled) {
        appointment.date = target.date_string();
        appointment.time = target.time_string();
        appointment.scheduled_at = target.scheduled_at();
    }
    appointment.updated_at = now_timestamp();

    let mut tx = state.db.begin().await?;
    if let Some(ref target) = claim {
        move_if_free(&mut tx, &appointment.id, target, gap).await?;
    } else if rescheduled {
        // Cancelled appointments keep no claim on a slot
        sqlx::query(
            "UPDATE appointments SET appointment_date = ?, appointment_time = ?, scheduled_at = ? WHERE id = ?",
        )
        .bind(&appointment.date)
        .bind(&appointment.time)
        .bind(&appointment.scheduled_at)
        .bind(&appointment.id)
        .execute(&mut *tx)
        .await?;
    }
    sqlx::query("UPDATE appointments SET status = ?, notes = ?, updated_at = ? WHERE id = ?")
        .bind(appointment.status)
        .bind(&appointment.notes)
        .bind(&appointment.updated_at)
        .bind(&appointment.id)
        .execute(&mut *tx)
        .await?;

    if cancelled {
        cancel_appointment_jobs(&mut tx, &appointment.id).await?;
    } else if rescheduled || reactivated {
        cancel_appointment_jobs(&mut tx, &appointment.id).await?;
        schedule_appointment_reminders(&mut tx, &appointment, &state.config.scheduler).await?;
    }

    if rescheduled {
        notify_booker(
            &mut tx,
            &appointment,
            "Appointment rescheduled",
            format!(
                "Your appointment has been moved to {} at {}",
                appointment.date, appointment.time
            ),
        )
        .await?;
        if let Some(to) = appointment.email.as_deref() {
            enqueue_email(
                &mut tx,
                templates::appointment_confirmation(to, &appointment),
                None,
                Some(&appointment.id),
            )
            .await?;
        }
    } else if appointment.status != previous_status {
        notify_booker(
            &mut tx,
            &appointment,
            "Appointment updated",
            format!(
                "Your appointment on {} at {} is now {}",
                appointment.date, appointment.time, appointment.status
            ),
        )
        .await?;
    }
    tx.commit().await?;

    if rescheduled {
        record_appointment_event("rescheduled");
    }
    if cancelled {
        record_appointment_event("cancelled");
    }
    tracing::info!(
        appointment_id = %appointment.id,
        admin_id = %admin.id,
        status = %appointment.status,
        rescheduled,
        "Appointment updated by admin"
    );

    Ok(Json(AppointmentResponse {
        message: "Appointment updated successfully".to_string(),
        appointment,
    }))
}

pub async fn delete_appointment_admin(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_uuid(&id, "id")?;
    let appointment = find_appointment(&state.db, &id)
        .await?
        .ok_or_else(appointment_not_found)?;

    let mut tx = state.db.begin().await?;
    cancel_appointment_jobs(&mut tx, &appointment.id).await?;
    sqlx::query("DELETE FROM appointments WHERE id = ?")
        .bind(&appointment.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    record_appointment_event("deleted");
    tracing::info!(appointment_id = %appointment.id, admin_id = %admin.id, "Appointment deleted");
    Ok(StatusCode::NO_CONTENT)
}
