use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::db::{
    find_measurement, find_owned_measurement, list_measurements_admin, list_user_measurements, now_timestamp,
    CreateMeasurementRequest, HasMeasurementResponse, Measurement, MeasurementAdminQuery, MeasurementWithOwner,
    Paginated, UpdateMeasurementRequest, User, MEASUREMENT_UNITS,
};
use crate::storage::{discard_object, store_image};
use crate::AppState;

use super::auth::AdminUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{
    normalize_optional, require_uuid, validate_measurement_data, validate_one_of, validate_required_text,
};

fn photo_folder(user_id: &str) -> String {
    format!("users/{}/measurements", user_id)
}

fn validate_fields(
    name: Option<&str>,
    unit: Option<&str>,
    data: Option<&BTreeMap<String, f64>>,
) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Some(name) = name {
        if let Err(e) = validate_required_text(name, "Name", 100) {
            errors.add("name", e);
        }
    }
    if let Some(unit) = unit {
        if let Err(e) = validate_one_of(unit, MEASUREMENT_UNITS, "unit") {
            errors.add("unit", e);
        }
    }
    if let Some(data) = data {
        if let Err(e) = validate_measurement_data(data) {
            errors.add("data", e);
        }
    }
    errors.finish()
}

fn not_found() -> ApiError {
    ApiError::not_found("Measurement not found")
}

pub async fn create_measurement(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<CreateMeasurementRequest>,
) -> Result<(StatusCode, Json<Measurement>), ApiError> {
    validate_fields(Some(&req.name), req.unit.as_deref(), Some(&req.data))?;

    let photo = match req.photo.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        Some(input) => Some(
            store_image(
                state.storage.as_ref(),
                input,
                &photo_folder(&user.id),
                state.config.storage.max_image_bytes,
            )
            .await?,
        ),
        None => None,
    };

    let now = now_timestamp();
    let measurement = Measurement {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user.id.clone(),
        name: req.name.trim().to_string(),
        unit: req.unit.unwrap_or_else(|| "cm".to_string()),
        gender: normalize_optional(req.gender),
        size: normalize_optional(req.size),
        age_bracket: normalize_optional(req.age_bracket),
        data: req.data,
        photo_url: photo.as_ref().map(|p| p.url.clone()),
        photo_key: photo.and_then(|p| p.key),
        created_at: now.clone(),
        updated_at: now,
    };

    let inserted = sqlx::query(
        r#"
        INSERT INTO measurements (id, user_id, name, unit, gender, size, age_bracket, data, photo_url, photo_key,
                                  created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&measurement.id)
    .bind(&measurement.user_id)
    .bind(&measurement.name)
    .bind(&measurement.unit)
    .bind(&measurement.gender)
    .bind(&measurement.size)
    .bind(&measurement.age_bracket)
    .bind(serde_json::to_string(&measurement.data).unwrap_or_else(|_| "{}".to_string()))
    .bind(&measurement.photo_url)
    .bind(&measurement.photo_key)
    .bind(&measurement.created_at)
    .bind(&measurement.updated_at)
    .execute(&state.db)
    .await;

    if let Err(e) = inserted {
        discard_object(state.storage.as_ref(), measurement.photo_key.as_deref()).await;
        return Err(e.into());
    }

    tracing::info!(measurement_id = %measurement.id, user_id = %user.id, "Measurement created");
    Ok((StatusCode::CREATED, Json(measurement)))
}

/// The caller's measurements, newest first
pub async fn list_measurements(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<Vec<Measurement>>, ApiError> {
    let measurements = list_user_measurements(&state.db, &user.id).await?;
    Ok(Json(measurements))
}

pub async fn has_measurement(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<HasMeasurementResponse>, ApiError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM measurements WHERE user_id = ?")
        .bind(&user.id)
        .fetch_one(&state.db)
        .await?;
    Ok(Json(HasMeasurementResponse {
        has_measurement: count > 0,
    }))
}

pub async fn get_measurement(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<Json<Measurement>, ApiError> {
    require_uuid(&id, "id")?;
    let measurement = find_owned_measurement(&state.db, &id, &user.id)
        .await?
        .ok_or_else(not_found)?;
    Ok(Json(measurement))
}

pub async fn update_measurement(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
    Json(req): Json<UpdateMeasurementRequest>,
) -> Result<Json<Measurement>, ApiError> {
    require_uuid(&id, "id")?;
    validate_fields(req.name.as_deref(), req.unit.as_deref(), req.data.as_ref())?;

    let measurement = find_owned_measurement(&state.db, &id, &user.id)
        .await?
        .ok_or_else(not_found)?;
    let updated = apply_update(&state, measurement, req).await?;
    Ok(Json(updated))
}

pub async fn delete_measurement(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_uuid(&id, "id")?;
    let measurement = find_owned_measurement(&state.db, &id, &user.id)
        .await?
        .ok_or_else(not_found)?;
    remove(&state, measurement).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_measurements_for_admin(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<MeasurementAdminQuery>,
) -> Result<Json<Paginated<MeasurementWithOwner>>, ApiError> {
    let measurements = list_measurements_admin(&state.db, &query).await?;
    Ok(Json(measurements))
}

pub async fn get_measurement_admin(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<Json<Measurement>, ApiError> {
    require_uuid(&id, "id")?;
    let measurement = find_measurement(&state.db, &id).await?.ok_or_else(not_found)?;
    Ok(Json(measurement))
}

pub async fn update_measurement_admin(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateMeasurementRequest>,
) -> Result<Json<Measurement>, ApiError> {
    require_uuid(&id, "id")?;
    validate_fields(req.name.as_deref(), req.unit.as_deref(), req.data.as_ref())?;

    let measurement = find_measurement(&state.db, &id).await?.ok_or_else(not_found)?;
    let updated = apply_update(&state, measurement, req).await?;
    Ok(Json(updated))
}

pub async fn delete_measurement_admin(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_uuid(&id, "id")?;
    let measurement = find_measurement(&state.db, &id).await?.ok_or_else(not_found)?;
    remove(&state, measurement).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn apply_update(
    state: &AppState,
    mut measurement: Measurement,
    req: UpdateMeasurementRequest,
) -> Result<Measurement, ApiError> {
    if let Some(name) = req.name {
        measurement.name = name.trim().to_string();
    }
    if let Some(unit) = req.unit {
        measurement.unit = unit;
    }
    if req.gender.is_some() {
        measurement.gender = normalize_optional(req.gender);
    }
    if req.size.is_some() {
        measurement.size = normalize_optional(req.size);
    }
    if req.age_bracket.is_some() {
        measurement.age_bracket = normalize_optional(req.age_bracket);
    }
    if let Some(data) = req.data {
        measurement.data = data;
    }

    let mut replaced_key = None;
    let mut uploaded = false;
    if let Some(photo) = req.photo.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        let stored = store_image(
            state.storage.as_ref(),
            photo,
            &photo_folder(&measurement.user_id),
            state.config.storage.max_image_bytes,
        )
        .await?;
        replaced_key = measurement.photo_key.take();
        uploaded = true;
        measurement.photo_url = Some(stored.url);
        measurement.photo_key = stored.key;
    }
    measurement.updated_at = now_timestamp();

    let result = sqlx::query(
        r#"
        UPDATE measurements SET name = ?, unit = ?, gender = ?, size = ?, age_bracket = ?, data = ?,
                                photo_url = ?, photo_key = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&measurement.name)
    .bind(&measurement.unit)
    .bind(&measurement.gender)
    .bind(&measurement.size)
    .bind(&measurement.age_bracket)
    .bind(serde_json::to_string(&measurement.data).unwrap_or_else(|_| "{}".to_string()))
    .bind(&measurement.photo_url)
    .bind(&measurement.photo_key)
    .bind(&measurement.updated_at)
    .bind(&measurement.id)
    .execute(&state.db)
    .await;

    if let Err(e) = result {
        if uploaded {
            discard_object(state.storage.as_ref(), measurement.photo_key.as_deref()).await;
        }
        return Err(e.into());
    }
    discard_object(state.storage.as_ref(), replaced_key.as_deref()).await;

    tracing::info!(measurement_id = %measurement.id, "Measurement updated");
    Ok(measurement)
}

async fn remove(state: &AppState, measurement: Measurement) -> Result<(), ApiError> {
    sqlx::query("DELETE FROM measurements WHERE id = ?")
        .bind(&measurement.id)
        .execute(&state.db)
        .await?;
    discard_object(state.storage.as_ref(), measurement.photo_key.as_deref()).await;

    tracing::info!(measurement_id = %measurement.id, "Measurement deleted");
    Ok(())
}
