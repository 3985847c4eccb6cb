use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::db::{
    clean_string_list, find_fabric, list_fabrics, now_timestamp, serialize_string_list, CreateFabricRequest, Fabric,
    FabricQuery, Paginated, UpdateFabricRequest, FABRIC_MATERIALS, FABRIC_QUALITIES, FABRIC_WEIGHTS,
};
use crate::storage::{discard_object, store_image};
use crate::AppState;

use super::auth::AdminUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{
    normalize_optional, require_uuid, validate_amount, validate_one_of, validate_required_text,
};

const FABRIC_IMAGE_FOLDER: &str = "catalog/fabrics";

/// List fabrics (public)
pub async fn list_fabrics_public(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FabricQuery>,
) -> Result<Json<Paginated<Fabric>>, ApiError> {
    let fabrics = list_fabrics(&state.db, &query).await?;
    Ok(Json(fabrics))
}

pub async fn get_fabric(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Fabric>, ApiError> {
    require_uuid(&id, "id")?;
    let fabric = find_fabric(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Fabric not found"))?;
    Ok(Json(fabric))
}

fn check_weight(errors: &mut ValidationErrorBuilder, weight: Option<&str>) {
    if let Some(weight) = weight.filter(|w| !w.is_empty()) {
        if let Err(e) = validate_one_of(weight, FABRIC_WEIGHTS, "weight") {
            errors.add("weight", e);
        }
    }
}

pub async fn create_fabric(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Json(req): Json<CreateFabricRequest>,
) -> Result<(StatusCode, Json<Fabric>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_required_text(&req.title, "Title", 200) {
        errors.add("title", e);
    }
    if let Err(e) = validate_one_of(&req.material, FABRIC_MATERIALS, "material") {
        errors.add("material", e);
    }
    if let Err(e) = validate_required_text(&req.color, "Color", 100) {
        errors.add("color", e);
    }
    if let Some(ref quality) = req.quality {
        if let Err(e) = validate_one_of(quality, FABRIC_QUALITIES, "quality") {
            errors.add("quality", e);
        }
    }
    if let Err(e) = validate_amount(req.price_per_yard, "Price per yard") {
        errors.add("price_per_yard", e);
    }
    check_weight(&mut errors, req.weight.as_deref());
    if req.image.trim().is_empty() {
        errors.add("image", "Image is required");
    }
    errors.finish()?;

    let image = store_image(
        state.storage.as_ref(),
        &req.image,
        FABRIC_IMAGE_FOLDER,
        state.config.storage.max_image_bytes,
    )
    .await?;

    let now = now_timestamp();
    let fabric = Fabric {
        id: uuid::Uuid::new_v4().to_string(),
        title: req.title.trim().to_string(),
        material: req.material,
        color: req.color.trim().to_string(),
        quality: req.quality.unwrap_or_else(|| "Medium".to_string()),
        price_per_yard: req.price_per_yard,
        image_url: image.url,
        image_key: image.key,
        description: normalize_optional(req.description),
        details: normalize_optional(req.details),
        width: normalize_optional(req.width),
        weight: normalize_optional(req.weight),
        care: normalize_optional(req.care),
        tags: clean_string_list(req.tags),
        added_by: Some(admin.id),
        created_at: now.clone(),
        updated_at: now,
    };

    let inserted = sqlx::query(
        r#"
        INSERT INTO fabrics (id, title, material, color, quality, price_per_yard, image_url, image_key,
                             description, details, width, weight, care, tags, added_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&fabric.id)
    .bind(&fabric.title)
    .bind(&fabric.material)
    .bind(&fabric.color)
    .bind(&fabric.quality)
    .bind(fabric.price_per_yard)
    .bind(&fabric.image_url)
    .bind(&fabric.image_key)
    .bind(&fabric.description)
    .bind(&fabric.details)
    .bind(&fabric.width)
    .bind(&fabric.weight)
    .bind(&fabric.care)
    .bind(serialize_string_list(&fabric.tags))
    .bind(&fabric.added_by)
    .bind(&fabric.created_at)
    .bind(&fabric.updated_at)
    .execute(&state.db)
    .await;

    if let Err(e) = inserted {
        discard_object(state.storage.as_ref(), fabric.image_key.as_deref()).await;
        return Err(e.into());
    }

    tracing::info!(fabric_id = %fabric.id, title = %fabric.title, "Fabric created");
    Ok((StatusCode::CREATED, Json(fabric)))
}

pub async fn update_fabric(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateFabricRequest>,
) -> Result<Json<Fabric>, ApiError> {
    require_uuid(&id, "id")?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(ref title) = req.title {
        if let Err(e) = validate_required_text(title, "Title", 200) {
            errors.add("title", e);
        }
    }
    if let Some(ref material) = req.material {
        if let Err(e) = validate_one_of(material, FABRIC_MATERIALS, "material") {
            errors.add("material", e);
        }
    }
    if let Some(ref color) = req.color {
        if let Err(e) = validate_required_text(color, "Color", 100) {
            errors.add("color", e);
        }
    }
    if let Some(ref quality) = req.quality {
        if let Err(e) = validate_one_of(quality, FABRIC_QUALITIES, "quality") {
            errors.add("quality", e);
        }
    }
    if let Some(price) = req.price_per_yard {
        if let Err(e) = validate_amount(price, "Price per yard") {
            errors.add("price_per_yard", e);
        }
    }
    check_weight(&mut errors, req.weight.as_deref());
    errors.finish()?;

    let mut fabric = find_fabric(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Fabric not found"))?;

    if let Some(title) = req.title {
        fabric.title = title.trim().to_string();
    }
    if let Some(material) = req.material {
        fabric.material = material;
    }
    if let Some(color) = req.color {
        fabric.color = color.trim().to_string();
    }
    if let Some(quality) = req.quality {
        fabric.quality = quality;
    }
    if let Some(price) = req.price_per_yard {
        fabric.price_per_yard = price;
    }
    if req.description.is_some() {
        fabric.description = normalize_optional(req.description);
    }
    if req.details.is_some() {
        fabric.details = normalize_optional(req.details);
    }
    if req.width.is_some() {
        fabric.width = normalize_optional(req.width);
    }
    if req.weight.is_some() {
        fabric.weight = normalize_optional(req.weight);
    }
    if req.care.is_some() {
        fabric.care = normalize_optional(req.care);
    }
    if let Some(tags) = req.tags {
        fabric.tags = clean_string_list(tags);
    }

    let mut replaced_key = None;
    let mut uploaded = false;
    if let Some(image) = req.image.filter(|i| !i.trim().is_empty()) {
        let stored = store_image(
            state.storage.as_ref(),
            &image,
            FABRIC_IMAGE_FOLDER,
            state.config.storage.max_image_bytes,
        )
        .await?;
        replaced_key = fabric.image_key.take();
        uploaded = true;
        fabric.image_url = stored.url;
        fabric.image_key = stored.key;
    }
    fabric.updated_at = now_timestamp();

    let updated = sqlx::query(
        r#"
        UPDATE fabrics SET title = ?, material = ?, color = ?, quality = ?, price_per_yard = ?, image_url = ?,
                           image_key = ?, description = ?, details = ?, width = ?, weight = ?, care = ?, tags = ?,
                           updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&fabric.title)
    .bind(&fabric.material)
    .bind(&fabric.color)
    .bind(&fabric.quality)
    .bind(fabric.price_per_yard)
    .bind(&fabric.image_url)
    .bind(&fabric.image_key)
    .bind(&fabric.description)
    .bind(&fabric.details)
    .bind(&fabric.width)
    .bind(&fabric.weight)
    .bind(&fabric.care)
    .bind(serialize_string_list(&fabric.tags))
    .bind(&fabric.updated_at)
    .bind(&fabric.id)
    .execute(&state.db)
    .await;

    if let Err(e) = updated {
        if uploaded {
            discard_object(state.storage.as_ref(), fabric.image_key.as_deref()).await;
        }
        return Err(e.into());
    }
    discard_object(state.storage.as_ref(), replaced_key.as_deref()).await;

    tracing::info!(fabric_id = %fabric.id, "Fabric updated");
    Ok(Json(fabric))
}

pub async fn delete_fabric(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_uuid(&id, "id")?;
    let fabric = find_fabric(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Fabric not found"))?;

    sqlx::query("DELETE FROM fabrics WHERE id = ?")
        .bind(&fabric.id)
        .execute(&state.db)
        .await?;
    discard_object(state.storage.as_ref(), fabric.image_key.as_deref()).await;

    tracing::info!(fabric_id = %fabric.id, "Fabric deleted");
    Ok(StatusCode::NO_CONTENT)
}
