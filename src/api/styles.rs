use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::db::{
    clean_string_list, find_style, list_styles, now_timestamp, serialize_string_list, CreateStyleRequest, Paginated,
    Style, StyleQuery, UpdateStyleRequest, STYLE_AGE_GROUPS, STYLE_GENDERS,
};
use crate::storage::{discard_object, store_image};
use crate::AppState;

use super::auth::AdminUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{
    normalize_optional, require_uuid, validate_amount, validate_one_of, validate_required_text,
};

const STYLE_IMAGE_FOLDER: &str = "catalog/styles";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db_err| db_err.is_unique_violation())
        .unwrap_or(false)
}

fn duplicate_title() -> ApiError {
    ApiError::conflict("A style with this title already exists")
}

/// List styles (public)
pub async fn list_styles_public(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StyleQuery>,
) -> Result<Json<Paginated<Style>>, ApiError> {
    let styles = list_styles(&state.db, &query).await?;
    Ok(Json(styles))
}

/// Get a single style (public)
pub async fn get_style(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Style>, ApiError> {
    require_uuid(&id, "id")?;
    let style = find_style(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Style not found"))?;
    Ok(Json(style))
}

pub async fn create_style(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Json(req): Json<CreateStyleRequest>,
) -> Result<(StatusCode, Json<Style>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_required_text(&req.title, "Title", 200) {
        errors.add("title", e);
    }
    if let Err(e) = validate_one_of(&req.gender, STYLE_GENDERS, "gender") {
        errors.add("gender", e);
    }
    if let Some(age_group) = req.age_group.as_deref().filter(|a| !a.is_empty()) {
        if let Err(e) = validate_one_of(age_group, STYLE_AGE_GROUPS, "age group") {
            errors.add("age_group", e);
        }
    }
    if let Err(e) = validate_amount(req.price, "Price") {
        errors.add("price", e);
    }
    if let Err(e) = validate_amount(req.yards_required, "Yards required") {
        errors.add("yards_required", e);
    }
    if req.image.trim().is_empty() {
        errors.add("image", "Image is required");
    }
    errors.finish()?;

    let image = store_image(
        state.storage.as_ref(),
        &req.image,
        STYLE_IMAGE_FOLDER,
        state.config.storage.max_image_bytes,
    )
    .await?;

    let now = now_timestamp();
    let style = Style {
        id: uuid::Uuid::new_v4().to_string(),
        title: req.title.trim().to_string(),
        categories: clean_string_list(req.categories),
        gender: req.gender,
        age_group: normalize_optional(req.age_group),
        price: req.price,
        yards_required: req.yards_required,
        image_url: image.url,
        image_key: image.key,
        description: normalize_optional(req.description),
        details: normalize_optional(req.details),
        colour: normalize_optional(req.colour),
        recommended_materials: clean_string_list(req.recommended_materials),
        tags: clean_string_list(req.tags),
        added_by: Some(admin.id),
        created_at: now.clone(),
        updated_at: now,
    };

    let inserted = sqlx::query(
        r#"
        INSERT INTO styles (id, title, categories, gender, age_group, price, yards_required, image_url, image_key,
                            description, details, colour, recommended_materials, tags, added_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&style.id)
    .bind(&style.title)
    .bind(serialize_string_list(&style.categories))
    .bind(&style.gender)
    .bind(&style.age_group)
    .bind(style.price)
    .bind(style.yards_required)
    .bind(&style.image_url)
    .bind(&style.image_key)
    .bind(&style.description)
    .bind(&style.details)
    .bind(&style.colour)
    .bind(serialize_string_list(&style.recommended_materials))
    .bind(serialize_string_list(&style.tags))
    .bind(&style.added_by)
    .bind(&style.created_at)
    .bind(&style.updated_at)
    .execute(&state.db)
    .await;

    if let Err(e) = inserted {
        // The upload is orphaned if the row never lands
        discard_object(state.storage.as_ref(), style.image_key.as_deref()).await;
        return Err(if is_unique_violation(&e) {
            duplicate_title()
        } else {
            e.into()
        });
    }

    tracing::info!(style_id = %style.id, title = %style.title, "Style created");
    Ok((StatusCode::CREATED, Json(style)))
}

pub async fn update_style(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateStyleRequest>,
) -> Result<Json<Style>, ApiError> {
    require_uuid(&id, "id")?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(ref title) = req.title {
        if let Err(e) = validate_required_text(title, "Title", 200) {
            errors.add("title", e);
        }
    }
    if let Some(ref gender) = req.gender {
        if let Err(e) = validate_one_of(gender, STYLE_GENDERS, "gender") {
            errors.add("gender", e);
        }
    }
    if let Some(age_group) = req.age_group.as_deref().filter(|a| !a.is_empty()) {
        if let Err(e) = validate_one_of(age_group, STYLE_AGE_GROUPS, "age group") {
            errors.add("age_group", e);
        }
    }
    if let Some(price) = req.price {
        if let Err(e) = validate_amount(price, "Price") {
            errors.add("price", e);
        }
    }
    if let Some(yards) = req.yards_required {
        if let Err(e) = validate_amount(yards, "Yards required") {
            errors.add("yards_required", e);
        }
    }
    errors.finish()?;

    let mut style = find_style(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Style not found"))?;

    if let Some(title) = req.title {
        style.title = title.trim().to_string();
    }
    if let Some(categories) = req.categories {
        style.categories = clean_string_list(categories);
    }
    if let Some(gender) = req.gender {
        style.gender = gender;
    }
    if req.age_group.is_some() {
        style.age_group = normalize_optional(req.age_group);
    }
    if let Some(price) = req.price {
        style.price = price;
    }
    if let Some(yards) = req.yards_required {
        style.yards_required = yards;
    }
    if req.description.is_some() {
        style.description = normalize_optional(req.description);
    }
    if req.details.is_some() {
        style.details = normalize_optional(req.details);
    }
    if req.colour.is_some() {
        style.colour = normalize_optional(req.colour);
    }
    if let Some(materials) = req.recommended_materials {
        style.recommended_materials = clean_string_list(materials);
    }
    if let Some(tags) = req.tags {
        style.tags = clean_string_list(tags);
    }

    let mut replaced_key = None;
    let mut uploaded = false;
    if let Some(image) = req.image.filter(|i| !i.trim().is_empty()) {
        let stored = store_image(
            state.storage.as_ref(),
            &image,
            STYLE_IMAGE_FOLDER,
            state.config.storage.max_image_bytes,
        )
        .await?;
        replaced_key = style.image_key.take();
        uploaded = true;
        style.image_url = stored.url;
        style.image_key = stored.key;
    }
    style.updated_at = now_timestamp();

    let updated = sqlx::query(
        r#"
        UPDATE styles SET title = ?, categories = ?, gender = ?, age_group = ?, price = ?, yards_required = ?,
                          image_url = ?, image_key = ?, description = ?, details = ?, colour = ?,
                          recommended_materials = ?, tags = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&style.title)
    .bind(serialize_string_list(&style.categories))
    .bind(&style.gender)
    .bind(&style.age_group)
    .bind(style.price)
    .bind(style.yards_required)
    .bind(&style.image_url)
    .bind(&style.image_key)
    .bind(&style.description)
    .bind(&style.details)
    .bind(&style.colour)
    .bind(serialize_string_list(&style.recommended_materials))
    .bind(serialize_string_list(&style.tags))
    .bind(&style.updated_at)
    .bind(&style.id)
    .execute(&state.db)
    .await;

    match updated {
        Ok(_) => {
            discard_object(state.storage.as_ref(), replaced_key.as_deref()).await;
        }
        Err(e) => {
            if uploaded {
                discard_object(state.storage.as_ref(), style.image_key.as_deref()).await;
            }
            return Err(if is_unique_violation(&e) {
                duplicate_title()
            } else {
                e.into()
            });
        }
    }

    tracing::info!(style_id = %style.id, "Style updated");
    Ok(Json(style))
}

pub async fn delete_style(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_uuid(&id, "id")?;
    let style = find_style(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Style not found"))?;

    sqlx::query("DELETE FROM styles WHERE id = ?")
        .bind(&style.id)
        .execute(&state.db)
        .await?;
    discard_object(state.storage.as_ref(), style.image_key.as_deref()).await;

    tracing::info!(style_id = %style.id, "Style deleted");
    Ok(StatusCode::NO_CONTENT)
}
