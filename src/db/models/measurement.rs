//! Body measurement profiles.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::collections::BTreeMap;

use super::common::{like_pattern, Paginated, Pagination};

pub const MEASUREMENT_UNITS: &[&str] = &["cm", "in"];

#[derive(Debug, Clone, FromRow)]
pub struct MeasurementRow {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub unit: String,
    pub gender: Option<String>,
    pub size: Option<String>,
    pub age_bracket: Option<String>,
    pub data: String,
    pub photo_url: Option<String>,
    pub photo_key: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measurement {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub unit: String,
    pub gender: Option<String>,
    pub size: Option<String>,
    pub age_bracket: Option<String>,
    pub data: BTreeMap<String, f64>,
    pub photo_url: Option<String>,
    #[serde(skip_serializing)]
    pub photo_key: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<MeasurementRow> for Measurement {
    fn from(row: MeasurementRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            unit: row.unit,
            gender: row.gender,
            size: row.size,
            age_bracket: row.age_bracket,
            data: serde_json::from_str(&row.data).unwrap_or_default(),
            photo_url: row.photo_url,
            photo_key: row.photo_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Measurement with its owner, as shown to admins
#[derive(Debug, Clone, Serialize)]
pub struct MeasurementWithOwner {
    #[serde(flatten)]
    pub measurement: Measurement,
    pub owner_name: Option<String>,
    pub owner_email: Option<String>,
}

#[derive(Debug, FromRow)]
struct MeasurementOwnerRow {
    #[sqlx(flatten)]
    row: MeasurementRow,
    owner_name: Option<String>,
    owner_email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMeasurementRequest {
    pub name: String,
    pub unit: Option<String>,
    pub gender: Option<String>,
    pub size: Option<String>,
    pub age_bracket: Option<String>,
    #[serde(default)]
    pub data: BTreeMap<String, f64>,
    /// Optional photo as a `data:` URL
    pub photo: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateMeasurementRequest {
    pub name: Option<String>,
    pub unit: Option<String>,
    pub gender: Option<String>,
    pub size: Option<String>,
    pub age_bracket: Option<String>,
    pub data: Option<BTreeMap<String, f64>>,
    pub photo: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HasMeasurementResponse {
    pub has_measurement: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MeasurementAdminQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub gender: Option<String>,
    pub unit: Option<String>,
}

pub async fn find_measurement(db: &SqlitePool, id: &str) -> Result<Option<Measurement>, sqlx::Error> {
    let row: Option<MeasurementRow> = sqlx::query_as("SELECT * FROM measurements WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(row.map(Measurement::from))
}

/// Fetch a measurement only if it belongs to `user_id`
pub async fn find_owned_measurement(
    db: &SqlitePool,
    id: &str,
    user_id: &str,
) -> Result<Option<Measurement>, sqlx::Error> {
    let row: Option<MeasurementRow> =
        sqlx::query_as("SELECT * FROM measurements WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .fetch_optional(db)
            .await?;
    Ok(row.map(Measurement::from))
}

pub async fn list_user_measurements(
    db: &SqlitePool,
    user_id: &str,
) -> Result<Vec<Measurement>, sqlx::Error> {
    let rows: Vec<MeasurementRow> = sqlx::query_as(
        "SELECT * FROM measurements WHERE user_id = ? ORDER BY created_at DESC, rowid DESC",
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;
    Ok(rows.into_iter().map(Measurement::from).collect())
}

pub async fn list_measurements_admin(
    db: &SqlitePool,
    query: &MeasurementAdminQuery,
) -> Result<Paginated<MeasurementWithOwner>, sqlx::Error> {
    let pagination = Pagination::new(query.page, query.limit, 10);

    let mut conditions = Vec::new();
    let mut bindings: Vec<String> = Vec::new();

    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        conditions.push(
            "(m.name LIKE ? ESCAPE '\\' OR m.size LIKE ? ESCAPE '\\' OR m.age_bracket LIKE ? ESCAPE '\\' \
             OR u.name LIKE ? ESCAPE '\\' OR u.email LIKE ? ESCAPE '\\')"
                .to_string(),
        );
        let pattern = like_pattern(search);
        for _ in 0..5 {
            bindings.push(pattern.clone());
        }
    }

    if let Some(gender) = &query.gender {
        conditions.push("m.gender = ?".to_string());
        bindings.push(gender.clone());
    }

    if let Some(unit) = &query.unit {
        conditions.push("m.unit = ?".to_string());
        bindings.push(unit.clone());
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!(
        "SELECT COUNT(*) FROM measurements m LEFT JOIN users u ON u.id = m.user_id {}",
        where_clause
    );
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for binding in &bindings {
        count_query = count_query.bind(binding);
    }
    let total = count_query.fetch_one(db).await?;

    let sql = format!(
        "SELECT m.*, u.name AS owner_name, u.email AS owner_email \
         FROM measurements m LEFT JOIN users u ON u.id = m.user_id {} \
         ORDER BY m.created_at DESC, m.rowid DESC LIMIT ? OFFSET ?",
        where_clause
    );
    let mut list_query = sqlx::query_as::<_, MeasurementOwnerRow>(&sql);
    for binding in &bindings {
        list_query = list_query.bind(binding);
    }
    let rows = list_query
        .bind(pagination.per_page)
        .bind(pagination.offset())
        .fetch_all(db)
        .await?;

    Ok(Paginated::new(rows, total, pagination).map(|r| MeasurementWithOwner {
        measurement: Measurement::from(r.row),
        owner_name: r.owner_name,
        owner_email: r.owner_email,
    }))
}
