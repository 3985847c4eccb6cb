//! Fabrics in the catalog.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::common::{like_pattern, parse_string_list, Paginated, Pagination};

pub const FABRIC_MATERIALS: &[&str] = &[
    "Cotton", "Silk", "Linen", "Wool", "Polyester", "Rayon", "Satin", "Velvet", "Other",
];
pub const FABRIC_QUALITIES: &[&str] = &["High", "Medium", "Low"];
pub const FABRIC_WEIGHTS: &[&str] = &["Light", "Medium", "Heavy"];

#[derive(Debug, Clone, FromRow)]
pub struct FabricRow {
    pub id: String,
    pub title: String,
    pub material: String,
    pub color: String,
    pub quality: String,
    pub price_per_yard: f64,
    pub image_url: String,
    pub image_key: Option<String>,
    pub description: Option<String>,
    pub details: Option<String>,
    pub width: Option<String>,
    pub weight: Option<String>,
    pub care: Option<String>,
    pub tags: String,
    pub added_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fabric {
    pub id: String,
    pub title: String,
    pub material: String,
    pub color: String,
    pub quality: String,
    pub price_per_yard: f64,
    pub image_url: String,
    #[serde(skip_serializing)]
    pub image_key: Option<String>,
    pub description: Option<String>,
    pub details: Option<String>,
    pub width: Option<String>,
    pub weight: Option<String>,
    pub care: Option<String>,
    pub tags: Vec<String>,
    pub added_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<FabricRow> for Fabric {
    fn from(row: FabricRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            material: row.material,
            color: row.color,
            quality: row.quality,
            price_per_yard: row.price_per_yard,
            image_url: row.image_url,
            image_key: row.image_key,
            description: row.description,
            details: row.details,
            width: row.width,
            weight: row.weight,
            care: row.care,
            tags: parse_string_list(&row.tags),
            added_by: row.added_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateFabricRequest {
    pub title: String,
    pub material: String,
    pub color: String,
    pub quality: Option<String>,
    pub price_per_yard: f64,
    pub image: String,
    pub description: Option<String>,
    pub details: Option<String>,
    pub width: Option<String>,
    pub weight: Option<String>,
    pub care: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateFabricRequest {
    pub title: Option<String>,
    pub material: Option<String>,
    pub color: Option<String>,
    pub quality: Option<String>,
    pub price_per_yard: Option<f64>,
    pub image: Option<String>,
    pub description: Option<String>,
    pub details: Option<String>,
    pub width: Option<String>,
    pub weight: Option<String>,
    pub care: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FabricQuery {
    pub search: Option<String>,
    pub tag: Option<String>,
    pub material: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn find_fabric(db: &SqlitePool, id: &str) -> Result<Option<Fabric>, sqlx::Error> {
    let row: Option<FabricRow> = sqlx::query_as("SELECT * FROM fabrics WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(row.map(Fabric::from))
}

pub async fn list_fabrics(
    db: &SqlitePool,
    query: &FabricQuery,
) -> Result<Paginated<Fabric>, sqlx::Error> {
    let pagination = Pagination::new(query.page, query.limit, 20);

    let mut conditions = Vec::new();
    let mut bindings: Vec<String> = Vec::new();

    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        conditions.push(
            "(title LIKE ? ESCAPE '\\' OR color LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\')"
                .to_string(),
        );
        let pattern = like_pattern(search);
        bindings.extend([pattern.clone(), pattern.clone(), pattern]);
    }

    if let Some(tag) = query.tag.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        conditions.push("EXISTS (SELECT 1 FROM json_each(fabrics.tags) WHERE json_each.value = ?)".to_string());
        bindings.push(tag.to_string());
    }

    if let Some(material) = &query.material {
        conditions.push("material = ?".to_string());
        bindings.push(material.clone());
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM fabrics {}", where_clause);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for binding in &bindings {
        count_query = count_query.bind(binding);
    }
    let total = count_query.fetch_one(db).await?;

    let sql = format!(
        "SELECT * FROM fabrics {} ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
        where_clause
    );
    let mut list_query = sqlx::query_as::<_, FabricRow>(&sql);
    for binding in &bindings {
        list_query = list_query.bind(binding);
    }
    let rows = list_query
        .bind(pagination.per_page)
        .bind(pagination.offset())
        .fetch_all(db)
        .await?;

    Ok(Paginated::new(rows, total, pagination).map(Fabric::from))
}
