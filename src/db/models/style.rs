//! Garment styles in the catalog.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::common::{like_pattern, parse_string_list, Paginated, Pagination};

pub const STYLE_GENDERS: &[&str] = &["Male", "Female", "Unisex"];
pub const STYLE_AGE_GROUPS: &[&str] = &["Adult", "Child", "Teen", "Elder"];

#[derive(Debug, Clone, FromRow)]
pub struct StyleRow {
    pub id: String,
    pub title: String,
    pub categories: String,
    pub gender: String,
    pub age_group: Option<String>,
    pub price: f64,
    pub yards_required: f64,
    pub image_url: String,
    pub image_key: Option<String>,
    pub description: Option<String>,
    pub details: Option<String>,
    pub colour: Option<String>,
    pub recommended_materials: String,
    pub tags: String,
    pub added_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Style {
    pub id: String,
    pub title: String,
    pub categories: Vec<String>,
    pub gender: String,
    pub age_group: Option<String>,
    pub price: f64,
    pub yards_required: f64,
    pub image_url: String,
    #[serde(skip_serializing)]
    pub image_key: Option<String>,
    pub description: Option<String>,
    pub details: Option<String>,
    pub colour: Option<String>,
    pub recommended_materials: Vec<String>,
    pub tags: Vec<String>,
    pub added_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<StyleRow> for Style {
    fn from(row: StyleRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            categories: parse_string_list(&row.categories),
            gender: row.gender,
            age_group: row.age_group,
            price: row.price,
            yards_required: row.yards_required,
            image_url: row.image_url,
            image_key: row.image_key,
            description: row.description,
            details: row.details,
            colour: row.colour,
            recommended_materials: parse_string_list(&row.recommended_materials),
            tags: parse_string_list(&row.tags),
            added_by: row.added_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateStyleRequest {
    pub title: String,
    #[serde(default)]
    pub categories: Vec<String>,
    pub gender: String,
    pub age_group: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub yards_required: f64,
    /// `data:` URL or an already hosted http(s) URL
    pub image: String,
    pub description: Option<String>,
    pub details: Option<String>,
    pub colour: Option<String>,
    #[serde(default)]
    pub recommended_materials: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateStyleRequest {
    pub title: Option<String>,
    pub categories: Option<Vec<String>>,
    pub gender: Option<String>,
    pub age_group: Option<String>,
    pub price: Option<f64>,
    pub yards_required: Option<f64>,
    pub image: Option<String>,
    pub description: Option<String>,
    pub details: Option<String>,
    pub colour: Option<String>,
    pub recommended_materials: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StyleQuery {
    pub search: Option<String>,
    pub tag: Option<String>,
    pub gender: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn find_style(db: &SqlitePool, id: &str) -> Result<Option<Style>, sqlx::Error> {
    let row: Option<StyleRow> = sqlx::query_as("SELECT * FROM styles WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(row.map(Style::from))
}

/// List styles newest first with optional filters
pub async fn list_styles(db: &SqlitePool, query: &StyleQuery) -> Result<Paginated<Style>, sqlx::Error> {
    let pagination = Pagination::new(query.page, query.limit, 20);

    let mut conditions = Vec::new();
    let mut bindings: Vec<String> = Vec::new();

    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        conditions.push(
            "(title LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\' OR colour LIKE ? ESCAPE '\\')"
                .to_string(),
        );
        let pattern = like_pattern(search);
        bindings.extend([pattern.clone(), pattern.clone(), pattern]);
    }

    if let Some(tag) = query.tag.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        conditions.push("EXISTS (SELECT 1 FROM json_each(styles.tags) WHERE json_each.value = ?)".to_string());
        bindings.push(tag.to_string());
    }

    if let Some(gender) = &query.gender {
        conditions.push("gender = ?".to_string());
        bindings.push(gender.clone());
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM styles {}", where_clause);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for binding in &bindings {
        count_query = count_query.bind(binding);
    }
    let total = count_query.fetch_one(db).await?;

    let sql = format!(
        "SELECT * FROM styles {} ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
        where_clause
    );
    let mut list_query = sqlx::query_as::<_, StyleRow>(&sql);
    for binding in &bindings {
        list_query = list_query.bind(binding);
    }
    let rows = list_query
        .bind(pagination.per_page)
        .bind(pagination.offset())
        .fetch_all(db)
        .await?;

    Ok(Paginated::new(rows, total, pagination).map(Style::from))
}
