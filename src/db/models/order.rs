//! Orders with their style/material snapshots and pricing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use std::fmt;
use std::str::FromStr;

use super::common::{like_pattern, parse_timestamp, Paginated, Pagination};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum OrderStatus {
    Pending,
    InProgress,
    ReadyForPickup,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::ReadyForPickup => "ready-for-pickup",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Work has started or the order is closed; the customer can no longer
    /// edit or cancel it.
    pub fn is_locked(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::InProgress => "In progress",
            Self::ReadyForPickup => "Ready for pickup",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "in-progress" => Ok(Self::InProgress),
            "ready-for-pickup" => Ok(Self::ReadyForPickup),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!(
                "Unknown order status '{}'. Expected one of: pending, in-progress, ready-for-pickup, completed, cancelled",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unpaid" => Ok(Self::Unpaid),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            _ => Err(format!(
                "Unknown payment status '{}'. Expected one of: unpaid, paid, failed, refunded",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum OrderType {
    Online,
    InPerson,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::InPerson => "in-person",
        }
    }
}

impl FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "online" => Ok(Self::Online),
            "in-person" => Ok(Self::InPerson),
            _ => Err(format!("Unknown order type '{}'. Expected online or in-person", s)),
        }
    }
}

/// Style as it was when the order was placed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct StyleSnapshot {
    #[sqlx(rename = "style_title")]
    pub title: String,
    #[sqlx(rename = "style_price")]
    pub price: f64,
    #[sqlx(rename = "style_yards_required")]
    pub yards_required: f64,
    #[sqlx(rename = "style_image")]
    pub image: Option<String>,
    pub style_id: Option<String>,
}

/// Material as it was when the order was placed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MaterialSnapshot {
    #[sqlx(rename = "material_name")]
    pub name: String,
    #[sqlx(rename = "material_kind")]
    pub kind: Option<String>,
    #[sqlx(rename = "material_price_per_yard")]
    pub price_per_yard: f64,
    #[sqlx(rename = "material_image")]
    pub image: Option<String>,
    pub fabric_id: Option<String>,
}

/// `style.price + material.price_per_yard * style.yards_required`, to the kobo.
pub fn compute_total_price(style: &StyleSnapshot, material: &MaterialSnapshot) -> f64 {
    let total = style.price + material.price_per_yard * style.yards_required;
    (total * 100.0).round() / 100.0
}

/// Amount in minor currency units, as payment gateways report it
pub fn to_minor_units(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: String,
    pub user_id: Option<String>,
    pub customer_name: String,
    pub customer_email: String,
    pub order_type: OrderType,
    #[sqlx(flatten)]
    pub style: StyleSnapshot,
    #[sqlx(flatten)]
    pub material: MaterialSnapshot,
    pub measurement_id: Option<String>,
    pub notes: Option<String>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total_price: f64,
    pub payment_reference: Option<String>,
    pub paid_at: Option<String>,
    pub expected_delivery_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Order {
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }

    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.created_at)
    }

    pub fn recompute_total(&mut self) {
        self.total_price = compute_total_price(&self.style, &self.material);
    }
}

/// Inline style details supplied by the customer
#[derive(Debug, Clone, Deserialize)]
pub struct StyleInput {
    pub title: String,
    pub price: f64,
    #[serde(default)]
    pub yards_required: f64,
    pub image: Option<String>,
}

/// Inline material details supplied by the customer
#[derive(Debug, Clone, Deserialize)]
pub struct MaterialInput {
    pub name: String,
    pub kind: Option<String>,
    pub price_per_yard: f64,
    pub image: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub style_id: Option<String>,
    pub style: Option<StyleInput>,
    pub fabric_id: Option<String>,
    pub material: Option<MaterialInput>,
    pub measurement_id: String,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateOrderRequest {
    pub notes: Option<String>,
    pub measurement_id: Option<String>,
    pub style_id: Option<String>,
    pub style: Option<StyleInput>,
    pub fabric_id: Option<String>,
    pub material: Option<MaterialInput>,
}

impl UpdateOrderRequest {
    pub fn is_empty(&self) -> bool {
        self.notes.is_none()
            && self.measurement_id.is_none()
            && self.style_id.is_none()
            && self.style.is_none()
            && self.fabric_id.is_none()
            && self.material.is_none()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AdminUpdateOrderRequest {
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub order_type: Option<String>,
    pub notes: Option<String>,
    pub measurement_id: Option<String>,
    pub style_id: Option<String>,
    pub style: Option<StyleInput>,
    pub fabric_id: Option<String>,
    pub material: Option<MaterialInput>,
}

#[derive(Debug, Deserialize)]
pub struct PayOrderRequest {
    pub reference: String,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub message: String,
    pub order: Order,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct OrderListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<String>,
    pub payment_status: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AdminOrderQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub order_type: Option<String>,
    /// Customer name/email, style title, material name or id prefix
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

pub async fn find_order(db: &SqlitePool, id: &str) -> Result<Option<Order>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM orders WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await
}

pub async fn find_user_order(
    db: &SqlitePool,
    id: &str,
    user_id: &str,
) -> Result<Option<Order>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM orders WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .fetch_optional(db)
        .await
}

pub async fn insert_order(conn: &mut SqliteConnection, order: &Order) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO orders (
            id, user_id, customer_name, customer_email, order_type,
            style_title, style_price, style_yards_required, style_image, style_id,
            material_name, material_kind, material_price_per_yard, material_image, fabric_id,
            measurement_id, notes, status, payment_status, total_price,
            payment_reference, paid_at, expected_delivery_date, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&order.id)
    .bind(&order.user_id)
    .bind(&order.customer_name)
    .bind(&order.customer_email)
    .bind(order.order_type)
    .bind(&order.style.title)
    .bind(order.style.price)
    .bind(order.style.yards_required)
    .bind(&order.style.image)
    .bind(&order.style.style_id)
    .bind(&order.material.name)
    .bind(&order.material.kind)
    .bind(order.material.price_per_yard)
    .bind(&order.material.image)
    .bind(&order.material.fabric_id)
    .bind(&order.measurement_id)
    .bind(&order.notes)
    .bind(order.status)
    .bind(order.payment_status)
    .bind(order.total_price)
    .bind(&order.payment_reference)
    .bind(&order.paid_at)
    .bind(&order.expected_delivery_date)
    .bind(&order.created_at)
    .bind(&order.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Write back every mutable column of an order
pub async fn save_order(conn: &mut SqliteConnection, order: &Order) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE orders SET
            customer_name = ?, customer_email = ?, order_type = ?,
            style_title = ?, style_price = ?, style_yards_required = ?, style_image = ?, style_id = ?,
            material_name = ?, material_kind = ?, material_price_per_yard = ?, material_image = ?, fabric_id = ?,
            measurement_id = ?, notes = ?, status = ?, payment_status = ?, total_price = ?,
            payment_reference = ?, paid_at = ?, expected_delivery_date = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&order.customer_name)
    .bind(&order.customer_email)
    .bind(order.order_type)
    .bind(&order.style.title)
    .bind(order.style.price)
    .bind(order.style.yards_required)
    .bind(&order.style.image)
    .bind(&order.style.style_id)
    .bind(&order.material.name)
    .bind(&order.material.kind)
    .bind(order.material.price_per_yard)
    .bind(&order.material.image)
    .bind(&order.material.fabric_id)
    .bind(&order.measurement_id)
    .bind(&order.notes)
    .bind(order.status)
    .bind(order.payment_status)
    .bind(order.total_price)
    .bind(&order.payment_reference)
    .bind(&order.paid_at)
    .bind(&order.expected_delivery_date)
    .bind(&order.updated_at)
    .bind(&order.id)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn list_user_orders(
    db: &SqlitePool,
    user_id: &str,
    query: &OrderListQuery,
) -> Result<Paginated<Order>, sqlx::Error> {
    let pagination = Pagination::new(query.page, query.limit, 10);

    let mut conditions = vec!["user_id = ?".to_string()];
    let mut bindings: Vec<String> = vec![user_id.to_string()];

    if let Some(status) = &query.status {
        conditions.push("status = ?".to_string());
        bindings.push(status.clone());
    }

    if let Some(payment_status) = &query.payment_status {
        conditions.push("payment_status = ?".to_string());
        bindings.push(payment_status.clone());
    }

    let where_clause = format!("WHERE {}", conditions.join(" AND "));

    let count_sql = format!("SELECT COUNT(*) FROM orders {}", where_clause);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for binding in &bindings {
        count_query = count_query.bind(binding);
    }
    let total = count_query.fetch_one(db).await?;

    let sql = format!(
        "SELECT * FROM orders {} ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
        where_clause
    );
    let mut list_query = sqlx::query_as::<_, Order>(&sql);
    for binding in &bindings {
        list_query = list_query.bind(binding);
    }
    let items = list_query
        .bind(pagination.per_page)
        .bind(pagination.offset())
        .fetch_all(db)
        .await?;

    Ok(Paginated::new(items, total, pagination))
}

/// Whitelisted ORDER BY clause for the admin listing
fn admin_sort_clause(sort_by: Option<&str>, sort_order: Option<&str>) -> String {
    let column = match sort_by {
        Some("total_price") => "total_price",
        Some("status") => "status",
        _ => "created_at",
    };
    let direction = match sort_order.map(|s| s.to_lowercase()) {
        Some(ref s) if s == "asc" => "ASC",
        _ => "DESC",
    };
    format!("ORDER BY {} {}, rowid {}", column, direction, direction)
}

pub async fn list_orders_admin(
    db: &SqlitePool,
    query: &AdminOrderQuery,
) -> Result<Paginated<Order>, sqlx::Error> {
    let pagination = Pagination::new(query.page, query.limit, 10);

    let mut conditions = Vec::new();
    let mut bindings: Vec<String> = Vec::new();

    if let Some(status) = &query.status {
        conditions.push("status = ?".to_string());
        bindings.push(status.clone());
    }

    if let Some(payment_status) = &query.payment_status {
        conditions.push("payment_status = ?".to_string());
        bindings.push(payment_status.clone());
    }

    if let Some(order_type) = &query.order_type {
        conditions.push("order_type = ?".to_string());
        bindings.push(order_type.clone());
    }

    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        conditions.push(
            "(customer_name LIKE ? ESCAPE '\\' OR customer_email LIKE ? ESCAPE '\\' \
             OR style_title LIKE ? ESCAPE '\\' OR material_name LIKE ? ESCAPE '\\' OR id LIKE ?)"
                .to_string(),
        );
        let pattern = like_pattern(search);
        for _ in 0..4 {
            bindings.push(pattern.clone());
        }
        bindings.push(format!("{}%", search.replace(['%', '_'], "")));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM orders {}", where_clause);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for binding in &bindings {
        count_query = count_query.bind(binding);
    }
    let total = count_query.fetch_one(db).await?;

    let sql = format!(
        "SELECT * FROM orders {} {} LIMIT ? OFFSET ?",
        where_clause,
        admin_sort_clause(query.sort_by.as_deref(), query.sort_order.as_deref())
    );
    let mut list_query = sqlx::query_as::<_, Order>(&sql);
    for binding in &bindings {
        list_query = list_query.bind(binding);
    }
    let items = list_query
        .bind(pagination.per_page)
        .bind(pagination.offset())
        .fetch_all(db)
        .await?;

    Ok(Paginated::new(items, total, pagination))
}
