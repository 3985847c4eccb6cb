//! Admin dashboard aggregates.

use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::BTreeMap;

use super::order::Order;

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub total_users: i64,
    pub total_orders: i64,
    pub orders_by_status: BTreeMap<String, i64>,
    pub orders_by_payment_status: BTreeMap<String, i64>,
    /// Sum of `total_price` over paid orders
    pub total_revenue: f64,
    pub pending_appointments: i64,
    pub upcoming_appointments: i64,
    pub total_styles: i64,
    pub total_fabrics: i64,
    pub recent_orders: Vec<Order>,
}

async fn count(db: &SqlitePool, sql: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(sql).fetch_one(db).await
}

async fn grouped_counts(db: &SqlitePool, sql: &str) -> Result<BTreeMap<String, i64>, sqlx::Error> {
    let rows: Vec<(String, i64)> = sqlx::query_as(sql).fetch_all(db).await?;
    Ok(rows.into_iter().collect())
}

/// Gather dashboard numbers. `today` is the local date as `YYYY-MM-DD`.
pub async fn load_dashboard_stats(db: &SqlitePool, today: &str) -> Result<DashboardStats, sqlx::Error> {
    let total_revenue: f64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(total_price), 0.0) FROM orders WHERE payment_status = 'paid'",
    )
    .fetch_one(db)
    .await?;

    let upcoming_appointments: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM appointments WHERE appointment_date >= ? AND status IN ('pending', 'confirmed')",
    )
    .bind(today)
    .fetch_one(db)
    .await?;

    let recent_orders: Vec<Order> =
        sqlx::query_as("SELECT * FROM orders ORDER BY created_at DESC, rowid DESC LIMIT 5")
            .fetch_all(db)
            .await?;

    Ok(DashboardStats {
        total_users: count(db, "SELECT COUNT(*) FROM users").await?,
        total_orders: count(db, "SELECT COUNT(*) FROM orders").await?,
        orders_by_status: grouped_counts(db, "SELECT status, COUNT(*) FROM orders GROUP BY status").await?,
        orders_by_payment_status: grouped_counts(
            db,
            "SELECT payment_status, COUNT(*) FROM orders GROUP BY payment_status",
        )
        .await?,
        total_revenue,
        pending_appointments: count(db, "SELECT COUNT(*) FROM appointments WHERE status = 'pending'").await?,
        upcoming_appointments,
        total_styles: count(db, "SELECT COUNT(*) FROM styles").await?,
        total_fabrics: count(db, "SELECT COUNT(*) FROM fabrics").await?,
        recent_orders,
    })
}
