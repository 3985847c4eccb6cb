//! Online orders: placement, customer edits, cancellation, payment and the
//! admin back office.
//!
//! Every state change writes its notification, outbox emails and scheduled
//! jobs in the same transaction as the order row. Pool reads (catalog,
//! measurement ownership, uploads) all happen before the transaction opens.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use sqlx::SqliteConnection;
use std::sync::Arc;

use crate::db::{
    find_fabric, find_measurement, find_order, find_owned_measurement, find_style, find_user_order,
    format_timestamp, insert_notification, insert_order, list_orders_admin, list_user_orders, now_timestamp,
    save_order, to_minor_units, AdminOrderQuery, AdminUpdateOrderRequest, CreateOrderRequest, MaterialInput,
    MaterialSnapshot, NewNotification, NotificationKind, Order, OrderListQuery, OrderResponse, OrderStatus,
    OrderType, Paginated, PayOrderRequest, PaymentStatus, StyleInput, StyleSnapshot, UpdateOrderRequest, User,
};
use crate::engine::{cancel_order_jobs, enqueue_email, expected_delivery, schedule_order_jobs};
use crate::notifications::templates;
use crate::storage::{discard_object, store_image};
use crate::AppState;

use super::auth::AdminUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::metrics::record_order_event;
use super::validation::{
    normalize_optional, require_uuid, validate_amount, validate_payment_reference, validate_required_text,
};

const ORDER_STYLE_FOLDER: &str = "orders/styles";
const ORDER_MATERIAL_FOLDER: &str = "orders/materials";

fn order_not_found() -> ApiError {
    ApiError::not_found("Order not found")
}

fn parse_field<T: std::str::FromStr<Err = String>>(value: &str, field: &str) -> Result<T, ApiError> {
    value
        .parse::<T>()
        .map_err(|e| ApiError::validation_field(field, e))
}

/// Upload an inline image if one was given; returns the URL and the key to
/// clean up should the order never be written.
async fn store_optional_image(
    state: &AppState,
    image: Option<&str>,
    folder: &str,
) -> Result<(Option<String>, Option<String>), ApiError> {
    match image.map(str::trim).filter(|i| !i.is_empty()) {
        Some(input) => {
            let stored = store_image(state.storage.as_ref(), input, folder, state.config.storage.max_image_bytes)
                .await?;
            Ok((Some(stored.url), stored.key))
        }
        None => Ok((None, None)),
    }
}

/// Snapshot a catalog style by id, or the customer's inline description of one
async fn resolve_style(
    state: &AppState,
    style_id: Option<&str>,
    input: Option<&StyleInput>,
    uploads: &mut Vec<String>,
) -> Result<StyleSnapshot, ApiError> {
    if let Some(style_id) = style_id {
        require_uuid(style_id, "style_id")?;
        let style = find_style(&state.db, style_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Style not found"))?;
        return Ok(StyleSnapshot {
            title: style.title,
            price: style.price,
            yards_required: style.yards_required,
            image: Some(style.image_url),
            style_id: Some(style.id),
        });
    }

    let input = input.ok_or_else(|| ApiError::validation_field("style", "A style_id or style details are required"))?;
    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_required_text(&input.title, "Style title", 200) {
        errors.add("style.title", e);
    }
    if let Err(e) = validate_amount(input.price, "Style price") {
        errors.add("style.price", e);
    }
    if let Err(e) = validate_amount(input.yards_required, "Yards required") {
        errors.add("style.yards_required", e);
    }
    errors.finish()?;

    let (image, key) = store_optional_image(state, input.image.as_deref(), ORDER_STYLE_FOLDER).await?;
    uploads.extend(key);
    Ok(StyleSnapshot {
        title: input.title.trim().to_string(),
        price: input.price,
        yards_required: input.yards_required,
        image,
        style_id: None,
    })
}

/// Snapshot a catalog fabric by id, or the customer's inline material
async fn resolve_material(
    state: &AppState,
    fabric_id: Option<&str>,
    input: Option<&MaterialInput>,
    uploads: &mut Vec<String>,
) -> Result<MaterialSnapshot, ApiError> {
    if let Some(fabric_id) = fabric_id {
        require_uuid(fabric_id, "fabric_id")?;
        let fabric = find_fabric(&state.db, fabric_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Fabric not found"))?;
        return Ok(MaterialSnapshot {
            name: fabric.title,
            kind: Some(fabric.material),
            price_per_yard: fabric.price_per_yard,
            image: Some(fabric.image_url),
            fabric_id: Some(fabric.id),
        });
    }

    let input = input
        .ok_or_else(|| ApiError::validation_field("material", "A fabric_id or material details are required"))?;
    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_required_text(&input.name, "Material name", 200) {
        errors.add("material.name", e);
    }
    if let Err(e) = validate_amount(input.price_per_yard, "Price per yard") {
        errors.add("material.price_per_yard", e);
    }
    errors.finish()?;

    let (image, key) = store_optional_image(state, input.image.as_deref(), ORDER_MATERIAL_FOLDER).await?;
    uploads.extend(key);
    Ok(MaterialSnapshot {
        name: input.name.trim().to_string(),
        kind: normalize_optional(input.kind.clone()),
        price_per_yard: input.price_per_yard,
        image,
        fabric_id: None,
    })
}

async fn discard_uploads(state: &AppState, uploads: &[String]) {
    for key in uploads {
        discard_object(state.storage.as_ref(), Some(key)).await;
    }
}

/// In-app notification for the order's owner, when it still has one
async fn notify_owner(
    conn: &mut SqliteConnection,
    order: &Order,
    kind: NotificationKind,
    title: &str,
    message: String,
) -> Result<(), sqlx::Error> {
    if let Some(user_id) = order.user_id.as_deref() {
        insert_notification(conn, &NewNotification::new(user_id, kind, title, message).for_order(&order.id)).await?;
    }
    Ok(())
}

fn mark_paid(order: &mut Order, reference: Option<String>, delivery_days: i64) {
    let now = now_timestamp();
    order.payment_status = PaymentStatus::Paid;
    if order.status == OrderStatus::Pending {
        order.status = OrderStatus::InProgress;
    }
    if order.paid_at.is_none() {
        order.paid_at = Some(now.clone());
    }
    if reference.is_some() {
        order.payment_reference = reference;
    }
    if order.expected_delivery_date.is_none() {
        order.expected_delivery_date = expected_delivery(order, delivery_days).map(format_timestamp);
    }
    order.updated_at = now;
}

/// Place an order
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    require_uuid(&req.measurement_id, "measurement_id")?;
    if find_owned_measurement(&state.db, &req.measurement_id, &user.id).await?.is_none() {
        return Err(ApiError::not_found("Measurement not found"));
    }

    let mut uploads = Vec::new();
    let snapshots = async {
        let style = resolve_style(&state, req.style_id.as_deref(), req.style.as_ref(), &mut uploads).await?;
        let material =
            resolve_material(&state, req.fabric_id.as_deref(), req.material.as_ref(), &mut uploads).await?;
        Ok::<_, ApiError>((style, material))
    }
    .await;
    let (style, material) = match snapshots {
        Ok(pair) => pair,
        Err(e) => {
            discard_uploads(&state, &uploads).await;
            return Err(e);
        }
    };

    let now = now_timestamp();
    let mut order = Order {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: Some(user.id.clone()),
        customer_name: user.name.clone(),
        customer_email: user.email.clone(),
        order_type: OrderType::Online,
        style,
        material,
        measurement_id: Some(req.measurement_id),
        notes: normalize_optional(req.notes),
        status: OrderStatus::Pending,
        payment_status: PaymentStatus::Unpaid,
        total_price: 0.0,
        payment_reference: None,
        paid_at: None,
        expected_delivery_date: None,
        created_at: now.clone(),
        updated_at: now,
    };
    order.recompute_total();

    let written = async {
        let mut tx = state.db.begin().await?;
        insert_order(&mut tx, &order).await?;
        notify_owner(
            &mut tx,
            &order,
            NotificationKind::OrderStatus,
            "Order placed",
            format!(
                "Your order {} for {} has been placed. Total: {:.2}",
                order.short_id(),
                order.style.title,
                order.total_price
            ),
        )
        .await?;
        enqueue_email(&mut tx, templates::order_placed_customer(&order), Some(&order.id), None).await?;
        if let Some(admin_email) = state.config.email.admin_email.as_deref() {
            enqueue_email(&mut tx, templates::order_placed_admin(admin_email, &order), Some(&order.id), None)
                .await?;
        }
        tx.commit().await
    }
    .await;

    if let Err(e) = written {
        discard_uploads(&state, &uploads).await;
        return Err(e.into());
    }

    record_order_event("created");
    tracing::info!(order_id = %order.id, user_id = %user.id, total = order.total_price, "Order placed");

    Ok((
        StatusCode::CREATED,
        Json(OrderResponse {
            message: "Order placed successfully".to_string(),
            order,
        }),
    ))
}

/// The caller's orders
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<Paginated<Order>>, ApiError> {
    if let Some(ref status) = query.status {
        parse_field::<OrderStatus>(status, "status")?;
    }
    if let Some(ref payment_status) = query.payment_status {
        parse_field::<PaymentStatus>(payment_status, "payment_status")?;
    }
    let orders = list_user_orders(&state.db, &user.id, &query).await?;
    Ok(Json(orders))
}

pub async fn get_order(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    require_uuid(&id, "id")?;
    let order = find_user_order(&state.db, &id, &user.id)
        .await?
        .ok_or_else(order_not_found)?;
    Ok(Json(order))
}

/// Customer edit of a pending, unpaid order
pub async fn update_order(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
    Json(req): Json<UpdateOrderRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    require_uuid(&id, "id")?;
    if req.is_empty() {
        return Err(ApiError::bad_request("No fields to update"));
    }

    let mut order = find_user_order(&state.db, &id, &user.id)
        .await?
        .ok_or_else(order_not_found)?;
    if order.status.is_locked() {
        return Err(ApiError::bad_request(format!(
            "Order can no longer be modified (status: {})",
            order.status
        )));
    }
    if order.payment_status == PaymentStatus::Paid {
        return Err(ApiError::bad_request("Order has been paid and can no longer be modified"));
    }

    if let Some(measurement_id) = req.measurement_id {
        require_uuid(&measurement_id, "measurement_id")?;
        if find_owned_measurement(&state.db, &measurement_id, &user.id).await?.is_none() {
            return Err(ApiError::not_found("Measurement not found"));
        }
        order.measurement_id = Some(measurement_id);
    }
    if req.notes.is_some() {
        order.notes = normalize_optional(req.notes);
    }

    let mut uploads = Vec::new();
    let snapshots = async {
        if req.style_id.is_some() || req.style.is_some() {
            order.style = resolve_style(&state, req.style_id.as_deref(), req.style.as_ref(), &mut uploads).await?;
        }
        if req.fabric_id.is_some() || req.material.is_some() {
            order.material =
                resolve_material(&state, req.fabric_id.as_deref(), req.material.as_ref(), &mut uploads).await?;
        }
        Ok::<_, ApiError>(())
    }
    .await;
    if let Err(e) = snapshots {
        discard_uploads(&state, &uploads).await;
        return Err(e);
    }

    order.recompute_total();
    order.updated_at = now_timestamp();

    let mut conn = state.db.acquire().await?;
    if let Err(e) = save_order(&mut conn, &order).await {
        drop(conn);
        discard_uploads(&state, &uploads).await;
        return Err(e.into());
    }

    tracing::info!(order_id = %order.id, total = order.total_price, "Order updated by customer");
    Ok(Json(OrderResponse {
        message: "Order updated successfully".to_string(),
        order,
    }))
}

/// Soft cancel by the customer
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    require_uuid(&id, "id")?;
    let mut order = find_user_order(&state.db, &id, &user.id)
        .await?
        .ok_or_else(order_not_found)?;

    if order.status.is_locked() {
        return Err(ApiError::bad_request(format!(
            "Order cannot be cancelled (status: {})",
            order.status
        )));
    }

    order.status = OrderStatus::Cancelled;
    order.updated_at = now_timestamp();

    let mut tx = state.db.begin().await?;
    save_order(&mut tx, &order).await?;
    let removed = cancel_order_jobs(&mut tx, &order.id).await?;
    notify_owner(
        &mut tx,
        &order,
        NotificationKind::OrderStatus,
        "Order cancelled",
        format!("Your order {} has been cancelled", order.short_id()),
    )
    .await?;
    enqueue_email(
        &mut tx,
        templates::order_updated(&order, "Your order has been cancelled."),
        Some(&order.id),
        None,
    )
    .await?;
    tx.commit().await?;

    record_order_event("cancelled");
    tracing::info!(order_id = %order.id, jobs_removed = removed, "Order cancelled by customer");

    Ok(Json(OrderResponse {
        message: "Order cancelled successfully".to_string(),
        order,
    }))
}

/// Confirm payment with the gateway reference the storefront received
pub async fn pay_order(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
    Json(req): Json<PayOrderRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    require_uuid(&id, "id")?;
    validate_payment_reference(&req.reference).map_err(|e| ApiError::validation_field("reference", e))?;
    let reference = req.reference.trim().to_string();

    let mut order = find_user_order(&state.db, &id, &user.id)
        .await?
        .ok_or_else(order_not_found)?;
    if order.payment_status == PaymentStatus::Paid {
        return Err(ApiError::conflict("Order has already been paid"));
    }
    if order.status == OrderStatus::Cancelled {
        return Err(ApiError::bad_request("Cannot pay for a cancelled order"));
    }

    let reused: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM orders WHERE payment_reference = ? AND payment_status = 'paid' AND id != ?",
    )
    .bind(&reference)
    .bind(&order.id)
    .fetch_one(&state.db)
    .await?;
    if reused > 0 {
        return Err(ApiError::conflict("This payment reference has already been used"));
    }

    // Gateway failures leave the order untouched
    let verification = state.payments.verify(&reference).await?;
    let expected_minor = to_minor_units(order.total_price);

    let currency_matches = verification
        .currency
        .eq_ignore_ascii_case(&state.config.payments.currency);

    if !verification.successful || verification.amount_minor != expected_minor || !currency_matches {
        tracing::warn!(
            order_id = %order.id,
            reference = %reference,
            successful = verification.successful,
            charged = verification.amount_minor,
            expected = expected_minor,
            currency = %verification.currency,
            "Payment verification failed"
        );
        order.payment_status = PaymentStatus::Failed;
        order.payment_reference = Some(reference);
        order.updated_at = now_timestamp();

        let mut tx = state.db.begin().await?;
        save_order(&mut tx, &order).await?;
        notify_owner(
            &mut tx,
            &order,
            NotificationKind::PaymentStatus,
            "Payment failed",
            format!("We could not confirm the payment for order {}", order.short_id()),
        )
        .await?;
        tx.commit().await?;

        record_order_event("payment_failed");
        return Ok(Json(OrderResponse {
            message: "Payment could not be verified".to_string(),
            order,
        }));
    }

    let delivery_days = state.config.scheduler.delivery_days;
    mark_paid(&mut order, Some(reference), delivery_days);

    let mut tx = state.db.begin().await?;
    save_order(&mut tx, &order).await?;
    notify_owner(
        &mut tx,
        &order,
        NotificationKind::PaymentStatus,
        "Payment received",
        format!(
            "Payment of {:.2} for order {} was successful. Work on your garment has started",
            order.total_price,
            order.short_id()
        ),
    )
    .await?;
    enqueue_email(&mut tx, templates::payment_receipt(&order), Some(&order.id), None).await?;
    if let Some(admin_email) = state.config.email.admin_email.as_deref() {
        enqueue_email(&mut tx, templates::payment_received_admin(admin_email, &order), Some(&order.id), None).await?;
    }
    let scheduled = schedule_order_jobs(&mut tx, &order, delivery_days).await?;
    tx.commit().await?;

    record_order_event("paid");
    tracing::info!(order_id = %order.id, jobs = scheduled, "Order paid");

    Ok(Json(OrderResponse {
        message: "Payment verified successfully".to_string(),
        order,
    }))
}

pub async fn list_orders_for_admin(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<AdminOrderQuery>,
) -> Result<Json<Paginated<Order>>, ApiError> {
    if let Some(ref status) = query.status {
        parse_field::<OrderStatus>(status, "status")?;
    }
    if let Some(ref payment_status) = query.payment_status {
        parse_field::<PaymentStatus>(payment_status, "payment_status")?;
    }
    if let Some(ref order_type) = query.order_type {
        parse_field::<OrderType>(order_type, "order_type")?;
    }
    let orders = list_orders_admin(&state.db, &query).await?;
    Ok(Json(orders))
}

pub async fn get_order_admin(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    require_uuid(&id, "id")?;
    let order = find_order(&state.db, &id).await?.ok_or_else(order_not_found)?;
    Ok(Json(order))
}

/// Admin edit. Status and payment transitions notify the customer and keep
/// the delayed-notification schedule in step.
pub async fn update_order_admin(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    Json(req): Json<AdminUpdateOrderRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    require_uuid(&id, "id")?;

    let new_status = req
        .status
        .as_deref()
        .map(|s| parse_field::<OrderStatus>(s, "status"))
        .transpose()?;
    let new_payment = req
        .payment_status
        .as_deref()
        .map(|s| parse_field::<PaymentStatus>(s, "payment_status"))
        .transpose()?;
    let new_type = req
        .order_type
        .as_deref()
        .map(|s| parse_field::<OrderType>(s, "order_type"))
        .transpose()?;

    let mut order = find_order(&state.db, &id).await?.ok_or_else(order_not_found)?;
    let previous_status = order.status;
    let previous_payment = order.payment_status;

    if let Some(measurement_id) = req.measurement_id {
        require_uuid(&measurement_id, "measurement_id")?;
        if find_measurement(&state.db, &measurement_id).await?.is_none() {
            return Err(ApiError::not_found("Measurement not found"));
        }
        order.measurement_id = Some(measurement_id);
    }

    let mut uploads = Vec::new();
    let snapshots = async {
        if req.style_id.is_some() || req.style.is_some() {
            order.style = resolve_style(&state, req.style_id.as_deref(), req.style.as_ref(), &mut uploads).await?;
        }
        if req.fabric_id.is_some() || req.material.is_some() {
            order.material =
                resolve_material(&state, req.fabric_id.as_deref(), req.material.as_ref(), &mut uploads).await?;
        }
        Ok::<_, ApiError>(())
    }
    .await;
    if let Err(e) = snapshots {
        discard_uploads(&state, &uploads).await;
        return Err(e);
    }
    order.recompute_total();

    if req.notes.is_some() {
        order.notes = normalize_optional(req.notes);
    }
    if let Some(order_type) = new_type {
        order.order_type = order_type;
    }
    if let Some(status) = new_status {
        order.status = status;
    }
    let delivery_days = state.config.scheduler.delivery_days;
    match new_payment {
        Some(PaymentStatus::Paid) if previous_payment != PaymentStatus::Paid => {
            // An explicit status in the same request wins over the automatic move to in-progress
            let explicit_status = new_status.is_some();
            let status = order.status;
            mark_paid(&mut order, None, delivery_days);
            if explicit_status {
                order.status = status;
            }
        }
        Some(payment) => order.payment_status = payment,
        None => {}
    }
    order.updated_at = now_timestamp();

    let status_changed = order.status != previous_status;
    let payment_changed = order.payment_status != previous_payment;
    let became_paid = payment_changed && order.payment_status == PaymentStatus::Paid;
    let stops_schedule = (status_changed
        && matches!(order.status, OrderStatus::Cancelled | OrderStatus::Completed))
        || (payment_changed && order.payment_status == PaymentStatus::Refunded);

    let written = async {
        let mut tx = state.db.begin().await?;
        save_order(&mut tx, &order).await?;

        if status_changed {
            notify_owner(
                &mut tx,
                &order,
                NotificationKind::OrderStatus,
                "Order status updated",
                format!("Your order {} is now {}", order.short_id(), order.status.label()),
            )
            .await?;
            enqueue_email(
                &mut tx,
                templates::order_updated(&order, &format!("Your order status is now: {}.", order.status.label())),
                Some(&order.id),
                None,
            )
            .await?;
        }
        if payment_changed {
            notify_owner(
                &mut tx,
                &order,
                NotificationKind::PaymentStatus,
                "Payment status updated",
                format!("Payment for order {} is now {}", order.short_id(), order.payment_status),
            )
            .await?;
            enqueue_email(
                &mut tx,
                templates::order_updated(
                    &order,
                    &format!("The payment status of your order is now: {}.", order.payment_status),
                ),
                Some(&order.id),
                None,
            )
            .await?;
        }

        if stops_schedule {
            cancel_order_jobs(&mut tx, &order.id).await?;
        } else if became_paid {
            schedule_order_jobs(&mut tx, &order, delivery_days).await?;
        }

        tx.commit().await
    }
    .await;

    if let Err(e) = written {
        discard_uploads(&state, &uploads).await;
        return Err(e.into());
    }

    if status_changed {
        record_order_event("status_changed");
    }
    if became_paid {
        record_order_event("paid");
    }
    tracing::info!(
        order_id = %order.id,
        admin_id = %admin.id,
        status = %order.status,
        payment_status = %order.payment_status,
        "Order updated by admin"
    );

    Ok(Json(OrderResponse {
        message: "Order updated successfully".to_string(),
        order,
    }))
}

pub async fn delete_order_admin(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_uuid(&id, "id")?;
    let order = find_order(&state.db, &id).await?.ok_or_else(order_not_found)?;

    let mut tx = state.db.begin().await?;
    let removed = cancel_order_jobs(&mut tx, &order.id).await?;
    sqlx::query("DELETE FROM orders WHERE id = ?")
        .bind(&order.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    record_order_event("deleted");
    tracing::info!(order_id = %order.id, admin_id = %admin.id, jobs_removed = removed, "Order deleted");
    Ok(StatusCode::NO_CONTENT)
}
