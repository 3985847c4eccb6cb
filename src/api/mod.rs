mod appointments;
pub mod auth;
mod currency;
pub mod error;
mod fabrics;
mod measurements;
pub mod metrics;
mod notifications;
mod orders;
pub mod rate_limit;
mod styles;
pub mod tokens;
mod users;
pub mod validation;

#[cfg(test)]
mod tests;

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Credential endpoints, throttled harder than the rest of the API
    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/verify-email", post(auth::verify_email))
        .route("/resend-verification", post(auth::resend_verification))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/request-reset", post(auth::request_reset))
        .route("/reset-password", post(auth::reset_password))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .route("/profile", get(auth::me).put(auth::update_profile))
        // Admin user management
        .route("/admin/users", get(users::list_users_admin))
        .route(
            "/admin/users/:id",
            get(users::get_user_admin)
                .put(users::update_user_admin)
                .delete(users::delete_user_admin),
        )
        .route("/admin/dashboard-stats", get(users::dashboard_stats));

    let style_routes = Router::new()
        .route("/", get(styles::list_styles_public).post(styles::create_style))
        .route(
            "/:id",
            get(styles::get_style)
                .put(styles::update_style)
                .delete(styles::delete_style),
        );

    let fabric_routes = Router::new()
        .route("/", get(fabrics::list_fabrics_public).post(fabrics::create_fabric))
        .route(
            "/:id",
            get(fabrics::get_fabric)
                .put(fabrics::update_fabric)
                .delete(fabrics::delete_fabric),
        );

    let measurement_routes = Router::new()
        .route(
            "/",
            get(measurements::list_measurements).post(measurements::create_measurement),
        )
        .route("/has", get(measurements::has_measurement))
        .route("/admin", get(measurements::list_measurements_for_admin))
        .route(
            "/admin/:id",
            get(measurements::get_measurement_admin)
                .put(measurements::update_measurement_admin)
                .delete(measurements::delete_measurement_admin),
        )
        .route(
            "/:id",
            get(measurements::get_measurement)
                .put(measurements::update_measurement)
                .delete(measurements::delete_measurement),
        );

    let order_routes = Router::new()
        .route("/", get(orders::list_orders).post(orders::create_order))
        .route("/admin", get(orders::list_orders_for_admin))
        .route(
            "/admin/:id",
            get(orders::get_order_admin)
                .put(orders::update_order_admin)
                .delete(orders::delete_order_admin),
        )
        .route(
            "/:id",
            get(orders::get_order)
                .put(orders::update_order)
                .delete(orders::cancel_order),
        )
        .route("/:id/pay", post(orders::pay_order));

    let appointment_routes = Router::new()
        .route(
            "/in-person",
            get(appointments::list_appointments).post(appointments::create_appointment),
        )
        .route(
            "/in-person/:id",
            get(appointments::get_appointment).delete(appointments::cancel_appointment),
        )
        .route("/admin/in-person", get(appointments::list_appointments_for_admin))
        .route("/admin/in-person/date-range", get(appointments::appointments_in_range))
        .route(
            "/admin/in-person/:id",
            get(appointments::get_appointment_admin)
                .put(appointments::update_appointment_admin)
                .delete(appointments::delete_appointment_admin),
        );

    let notification_routes = Router::new()
        .route(
            "/",
            get(notifications::list_notifications).post(notifications::mark_all_notifications_read),
        )
        .route("/unread-count", get(notifications::unread_count))
        .route("/:id/read", put(notifications::mark_notification_read));

    let api_routes = Router::new()
        .nest("/auth", auth_routes)
        .nest("/styles", style_routes)
        .nest("/fabrics", fabric_routes)
        .nest("/measurements", measurement_routes)
        .nest("/orders", order_routes)
        .nest("/order", appointment_routes)
        .nest("/notifications", notification_routes)
        .route("/currency/exchange-rate", get(currency::exchange_rate))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_endpoint))
        .nest("/api", api_routes)
        .layer(middleware::from_fn(metrics::metrics_middleware))
        .layer(cors_layer(&state.config.server.client_url))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Credentialed CORS for the storefront origin
fn cors_layer(client_url: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .allow_credentials(true);

    match HeaderValue::from_str(client_url.trim_end_matches('/')) {
        Ok(origin) => layer.allow_origin(origin),
        Err(e) => {
            tracing::warn!(client_url = %client_url, error = %e, "Invalid client URL, cross-origin requests disabled");
            layer
        }
    }
}

async fn health_check() -> &'static str {
    "OK"
}
