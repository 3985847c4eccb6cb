//! Router-level tests: requests go through the full middleware stack against
//! an in-memory database, a temporary upload directory and fake gateways.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use chrono::{Duration, Local};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

use crate::config::Config;
use crate::db::{init_memory, now_timestamp, ROLE_ADMIN, ROLE_USER};
use crate::engine::JobRunner;
use crate::notifications::{Mailer, OutgoingEmail};
use crate::payments::{PaymentError, PaymentGateway, PaymentVerification};
use crate::storage::LocalObjectStore;
use crate::AppState;

use super::auth::hash_password;
use super::create_router;
use super::tokens::issue_token_pair;

const SHOP_EMAIL: &str = "shop@example.com";

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &OutgoingEmail) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Gateway that reports whatever charge the test configured
struct FakeGateway {
    charge: Mutex<(bool, i64)>,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn verify(&self, reference: &str) -> Result<PaymentVerification, PaymentError> {
        let (successful, amount_minor) = *self.charge.lock().unwrap();
        Ok(PaymentVerification {
            successful,
            amount_minor,
            currency: "NGN".to_string(),
            reference: reference.to_string(),
        })
    }
}

struct TestApp {
    state: Arc<AppState>,
    router: Router,
    mailer: Arc<RecordingMailer>,
    gateway: Arc<FakeGateway>,
    _uploads: TempDir,
}

impl TestApp {
    async fn new() -> Self {
        let uploads = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.rate_limit.enabled = false;
        config.email.admin_email = Some(SHOP_EMAIL.to_string());

        let db = init_memory().await.unwrap();
        let mailer = Arc::new(RecordingMailer::default());
        let gateway = Arc::new(FakeGateway {
            charge: Mutex::new((true, 0)),
        });
        let storage = Arc::new(
            LocalObjectStore::new(uploads.path().to_path_buf(), "http://localhost/uploads".to_string()).unwrap(),
        );

        let state = Arc::new(AppState::new(config, db, mailer.clone(), storage, gateway.clone()));
        Self {
            router: create_router(state.clone()),
            state,
            mailer,
            gateway,
            _uploads: uploads,
        }
    }

    /// Insert a verified account and return its id and an access token
    async fn user(&self, email: &str, role: &str) -> (String, String) {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_timestamp();
        sqlx::query(
            "INSERT INTO users (id, email, name, password_hash, role, is_verified, created_at, updated_at) \
             VALUES (?, ?, 'Test User', ?, ?, 1, ?, ?)",
        )
        .bind(&id)
        .bind(email)
        .bind(hash_password("password1").unwrap())
        .bind(role)
        .bind(&now)
        .bind(&now)
        .execute(&self.state.db)
        .await
        .unwrap();
        let token = issue_token_pair(&self.state.config.auth, &id, role).unwrap().access_token;
        (id, token)
    }

    async fn send(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Response {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let response = self.send(method, uri, token, body).await;
        let status = response.status();
        (status, read_json(response).await)
    }

    async fn count(&self, sql: &str, bind: &str) -> i64 {
        sqlx::query_scalar(sql).bind(bind).fetch_one(&self.state.db).await.unwrap()
    }

    /// Catalog style, fabric and a measurement for `token`'s owner
    async fn order_fixtures(&self, admin: &str, token: &str) -> (String, String, String) {
        let (status, style) = self
            .call(
                Method::POST,
                "/api/styles",
                Some(admin),
                Some(json!({
                    "title": "Agbada",
                    "gender": "Male",
                    "price": 5000.0,
                    "yards_required": 3.0,
                    "image": "https://cdn.example.com/agbada.png"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", style);

        let (status, fabric) = self
            .call(
                Method::POST,
                "/api/fabrics",
                Some(admin),
                Some(json!({
                    "title": "Aso Oke",
                    "material": "Cotton",
                    "color": "Indigo",
                    "price_per_yard": 1500.0,
                    "image": "https://cdn.example.com/aso-oke.png"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", fabric);

        let (status, measurement) = self
            .call(
                Method::POST,
                "/api/measurements",
                Some(token),
                Some(json!({ "name": "Me", "data": { "chest": 102.0, "waist": 88.5 } })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", measurement);

        (
            style["id"].as_str().unwrap().to_string(),
            fabric["id"].as_str().unwrap().to_string(),
            measurement["id"].as_str().unwrap().to_string(),
        )
    }
}

async fn read_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    }
}

fn next_week() -> String {
    (Local::now().date_naive() + Duration::days(7))
        .format("%Y-%m-%d")
        .to_string()
}

#[tokio::test]
async fn test_health_is_public() {
    let app = TestApp::new().await;
    let response = app.send(Method::GET, "/health", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_register_verify_login_with_cookie() {
    let app = TestApp::new().await;

    let (status, body) = app
        .call(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "name": "Ada Obi", "email": "Ada@Example.com", "password": "tailor123" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    let login = json!({ "email": "ada@example.com", "password": "tailor123" });
    let (status, _) = app.call(Method::POST, "/api/auth/login", None, Some(login.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let code: String = sqlx::query_scalar("SELECT email_code FROM users WHERE email = 'ada@example.com'")
        .fetch_one(&app.state.db)
        .await
        .unwrap();
    let (status, _) = app
        .call(Method::POST, "/api/auth/verify-email", None, Some(json!({ "email": "ada@example.com", "code": "000000x" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app
        .call(Method::POST, "/api/auth/verify-email", None, Some(json!({ "email": "ada@example.com", "code": code })))
        .await;
    assert_eq!(status, StatusCode::OK);

    let response = app.send(Method::POST, "/api/auth/login", None, Some(login)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let access_cookie = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("accessToken="))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
        .unwrap();

    let request = Request::builder()
        .uri("/api/auth/me")
        .header(header::COOKIE, access_cookie)
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let me = read_json(response).await;
    assert_eq!(me["email"], "ada@example.com");
    assert!(me.get("password_hash").is_none());

    // The verification email sits in the outbox until the runner delivers it
    let runner = JobRunner::new(
        app.state.db.clone(),
        app.mailer.clone(),
        app.state.config.scheduler.clone(),
        Some(SHOP_EMAIL.to_string()),
    );
    runner.tick().await.unwrap();
    let sent = app.mailer.sent.lock().unwrap();
    assert!(sent.iter().any(|e| e.to == "ada@example.com" && e.text.contains(&code)));
}

#[tokio::test]
async fn test_catalog_writes_require_admin() {
    let app = TestApp::new().await;
    let (_, token) = app.user("customer@example.com", ROLE_USER).await;
    let style = json!({ "title": "Kaftan", "gender": "Male", "price": 100.0, "image": "https://x.example.com/k.png" });

    let (status, body) = app.call(Method::POST, "/api/styles", None, Some(style.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let (status, _) = app.call(Method::POST, "/api/styles", Some(&token), Some(style)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.call(Method::GET, "/api/styles", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_style_upload_is_stored_and_duplicate_title_conflicts() {
    let app = TestApp::new().await;
    let (_, admin) = app.user("admin@example.com", ROLE_ADMIN).await;
    let style = json!({
        "title": "Buba",
        "gender": "Female",
        "price": 2500.0,
        "image": "data:image/png;base64,iVBORw0KGgo="
    });

    let (status, created) = app.call(Method::POST, "/api/styles", Some(&admin), Some(style.clone())).await;
    assert_eq!(status, StatusCode::CREATED, "{}", created);
    assert!(created["image_url"].as_str().unwrap().starts_with("http://localhost/uploads/catalog/styles/"));

    let (status, _) = app.call(Method::POST, "/api/styles", Some(&admin), Some(style)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_order_lifecycle_through_payment() {
    let app = TestApp::new().await;
    let (_, admin) = app.user("admin@example.com", ROLE_ADMIN).await;
    let (user_id, token) = app.user("customer@example.com", ROLE_USER).await;
    let (style_id, fabric_id, measurement_id) = app.order_fixtures(&admin, &token).await;

    let (status, body) = app
        .call(
            Method::POST,
            "/api/orders",
            Some(&token),
            Some(json!({
                "style_id": style_id,
                "fabric_id": fabric_id,
                "measurement_id": measurement_id,
                "notes": "Slim fit"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let order = &body["order"];
    let order_id = order["id"].as_str().unwrap().to_string();
    assert_eq!(order["total_price"], 9500.0);
    assert_eq!(order["status"], "pending");
    assert_eq!(order["payment_status"], "unpaid");
    assert_eq!(order["style"]["title"], "Agbada");

    // Customer and shop emails are queued with the order
    let queued = app
        .count("SELECT COUNT(*) FROM scheduled_jobs WHERE kind = 'email' AND order_id = ?", &order_id)
        .await;
    assert_eq!(queued, 2);
    let (_, unread) = app.call(Method::GET, "/api/notifications/unread-count", Some(&token), None).await;
    assert_eq!(unread["count"], 1);

    // Pending orders can still be edited; the total follows the new material
    let (status, body) = app
        .call(
            Method::PUT,
            &format!("/api/orders/{}", order_id),
            Some(&token),
            Some(json!({ "material": { "name": "Lace", "price_per_yard": 2000.0 } })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["order"]["total_price"], 11000.0);

    *app.gateway.charge.lock().unwrap() = (true, 1_100_000);
    let pay_uri = format!("/api/orders/{}/pay", order_id);
    let (status, body) = app
        .call(Method::POST, &pay_uri, Some(&token), Some(json!({ "reference": "ref_abc123" })))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let paid = &body["order"];
    assert_eq!(paid["payment_status"], "paid");
    assert_eq!(paid["status"], "in-progress");
    assert_eq!(paid["payment_reference"], "ref_abc123");
    assert!(paid["expected_delivery_date"].is_string());

    let scheduled = app
        .count("SELECT COUNT(*) FROM scheduled_jobs WHERE kind != 'email' AND order_id = ?", &order_id)
        .await;
    assert!(scheduled > 0);

    let (status, _) = app
        .call(Method::POST, &pay_uri, Some(&token), Some(json!({ "reference": "ref_abc124" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app.call(Method::DELETE, &format!("/api/orders/{}", order_id), Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Admin cancellation stops the delivery schedule
    let (status, body) = app
        .call(
            Method::PUT,
            &format!("/api/orders/admin/{}", order_id),
            Some(&admin),
            Some(json!({ "status": "cancelled" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let scheduled = app
        .count("SELECT COUNT(*) FROM scheduled_jobs WHERE kind != 'email' AND order_id = ?", &order_id)
        .await;
    assert_eq!(scheduled, 0);

    let notifications = app
        .count("SELECT COUNT(*) FROM notifications WHERE user_id = ?", &user_id)
        .await;
    assert_eq!(notifications, 3);
}

#[tokio::test]
async fn test_customer_cannot_cancel_locked_orders() {
    let app = TestApp::new().await;
    let (_, admin) = app.user("admin@example.com", ROLE_ADMIN).await;
    let (_, token) = app.user("customer@example.com", ROLE_USER).await;
    let (style_id, fabric_id, measurement_id) = app.order_fixtures(&admin, &token).await;

    for locked in ["in-progress", "ready-for-pickup", "completed", "cancelled"] {
        let (status, body) = app
            .call(
                Method::POST,
                "/api/orders",
                Some(&token),
                Some(json!({ "style_id": style_id, "fabric_id": fabric_id, "measurement_id": measurement_id })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        let order_id = body["order"]["id"].as_str().unwrap().to_string();

        let (status, body) = app
            .call(
                Method::PUT,
                &format!("/api/orders/admin/{}", order_id),
                Some(&admin),
                Some(json!({ "status": locked })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["order"]["status"], locked);

        let (status, body) = app
            .call(Method::DELETE, &format!("/api/orders/{}", order_id), Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{} -> {}", locked, body);
        assert_eq!(body["error"]["code"], "bad_request");
    }
}

#[tokio::test]
async fn test_underpaid_order_is_marked_failed() {
    let app = TestApp::new().await;
    let (_, admin) = app.user("admin@example.com", ROLE_ADMIN).await;
    let (_, token) = app.user("customer@example.com", ROLE_USER).await;
    let (style_id, fabric_id, measurement_id) = app.order_fixtures(&admin, &token).await;

    let (_, body) = app
        .call(
            Method::POST,
            "/api/orders",
            Some(&token),
            Some(json!({ "style_id": style_id, "fabric_id": fabric_id, "measurement_id": measurement_id })),
        )
        .await;
    let order_id = body["order"]["id"].as_str().unwrap().to_string();

    *app.gateway.charge.lock().unwrap() = (true, 100);
    let (status, body) = app
        .call(
            Method::POST,
            &format!("/api/orders/{}/pay", order_id),
            Some(&token),
            Some(json!({ "reference": "ref_short" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order"]["payment_status"], "failed");
    assert_eq!(body["order"]["status"], "pending");

    let scheduled = app
        .count("SELECT COUNT(*) FROM scheduled_jobs WHERE kind != 'email' AND order_id = ?", &order_id)
        .await;
    assert_eq!(scheduled, 0);
}

#[tokio::test]
async fn test_orders_are_private_to_their_owner() {
    let app = TestApp::new().await;
    let (_, admin) = app.user("admin@example.com", ROLE_ADMIN).await;
    let (_, alice) = app.user("alice@example.com", ROLE_USER).await;
    let (_, bob) = app.user("bob@example.com", ROLE_USER).await;
    let (style_id, fabric_id, measurement_id) = app.order_fixtures(&admin, &alice).await;

    // Bob cannot order with Alice's measurement
    let (status, _) = app
        .call(
            Method::POST,
            "/api/orders",
            Some(&bob),
            Some(json!({ "style_id": style_id, "fabric_id": fabric_id, "measurement_id": measurement_id })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = app
        .call(
            Method::POST,
            "/api/orders",
            Some(&alice),
            Some(json!({ "style_id": style_id, "fabric_id": fabric_id, "measurement_id": measurement_id })),
        )
        .await;
    let order_uri = format!("/api/orders/{}", body["order"]["id"].as_str().unwrap());

    let (status, _) = app.call(Method::GET, &order_uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.call(Method::GET, &order_uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.call(Method::GET, "/api/orders/not-a-uuid", Some(&alice), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, list) = app.call(Method::GET, "/api/orders", Some(&bob), None).await;
    assert_eq!(list["total"], 0);
}

#[tokio::test]
async fn test_appointments_keep_an_hour_apart() {
    let app = TestApp::new().await;
    let date = next_week();
    let booking = |time: &str| {
        json!({
            "name": "Walk In",
            "phone": "08012345678",
            "address": "12 Allen Avenue, Ikeja",
            "email": "walkin@example.com",
            "date": date,
            "time": time
        })
    };

    let (status, body) = app.call(Method::POST, "/api/order/in-person", None, Some(booking("10:00"))).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["appointment"]["status"], "pending");
    assert!(body["appointment"]["user_id"].is_null());

    let (status, body) = app.call(Method::POST, "/api/order/in-person", None, Some(booking("10:30"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["details"]["conflicting_time"], "10:00");

    // Exactly an hour later is allowed
    let (status, _) = app.call(Method::POST, "/api/order/in-person", None, Some(booking("11:00 AM"))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = app
        .call(
            Method::POST,
            "/api/order/in-person",
            None,
            Some(json!({
                "name": "Late", "phone": "08012345678", "address": "Somewhere",
                "date": "2001-01-01", "time": "10:00"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_reschedule_respects_the_gap() {
    let app = TestApp::new().await;
    let (_, admin) = app.user("admin@example.com", ROLE_ADMIN).await;
    let (_, token) = app.user("customer@example.com", ROLE_USER).await;
    let date = next_week();

    let book = |time: &str| {
        json!({ "name": "Ada", "phone": "08012345678", "address": "1 Marina", "date": date, "time": time })
    };
    let (_, first) = app.call(Method::POST, "/api/order/in-person", Some(&token), Some(book("09:00"))).await;
    let (_, second) = app.call(Method::POST, "/api/order/in-person", Some(&token), Some(book("12:00"))).await;
    let first_id = first["appointment"]["id"].as_str().unwrap().to_string();
    let second_id = second["appointment"]["id"].as_str().unwrap().to_string();
    assert_eq!(first["appointment"]["email"], "customer@example.com");

    let reminders = app
        .count("SELECT COUNT(*) FROM scheduled_jobs WHERE kind != 'email' AND appointment_id = ?", &first_id)
        .await;
    assert!(reminders > 0);

    let (status, _) = app
        .call(
            Method::PUT,
            &format!("/api/order/admin/in-person/{}", second_id),
            Some(&admin),
            Some(json!({ "time": "09:30" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Once the first booking is cancelled its slot is free again
    let (status, body) = app
        .call(Method::DELETE, &format!("/api/order/in-person/{}", first_id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let reminders = app
        .count("SELECT COUNT(*) FROM scheduled_jobs WHERE kind != 'email' AND appointment_id = ?", &first_id)
        .await;
    assert_eq!(reminders, 0);

    let (status, body) = app
        .call(
            Method::PUT,
            &format!("/api/order/admin/in-person/{}", second_id),
            Some(&admin),
            Some(json!({ "time": "09:30", "status": "confirmed" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["appointment"]["time"], "09:30");
    assert_eq!(body["appointment"]["status"], "confirmed");

    let (status, body) = app
        .call(
            Method::GET,
            &format!("/api/order/admin/in-person/date-range?start={}&end={}", date, date),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (_, mine) = app.call(Method::GET, "/api/order/in-person", Some(&token), None).await;
    assert_eq!(mine.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_notification_read_rules() {
    let app = TestApp::new().await;
    let (alice_id, alice) = app.user("alice@example.com", ROLE_USER).await;
    let (_, bob) = app.user("bob@example.com", ROLE_USER).await;

    let mut conn = app.state.db.acquire().await.unwrap();
    let id = crate::db::insert_notification(
        &mut conn,
        &crate::db::NewNotification::new(&alice_id, crate::db::NotificationKind::General, "Hi", "Welcome"),
    )
    .await
    .unwrap();
    drop(conn);

    let uri = format!("/api/notifications/{}/read", id);
    let (status, _) = app.call(Method::PUT, "/api/notifications/nope/read", Some(&alice), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app
        .call(Method::PUT, &format!("/api/notifications/{}/read", uuid::Uuid::new_v4()), Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.call(Method::PUT, &uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    for _ in 0..2 {
        let (status, body) = app.call(Method::PUT, &uri, Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["read"], true);
    }

    let (_, count) = app.call(Method::GET, "/api/notifications/unread-count", Some(&alice), None).await;
    assert_eq!(count["count"], 0);
    let (status, body) = app.call(Method::POST, "/api/notifications", Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated_count"], 0);
}

#[tokio::test]
async fn test_admin_dashboard_and_user_guards() {
    let app = TestApp::new().await;
    let (admin_id, admin) = app.user("admin@example.com", ROLE_ADMIN).await;
    let (_, token) = app.user("customer@example.com", ROLE_USER).await;

    let (status, _) = app.call(Method::GET, "/api/auth/admin/dashboard-stats", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.call(Method::GET, "/api/auth/admin/dashboard-stats", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .call(Method::DELETE, &format!("/api/auth/admin/users/{}", admin_id), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.call(Method::GET, "/api/auth/admin/users", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
}
