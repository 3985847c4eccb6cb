//! Delayed-notification planning.
//!
//! A paid online order gets a fixed series of one-shot jobs keyed off its
//! creation time: two delivery reminders for the shop and five progress
//! updates for the customer. Appointments get two reminders on the day.
//! Every job has a deterministic name, so scheduling twice is harmless and
//! cancelling never needs to remember what was queued.

use chrono::{DateTime, Duration, Local, NaiveDate, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use std::str::FromStr;

use crate::config::SchedulerConfig;
use crate::db::{
    delete_appointment_jobs, delete_order_jobs, format_timestamp, insert_job, now_timestamp, reset_stale_jobs,
    Appointment, AppointmentStatus, JobKind, NewJob, NotificationKind, Order, OrderStatus, OrderType,
    PaymentStatus,
};
use crate::notifications::OutgoingEmail;

/// Payload of an `order_progress` job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
}

/// Payload of an `admin_delivery_reminder` job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReminderPayload {
    pub days_before: i64,
}

/// Payload of an `appointment_reminder` job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentReminderPayload {
    pub slot: String,
}

struct ProgressStep {
    day: i64,
    title: &'static str,
    message: &'static str,
    kind: NotificationKind,
}

const PROGRESS_STEPS: [ProgressStep; 5] = [
    ProgressStep {
        day: 2,
        title: "Your Material Is Ready!",
        message: "Great news, {name}! The material for your order {item} (ID: {id}...) has been purchased and is ready for the next step.",
        kind: NotificationKind::OrderProgress,
    },
    ProgressStep {
        day: 3,
        title: "Your Cloth is Cut!",
        message: "{name}, the cloth for your order {item} (ID: {id}...) is cut and being prepared for tailoring.",
        kind: NotificationKind::OrderProgress,
    },
    ProgressStep {
        day: 4,
        title: "Your Garment is Being Sewn!",
        message: "{name}, your order {item} (ID: {id}...) is being sewn by our tailors.",
        kind: NotificationKind::OrderProgress,
    },
    ProgressStep {
        day: 5,
        title: "Freshly Dry-Cleaned!",
        message: "{name}, your garment for order {item} (ID: {id}...) has been dry-cleaned and is looking its best.",
        kind: NotificationKind::OrderProgress,
    },
    ProgressStep {
        day: 6,
        title: "Almost There!",
        message: "{name}, your order {item} (ID: {id}...) is complete. Expect delivery by tomorrow!",
        kind: NotificationKind::DeliveryImminent,
    },
];

/// Days before delivery at which the shop is reminded
const ADMIN_REMINDER_DAYS: [i64; 2] = [3, 1];

pub fn admin_reminder_job_name(order_id: &str, days_before: i64) -> String {
    if days_before == 1 {
        format!("admin_1_day_before_{}", order_id)
    } else {
        format!("admin_{}_days_before_{}", days_before, order_id)
    }
}

pub fn progress_job_name(order_id: &str, day: i64) -> String {
    format!("user_day{}_{}", day, order_id)
}

pub fn appointment_job_name(appointment_id: &str, slot: &str) -> String {
    format!("appointment_{}_{}", slot, appointment_id)
}

/// `created_at + delivery_days`, or `None` when the timestamp is unreadable
pub fn expected_delivery(order: &Order, delivery_days: i64) -> Option<DateTime<Utc>> {
    order
        .created_at_utc()
        .map(|created| created + Duration::days(delivery_days))
}

/// Whether an order qualifies for the delivery schedule at all
pub fn is_schedulable(order: &Order) -> bool {
    order.order_type == OrderType::Online
        && order.payment_status == PaymentStatus::Paid
        && !matches!(order.status, OrderStatus::Cancelled | OrderStatus::Completed)
}

/// Jobs for a paid online order whose run time is still ahead of `now`
pub fn plan_order_jobs(order: &Order, delivery_days: i64, now: DateTime<Utc>) -> Vec<NewJob> {
    if !is_schedulable(order) {
        return Vec::new();
    }
    let Some(created) = order.created_at_utc() else {
        tracing::warn!(order_id = %order.id, created_at = %order.created_at, "Unreadable order timestamp, nothing scheduled");
        return Vec::new();
    };
    let delivery = created + Duration::days(delivery_days);

    let mut jobs = Vec::with_capacity(ADMIN_REMINDER_DAYS.len() + PROGRESS_STEPS.len());

    for days_before in ADMIN_REMINDER_DAYS {
        let run_at = delivery - Duration::days(days_before);
        if run_at > now {
            jobs.push(NewJob {
                id: admin_reminder_job_name(&order.id, days_before),
                kind: JobKind::AdminDeliveryReminder,
                order_id: Some(order.id.clone()),
                appointment_id: None,
                payload: json!(DeliveryReminderPayload { days_before }),
                run_at: format_timestamp(run_at),
            });
        }
    }

    // Progress updates land in the customer's inbox, so they need an account
    let Some(user_id) = order.user_id.as_deref() else {
        return jobs;
    };
    let item = if order.style.title.trim().is_empty() {
        "your custom garment"
    } else {
        order.style.title.as_str()
    };

    for step in &PROGRESS_STEPS {
        let run_at = created + Duration::days(step.day);
        if run_at <= now {
            continue;
        }
        let message = step
            .message
            .replace("{name}", &order.customer_name)
            .replace("{item}", item)
            .replace("{id}", order.short_id());
        jobs.push(NewJob {
            id: progress_job_name(&order.id, step.day),
            kind: JobKind::OrderProgress,
            order_id: Some(order.id.clone()),
            appointment_id: None,
            payload: json!(ProgressPayload {
                user_id: user_id.to_string(),
                title: step.title.to_string(),
                message,
                kind: step.kind,
            }),
            run_at: format_timestamp(run_at),
        });
    }

    jobs
}

/// Queue the delivery schedule of an order; returns how many jobs were new.
pub async fn schedule_order_jobs(
    conn: &mut SqliteConnection,
    order: &Order,
    delivery_days: i64,
) -> Result<usize, sqlx::Error> {
    let mut created = 0;
    for job in plan_order_jobs(order, delivery_days, Utc::now()) {
        if insert_job(&mut *conn, &job).await? {
            created += 1;
        }
    }

    if created > 0 {
        tracing::info!(order_id = %order.id, jobs = created, "Scheduled order notifications");
    }
    Ok(created)
}

pub async fn cancel_order_jobs(conn: &mut SqliteConnection, order_id: &str) -> Result<u64, sqlx::Error> {
    let removed = delete_order_jobs(conn, order_id).await?;
    if removed > 0 {
        tracing::info!(order_id = %order_id, jobs = removed, "Cancelled order notifications");
    }
    Ok(removed)
}

/// Run time of a one-shot cron expression for `hour:00` on `date` in shop-local
/// time, or `None` when that moment is not after `now`.
pub fn reminder_time(date: NaiveDate, hour: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let expression = format!(
        "0 0 {} {} {} * {}",
        hour,
        date.format("%-d"),
        date.format("%-m"),
        date.format("%Y")
    );
    let schedule = match Schedule::from_str(&expression) {
        Ok(schedule) => schedule,
        Err(e) => {
            tracing::warn!(expression = %expression, error = %e, "Invalid reminder schedule");
            return None;
        }
    };
    let local_now = now.with_timezone(&Local);
    schedule
        .after(&local_now)
        .next()
        .map(|fire| fire.with_timezone(&Utc))
}

/// Morning and afternoon reminders for an appointment that are still ahead
pub fn plan_appointment_reminders(
    appointment: &Appointment,
    config: &SchedulerConfig,
    now: DateTime<Utc>,
) -> Vec<NewJob> {
    if appointment.status == AppointmentStatus::Cancelled {
        return Vec::new();
    }
    let Ok(date) = NaiveDate::parse_from_str(&appointment.date, "%Y-%m-%d") else {
        return Vec::new();
    };

    [
        ("morning", config.reminder_morning_hour),
        ("afternoon", config.reminder_afternoon_hour),
    ]
    .into_iter()
    .filter_map(|(slot, hour)| {
        let run_at = reminder_time(date, hour, now)?;
        Some(NewJob {
            id: appointment_job_name(&appointment.id, slot),
            kind: JobKind::AppointmentReminder,
            order_id: None,
            appointment_id: Some(appointment.id.clone()),
            payload: json!(AppointmentReminderPayload {
                slot: slot.to_string()
            }),
            run_at: format_timestamp(run_at),
        })
    })
    .collect()
}

pub async fn schedule_appointment_reminders(
    conn: &mut SqliteConnection,
    appointment: &Appointment,
    config: &SchedulerConfig,
) -> Result<usize, sqlx::Error> {
    let mut created = 0;
    for job in plan_appointment_reminders(appointment, config, Utc::now()) {
        if insert_job(&mut *conn, &job).await? {
            created += 1;
        }
    }
    tracing::debug!(appointment_id = %appointment.id, jobs = created, "Scheduled appointment reminders");
    Ok(created)
}

pub async fn cancel_appointment_jobs(
    conn: &mut SqliteConnection,
    appointment_id: &str,
) -> Result<u64, sqlx::Error> {
    let removed = delete_appointment_jobs(conn, appointment_id).await?;
    if removed > 0 {
        tracing::info!(appointment_id = %appointment_id, jobs = removed, "Cancelled appointment reminders");
    }
    Ok(removed)
}

/// Put an email in the outbox; it goes out with the next runner tick.
pub async fn enqueue_email(
    conn: &mut SqliteConnection,
    email: OutgoingEmail,
    order_id: Option<&str>,
    appointment_id: Option<&str>,
) -> Result<(), sqlx::Error> {
    if email.to.trim().is_empty() {
        tracing::debug!(subject = %email.subject, "No recipient, email dropped");
        return Ok(());
    }
    let job = NewJob {
        id: format!("email_{}", uuid::Uuid::new_v4()),
        kind: JobKind::Email,
        order_id: order_id.map(str::to_string),
        appointment_id: appointment_id.map(str::to_string),
        payload: json!(email),
        run_at: now_timestamp(),
    };
    insert_job(conn, &job).await?;
    Ok(())
}

/// Result of the startup pass
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RescheduleStats {
    pub stale_jobs_reset: u64,
    pub orders_scanned: usize,
    pub jobs_created: usize,
}

/// Startup pass: recover jobs left `running` by a crash and make sure every
/// paid order that is still to be delivered has its schedule.
pub async fn reschedule_all(db: &SqlitePool, config: &SchedulerConfig) -> anyhow::Result<RescheduleStats> {
    let mut stats = RescheduleStats {
        stale_jobs_reset: reset_stale_jobs(db).await?,
        ..Default::default()
    };

    let orders: Vec<Order> = sqlx::query_as(
        "SELECT * FROM orders WHERE order_type = 'online' AND payment_status = 'paid' \
         AND status NOT IN ('cancelled', 'completed') AND expected_delivery_date >= ?",
    )
    .bind(now_timestamp())
    .fetch_all(db)
    .await?;

    let mut conn = db.acquire().await?;
    for order in &orders {
        stats.orders_scanned += 1;
        match schedule_order_jobs(&mut conn, order, config.delivery_days).await {
            Ok(n) => stats.jobs_created += n,
            Err(e) => tracing::error!(order_id = %order.id, error = %e, "Failed to reschedule order"),
        }
    }

    tracing::info!(
        stale_jobs_reset = stats.stale_jobs_reset,
        orders = stats.orders_scanned,
        jobs_created = stats.jobs_created,
        "Notification schedule restored"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MaterialSnapshot, StyleSnapshot};
    use chrono::Timelike;

    fn paid_order(created_at: &str) -> Order {
        Order {
            id: "5d1b7c3e-aaaa-bbbb-cccc-ddddeeeeffff".to_string(),
            user_id: Some("user-1".to_string()),
            customer_name: "Ada".to_string(),
            customer_email: "ada@example.com".to_string(),
            order_type: OrderType::Online,
            style: StyleSnapshot {
                title: "Kaftan".to_string(),
                price: 5000.0,
                yards_required: 2.0,
                image: None,
                style_id: None,
            },
            material: MaterialSnapshot {
                name: "Linen".to_string(),
                kind: None,
                price_per_yard: 1000.0,
                image: None,
                fabric_id: None,
            },
            measurement_id: None,
            notes: None,
            status: OrderStatus::InProgress,
            payment_status: PaymentStatus::Paid,
            total_price: 7000.0,
            payment_reference: Some("ref".to_string()),
            paid_at: None,
            expected_delivery_date: None,
            created_at: created_at.to_string(),
            updated_at: created_at.to_string(),
        }
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_fresh_order_gets_seven_jobs() {
        let order = paid_order("2025-03-01T10:00:00Z");
        let jobs = plan_order_jobs(&order, 7, at("2025-03-01T10:05:00Z"));
        assert_eq!(jobs.len(), 7);

        let names: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert!(names.contains(&"admin_3_days_before_5d1b7c3e-aaaa-bbbb-cccc-ddddeeeeffff"));
        assert!(names.contains(&"admin_1_day_before_5d1b7c3e-aaaa-bbbb-cccc-ddddeeeeffff"));
        for day in 2..=6 {
            let expected = format!("user_day{}_5d1b7c3e-aaaa-bbbb-cccc-ddddeeeeffff", day);
            assert!(names.contains(&expected.as_str()), "missing {}", expected);
        }
        assert!(jobs.iter().all(|j| j.order_id.as_deref() == Some(order.id.as_str())));
    }

    #[test]
    fn test_job_times_follow_creation_date() {
        let order = paid_order("2025-03-01T10:00:00Z");
        let jobs = plan_order_jobs(&order, 7, at("2025-03-01T10:05:00Z"));
        let run_at = |name: &str| {
            jobs.iter()
                .find(|j| j.id.starts_with(name))
                .map(|j| j.run_at.clone())
                .unwrap()
        };
        assert_eq!(run_at("admin_3_days"), "2025-03-05T10:00:00Z");
        assert_eq!(run_at("admin_1_day"), "2025-03-07T10:00:00Z");
        assert_eq!(run_at("user_day2_"), "2025-03-03T10:00:00Z");
        assert_eq!(run_at("user_day6_"), "2025-03-07T10:00:00Z");
    }

    #[test]
    fn test_past_jobs_are_skipped() {
        let order = paid_order("2025-03-01T10:00:00Z");
        // Day 4.5: days 2-4 and the 3-days-before reminder (day 4) are gone
        let jobs = plan_order_jobs(&order, 7, at("2025-03-05T22:00:00Z"));
        let names: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(jobs.len(), 3, "{:?}", names);
        assert!(names.iter().any(|n| n.starts_with("user_day5_")));
        assert!(names.iter().any(|n| n.starts_with("user_day6_")));
        assert!(names.iter().any(|n| n.starts_with("admin_1_day_")));

        assert!(plan_order_jobs(&order, 7, at("2025-03-09T00:00:00Z")).is_empty());
    }

    #[test]
    fn test_only_paid_online_orders_are_scheduled() {
        let now = at("2025-03-01T10:05:00Z");

        let mut unpaid = paid_order("2025-03-01T10:00:00Z");
        unpaid.payment_status = PaymentStatus::Unpaid;
        assert!(plan_order_jobs(&unpaid, 7, now).is_empty());

        let mut in_person = paid_order("2025-03-01T10:00:00Z");
        in_person.order_type = OrderType::InPerson;
        assert!(plan_order_jobs(&in_person, 7, now).is_empty());

        let mut cancelled = paid_order("2025-03-01T10:00:00Z");
        cancelled.status = OrderStatus::Cancelled;
        assert!(plan_order_jobs(&cancelled, 7, now).is_empty());

        let mut completed = paid_order("2025-03-01T10:00:00Z");
        completed.status = OrderStatus::Completed;
        assert!(plan_order_jobs(&completed, 7, now).is_empty());
    }

    #[test]
    fn test_progress_payload_content() {
        let order = paid_order("2025-03-01T10:00:00Z");
        let jobs = plan_order_jobs(&order, 7, at("2025-03-01T10:05:00Z"));

        let day6 = jobs.iter().find(|j| j.id.starts_with("user_day6_")).unwrap();
        let payload: ProgressPayload = serde_json::from_value(day6.payload.clone()).unwrap();
        assert_eq!(payload.kind, NotificationKind::DeliveryImminent);
        assert_eq!(payload.user_id, "user-1");
        assert!(payload.message.contains("Ada"));
        assert!(payload.message.contains("Kaftan"));
        assert!(payload.message.contains("5d1b7c3e..."));

        let day2 = jobs.iter().find(|j| j.id.starts_with("user_day2_")).unwrap();
        let payload: ProgressPayload = serde_json::from_value(day2.payload.clone()).unwrap();
        assert_eq!(payload.kind, NotificationKind::OrderProgress);
        assert_eq!(payload.title, "Your Material Is Ready!");
    }

    #[test]
    fn test_guest_order_only_gets_admin_reminders() {
        let mut order = paid_order("2025-03-01T10:00:00Z");
        order.user_id = None;
        let jobs = plan_order_jobs(&order, 7, at("2025-03-01T10:05:00Z"));
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.kind == JobKind::AdminDeliveryReminder));
    }

    #[test]
    fn test_reminder_time_uses_local_hour() {
        let date = NaiveDate::from_ymd_opt(2099, 1, 15).unwrap();
        let fire = reminder_time(date, 8, at("2025-01-01T00:00:00Z")).unwrap();
        let local = fire.with_timezone(&Local);
        assert_eq!(local.date_naive(), date);
        assert_eq!(local.hour(), 8);
        assert_eq!(local.minute(), 0);
    }

    #[test]
    fn test_reminder_time_in_past_is_none() {
        let date = NaiveDate::from_ymd_opt(2020, 1, 15).unwrap();
        assert_eq!(reminder_time(date, 8, at("2025-01-01T00:00:00Z")), None);
    }

    #[test]
    fn test_appointment_reminder_names() {
        let appointment = Appointment {
            id: "appt-1".to_string(),
            user_id: None,
            name: "Ada".to_string(),
            phone: "08012345678".to_string(),
            address: "1 Marina".to_string(),
            email: None,
            date: "2099-06-10".to_string(),
            time: "10:00".to_string(),
            scheduled_at: "2099-06-10 10:00:00".to_string(),
            status: AppointmentStatus::Pending,
            notes: None,
            created_at: "2025-01-01T00:00:00Z".to_string(),
            updated_at: "2025-01-01T00:00:00Z".to_string(),
        };
        let jobs = plan_appointment_reminders(&appointment, &SchedulerConfig::default(), Utc::now());
        let names: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(names, vec!["appointment_morning_appt-1", "appointment_afternoon_appt-1"]);

        let cancelled = Appointment {
            status: AppointmentStatus::Cancelled,
            ..appointment
        };
        assert!(plan_appointment_reminders(&cancelled, &SchedulerConfig::default(), Utc::now()).is_empty());
    }

    #[tokio::test]
    async fn test_schedule_is_idempotent_and_cancellable() {
        let db = crate::db::init_memory().await.unwrap();
        let order = paid_order(&format_timestamp(Utc::now()));
        let mut conn = db.acquire().await.unwrap();

        assert_eq!(schedule_order_jobs(&mut conn, &order, 7).await.unwrap(), 7);
        assert_eq!(schedule_order_jobs(&mut conn, &order, 7).await.unwrap(), 0);

        enqueue_email(
            &mut conn,
            OutgoingEmail {
                to: "ada@example.com".to_string(),
                subject: "Receipt".to_string(),
                html: String::new(),
                text: String::new(),
            },
            Some(&order.id),
            None,
        )
        .await
        .unwrap();

        assert_eq!(cancel_order_jobs(&mut conn, &order.id).await.unwrap(), 7);
        drop(conn);

        let remaining = crate::db::list_order_jobs(&db, &order.id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].kind, JobKind::Email);
    }

    #[tokio::test]
    async fn test_reschedule_restores_open_orders_only() {
        let db = crate::db::init_memory().await.unwrap();
        sqlx::query("INSERT INTO users (id, email, name, password_hash) VALUES ('user-1', 'ada@example.com', 'Ada', 'x')")
            .execute(&db)
            .await
            .unwrap();

        let now = Utc::now();
        let mut fresh = paid_order(&format_timestamp(now));
        fresh.id = "order-fresh".to_string();
        fresh.expected_delivery_date = Some(format_timestamp(now + Duration::days(7)));

        let mut delivered = paid_order(&format_timestamp(now - Duration::days(30)));
        delivered.id = "order-delivered".to_string();
        delivered.status = OrderStatus::Completed;
        delivered.expected_delivery_date = Some(format_timestamp(now - Duration::days(23)));

        let mut finished_early = paid_order(&format_timestamp(now - Duration::days(2)));
        finished_early.id = "order-finished-early".to_string();
        finished_early.status = OrderStatus::Completed;
        finished_early.expected_delivery_date = Some(format_timestamp(now + Duration::days(5)));

        let mut conn = db.acquire().await.unwrap();
        for order in [&fresh, &delivered, &finished_early] {
            crate::db::insert_order(&mut conn, order).await.unwrap();
        }
        enqueue_email(
            &mut conn,
            OutgoingEmail {
                to: "ada@example.com".to_string(),
                subject: "Receipt".to_string(),
                html: String::new(),
                text: String::new(),
            },
            Some(&fresh.id),
            None,
        )
        .await
        .unwrap();
        drop(conn);
        // Claimed by a process that died before finishing
        sqlx::query("UPDATE scheduled_jobs SET status = 'running', attempts = 1 WHERE kind = 'email'")
            .execute(&db)
            .await
            .unwrap();

        let config = SchedulerConfig::default();
        let stats = reschedule_all(&db, &config).await.unwrap();
        assert_eq!(
            stats,
            RescheduleStats {
                stale_jobs_reset: 1,
                orders_scanned: 1,
                jobs_created: 7,
            }
        );

        let jobs = crate::db::list_order_jobs(&db, &fresh.id).await.unwrap();
        assert_eq!(jobs.len(), 8);
        assert!(jobs.iter().all(|j| j.status == crate::db::JobStatus::Pending));
        assert!(crate::db::list_order_jobs(&db, &delivered.id).await.unwrap().is_empty());
        assert!(crate::db::list_order_jobs(&db, &finished_early.id).await.unwrap().is_empty());

        let stats = reschedule_all(&db, &config).await.unwrap();
        assert_eq!(stats.stale_jobs_reset, 0);
        assert_eq!(stats.jobs_created, 0);
    }
}
