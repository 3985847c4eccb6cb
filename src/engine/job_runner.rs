//! Executes due scheduled jobs.
//!
//! Each tick claims due jobs with a compare-and-set, runs them concurrently
//! and records the outcome per job. A failing job is retried with exponential
//! backoff and never affects its siblings.

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use futures::future::join_all;
use std::sync::Arc;
use tokio::time::{interval, Duration};

use super::scheduler::{enqueue_email, AppointmentReminderPayload, DeliveryReminderPayload, ProgressPayload};
use crate::api::metrics::record_job_outcome;
use crate::config::SchedulerConfig;
use crate::db::{
    claim_job, due_jobs, find_appointment, find_order, format_timestamp, insert_notification, mark_job_done,
    mark_job_failed, mark_job_retry, now_timestamp, AppointmentStatus, JobKind, NewNotification,
    NotificationKind, OrderStatus, ScheduledJob,
};
use crate::notifications::{templates, Mailer, OutgoingEmail};
use crate::DbPool;

/// What happened to a claimed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Done,
    /// The order or appointment is gone or cancelled; nothing to do
    Skipped,
    Retrying,
    Failed,
}

impl JobOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Skipped => "skipped",
            Self::Retrying => "retrying",
            Self::Failed => "failed",
        }
    }
}

/// Counts from one tick
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickStats {
    pub claimed: usize,
    pub done: usize,
    pub skipped: usize,
    pub retrying: usize,
    pub failed: usize,
}

/// Delay before the next attempt: `base * 2^previous_attempts`
pub fn retry_delay(base_secs: i64, previous_attempts: i64) -> ChronoDuration {
    let exponent = previous_attempts.clamp(0, 16) as u32;
    ChronoDuration::seconds(base_secs.max(1).saturating_mul(1_i64 << exponent))
}

pub struct JobRunner {
    db: DbPool,
    mailer: Arc<dyn Mailer>,
    config: SchedulerConfig,
    admin_email: Option<String>,
}

impl JobRunner {
    pub fn new(db: DbPool, mailer: Arc<dyn Mailer>, config: SchedulerConfig, admin_email: Option<String>) -> Self {
        Self {
            db,
            mailer,
            config,
            admin_email,
        }
    }

    /// Claim and run everything that is due
    pub async fn tick(&self) -> Result<TickStats> {
        let due = due_jobs(&self.db, &now_timestamp(), self.config.batch_size).await?;

        let mut claimed = Vec::with_capacity(due.len());
        for job in due {
            if claim_job(&self.db, &job.id).await? {
                claimed.push(job);
            }
        }

        let mut stats = TickStats {
            claimed: claimed.len(),
            ..Default::default()
        };
        if claimed.is_empty() {
            return Ok(stats);
        }

        let outcomes = join_all(claimed.iter().map(|job| self.process(job))).await;
        for outcome in outcomes {
            match outcome {
                JobOutcome::Done => stats.done += 1,
                JobOutcome::Skipped => stats.skipped += 1,
                JobOutcome::Retrying => stats.retrying += 1,
                JobOutcome::Failed => stats.failed += 1,
            }
        }

        tracing::debug!(
            claimed = stats.claimed,
            done = stats.done,
            skipped = stats.skipped,
            retrying = stats.retrying,
            failed = stats.failed,
            "Job runner tick finished"
        );
        Ok(stats)
    }

    async fn process(&self, job: &ScheduledJob) -> JobOutcome {
        let outcome = match self.execute(job).await {
            Ok(true) => JobOutcome::Done,
            Ok(false) => JobOutcome::Skipped,
            Err(e) => self.handle_failure(job, &e).await,
        };

        if matches!(outcome, JobOutcome::Done | JobOutcome::Skipped) {
            if let Err(e) = mark_job_done(&self.db, &job.id).await {
                tracing::error!(job_id = %job.id, error = %e, "Failed to mark job done");
            }
        }

        record_job_outcome(job.kind.to_string(), outcome.as_str());
        outcome
    }

    async fn handle_failure(&self, job: &ScheduledJob, error: &anyhow::Error) -> JobOutcome {
        let message = format!("{:#}", error);
        let attempts = job.attempts + 1;

        if attempts >= self.config.max_attempts {
            tracing::error!(
                job_id = %job.id,
                kind = %job.kind,
                attempts = attempts,
                error = %message,
                "Job failed permanently"
            );
            if let Err(e) = mark_job_failed(&self.db, &job.id, &message).await {
                tracing::error!(job_id = %job.id, error = %e, "Failed to mark job failed");
            }
            return JobOutcome::Failed;
        }

        let run_at = Utc::now() + retry_delay(self.config.retry_backoff_secs, job.attempts);
        tracing::warn!(
            job_id = %job.id,
            kind = %job.kind,
            attempts = attempts,
            retry_at = %format_timestamp(run_at),
            error = %message,
            "Job failed, will retry"
        );
        if let Err(e) = mark_job_retry(&self.db, &job.id, &message, &format_timestamp(run_at)).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to reschedule job");
        }
        JobOutcome::Retrying
    }

    /// Run one job. `Ok(false)` means there was nothing left to do.
    async fn execute(&self, job: &ScheduledJob) -> Result<bool> {
        match job.kind {
            JobKind::Email => {
                let email: OutgoingEmail =
                    serde_json::from_str(&job.payload).context("Invalid email job payload")?;
                self.mailer.send(&email).await?;
                Ok(true)
            }
            JobKind::OrderProgress => self.run_progress(job).await,
            JobKind::AdminDeliveryReminder => self.run_delivery_reminder(job).await,
            JobKind::AppointmentReminder => self.run_appointment_reminder(job).await,
        }
    }

    async fn run_progress(&self, job: &ScheduledJob) -> Result<bool> {
        let payload: ProgressPayload =
            serde_json::from_str(&job.payload).context("Invalid progress job payload")?;
        let order_id = job.order_id.as_deref().context("Progress job without order")?;

        let Some(order) = find_order(&self.db, order_id).await? else {
            return Ok(false);
        };
        if matches!(order.status, OrderStatus::Cancelled | OrderStatus::Completed) {
            return Ok(false);
        }

        let notification = NewNotification::new(payload.user_id, payload.kind, payload.title, payload.message)
            .for_order(order.id.clone());
        let mut conn = self.db.acquire().await?;
        insert_notification(&mut conn, &notification).await?;

        tracing::info!(order_id = %order.id, job_id = %job.id, "Progress notification delivered");
        Ok(true)
    }

    async fn run_delivery_reminder(&self, job: &ScheduledJob) -> Result<bool> {
        let payload: DeliveryReminderPayload =
            serde_json::from_str(&job.payload).context("Invalid reminder job payload")?;
        let order_id = job.order_id.as_deref().context("Reminder job without order")?;

        let Some(order) = find_order(&self.db, order_id).await? else {
            return Ok(false);
        };
        if matches!(order.status, OrderStatus::Cancelled | OrderStatus::Completed) {
            return Ok(false);
        }
        let Some(admin_email) = self.admin_email.as_deref() else {
            tracing::warn!(order_id = %order.id, "No admin email configured, delivery reminder dropped");
            return Ok(false);
        };

        let email = templates::delivery_reminder_admin(admin_email, &order, payload.days_before);
        self.mailer.send(&email).await?;
        tracing::info!(order_id = %order.id, days_before = payload.days_before, "Admin delivery reminder sent");
        Ok(true)
    }

    async fn run_appointment_reminder(&self, job: &ScheduledJob) -> Result<bool> {
        let payload: AppointmentReminderPayload =
            serde_json::from_str(&job.payload).context("Invalid appointment reminder payload")?;
        let appointment_id = job
            .appointment_id
            .as_deref()
            .context("Reminder job without appointment")?;

        let Some(appointment) = find_appointment(&self.db, appointment_id).await? else {
            return Ok(false);
        };
        if matches!(
            appointment.status,
            AppointmentStatus::Cancelled | AppointmentStatus::Completed
        ) {
            return Ok(false);
        }

        // The email goes out through its own outbox job so an SMTP failure
        // never replays the in-app notification.
        let mut tx = self.db.begin().await?;
        if let Some(user_id) = appointment.user_id.as_deref() {
            let notification = NewNotification::new(
                user_id,
                NotificationKind::Appointment,
                "Appointment today",
                format!(
                    "Reminder: your fitting appointment is today at {} ({}).",
                    appointment.time, appointment.address
                ),
            );
            insert_notification(&mut tx, &notification).await?;
        }
        if let Some(to) = appointment.email.as_deref().filter(|e| !e.is_empty()) {
            enqueue_email(
                &mut tx,
                templates::appointment_reminder(to, &appointment),
                None,
                Some(&appointment.id),
            )
            .await?;
        }
        tx.commit().await?;

        tracing::info!(appointment_id = %appointment.id, slot = %payload.slot, "Appointment reminder delivered");
        Ok(true)
    }
}

/// Spawn the background job runner
pub fn spawn_job_runner(runner: JobRunner, poll_interval_secs: u64) {
    tracing::info!(interval_secs = poll_interval_secs, "Starting scheduled job runner");

    tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(poll_interval_secs.max(1)));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick.tick().await;
            if let Err(e) = runner.tick().await {
                tracing::error!(error = %e, "Job runner tick failed");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        insert_job, insert_order, list_appointment_jobs, list_order_jobs, list_user_notifications, JobStatus,
        MaterialSnapshot, NewJob, Order, OrderType, PaymentStatus, StyleSnapshot,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<OutgoingEmail>>,
        fail: bool,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: &OutgoingEmail) -> Result<()> {
            if self.fail {
                anyhow::bail!("smtp down");
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    async fn seed_order(db: &DbPool, status: OrderStatus) -> Order {
        sqlx::query("INSERT INTO users (id, email, name, password_hash) VALUES ('u1', 'ada@example.com', 'Ada', 'x')")
            .execute(db)
            .await
            .unwrap();
        let now = now_timestamp();
        let order = Order {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: Some("u1".to_string()),
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
            status,
            payment_status: PaymentStatus::Paid,
            total_price: 7000.0,
            payment_reference: None,
            paid_at: None,
            expected_delivery_date: None,
            created_at: now.clone(),
            updated_at: now,
        };
        let mut conn = db.acquire().await.unwrap();
        insert_order(&mut conn, &order).await.unwrap();
        order
    }

    async fn queue(db: &DbPool, job: NewJob) {
        let mut conn = db.acquire().await.unwrap();
        insert_job(&mut conn, &job).await.unwrap();
    }

    fn email_job(order_id: &str) -> NewJob {
        NewJob {
            id: "email_test".to_string(),
            kind: JobKind::Email,
            order_id: Some(order_id.to_string()),
            appointment_id: None,
            payload: serde_json::json!(OutgoingEmail {
                to: "ada@example.com".to_string(),
                subject: "Order received".to_string(),
                html: "<p>hi</p>".to_string(),
                text: "hi".to_string(),
            }),
            run_at: "2000-01-01T00:00:00Z".to_string(),
        }
    }

    fn progress_job(order_id: &str) -> NewJob {
        NewJob {
            id: format!("user_day2_{}", order_id),
            kind: JobKind::OrderProgress,
            order_id: Some(order_id.to_string()),
            appointment_id: None,
            payload: serde_json::json!(ProgressPayload {
                user_id: "u1".to_string(),
                title: "Your Material Is Ready!".to_string(),
                message: "Material bought".to_string(),
                kind: NotificationKind::OrderProgress,
            }),
            run_at: "2000-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_retry_delay_doubles() {
        assert_eq!(retry_delay(60, 0), ChronoDuration::seconds(60));
        assert_eq!(retry_delay(60, 1), ChronoDuration::seconds(120));
        assert_eq!(retry_delay(60, 3), ChronoDuration::seconds(480));
    }

    #[tokio::test]
    async fn test_email_job_is_sent_once() {
        let db = crate::db::init_memory().await.unwrap();
        let order = seed_order(&db, OrderStatus::InProgress).await;
        queue(&db, email_job(&order.id)).await;

        let mailer = Arc::new(RecordingMailer::default());
        let runner = JobRunner::new(db.clone(), mailer.clone(), SchedulerConfig::default(), None);

        let stats = runner.tick().await.unwrap();
        assert_eq!(stats.claimed, 1);
        assert_eq!(stats.done, 1);
        assert_eq!(mailer.sent.lock().unwrap().len(), 1);

        let stats = runner.tick().await.unwrap();
        assert_eq!(stats.claimed, 0);

        let jobs = list_order_jobs(&db, &order.id).await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Done);
        assert_eq!(jobs[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_failed_job_is_retried_then_failed() {
        let db = crate::db::init_memory().await.unwrap();
        let order = seed_order(&db, OrderStatus::InProgress).await;
        queue(&db, email_job(&order.id)).await;

        let mailer = Arc::new(RecordingMailer {
            fail: true,
            ..Default::default()
        });
        let config = SchedulerConfig {
            max_attempts: 2,
            ..SchedulerConfig::default()
        };
        let runner = JobRunner::new(db.clone(), mailer, config, None);

        let stats = runner.tick().await.unwrap();
        assert_eq!(stats.retrying, 1);
        let job = &list_order_jobs(&db, &order.id).await.unwrap()[0];
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.last_error.as_deref(), Some("smtp down"));
        assert!(job.run_at > now_timestamp());

        // Not due yet
        assert_eq!(runner.tick().await.unwrap().claimed, 0);

        sqlx::query("UPDATE scheduled_jobs SET run_at = '2000-01-01T00:00:00Z'")
            .execute(&db)
            .await
            .unwrap();
        let stats = runner.tick().await.unwrap();
        assert_eq!(stats.failed, 1);
        let job = &list_order_jobs(&db, &order.id).await.unwrap()[0];
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 2);
    }

    #[tokio::test]
    async fn test_progress_job_writes_notification() {
        let db = crate::db::init_memory().await.unwrap();
        let order = seed_order(&db, OrderStatus::InProgress).await;
        queue(&db, progress_job(&order.id)).await;

        let runner = JobRunner::new(
            db.clone(),
            Arc::new(RecordingMailer::default()),
            SchedulerConfig::default(),
            None,
        );
        assert_eq!(runner.tick().await.unwrap().done, 1);

        let inbox = list_user_notifications(&db, "u1").await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].title, "Your Material Is Ready!");
        assert_eq!(inbox[0].order_id.as_deref(), Some(order.id.as_str()));
    }

    #[tokio::test]
    async fn test_progress_job_for_cancelled_order_is_skipped() {
        let db = crate::db::init_memory().await.unwrap();
        let order = seed_order(&db, OrderStatus::Cancelled).await;
        queue(&db, progress_job(&order.id)).await;

        let runner = JobRunner::new(
            db.clone(),
            Arc::new(RecordingMailer::default()),
            SchedulerConfig::default(),
            None,
        );
        assert_eq!(runner.tick().await.unwrap().skipped, 1);
        assert!(list_user_notifications(&db, "u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_reminder_goes_to_admin() {
        let db = crate::db::init_memory().await.unwrap();
        let order = seed_order(&db, OrderStatus::InProgress).await;
        queue(
            &db,
            NewJob {
                id: format!("admin_1_day_before_{}", order.id),
                kind: JobKind::AdminDeliveryReminder,
                order_id: Some(order.id.clone()),
                appointment_id: None,
                payload: serde_json::json!(DeliveryReminderPayload { days_before: 1 }),
                run_at: "2000-01-01T00:00:00Z".to_string(),
            },
        )
        .await;

        let mailer = Arc::new(RecordingMailer::default());
        let runner = JobRunner::new(
            db.clone(),
            mailer.clone(),
            SchedulerConfig::default(),
            Some("shop@example.com".to_string()),
        );
        assert_eq!(runner.tick().await.unwrap().done, 1);

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "shop@example.com");
        assert!(sent[0].subject.starts_with("URGENT DELIVERY"));
    }

    #[tokio::test]
    async fn test_progress_job_for_completed_order_is_skipped() {
        let db = crate::db::init_memory().await.unwrap();
        let order = seed_order(&db, OrderStatus::Completed).await;
        queue(&db, progress_job(&order.id)).await;

        let runner = JobRunner::new(
            db.clone(),
            Arc::new(RecordingMailer::default()),
            SchedulerConfig::default(),
            None,
        );
        assert_eq!(runner.tick().await.unwrap().skipped, 1);
        assert!(list_user_notifications(&db, "u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_appointment_reminder_survives_mail_outage() {
        let db = crate::db::init_memory().await.unwrap();
        sqlx::query("INSERT INTO users (id, email, name, password_hash) VALUES ('u1', 'ada@example.com', 'Ada', 'x')")
            .execute(&db)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO appointments \
             (id, user_id, name, phone, address, email, appointment_date, appointment_time, scheduled_at) \
             VALUES ('ap1', 'u1', 'Ada', '0240000000', '12 Ring Road', 'ada@example.com', \
             '2099-03-02', '10:00', '2099-03-02T10:00:00Z')",
        )
        .execute(&db)
        .await
        .unwrap();
        queue(
            &db,
            NewJob {
                id: "appointment_morning_ap1".to_string(),
                kind: JobKind::AppointmentReminder,
                order_id: None,
                appointment_id: Some("ap1".to_string()),
                payload: serde_json::json!(AppointmentReminderPayload {
                    slot: "morning".to_string()
                }),
                run_at: "2000-01-01T00:00:00Z".to_string(),
            },
        )
        .await;

        let config = SchedulerConfig {
            max_attempts: 3,
            ..SchedulerConfig::default()
        };
        let runner = JobRunner::new(
            db.clone(),
            Arc::new(RecordingMailer {
                fail: true,
                ..Default::default()
            }),
            config,
            None,
        );

        assert_eq!(runner.tick().await.unwrap().done, 1);
        for _ in 0..3 {
            sqlx::query("UPDATE scheduled_jobs SET run_at = '2000-01-01T00:00:00Z' WHERE status = 'pending'")
                .execute(&db)
                .await
                .unwrap();
            runner.tick().await.unwrap();
        }

        assert_eq!(list_user_notifications(&db, "u1").await.unwrap().len(), 1);

        let jobs = list_appointment_jobs(&db, "ap1").await.unwrap();
        assert_eq!(jobs.len(), 2);
        let reminder = jobs.iter().find(|j| j.kind == JobKind::AppointmentReminder).unwrap();
        assert_eq!(reminder.status, JobStatus::Done);
        assert_eq!(reminder.attempts, 1);
        let email = jobs.iter().find(|j| j.kind == JobKind::Email).unwrap();
        assert_eq!(email.status, JobStatus::Failed);
        assert_eq!(email.attempts, 3);
        assert_eq!(email.last_error.as_deref(), Some("smtp down"));
    }

    #[tokio::test]
    async fn test_cancel_removes_claimed_job() {
        let db = crate::db::init_memory().await.unwrap();
        let order = seed_order(&db, OrderStatus::InProgress).await;
        let job = progress_job(&order.id);
        let job_id = job.id.clone();
        queue(&db, job).await;
        assert!(claim_job(&db, &job_id).await.unwrap());

        let mut conn = db.acquire().await.unwrap();
        let removed = crate::engine::scheduler::cancel_order_jobs(&mut conn, &order.id)
            .await
            .unwrap();
        drop(conn);
        assert_eq!(removed, 1);

        // The runner finishing late touches no row
        mark_job_done(&db, &job_id).await.unwrap();
        assert!(list_order_jobs(&db, &order.id).await.unwrap().is_empty());
    }
}
