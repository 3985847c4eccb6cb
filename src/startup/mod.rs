//! Startup self-checks
//!
//! Verified before the server starts accepting requests:
//! - Database connectivity and schema
//! - Data and upload directories are writable
//! - Token secrets were changed from their defaults
//! - Email, payment and object storage settings
//!
//! Critical failures abort startup; the rest are logged as warnings.

use serde::Serialize;
use std::path::Path;
use tracing::{error, info, warn};

use crate::config::{Config, StorageBackend, DEFAULT_ACCESS_SECRET, DEFAULT_REFRESH_SECRET};
use crate::DbPool;

const ESSENTIAL_TABLES: &[&str] = &[
    "users",
    "styles",
    "fabrics",
    "measurements",
    "orders",
    "appointments",
    "notifications",
    "scheduled_jobs",
];

/// Result of a single startup check
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    /// Failure should abort startup
    pub critical: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl CheckResult {
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            critical: false,
            message: message.into(),
            details: None,
        }
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>, critical: bool) -> Self {
        Self {
            name: name.into(),
            passed: false,
            critical,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Aggregated startup check results
#[derive(Debug, Clone, Serialize)]
pub struct StartupCheckReport {
    pub checks: Vec<CheckResult>,
    pub all_critical_passed: bool,
    pub all_passed: bool,
    pub summary: String,
}

impl StartupCheckReport {
    pub fn new(checks: Vec<CheckResult>) -> Self {
        let all_critical_passed = checks.iter().filter(|c| c.critical).all(|c| c.passed);
        let all_passed = checks.iter().all(|c| c.passed);

        let failed_critical = checks.iter().filter(|c| c.critical && !c.passed).count();
        let failed_non_critical = checks.iter().filter(|c| !c.critical && !c.passed).count();
        let total = checks.len();
        let passed = checks.iter().filter(|c| c.passed).count();

        let summary = if all_passed {
            format!("All {} startup checks passed", total)
        } else if all_critical_passed {
            format!(
                "{}/{} checks passed ({} non-critical warnings)",
                passed, total, failed_non_critical
            )
        } else {
            format!(
                "{}/{} checks passed ({} critical failures)",
                passed, total, failed_critical
            )
        };

        Self {
            checks,
            all_critical_passed,
            all_passed,
            summary,
        }
    }
}

/// Run all startup self-checks
pub async fn run_startup_checks(config: &Config, db: &DbPool) -> StartupCheckReport {
    info!("Running startup self-checks...");

    let checks = vec![
        check_database_connectivity(db).await,
        check_database_schema(db).await,
        check_writable("data_directory", &config.server.data_dir),
        check_token_secrets(config),
        check_email(config),
        check_payments(config),
        check_storage(config),
    ];

    let report = StartupCheckReport::new(checks);

    for check in &report.checks {
        if check.passed {
            info!(check = %check.name, message = %check.message, "Startup check PASSED");
        } else if check.critical {
            error!(
                check = %check.name,
                message = %check.message,
                details = ?check.details,
                "Startup check FAILED (CRITICAL)"
            );
        } else {
            warn!(
                check = %check.name,
                message = %check.message,
                details = ?check.details,
                "Startup check FAILED (non-critical)"
            );
        }
    }

    info!(
        summary = %report.summary,
        all_passed = report.all_passed,
        all_critical_passed = report.all_critical_passed,
        "Startup checks completed"
    );

    report
}

async fn check_database_connectivity(db: &DbPool) -> CheckResult {
    match sqlx::query("SELECT 1").fetch_one(db).await {
        Ok(_) => CheckResult::pass("database_connectivity", "Database connection successful"),
        Err(e) => CheckResult::fail("database_connectivity", "Failed to connect to database", true)
            .with_details(e.to_string()),
    }
}

async fn check_database_schema(db: &DbPool) -> CheckResult {
    let result: Result<Vec<(String,)>, _> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
            .fetch_all(db)
            .await;

    match result {
        Ok(tables) => {
            let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
            let missing: Vec<&str> = ESSENTIAL_TABLES
                .iter()
                .filter(|t| !names.contains(*t))
                .copied()
                .collect();

            if missing.is_empty() {
                CheckResult::pass(
                    "database_schema",
                    format!("Database schema valid ({} tables)", tables.len()),
                )
            } else {
                CheckResult::fail("database_schema", "Missing essential database tables", true)
                    .with_details(format!("Missing: {}", missing.join(", ")))
            }
        }
        Err(e) => CheckResult::fail("database_schema", "Failed to query database schema", true)
            .with_details(e.to_string()),
    }
}

/// Create the directory if needed and prove a file can be written in it
fn check_writable(name: &str, dir: &Path) -> CheckResult {
    if let Err(e) = std::fs::create_dir_all(dir) {
        return CheckResult::fail(name, "Directory cannot be created", true)
            .with_details(format!("{}: {}", dir.display(), e));
    }

    let marker = dir.join(".sybertailor_write_test");
    match std::fs::write(&marker, "test") {
        Ok(_) => {
            let _ = std::fs::remove_file(&marker);
            CheckResult::pass(name, "Directory is writable").with_details(format!("Path: {}", dir.display()))
        }
        Err(e) => CheckResult::fail(name, "Directory is not writable", true)
            .with_details(format!("{}: {}", dir.display(), e)),
    }
}

fn check_token_secrets(config: &Config) -> CheckResult {
    let mut defaults = Vec::new();
    if config.auth.access_token_secret == DEFAULT_ACCESS_SECRET {
        defaults.push("access_token_secret");
    }
    if config.auth.refresh_token_secret == DEFAULT_REFRESH_SECRET {
        defaults.push("refresh_token_secret");
    }
    if config.auth.access_token_secret == config.auth.refresh_token_secret {
        defaults.push("access and refresh secrets are identical");
    }

    if defaults.is_empty() {
        CheckResult::pass("token_secrets", "Token secrets configured")
    } else {
        CheckResult::fail("token_secrets", "Token secrets left at insecure values", false)
            .with_details(defaults.join(", "))
    }
}

fn check_email(config: &Config) -> CheckResult {
    if !config.email.is_configured() {
        return CheckResult::fail("email", "SMTP is not configured, emails will only be logged", false)
            .with_details("Set email.smtp_host and email.from_address");
    }
    match config.email.admin_email {
        Some(_) => CheckResult::pass("email", "Email delivery configured"),
        None => CheckResult::fail("email", "No admin email configured, shop alerts are skipped", false),
    }
}

fn check_payments(config: &Config) -> CheckResult {
    match config.payments.secret_key.as_deref() {
        Some(key) if !key.trim().is_empty() => CheckResult::pass(
            "payments",
            format!("Payment gateway configured ({})", config.payments.currency),
        ),
        _ => CheckResult::fail("payments", "Payment gateway secret key missing, payments cannot be verified", false),
    }
}

fn check_storage(config: &Config) -> CheckResult {
    match config.storage.backend {
        StorageBackend::Local => {
            let mut result = check_writable("storage", &config.uploads_dir());
            if result.passed {
                result.message = "Local upload directory is writable".to_string();
            }
            result
        }
        StorageBackend::S3 => {
            let storage = &config.storage;
            let mut missing = Vec::new();
            if storage.bucket.as_deref().map_or(true, str::is_empty) {
                missing.push("bucket");
            }
            if storage.access_key_id.is_none() {
                missing.push("access_key_id");
            }
            if storage.secret_access_key.is_none() {
                missing.push("secret_access_key");
            }
            if missing.is_empty() {
                CheckResult::pass("storage", "S3 storage configured")
            } else {
                CheckResult::fail("storage", "S3 storage is missing settings", true)
                    .with_details(format!("Missing: {}", missing.join(", ")))
            }
        }
    }
}
