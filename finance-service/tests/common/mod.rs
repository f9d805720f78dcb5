//! Test helper module for finance-service integration tests.
//!
//! Tests run against a real PostgreSQL instance, one schema per test for
//! isolation. They are skipped (return early) when `TEST_DATABASE_URL`
//! is not set.

#![allow(dead_code)]

use finance_service::config::{Config, DatabaseConfig, ServerConfig};
use finance_service::services::{init_metrics, Database};
use finance_service::startup::Application;
use secrecy::Secret;
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

// Test constants for institution scoping
pub const TEST_INSTITUTION_ID: &str = "11111111-1111-1111-1111-111111111111";
pub const OTHER_INSTITUTION_ID: &str = "22222222-2222-2222-2222-222222222222";
pub const TEST_STUDENT_ID: &str = "33333333-3333-3333-3333-333333333333";
pub const TEST_ACADEMIC_YEAR_ID: &str = "44444444-4444-4444-4444-444444444444";

// Counter for unique schema names
static SCHEMA_COUNTER: AtomicU32 = AtomicU32::new(0);

fn unique_schema_name() -> String {
    let counter = SCHEMA_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("test_finance_{}_{}", std::process::id(), counter)
}

/// Test application wrapper for integration tests.
pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub db: Database,
    schema_name: String,
    base_url: String,
}

impl TestApp {
    /// Spawn a new test application on a random port.
    ///
    /// Returns `None` when `TEST_DATABASE_URL` is not set so suites can
    /// skip gracefully on machines without PostgreSQL.
    pub async fn spawn() -> Option<Self> {
        let Ok(base_url) = std::env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL not set; skipping integration test");
            return None;
        };

        init_metrics();

        let schema_name = unique_schema_name();

        // Create schema for test isolation
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect(&base_url)
            .await
            .expect("Failed to connect to test database");

        sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema_name))
            .execute(&pool)
            .await
            .ok();
        sqlx::query(&format!("CREATE SCHEMA {}", schema_name))
            .execute(&pool)
            .await
            .expect("Failed to create test schema");

        pool.close().await;

        let separator = if base_url.contains('?') { "&" } else { "?" };
        let db_url_with_schema = format!(
            "{}{}options=-c search_path%3D{}",
            base_url, separator, schema_name
        );

        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Random port
            },
            database: DatabaseConfig {
                url: Secret::new(db_url_with_schema.clone()),
                max_connections: 5,
                min_connections: 1,
            },
            service_name: "finance-service-test".to_string(),
            log_level: "warn".to_string(),
        };

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let db = Database::new(&db_url_with_schema, 5, 1)
            .await
            .expect("Failed to create test database handle");

        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the HTTP server to be ready by polling the health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("http://127.0.0.1:{}/health", port);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        Some(TestApp {
            address,
            port,
            db,
            schema_name,
            base_url,
        })
    }

    pub fn institution_id(&self) -> Uuid {
        Uuid::parse_str(TEST_INSTITUTION_ID).unwrap()
    }

    pub fn student_id(&self) -> Uuid {
        Uuid::parse_str(TEST_STUDENT_ID).unwrap()
    }

    /// Cleanup test resources (schema).
    pub async fn cleanup(&self) {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(&self.base_url)
            .await
            .ok();

        if let Some(pool) = pool {
            sqlx::query(&format!(
                "DROP SCHEMA IF EXISTS {} CASCADE",
                self.schema_name
            ))
            .execute(&pool)
            .await
            .ok();
            pool.close().await;
        }
    }
}

/// POST a JSON body with institution headers.
pub async fn post_json(
    app: &TestApp,
    institution_id: &str,
    path: &str,
    body: serde_json::Value,
) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{}{}", app.address, path))
        .header("X-Institution-ID", institution_id)
        .header("X-User-ID", "test-staff")
        .json(&body)
        .send()
        .await
        .expect("Failed to execute request")
}

/// PUT a JSON body with institution headers.
pub async fn put_json(
    app: &TestApp,
    institution_id: &str,
    path: &str,
    body: serde_json::Value,
) -> reqwest::Response {
    reqwest::Client::new()
        .put(format!("{}{}", app.address, path))
        .header("X-Institution-ID", institution_id)
        .header("X-User-ID", "test-staff")
        .json(&body)
        .send()
        .await
        .expect("Failed to execute request")
}

/// GET with institution headers.
pub async fn get(app: &TestApp, institution_id: &str, path: &str) -> reqwest::Response {
    reqwest::Client::new()
        .get(format!("{}{}", app.address, path))
        .header("X-Institution-ID", institution_id)
        .send()
        .await
        .expect("Failed to execute request")
}

/// DELETE with institution headers.
pub async fn delete(app: &TestApp, institution_id: &str, path: &str) -> reqwest::Response {
    reqwest::Client::new()
        .delete(format!("{}{}", app.address, path))
        .header("X-Institution-ID", institution_id)
        .send()
        .await
        .expect("Failed to execute request")
}

/// Create an invoice and return its JSON representation.
pub async fn create_invoice(
    app: &TestApp,
    institution_id: &str,
    total_amount: &str,
    status: &str,
) -> serde_json::Value {
    let response = post_json(
        app,
        institution_id,
        "/invoices",
        serde_json::json!({
            "student_id": TEST_STUDENT_ID,
            "academic_year_id": TEST_ACADEMIC_YEAR_ID,
            "issue_date": "2025-06-01",
            "due_date": "2025-07-01",
            "total_amount": total_amount,
            "status": status,
        }),
    )
    .await;
    assert_eq!(response.status(), 201, "invoice creation failed");
    response.json().await.expect("Failed to parse invoice JSON")
}

/// Parse a decimal field serialized as a JSON string.
pub fn decimal_field(value: &serde_json::Value, field: &str) -> rust_decimal::Decimal {
    value[field]
        .as_str()
        .unwrap_or_else(|| panic!("{} is not a string: {:?}", field, value[field]))
        .parse()
        .unwrap_or_else(|_| panic!("{} is not a decimal", field))
}

/// Expected document number for the current month.
pub fn expected_number(prefix: &str, sequence: i64) -> String {
    use chrono::Datelike;
    let today = chrono::Utc::now().date_naive();
    format!(
        "{}-{}-{:02}-{:04}",
        prefix,
        today.year(),
        today.month(),
        sequence
    )
}
