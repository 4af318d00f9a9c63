//! Common test utilities

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::NaiveDate;
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use tower::util::ServiceExt;
use uuid::Uuid;

use school_ledger::api::{self, AppState};
use school_ledger::domain::{AcademicSession, Money, Student};
use school_ledger::store::{InMemoryLedgerStore, LedgerStore, PgLedgerStore};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Router over a fresh in-memory store, with one tenant and its
/// current session already registered
pub struct TestApp {
    pub app: Router,
    pub store: Arc<InMemoryLedgerStore>,
    pub tenant_id: Uuid,
    pub session: AcademicSession,
}

impl TestApp {
    pub async fn new() -> Self {
        let store = Arc::new(InMemoryLedgerStore::new());
        let tenant_id = Uuid::new_v4();
        let session = AcademicSession::new(tenant_id, "2024-25", date(2024, 4, 1), date(2025, 3, 31)).current();
        store.save_session(&session).await.unwrap();

        let shared: Arc<dyn LedgerStore> = store.clone();
        let app = api::build_router(AppState::new(shared));

        Self {
            app,
            store,
            tenant_id,
            session,
        }
    }

    pub async fn enroll(&self, name: &str, class_id: &str, fee: i64) -> Student {
        let student = Student::new(
            self.tenant_id,
            name,
            self.session.id,
            class_id,
            Some("A".to_string()),
            Money::from_major(fee),
        );
        self.store.save_student(&student).await.unwrap();
        student
    }

    /// Send a request as this app's tenant
    pub async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.send_as(self.tenant_id, method, uri, body, &[]).await
    }

    pub async fn send_as(
        &self,
        tenant_id: Uuid,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .header("X-Tenant-Id", tenant_id.to_string());
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let body = match body {
            Some(json) => Body::from(serde_json::to_vec(&json).unwrap()),
            None => Body::empty(),
        };
        send_request(&self.app, builder.body(body).unwrap()).await
    }
}

/// Run one request through the router and decode the JSON reply
pub async fn send_request(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, json)
}

/// PostgreSQL store for tests, or `None` when DATABASE_URL is unset
pub async fn pg_store() -> Option<PgLedgerStore> {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").ok()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");
    school_ledger::db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    Some(PgLedgerStore::new(pool))
}
