//! Admin endpoints: ping, build info, health report and good-to-go.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use dstore_store::ObjectStore;
use serde::Serialize;
use serde_json::json;
use tracing::error;

/// Shared state of the admin endpoints.
#[derive(Clone, Debug)]
pub struct AdminState {
    pub store: Arc<dyn ObjectStore>,
    pub health_key: String,
    pub system_code: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub name: String,
    pub ok: bool,
    pub severity: u8,
    pub business_impact: String,
    pub technical_summary: String,
    pub check_output: String,
    pub last_updated: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub schema_version: u8,
    pub system_code: String,
    pub name: String,
    pub description: String,
    pub checks: Vec<CheckResult>,
    pub ok: bool,
}

impl AdminState {
    /// HEAD the health key. A missing key still proves the store answers.
    async fn object_store_check(&self) -> CheckResult {
        let (ok, check_output) = match self.store.head_exists(&self.health_key).await {
            Ok(_) => (true, "Access to object store ok".to_string()),
            Err(e) => {
                error!(error = %e, key = %self.health_key, "object store health check failed");
                (false, format!("Can not perform check on object store: {e}"))
            }
        };
        CheckResult {
            name: "Object store check".to_string(),
            ok,
            severity: 2,
            business_impact: "Unable to access the object store".to_string(),
            technical_summary: "Can not access the object store.".to_string(),
            check_output,
            last_updated: Utc::now(),
        }
    }
}

pub async fn ping() -> &'static str {
    "pong"
}

pub async fn build_info() -> impl IntoResponse {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "repository": env!("CARGO_PKG_REPOSITORY"),
    }))
}

pub async fn health(State(state): State<AdminState>) -> Json<HealthReport> {
    let checks = vec![state.object_store_check().await];
    let ok = checks.iter().all(|c| c.ok);
    Json(HealthReport {
        schema_version: 1,
        system_code: state.system_code.clone(),
        name: "dstore health checks".to_string(),
        description: "Runs a HEAD check against the object store".to_string(),
        checks,
        ok,
    })
}

pub async fn gtg(State(state): State<AdminState>) -> impl IntoResponse {
    if state.object_store_check().await.ok {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Head request to object store failed")
    }
}
