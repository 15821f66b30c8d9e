//! Liveness and readiness.
//!
//! `/healthz` answers as long as the process serves requests. `/readyz`
//! answers 200 only when objects can actually be stored: the storage root is
//! a writable directory and the checksum table exists.

use crate::services::{
    names::{TEMP_FILE_PREFIX, TEMP_FILE_SUFFIX},
    storage_service::StorageService,
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::path::Path;
use tokio::fs::{self, OpenOptions};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: Vec<Check>,
}

#[derive(Debug, Serialize)]
struct Check {
    name: &'static str,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl Check {
    fn from_result(name: &'static str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self {
                name,
                ok: true,
                detail: None,
            },
            Err(detail) => {
                warn!("readiness check `{}` failed: {}", name, detail);
                Self {
                    name,
                    ok: false,
                    detail: Some(detail),
                }
            }
        }
    }
}

/// `GET /healthz`
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /readyz`
///
/// 503 with the failing checks listed when the store cannot take writes.
pub async fn readyz(State(service): State<StorageService>) -> impl IntoResponse {
    let checks = vec![
        Check::from_result("storage_root", check_storage_root(&service.root).await),
        Check::from_result("checksum_index", check_index(&service).await),
    ];

    let ready = checks.iter().all(|check| check.ok);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadyResponse {
        status: if ready { "ok" } else { "unavailable" },
        checks,
    };
    (status, Json(body))
}

/// The root must be a directory in which uploads can create their temp files.
async fn check_storage_root(root: &Path) -> Result<(), String> {
    let meta = fs::metadata(root)
        .await
        .map_err(|e| format!("{}: {}", root.display(), e))?;
    if !meta.is_dir() {
        return Err(format!("{} is not a directory", root.display()));
    }

    // named like an in-flight upload so listings never show it
    let scratch = root.join(format!(
        "{TEMP_FILE_PREFIX}{}{TEMP_FILE_SUFFIX}",
        Uuid::new_v4()
    ));
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&scratch)
        .await
        .map_err(|e| format!("{} is not writable: {}", root.display(), e))?;
    fs::remove_file(&scratch)
        .await
        .map_err(|e| format!("could not remove {}: {}", scratch.display(), e))
}

async fn check_index(service: &StorageService) -> Result<(), String> {
    match service.index.schema_ready().await {
        Ok(true) => Ok(()),
        Ok(false) => Err("checksum table missing, start once with --migrate".to_string()),
        Err(e) => Err(e.to_string()),
    }
}
