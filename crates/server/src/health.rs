//! Health endpoint, served outside the authentication layer.

use axum::Json;

pub(crate) async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}
