use axum::Json;
use serde_json::{json, Value};

pub const SERVICE_NAME: &str = "beach-cache-dashboard";

pub async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "build": env!("DASHBOARD_BUILD_ID"),
    }))
}
