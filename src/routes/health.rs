use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::AppState;

/// Reports database and cache reachability.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let db = sqlx::query("SELECT 1").execute(&state.db).await;

    let mut redis = state.redis.clone();
    let cache: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut redis).await;

    match (db, cache) {
        (Ok(_), Ok(_)) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "db": "connected", "cache": "connected" })),
        ),
        (db, cache) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "db": db.err().map_or_else(|| "connected".to_string(), |e| e.to_string()),
                "cache": cache.err().map_or_else(|| "connected".to_string(), |e| e.to_string()),
            })),
        ),
    }
}
