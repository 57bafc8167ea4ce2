//! 健康检查：/health 返回统计快照。

use axum::extract::State;
use axum::response::Json;
use chrono::Utc;
use serde_json::{json, Value};

use crate::proxy::server::AppState;

pub async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "time": Utc::now().to_rfc3339(),
        "version": state.stats.version(),
        "stats": state.stats.snapshot(),
    }))
}
