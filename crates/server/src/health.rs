use axum::extract::State;
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::bootstrap::AppState;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub grades: Vec<String>,
    pub active_sessions: usize,
    pub checked_at: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health)).route("/", get(index))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ready",
        service: "leavedesk-server",
        grades: state.grades.to_vec(),
        active_sessions: state.store.len().await,
        checked_at: Utc::now().to_rfc3339(),
    })
}

pub async fn index(State(state): State<AppState>) -> Html<String> {
    let grades = state.grades.join("、");
    Html(format!(
        "<!doctype html>\n<html lang=\"zh-Hant\">\n<head><meta charset=\"utf-8\"><title>請假系統</title></head>\n\
         <body>\n<h1>請假系統運作中</h1>\n<p>年級：{grades}</p>\n\
         <p>Webhook：<code>POST /webhook</code></p>\n</body>\n</html>\n"
    ))
}
