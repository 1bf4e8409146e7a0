use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;

use crate::AppState;

mod admin;
mod app;

/// Wrap a payload in the uniform success envelope.
pub(crate) fn ok<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(json!({ "success": true, "data": data }))
}

/// The signed integration surface for the external user application.
pub fn app_routes() -> Router<AppState> {
    app::routes()
}

/// The session-authenticated dashboard surface.
pub fn admin_routes() -> Router<AppState> {
    admin::routes()
}
