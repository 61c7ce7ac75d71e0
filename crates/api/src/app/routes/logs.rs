use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::StudentContext;

pub async fn list_logs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(student): Extension<StudentContext>,
    Path(student_number): Path<String>,
) -> axum::response::Response {
    match services.logs(student.student_number(), &student_number).await {
        Ok(events) => {
            let items = events.into_iter().map(dto::LogEntry::from).collect::<Vec<_>>();
            (StatusCode::OK, Json(json!({ "success": true, "data": items }))).into_response()
        }
        Err(e) => errors::service_error_to_response(e),
    }
}
