use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json,
    extract::{ConnectInfo, Extension, Path, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde_json::json;

use crate::app::routes::{json_body, network_metadata};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::StudentContext;

fn student_response(account: &portal_core::Account) -> axum::response::Response {
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": dto::StudentView::from(account),
        })),
    )
        .into_response()
}

pub async fn me(Extension(student): Extension<StudentContext>) -> axum::response::Response {
    student_response(student.account())
}

pub async fn update_me(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(student): Extension<StudentContext>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<dto::UpdateProfileRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match json_body(payload) {
        Ok(body) => body,
        Err(resp) => return resp,
    };

    match services
        .update_profile(student.account(), body.into(), network_metadata(&headers, peer))
        .await
    {
        Ok(account) => student_response(&account),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_student(
    Extension(services): Extension<Arc<AppServices>>,
    Path(student_number): Path<String>,
) -> axum::response::Response {
    match services.student(&student_number).await {
        Ok(account) => student_response(&account),
        Err(e) => errors::service_error_to_response(e),
    }
}
