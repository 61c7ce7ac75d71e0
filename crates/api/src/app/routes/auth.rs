use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json,
    extract::{ConnectInfo, Extension, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde_json::json;

use crate::app::routes::{json_body, network_metadata};
use crate::app::services::{AppServices, ServiceError};
use crate::app::{dto, errors};

pub async fn register(
    Extension(services): Extension<Arc<AppServices>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<dto::RegisterRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match json_body(payload) {
        Ok(body) => body,
        Err(resp) => return resp,
    };

    match services
        .register(body.into_registration(), network_metadata(&headers, peer))
        .await
    {
        Ok(registered) => {
            let message = if registered.email_sent {
                "Registration successful! Check your email for confirmation."
            } else {
                "Registration successful! You can now login."
            };
            let mut data = dto::SessionData::new(&registered.account);
            data.email_sent = Some(registered.email_sent);
            (
                StatusCode::CREATED,
                Json(json!({
                    "success": true,
                    "message": message,
                    "token": registered.token,
                    "data": data,
                })),
            )
                .into_response()
        }
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<dto::LoginRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match json_body(payload) {
        Ok(body) => body,
        Err(resp) => return resp,
    };

    let Some(identifier) = body.identifier().filter(|_| !body.password.is_empty()) else {
        return errors::service_error_to_response(ServiceError::Validation(
            "please provide an email or student number and a password".to_string(),
        ));
    };

    match services
        .login(identifier, body.password, network_metadata(&headers, peer))
        .await
    {
        Ok(session) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "Login successful",
                "token": session.token,
                "data": dto::SessionData::new(&session.account),
            })),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
