use std::net::SocketAddr;

use axum::{
    Json, Router,
    extract::{ConnectInfo, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    routing::{get, post},
};

use portal_core::NetworkMetadata;

use crate::app::errors::json_error;

pub mod auth;
pub mod logs;
pub mod students;
pub mod system;

/// Routes reachable without a token (mounted under `/api`).
pub fn public_router() -> Router {
    Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
}

/// Routes behind the auth middleware (mounted under `/api`).
pub fn protected_router() -> Router {
    Router::new()
        .route("/me", get(students::me).patch(students::update_me))
        .route("/students/:student_number", get(students::get_student))
        // Singular path kept for existing portal clients.
        .route("/student/:student_number", get(students::get_student))
        .route("/logs/:student_number", get(logs::list_logs))
}

/// Unwrap a JSON body, answering malformed input with the usual error shape.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, axum::response::Response> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, "invalid_body", e.body_text()))
}

/// Client address and agent. The first `X-Forwarded-For` hop wins over the
/// socket peer so deployments behind a proxy record the real client.
pub(crate) fn network_metadata(
    headers: &HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> NetworkMetadata {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from);

    NetworkMetadata {
        ip: forwarded.or_else(|| peer.map(|ConnectInfo(addr)| addr.ip().to_string())),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn forwarded_for_takes_precedence_over_peer() {
        let peer = Some(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));

        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8"));
        let meta = network_metadata(&headers, peer);
        assert_eq!(meta.ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(meta.user_agent.as_deref(), Some("curl/8"));

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        let meta = network_metadata(&headers, peer);
        assert_eq!(meta.ip.as_deref(), Some("203.0.113.9"));

        assert_eq!(network_metadata(&HeaderMap::new(), None), NetworkMetadata::default());
    }
}
