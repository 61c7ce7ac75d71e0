//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store wiring and the register/login/profile/log use cases
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>, config: &Config) -> Router {
    let auth_state = middleware::AuthState {
        jwt: services.jwt_validator(),
        accounts: services.accounts(),
    };

    // Protected routes: require a bearer token for an existing student.
    let protected = routes::protected_router().route_layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    let cors = CorsLayer::new()
        .allow_origin(match &config.cors_allow_origin {
            Some(origin) => AllowOrigin::exact(origin.clone()),
            None => AllowOrigin::from(Any),
        })
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/api", routes::public_router().merge(protected))
        .fallback(routes::system::route_not_found)
        .layer(Extension(services))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}
