//! Health handlers.
//!
//! - `/health/circuit-breaker`: state and counters of the users API breaker
//! - `/health`: build information plus the breaker state, also answered for `OPTIONS`

use crate::{
    auth::{breaker::Snapshot, UserService},
    GIT_COMMIT_HASH,
};
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerStatus {
    name: String,
    state: String,
    requests: u32,
    total_successes: u32,
    total_failures: u32,
    consecutive_successes: u32,
    consecutive_failures: u32,
}

impl From<Snapshot> for CircuitBreakerStatus {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            name: snapshot.name,
            state: snapshot.state.to_string(),
            requests: snapshot.counts.requests,
            total_successes: snapshot.counts.total_successes,
            total_failures: snapshot.counts.total_failures,
            consecutive_successes: snapshot.counts.consecutive_successes,
            consecutive_failures: snapshot.counts.consecutive_failures,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    circuit_breaker: String,
}

#[utoipa::path(
    get,
    path= "/health/circuit-breaker",
    responses (
        (status = 200, description = "Users API circuit breaker state", body = CircuitBreakerStatus)
    ),
    tag = "health",
)]
/// Report the users API circuit breaker state and counters.
pub async fn circuit_breaker(users: Extension<Arc<UserService>>) -> impl IntoResponse {
    let status = CircuitBreakerStatus::from(users.breaker().snapshot());
    debug!("Circuit breaker status: {:?}", status);
    Json(status)
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Service is up", body = Health)
    ),
    tag = "health",
)]
/// Report build information and the breaker state.
///
/// An open breaker does not make the service unhealthy, logins keep working on
/// the fallback identity.
pub async fn health(method: Method, users: Extension<Arc<UserService>>) -> impl IntoResponse {
    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        circuit_breaker: users.breaker().state().to_string(),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);

            let mut headers = HeaderMap::new();
            headers.insert("X-App", x_app_header_value);
            headers
        })
        .map_err(|err| {
            debug!("Failed to parse X-App header: {}", err);
        })
        .unwrap_or_else(|()| HeaderMap::new());

    (StatusCode::OK, headers, body)
}
