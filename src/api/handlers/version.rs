use axum::{http::StatusCode, response::IntoResponse};

pub const VERSION_BANNER: &str = "Auth API, written in Rust\n";

#[utoipa::path(
    get,
    path= "/version",
    responses (
        (status = 200, description = "Service banner", body = String),
    ),
    tag = "health",
)]
pub async fn version() -> impl IntoResponse {
    (StatusCode::OK, VERSION_BANNER)
}
