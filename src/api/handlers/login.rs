use crate::{
    api::handlers::ErrorMessage,
    auth::{token::TokenIssuer, LoginError, UserService},
};
use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::{header::CACHE_CONTROL, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tracing::{error, info, instrument, Span};
use utoipa::ToSchema;

/// Missing fields decode as empty strings, which then fail the credential check.
#[derive(ToSchema, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
}

impl IntoResponse for LoginError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::WrongCredentials => StatusCode::UNAUTHORIZED,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorMessage::new(self.to_string()))).into_response()
    }
}

#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses (
        (status = 200, description = "Signed access token", body = LoginResponse),
        (status = 401, description = "Username or password is invalid", body = ErrorMessage),
        (status = 500, description = "Login could not be completed", body = ErrorMessage),
    ),
    tag = "login",
)]
/// Exchange a username/password pair for an access token.
#[instrument(skip_all, fields(username))]
pub async fn login(
    users: Extension<Arc<UserService>>,
    issuer: Extension<Arc<TokenIssuer>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(err) => {
            error!("Failed to read login request: {err}");
            return LoginError::Internal.into_response();
        }
    };

    Span::current().record("username", request.username.as_str());

    let identity = match users.login(&request.username, &request.password).await {
        Ok(identity) => identity,
        Err(err) => return err.into_response(),
    };

    let access_token = match issuer.issue(&identity) {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to sign access token: {err}");
            return LoginError::Internal.into_response();
        }
    };

    info!(role = identity.role(), "login succeeded");

    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));

    (StatusCode::OK, headers, Json(LoginResponse { access_token })).into_response()
}
