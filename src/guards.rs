//! Request guards: API-key extraction and bearer-JWT identity.

use rocket::http::Status;
use rocket::request::{self, FromRequest, Outcome, Request};
use uuid::Uuid;

use crate::auth::AuthService;

/// The raw `X-Api-Key` header value, if present. Individual routes decide
/// whether a missing key is acceptable (public discovery) or fatal.
pub struct ApiKeyHeader(pub Option<String>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ApiKeyHeader {
    type Error = std::convert::Infallible;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(ApiKeyHeader(req.headers().get_one("X-Api-Key").map(|s| s.to_string())))
    }
}

/// A verified JWT access token's subject, resolved against `AuthService`.
pub struct AuthenticatedUser(pub Uuid);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthenticatedUser {
    type Error = &'static str;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(header) = req.headers().get_one("Authorization") else {
            return Outcome::Error((Status::Unauthorized, "missing Authorization header"));
        };
        let Some(token) = header.strip_prefix("Bearer ") else {
            return Outcome::Error((Status::Unauthorized, "Authorization header is not a Bearer token"));
        };
        let auth: &rocket::State<std::sync::Arc<AuthService>> = match req.guard().await {
            Outcome::Success(s) => s,
            _ => return Outcome::Error((Status::InternalServerError, "AuthService unmanaged")),
        };
        match auth.verify_access_token(token) {
            Ok(user_id) => Outcome::Success(AuthenticatedUser(user_id)),
            Err(_) => Outcome::Error((Status::Unauthorized, "invalid or expired access token")),
        }
    }
}
