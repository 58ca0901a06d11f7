use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::{State, post};

use crate::auth::AuthService;
use crate::error::BrokerResult;
use crate::guards::AuthenticatedUser;
use crate::models::{CreatedAgent, LoginRequest, RegisterAgent, RegisterUser, Role, TokenPair, User};

#[post("/api/v1/auth/register", data = "<req>")]
pub fn register(req: Json<RegisterUser>, auth: &State<Arc<AuthService>>) -> BrokerResult<Json<User>> {
    let user = auth.register_user(&req.username, &req.email, &req.password, Role::User)?;
    Ok(Json(user))
}

#[post("/api/v1/auth/login", data = "<req>")]
pub fn login(req: Json<LoginRequest>, auth: &State<Arc<AuthService>>) -> BrokerResult<Json<TokenPair>> {
    let user = auth.authenticate_user(&req.username, &req.password)?;
    Ok(Json(auth.issue_tokens(&user)?))
}

#[post("/api/v1/auth/refresh", data = "<refresh_token>")]
pub fn refresh(refresh_token: Json<String>, auth: &State<Arc<AuthService>>) -> BrokerResult<Json<TokenPair>> {
    Ok(Json(auth.refresh_access_token(&refresh_token.0)?))
}

#[post("/api/v1/auth/logout", data = "<token>")]
pub fn logout(token: Json<String>, auth: &State<Arc<AuthService>>, _user: AuthenticatedUser) -> Json<serde_json::Value> {
    auth.revoke_token(&token.0);
    Json(serde_json::json!({"revoked": true}))
}

/// Mints a new agent identity; requires a logged-in human user as `created_by_id`.
#[post("/api/v1/agents/register", data = "<req>")]
pub fn register_agent(
    req: Json<RegisterAgent>,
    auth: &State<Arc<AuthService>>,
    user: AuthenticatedUser,
) -> BrokerResult<Json<CreatedAgent>> {
    let (agent, plaintext) = auth.register_agent(&req.project_id, &req.nickname, req.capabilities.clone(), Some(user.0))?;
    Ok(Json(CreatedAgent { agent, plaintext_token: plaintext }))
}
