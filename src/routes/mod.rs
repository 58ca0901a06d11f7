pub mod auth;
pub mod meeting;
pub mod message;
pub mod project;
pub mod protocol;
pub mod session;
pub mod system;
pub mod task;

use rocket::http::Status;
use rocket::request::Request;
use rocket::serde::json::Json;
use rocket::catch;
use serde_json::json;

#[catch(404)]
pub fn not_found() -> Json<serde_json::Value> {
    Json(json!({"error": "NOT_FOUND", "message": "no such route"}))
}

#[catch(429)]
pub fn too_many_requests() -> Json<serde_json::Value> {
    Json(json!({"error": "RATE_LIMITED", "message": "too many requests"}))
}

#[catch(default)]
pub fn default_catcher(status: Status, _req: &Request) -> Json<serde_json::Value> {
    Json(json!({"error": status.reason().unwrap_or("ERROR"), "message": status.to_string()}))
}
