use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::{State, get};
use serde_json::json;

use crate::project_registry::ProjectRegistry;
use crate::router::Router;

#[get("/api/v1/health")]
pub fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

#[get("/api/v1/stats?<project_id>")]
pub fn stats(
    project_id: &str,
    router: &State<Arc<Router>>,
    projects: &State<Arc<ProjectRegistry>>,
) -> Result<Json<serde_json::Value>, crate::error::BrokerError> {
    let project = projects.get_project(project_id)?;
    Ok(Json(json!({
        "project": project.statistics,
        "messages": router.stats_for(project_id),
    })))
}
