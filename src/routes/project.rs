use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::{State, delete, get, patch, post};

use crate::admin_policy::AdminPolicy;
use crate::error::{BrokerError, BrokerResult};
use crate::guards::ApiKeyHeader;
use crate::models::{CreateProject, CreatedProject, Project, RotatedKey, UpdateProject};
use crate::project_registry::ProjectRegistry;

#[post("/api/v1/projects", data = "<req>")]
pub fn create_project(req: Json<CreateProject>, projects: &State<Arc<ProjectRegistry>>) -> BrokerResult<Json<CreatedProject>> {
    Ok(Json(projects.create_project(req.into_inner())?))
}

#[get("/api/v1/projects?<name_filter>&<include_inactive>")]
pub fn list_projects(
    name_filter: Option<&str>,
    include_inactive: bool,
    projects: &State<Arc<ProjectRegistry>>,
) -> BrokerResult<Json<Vec<Project>>> {
    Ok(Json(projects.list_projects(name_filter, include_inactive, false)?))
}

#[get("/api/v1/projects/<project_id>")]
pub fn get_project(project_id: &str, projects: &State<Arc<ProjectRegistry>>) -> BrokerResult<Json<Project>> {
    Ok(Json(projects.get_project(project_id)?))
}

fn require_admin(project_id: &str, api_key: &ApiKeyHeader, policy: &AdminPolicy) -> BrokerResult<()> {
    if policy.can_manage_project(project_id, api_key.0.as_deref().unwrap_or_default()) {
        Ok(())
    } else {
        Err(BrokerError::Forbidden(format!("api key does not administer project {project_id}")))
    }
}

#[patch("/api/v1/projects/<project_id>", data = "<req>")]
pub fn update_project(
    project_id: &str,
    req: Json<UpdateProject>,
    api_key: ApiKeyHeader,
    projects: &State<Arc<ProjectRegistry>>,
    policy: &State<Arc<AdminPolicy>>,
) -> BrokerResult<Json<Project>> {
    require_admin(project_id, &api_key, policy)?;
    Ok(Json(projects.update_project(project_id, req.into_inner())?))
}

#[delete("/api/v1/projects/<project_id>")]
pub fn delete_project(
    project_id: &str,
    api_key: ApiKeyHeader,
    projects: &State<Arc<ProjectRegistry>>,
    policy: &State<Arc<AdminPolicy>>,
) -> BrokerResult<Json<serde_json::Value>> {
    require_admin(project_id, &api_key, policy)?;
    projects.delete_project(project_id)?;
    policy.clear_permission_cache();
    Ok(Json(serde_json::json!({"deleted": true})))
}

#[post("/api/v1/projects/<project_id>/rotate-keys?<key_id>&<grace_period_seconds>")]
pub fn rotate_keys(
    project_id: &str,
    key_id: Option<&str>,
    grace_period_seconds: Option<i64>,
    api_key: ApiKeyHeader,
    projects: &State<Arc<ProjectRegistry>>,
    policy: &State<Arc<AdminPolicy>>,
) -> BrokerResult<Json<Vec<RotatedKey>>> {
    require_admin(project_id, &api_key, policy)?;
    Ok(Json(projects.rotate_api_keys(project_id, key_id, grace_period_seconds.unwrap_or(300))?))
}
