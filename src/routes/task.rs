use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::{State, delete, get, post};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{BrokerError, BrokerResult};
use crate::models::{AssignTask, CreateTask, Task, TaskPriority, TaskStatus, UpdateTask};
use crate::task_service::TaskService;

fn parse_uuid(raw: &str) -> BrokerResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| BrokerError::Validation(format!("not a valid task id: {raw}")))
}

#[post("/api/v1/projects/<project_id>/tasks", data = "<req>")]
pub fn create(project_id: &str, req: Json<CreateTask>, tasks: &State<Arc<TaskService>>) -> BrokerResult<Json<Task>> {
    let mut req = req.into_inner();
    req.project_id = project_id.to_string();
    Ok(Json(tasks.create_task(req)?))
}

#[get("/api/v1/projects/<project_id>/tasks?<status>&<priority>")]
pub fn list(
    project_id: &str,
    status: Option<&str>,
    priority: Option<&str>,
    tasks: &State<Arc<TaskService>>,
) -> BrokerResult<Json<Vec<Task>>> {
    let status: Option<TaskStatus> = status.and_then(|s| serde_json::from_value(serde_json::Value::String(s.to_string())).ok());
    let priority: Option<TaskPriority> =
        priority.and_then(|p| serde_json::from_value(serde_json::Value::String(p.to_string())).ok());
    Ok(Json(tasks.list_tasks(project_id, status, priority)?))
}

#[get("/api/v1/projects/<project_id>/tasks/<task_id>")]
pub fn get(project_id: &str, task_id: &str, tasks: &State<Arc<TaskService>>) -> BrokerResult<Json<Task>> {
    Ok(Json(tasks.get_task(project_id, parse_uuid(task_id)?)?))
}

#[rocket::patch("/api/v1/projects/<project_id>/tasks/<task_id>", data = "<req>")]
pub fn update(
    project_id: &str,
    task_id: &str,
    req: Json<UpdateTask>,
    tasks: &State<Arc<TaskService>>,
) -> BrokerResult<Json<Task>> {
    Ok(Json(tasks.update_task(project_id, parse_uuid(task_id)?, req.into_inner())?))
}

#[delete("/api/v1/projects/<project_id>/tasks/<task_id>")]
pub fn delete(project_id: &str, task_id: &str, tasks: &State<Arc<TaskService>>) -> BrokerResult<Json<serde_json::Value>> {
    tasks.delete_task(project_id, parse_uuid(task_id)?)?;
    Ok(Json(serde_json::json!({"deleted": true})))
}

#[post("/api/v1/projects/<project_id>/tasks/<task_id>/assign", data = "<req>")]
pub fn assign(
    project_id: &str,
    task_id: &str,
    req: Json<AssignTask>,
    tasks: &State<Arc<TaskService>>,
) -> BrokerResult<Json<Task>> {
    Ok(Json(tasks.assign_task(project_id, parse_uuid(task_id)?, req.into_inner())?))
}

#[delete("/api/v1/projects/<project_id>/tasks/<task_id>/assign")]
pub fn unassign(project_id: &str, task_id: &str, tasks: &State<Arc<TaskService>>) -> BrokerResult<Json<Task>> {
    Ok(Json(tasks.unassign_task(project_id, parse_uuid(task_id)?)?))
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: TaskStatus,
}

#[post("/api/v1/projects/<project_id>/tasks/<task_id>/status", data = "<req>")]
pub fn set_status(
    project_id: &str,
    task_id: &str,
    req: Json<StatusBody>,
    tasks: &State<Arc<TaskService>>,
) -> BrokerResult<Json<Task>> {
    Ok(Json(tasks.update_status(project_id, parse_uuid(task_id)?, req.into_inner().status)?))
}

#[post("/api/v1/projects/<project_id>/tasks/<task_id>/dependencies/<dependency_id>")]
pub fn add_dependency(
    project_id: &str,
    task_id: &str,
    dependency_id: &str,
    tasks: &State<Arc<TaskService>>,
) -> BrokerResult<Json<Task>> {
    Ok(Json(tasks.add_dependency(project_id, parse_uuid(task_id)?, parse_uuid(dependency_id)?)?))
}

#[delete("/api/v1/projects/<project_id>/tasks/<task_id>/dependencies/<dependency_id>")]
pub fn remove_dependency(
    project_id: &str,
    task_id: &str,
    dependency_id: &str,
    tasks: &State<Arc<TaskService>>,
) -> BrokerResult<Json<Task>> {
    Ok(Json(tasks.remove_dependency(project_id, parse_uuid(task_id)?, parse_uuid(dependency_id)?)?))
}
