use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::{State, delete, get, post};

use crate::error::BrokerResult;
use crate::models::{CreateSession, Message, Session};
use crate::session_manager::SessionManager;

#[post("/api/v1/projects/<project_id>/sessions", data = "<req>")]
pub fn create(
    project_id: &str,
    req: Json<CreateSession>,
    sessions: &State<Arc<SessionManager>>,
) -> BrokerResult<Json<Session>> {
    let req = req.into_inner();
    Ok(Json(sessions.create_session(project_id, req.session_id, req.capabilities)?))
}

#[get("/api/v1/projects/<project_id>/sessions?<status>")]
pub fn list(
    project_id: &str,
    status: Option<&str>,
    sessions: &State<Arc<SessionManager>>,
) -> BrokerResult<Json<Vec<Session>>> {
    let status = status.and_then(|s| serde_json::from_value(serde_json::Value::String(s.to_string())).ok());
    Ok(Json(sessions.list_sessions(project_id, status)?))
}

#[get("/api/v1/projects/<project_id>/sessions/<session_id>")]
pub fn get(project_id: &str, session_id: &str, sessions: &State<Arc<SessionManager>>) -> BrokerResult<Json<Session>> {
    Ok(Json(sessions.get_session(project_id, session_id)?))
}

#[post("/api/v1/projects/<project_id>/sessions/<session_id>/heartbeat")]
pub fn heartbeat(project_id: &str, session_id: &str, sessions: &State<Arc<SessionManager>>) -> BrokerResult<Json<Session>> {
    Ok(Json(sessions.update_heartbeat(project_id, session_id)?))
}

#[get("/api/v1/projects/<project_id>/sessions/<session_id>/messages?<limit>")]
pub fn dequeue(
    project_id: &str,
    session_id: &str,
    limit: Option<usize>,
    sessions: &State<Arc<SessionManager>>,
) -> BrokerResult<Json<Vec<Message>>> {
    Ok(Json(sessions.dequeue_messages(project_id, session_id, limit.unwrap_or(50))?))
}

#[delete("/api/v1/projects/<project_id>/sessions/<session_id>")]
pub fn disconnect(
    project_id: &str,
    session_id: &str,
    sessions: &State<Arc<SessionManager>>,
) -> BrokerResult<Json<Session>> {
    Ok(Json(sessions.disconnect_session(project_id, session_id)?))
}
