use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use rocket::serde::json::Json;
use rocket::{State, post};
use uuid::Uuid;

use crate::cross_project_router::CrossProjectRouter;
use crate::error::BrokerResult;
use crate::guards::ApiKeyHeader;
use crate::models::{BroadcastResult, Message, SendMessage, SendResult, validate_payload};
use crate::negotiator::{NegotiationResult, Negotiator};
use crate::router::Router;
use crate::session_manager::SessionManager;

fn to_message(sender_id: &str, req: SendMessage) -> BrokerResult<Message> {
    validate_payload(&req.payload)?;
    Ok(Message {
        message_id: Uuid::new_v4().to_string(),
        sender_id: sender_id.to_string(),
        recipient_id: None,
        timestamp: Utc::now(),
        protocol_name: req.protocol_name,
        protocol_version: req.protocol_version,
        payload: req.payload,
        headers: req.headers,
        delivered_at: None,
    })
}

#[post("/api/v1/projects/<project_id>/sessions/<sender_id>/send/<recipient_id>", data = "<req>")]
pub fn send(
    project_id: &str,
    sender_id: &str,
    recipient_id: &str,
    req: Json<SendMessage>,
    router: &State<Arc<Router>>,
) -> BrokerResult<Json<SendResult>> {
    let message = to_message(sender_id, req.into_inner())?;
    Ok(Json(router.send_message(project_id, sender_id, recipient_id, message)?))
}

#[post("/api/v1/projects/<project_id>/sessions/<sender_id>/broadcast?<capability_filter>", data = "<req>")]
pub fn broadcast(
    project_id: &str,
    sender_id: &str,
    capability_filter: Option<&str>,
    req: Json<SendMessage>,
    router: &State<Arc<Router>>,
) -> BrokerResult<Json<BroadcastResult>> {
    let message = to_message(sender_id, req.into_inner())?;
    let filter: Option<HashSet<String>> =
        capability_filter.map(|raw| raw.split(',').map(|s| s.to_string()).collect());
    Ok(Json(router.broadcast_message(project_id, sender_id, message, filter.as_ref())?))
}

#[post(
    "/api/v1/projects/<source_project_id>/cross-project/<target_project_id>/send/<sender_id>/<recipient_id>",
    data = "<req>"
)]
pub fn cross_project_send(
    source_project_id: &str,
    target_project_id: &str,
    sender_id: &str,
    recipient_id: &str,
    req: Json<SendMessage>,
    api_key: ApiKeyHeader,
    cross_router: &State<Arc<CrossProjectRouter>>,
) -> BrokerResult<Json<SendResult>> {
    let message = to_message(sender_id, req.into_inner())?;
    Ok(Json(cross_router.send_message(
        source_project_id,
        target_project_id,
        sender_id,
        recipient_id,
        message,
        api_key.0.as_deref(),
    )?))
}

#[post("/api/v1/projects/<project_id>/sessions/<a>/negotiate/<b>?<allow_cross_project>")]
pub fn negotiate(
    project_id: &str,
    a: &str,
    b: &str,
    allow_cross_project: bool,
    sessions: &State<Arc<SessionManager>>,
    negotiator: &State<Arc<Negotiator>>,
) -> BrokerResult<Json<NegotiationResult>> {
    let session_a = sessions.get_session(project_id, a)?;
    let session_b = sessions.get_session(project_id, b)?;
    Ok(Json(negotiator.negotiate(&session_a, &session_b, allow_cross_project)))
}

#[post("/api/v1/projects/<project_id>/compatibility-matrix?<allow_cross_project>")]
pub fn compatibility_matrix(
    project_id: &str,
    allow_cross_project: bool,
    sessions: &State<Arc<SessionManager>>,
    negotiator: &State<Arc<Negotiator>>,
) -> BrokerResult<Json<serde_json::Value>> {
    let all_sessions = sessions.list_sessions(project_id, None)?;
    let (pairs, by_project) = negotiator.compatibility_matrix(&all_sessions, allow_cross_project);
    Ok(Json(serde_json::json!({
        "pairs": pairs.into_iter().map(|((a, b), result)| serde_json::json!({"a": a, "b": b, "result": result})).collect::<Vec<_>>(),
        "by_project": by_project,
    })))
}
