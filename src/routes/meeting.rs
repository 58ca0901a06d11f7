use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use rocket::serde::json::Json;
use rocket::{State, get, post};
use serde::Deserialize;
use uuid::Uuid;

use crate::coordinator::DiscussionCoordinator;
use crate::error::{BrokerError, BrokerResult};
use crate::events::EventBus;
use crate::meeting_service::MeetingService;
use crate::models::{CreateMeeting, Decision, Meeting, MeetingMessage, MeetingParticipant};
use crate::reply_transport::HttpReplyTransport;

#[post("/api/v1/meetings", data = "<req>")]
pub fn create(req: Json<CreateMeeting>, meetings: &State<Arc<MeetingService>>) -> BrokerResult<Json<Meeting>> {
    Ok(Json(meetings.create_meeting(req.into_inner())?))
}

#[get("/api/v1/meetings/<meeting_id>")]
pub fn get(meeting_id: &str, meetings: &State<Arc<MeetingService>>) -> BrokerResult<Json<Meeting>> {
    let id = parse_uuid(meeting_id)?;
    Ok(Json(meetings.get_meeting(id)?))
}

#[post("/api/v1/meetings/<meeting_id>/participants/<agent_id>")]
pub fn add_participant(
    meeting_id: &str,
    agent_id: &str,
    meetings: &State<Arc<MeetingService>>,
    events: &State<Arc<EventBus>>,
) -> BrokerResult<Json<MeetingParticipant>> {
    let id = parse_uuid(meeting_id)?;
    let participant = meetings.add_participant(id, agent_id.to_string())?;
    events.publish(id, "agent_joined", Some(agent_id.to_string()), serde_json::json!({"speaking_order": participant.speaking_order}));
    Ok(Json(participant))
}

/// Kicks off the discussion on a background task; progress and the eventual
/// outcome arrive over the meeting's WebSocket feed rather than this response.
#[post("/api/v1/meetings/<meeting_id>/start")]
pub fn start(meeting_id: &str, coordinator: &State<Arc<DiscussionCoordinator>>) -> BrokerResult<Json<serde_json::Value>> {
    let id = parse_uuid(meeting_id)?;
    let coordinator = coordinator.inner().clone();
    tokio::spawn(async move {
        if let Err(err) = coordinator.start_discussion(id).await {
            tracing::error!(meeting_id = %id, error = %err, "discussion failed");
        }
    });
    Ok(Json(serde_json::json!({"started": true})))
}

#[get("/api/v1/meetings/<meeting_id>/messages?<since_sequence>")]
pub fn messages(
    meeting_id: &str,
    since_sequence: Option<u64>,
    meetings: &State<Arc<MeetingService>>,
) -> BrokerResult<Json<Vec<MeetingMessage>>> {
    let id = parse_uuid(meeting_id)?;
    Ok(Json(meetings.list_messages(id, since_sequence)?))
}

#[get("/api/v1/meetings/<meeting_id>/decisions")]
pub fn decisions(meeting_id: &str, meetings: &State<Arc<MeetingService>>) -> BrokerResult<Json<Vec<Decision>>> {
    let id = parse_uuid(meeting_id)?;
    Ok(Json(meetings.list_decisions(id)?))
}

#[derive(Debug, Deserialize)]
pub struct ReplyBody {
    pub content: String,
}

#[post("/api/v1/meetings/<meeting_id>/participants/<agent_id>/opinion", data = "<body>")]
pub fn submit_opinion(
    meeting_id: &str,
    agent_id: &str,
    body: Json<ReplyBody>,
    transport: &State<Arc<HttpReplyTransport>>,
) -> BrokerResult<Json<serde_json::Value>> {
    let id = parse_uuid(meeting_id)?;
    let accepted = transport.submit_opinion(id, agent_id, body.into_inner().content);
    Ok(Json(serde_json::json!({"accepted": accepted})))
}

#[post("/api/v1/meetings/<meeting_id>/participants/<agent_id>/vote", data = "<body>")]
pub fn submit_vote(
    meeting_id: &str,
    agent_id: &str,
    body: Json<ReplyBody>,
    transport: &State<Arc<HttpReplyTransport>>,
) -> BrokerResult<Json<serde_json::Value>> {
    let id = parse_uuid(meeting_id)?;
    let accepted = transport.submit_vote(id, agent_id, body.into_inner().content);
    Ok(Json(serde_json::json!({"accepted": accepted})))
}

fn parse_uuid(raw: &str) -> BrokerResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| BrokerError::Validation(format!("not a valid meeting id: {raw}")))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientFrame {
    Reconnect {
        meeting_id: Uuid,
        agent_id: String,
        #[serde(default)]
        last_sequence: Option<u64>,
    },
}

/// One broadcast-channel subscription per connection. Forwards published
/// events live and answers `{"type":"reconnect",...}` frames with a
/// `state_sync` replay, per the reconnect protocol.
#[get("/api/v1/meetings/<meeting_id>/ws")]
pub fn events_ws(
    meeting_id: &str,
    ws: rocket_ws::WebSocket,
    events: &State<Arc<EventBus>>,
    coordinator: &State<Arc<DiscussionCoordinator>>,
) -> BrokerResult<rocket_ws::Channel<'static>> {
    let id = parse_uuid(meeting_id)?;
    let events = events.inner().clone();
    let coordinator = coordinator.inner().clone();
    Ok(ws.channel(move |mut stream| {
        Box::pin(async move {
            let mut rx = events.subscribe(id);
            loop {
                tokio::select! {
                    incoming = stream.next() => {
                        match incoming {
                            Some(Ok(rocket_ws::Message::Text(text))) => {
                                if let Ok(ClientFrame::Reconnect { meeting_id, agent_id, last_sequence }) =
                                    serde_json::from_str::<ClientFrame>(&text)
                                {
                                    let _ = coordinator.state_sync(meeting_id, &agent_id, last_sequence);
                                }
                            }
                            Some(Ok(_)) => {}
                            Some(Err(_)) | None => break,
                        }
                    }
                    event = rx.recv() => {
                        match event {
                            Ok(ev) => {
                                let text = serde_json::to_string(&ev).unwrap_or_default();
                                if stream.send(rocket_ws::Message::Text(text)).await.is_err() {
                                    break;
                                }
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
            Ok(())
        })
    }))
}
