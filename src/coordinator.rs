//! C11: the sequential, round-based discussion state machine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{BrokerError, BrokerResult};
use crate::events::EventBus;
use crate::meeting_service::MeetingService;
use crate::models::{MeetingParticipant, MeetingStatus, MessageType};

pub const NO_RESPONSE: &str = "[NO RESPONSE]";
pub const NO_VOTE: &str = "[NO VOTE]";
pub const ABSTAIN: &str = "[ABSTAIN]";

/// Abstraction over the external agent transport the coordinator awaits
/// replies from (chat sockets, an RPC call, whatever the deployment wires
/// up). `None` means the timeout elapsed with no reply.
#[async_trait]
pub trait ReplyTransport: Send + Sync {
    async fn request_opinion(&self, meeting_id: Uuid, agent_id: &str, timeout: Duration) -> Option<String>;
    async fn request_vote(
        &self,
        meeting_id: Uuid,
        agent_id: &str,
        proposal: &str,
        options: &[String],
        timeout: Duration,
    ) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Setup,
    OpinionCollection,
    ConsensusBuilding,
    Decision,
    NoConsensus,
    Completed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundState {
    pub round_number: u32,
    pub opinions: HashMap<String, String>,
    pub votes: HashMap<String, String>,
    pub consensus_reached: bool,
    pub consensus_option: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscussionState {
    pub meeting_id: Uuid,
    pub participants: Vec<String>,
    pub current_round: u32,
    pub rounds: Vec<RoundState>,
    pub opinions: HashMap<String, String>,
    pub votes: HashMap<String, String>,
    pub phase: Phase,
    pub consensus_threshold: f64,
    pub current_speaker: Option<String>,
}

/// Mode tally with a deterministic tie-break: ties resolve to whichever
/// option appeared first among valid votes in participant (speaking_order) order.
fn consensus_mode(votes: &HashMap<String, String>, participants: &[String], threshold: f64) -> (bool, Option<String>) {
    let valid: Vec<&String> = participants
        .iter()
        .filter_map(|agent| votes.get(agent))
        .filter(|v| v.as_str() != NO_VOTE && v.as_str() != ABSTAIN)
        .collect();
    if valid.is_empty() {
        return (false, None);
    }
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut first_seen: Vec<&str> = Vec::new();
    for v in &valid {
        if !counts.contains_key(v.as_str()) {
            first_seen.push(v.as_str());
        }
        *counts.entry(v.as_str()).or_insert(0) += 1;
    }
    let (winner, max_count) = first_seen
        .iter()
        .map(|opt| (*opt, counts[opt]))
        .max_by_key(|(_, count)| *count)
        .unwrap();
    let reached = (max_count as f64) / (valid.len() as f64) >= threshold;
    if reached {
        (true, Some(winner.to_string()))
    } else {
        (false, None)
    }
}

pub struct DiscussionCoordinator {
    meetings: Arc<MeetingService>,
    events: Arc<EventBus>,
    transport: Arc<dyn ReplyTransport>,
    states: DashMap<Uuid, DiscussionState>,
    max_rounds: u32,
    reply_timeout: Duration,
    consensus_threshold: f64,
}

impl DiscussionCoordinator {
    pub fn new(
        meetings: Arc<MeetingService>,
        events: Arc<EventBus>,
        transport: Arc<dyn ReplyTransport>,
        max_rounds: u32,
        reply_timeout: Duration,
        consensus_threshold: f64,
    ) -> Self {
        DiscussionCoordinator {
            meetings,
            events,
            transport,
            states: DashMap::new(),
            max_rounds,
            reply_timeout,
            consensus_threshold,
        }
    }

    pub fn state_of(&self, meeting_id: Uuid) -> Option<DiscussionState> {
        self.states.get(&meeting_id).map(|s| s.clone())
    }

    fn publish(&self, meeting_id: Uuid, event_type: &'static str, agent_id: Option<String>, data: serde_json::Value) {
        self.events.publish(meeting_id, event_type, agent_id, data);
    }

    /// Drives a meeting from `pending`/`active` through every round until a
    /// decision is recorded or `max_rounds` is exhausted. Participant
    /// timeouts are recorded as sentinels and never abort the round.
    pub async fn start_discussion(&self, meeting_id: Uuid) -> BrokerResult<DiscussionState> {
        let meeting = self.meetings.get_meeting(meeting_id)?;
        if !matches!(meeting.status, MeetingStatus::Pending | MeetingStatus::Active) {
            return Err(BrokerError::InvalidState(format!("meeting {meeting_id} is not pending or active")));
        }
        if meeting.status == MeetingStatus::Pending {
            self.meetings.start_meeting(meeting_id)?;
        }

        let mut participants: Vec<MeetingParticipant> = self.meetings.list_participants(meeting_id)?;
        participants.sort_by_key(|p| p.speaking_order);
        let participant_ids: Vec<String> = participants.into_iter().map(|p| p.agent_id).collect();

        let state = DiscussionState {
            meeting_id,
            participants: participant_ids,
            current_round: 0,
            rounds: Vec::new(),
            opinions: HashMap::new(),
            votes: HashMap::new(),
            phase: Phase::Setup,
            consensus_threshold: self.consensus_threshold,
            current_speaker: None,
        };
        self.states.insert(meeting_id, state);

        loop {
            let round_number = {
                let mut entry = self.states.get_mut(&meeting_id).unwrap();
                entry.current_round += 1;
                entry.opinions.clear();
                entry.votes.clear();
                entry.phase = Phase::OpinionCollection;
                entry.current_round
            };
            if round_number > self.max_rounds {
                return Err(BrokerError::InvalidState(format!(
                    "meeting {meeting_id} cannot start round {round_number} beyond max_rounds={}",
                    self.max_rounds
                )));
            }
            self.meetings.set_current_round(meeting_id, round_number)?;
            self.publish(meeting_id, "round_started", None, json!({"round": round_number}));

            self.collect_opinions(meeting_id).await?;
            self.collect_votes(meeting_id).await?;
            let round_result = self.complete_round(meeting_id)?;

            if round_result.consensus_reached {
                self.publish(
                    meeting_id,
                    "consensus_reached",
                    None,
                    json!({"round": round_number, "selected_option": round_result.consensus_option}),
                );
                let decision = self.meetings.record_decision(
                    meeting_id,
                    crate::models::RecordDecision {
                        title: format!("Round {round_number} consensus"),
                        description: None,
                        options: round_result.votes.values().cloned().collect(),
                        selected_option: round_result.consensus_option.clone(),
                        rationale: None,
                        participant_agreement: round_result.votes.clone(),
                        related_communication_ids: vec![],
                    },
                )?;
                self.publish(meeting_id, "decision_recorded", None, json!({"decision_id": decision.id}));
                self.meetings.end_meeting(meeting_id, MeetingStatus::Completed)?;
                self.publish(meeting_id, "meeting_completed", None, json!({"decided": true}));
                let mut entry = self.states.get_mut(&meeting_id).unwrap();
                entry.phase = Phase::Completed;
                return Ok(entry.clone());
            }

            if round_number >= self.max_rounds {
                self.meetings.end_meeting(meeting_id, MeetingStatus::Completed)?;
                self.publish(meeting_id, "meeting_completed", None, json!({"decided": false}));
                let mut entry = self.states.get_mut(&meeting_id).unwrap();
                entry.phase = Phase::Completed;
                return Ok(entry.clone());
            }
        }
    }

    /// Strictly sequential: only one participant is awaited at a time.
    async fn collect_opinions(&self, meeting_id: Uuid) -> BrokerResult<()> {
        let participants = self.states.get(&meeting_id).unwrap().participants.clone();
        for agent_id in participants {
            {
                let mut entry = self.states.get_mut(&meeting_id).unwrap();
                entry.current_speaker = Some(agent_id.clone());
            }
            self.publish(meeting_id, "opinion_request", Some(agent_id.clone()), json!({}));
            let reply = self.transport.request_opinion(meeting_id, &agent_id, self.reply_timeout).await;
            let opinion = reply.unwrap_or_else(|| NO_RESPONSE.to_string());
            self.meetings.record_message(meeting_id, agent_id.clone(), opinion.clone(), MessageType::Opinion)?;
            {
                let mut entry = self.states.get_mut(&meeting_id).unwrap();
                entry.opinions.insert(agent_id.clone(), opinion.clone());
            }
            self.publish(meeting_id, "opinion_presented", Some(agent_id), json!({"opinion": opinion}));
        }
        let mut entry = self.states.get_mut(&meeting_id).unwrap();
        entry.phase = Phase::ConsensusBuilding;
        entry.current_speaker = None;
        Ok(())
    }

    /// Votes for a round may be collected concurrently, bounded by participant count.
    async fn collect_votes(&self, meeting_id: Uuid) -> BrokerResult<()> {
        let (participants, proposal, options) = {
            let entry = self.states.get(&meeting_id).unwrap();
            let proposal = format!("round {} proposal", entry.current_round);
            let options: Vec<String> = entry.opinions.values().cloned().collect();
            (entry.participants.clone(), proposal, options)
        };
        self.publish(meeting_id, "consensus_vote_request", None, json!({"proposal": proposal, "options": options}));

        let futures = participants.iter().map(|agent_id| {
            let transport = self.transport.clone();
            let agent_id = agent_id.clone();
            let proposal = proposal.clone();
            let options = options.clone();
            let timeout = self.reply_timeout;
            async move {
                let vote = transport.request_vote(meeting_id, &agent_id, &proposal, &options, timeout).await;
                (agent_id, vote.unwrap_or_else(|| NO_VOTE.to_string()))
            }
        });
        let results = join_all(futures).await;

        for (agent_id, vote) in results {
            self.meetings.record_message(meeting_id, agent_id.clone(), vote.clone(), MessageType::Vote)?;
            let mut entry = self.states.get_mut(&meeting_id).unwrap();
            entry.votes.insert(agent_id, vote);
        }
        Ok(())
    }

    fn complete_round(&self, meeting_id: Uuid) -> BrokerResult<RoundState> {
        let mut entry = self.states.get_mut(&meeting_id).unwrap();
        let (consensus_reached, consensus_option) =
            consensus_mode(&entry.votes, &entry.participants, entry.consensus_threshold);
        let round = RoundState {
            round_number: entry.current_round,
            opinions: entry.opinions.clone(),
            votes: entry.votes.clone(),
            consensus_reached,
            consensus_option: consensus_option.clone(),
        };
        entry.rounds.push(round.clone());
        entry.phase = if consensus_reached { Phase::Decision } else { Phase::NoConsensus };
        drop(entry);
        self.publish(
            meeting_id,
            "round_completed",
            None,
            json!({"round": round.round_number, "consensus_reached": consensus_reached}),
        );
        Ok(round)
    }

    /// Emits a `state_sync` event for a rejoining client, optionally replaying
    /// every durable message since `last_sequence`.
    pub fn state_sync(&self, meeting_id: Uuid, agent_id: &str, last_sequence: Option<u64>) -> BrokerResult<()> {
        let state = self
            .states
            .get(&meeting_id)
            .map(|s| s.clone())
            .ok_or_else(|| BrokerError::NotFound(format!("no active discussion for meeting {meeting_id}")))?;
        let messages = self.meetings.list_messages(meeting_id, last_sequence)?;
        self.publish(
            meeting_id,
            "state_sync",
            Some(agent_id.to_string()),
            json!({
                "phase": state.phase,
                "round": state.current_round,
                "current_speaker": state.current_speaker,
                "participants": state.participants,
                "messages": messages,
            }),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meeting_service::MemoryMeetingStore;
    use crate::models::CreateMeeting;
    use std::sync::Mutex;

    struct ScriptedTransport {
        opinions: Mutex<HashMap<String, String>>,
        votes: Mutex<HashMap<String, Vec<String>>>,
    }

    #[async_trait]
    impl ReplyTransport for ScriptedTransport {
        async fn request_opinion(&self, _meeting_id: Uuid, agent_id: &str, _timeout: Duration) -> Option<String> {
            self.opinions.lock().unwrap().get(agent_id).cloned()
        }

        async fn request_vote(
            &self,
            _meeting_id: Uuid,
            agent_id: &str,
            _proposal: &str,
            _options: &[String],
            _timeout: Duration,
        ) -> Option<String> {
            let mut votes = self.votes.lock().unwrap();
            votes.get_mut(agent_id).and_then(|queue| if queue.is_empty() { None } else { Some(queue.remove(0)) })
        }
    }

    fn setup(
        vote_rounds: Vec<(&str, &str)>,
    ) -> (Arc<MeetingService>, Arc<EventBus>, Arc<ScriptedTransport>) {
        let meetings = Arc::new(MeetingService::new(Box::new(MemoryMeetingStore::new())));
        let events = Arc::new(EventBus::new());
        let mut opinions = HashMap::new();
        let mut votes: HashMap<String, Vec<String>> = HashMap::new();
        for (agent, _) in &vote_rounds {
            opinions.insert(agent.to_string(), format!("{agent} opinion"));
        }
        for (agent, vote) in vote_rounds {
            votes.entry(agent.to_string()).or_default().push(vote.to_string());
        }
        let transport = Arc::new(ScriptedTransport {
            opinions: Mutex::new(opinions),
            votes: Mutex::new(votes),
        });
        (meetings, events, transport)
    }

    #[tokio::test]
    async fn reaches_consensus_on_unanimous_vote() {
        let (meetings, events, transport) = setup(vec![("a", "X"), ("b", "X"), ("c", "X")]);
        let meeting = meetings
            .create_meeting(CreateMeeting {
                title: "Decide X".to_string(),
                participant_ids: vec!["a".to_string(), "b".to_string(), "c".to_string()],
                meeting_type: None,
                max_discussion_rounds: Some(3),
                description: None,
                agenda: None,
                max_duration_seconds: None,
            })
            .unwrap();
        let coordinator = DiscussionCoordinator::new(
            meetings.clone(),
            events,
            transport,
            3,
            Duration::from_millis(50),
            0.75,
        );
        let state = coordinator.start_discussion(meeting.id).await.unwrap();
        assert_eq!(state.phase, Phase::Completed);
        let decisions = meetings.list_decisions(meeting.id).unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].selected_option, Some("X".to_string()));
        assert_eq!(decisions[0].status, crate::models::DecisionStatus::Approved);
    }

    #[tokio::test]
    async fn no_consensus_across_all_rounds_completes_without_decision() {
        let (meetings, events, transport) = setup(vec![
            ("a", "X"), ("b", "Y"), ("c", "Z"),
            ("a", "X"), ("b", "Y"), ("c", "Z"),
            ("a", "X"), ("b", "Y"), ("c", "Z"),
        ]);
        let meeting = meetings
            .create_meeting(CreateMeeting {
                title: "Disagreement".to_string(),
                participant_ids: vec!["a".to_string(), "b".to_string(), "c".to_string()],
                meeting_type: None,
                max_discussion_rounds: Some(3),
                description: None,
                agenda: None,
                max_duration_seconds: None,
            })
            .unwrap();
        let coordinator = DiscussionCoordinator::new(
            meetings.clone(),
            events,
            transport,
            3,
            Duration::from_millis(50),
            0.75,
        );
        let state = coordinator.start_discussion(meeting.id).await.unwrap();
        assert_eq!(state.phase, Phase::Completed);
        assert!(meetings.list_decisions(meeting.id).unwrap().is_empty());
        let meeting_after = meetings.get_meeting(meeting.id).unwrap();
        assert_eq!(meeting_after.status, MeetingStatus::Completed);
        assert_eq!(meeting_after.current_round, 3);
    }

    #[tokio::test]
    async fn participant_timeout_records_sentinel_without_halting_round() {
        let (meetings, events, transport) = setup(vec![("a", "X"), ("b", "X")]);
        let meeting = meetings
            .create_meeting(CreateMeeting {
                title: "Timeout test".to_string(),
                participant_ids: vec!["a".to_string(), "b".to_string(), "c".to_string()],
                meeting_type: None,
                max_discussion_rounds: Some(1),
                description: None,
                agenda: None,
                max_duration_seconds: None,
            })
            .unwrap();
        let coordinator = DiscussionCoordinator::new(
            meetings.clone(),
            events,
            transport,
            1,
            Duration::from_millis(20),
            0.75,
        );
        let state = coordinator.start_discussion(meeting.id).await.unwrap();
        assert_eq!(state.rounds[0].opinions.get("c"), Some(&NO_RESPONSE.to_string()));
        assert_eq!(state.rounds[0].votes.get("c"), Some(&NO_VOTE.to_string()));
    }
}
