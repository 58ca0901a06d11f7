//! C10: meeting + participant + message + decision persistence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

use crate::error::{BrokerError, BrokerResult};
use crate::models::{
    CreateMeeting, Decision, DecisionStatus, Meeting, MeetingMessage, MeetingParticipant, MeetingStatus,
    MessageType, ParticipantRole, RecordDecision,
};
use crate::store::sqlite::SqliteStore;

#[derive(Default, Clone)]
struct MeetingRecord {
    meeting: Option<Meeting>,
    participants: Vec<MeetingParticipant>,
    messages: Vec<MeetingMessage>,
    decisions: Vec<Decision>,
}

pub trait MeetingStore: Send + Sync {
    fn insert_meeting(&self, meeting: Meeting) -> BrokerResult<()>;
    fn get_meeting(&self, id: Uuid) -> BrokerResult<Option<Meeting>>;
    fn update_meeting(&self, id: Uuid, f: Box<dyn FnOnce(&mut Meeting) -> BrokerResult<()> + '_>) -> BrokerResult<Meeting>;
    fn add_participant(&self, participant: MeetingParticipant) -> BrokerResult<()>;
    fn list_participants(&self, meeting_id: Uuid) -> BrokerResult<Vec<MeetingParticipant>>;
    fn next_speaking_order(&self, meeting_id: Uuid) -> BrokerResult<u32>;
    fn append_message(
        &self,
        meeting_id: Uuid,
        agent_id: String,
        content: String,
        message_type: MessageType,
    ) -> BrokerResult<MeetingMessage>;
    fn list_messages(&self, meeting_id: Uuid, since_sequence: Option<u64>) -> BrokerResult<Vec<MeetingMessage>>;
    fn insert_decision(&self, decision: Decision) -> BrokerResult<()>;
    fn list_decisions(&self, meeting_id: Uuid) -> BrokerResult<Vec<Decision>>;
}

#[derive(Default)]
pub struct MemoryMeetingStore {
    records: Mutex<HashMap<Uuid, MeetingRecord>>,
}

impl MemoryMeetingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MeetingStore for MemoryMeetingStore {
    fn insert_meeting(&self, meeting: Meeting) -> BrokerResult<()> {
        let mut records = self.records.lock().unwrap();
        records.entry(meeting.id).or_default().meeting = Some(meeting);
        Ok(())
    }

    fn get_meeting(&self, id: Uuid) -> BrokerResult<Option<Meeting>> {
        Ok(self.records.lock().unwrap().get(&id).and_then(|r| r.meeting.clone()))
    }

    fn update_meeting(&self, id: Uuid, f: Box<dyn FnOnce(&mut Meeting) -> BrokerResult<()> + '_>) -> BrokerResult<Meeting> {
        let mut records = self.records.lock().unwrap();
        let record = records.get_mut(&id).ok_or_else(|| BrokerError::NotFound(format!("meeting {id}")))?;
        let meeting = record.meeting.as_mut().ok_or_else(|| BrokerError::NotFound(format!("meeting {id}")))?;
        f(meeting)?;
        Ok(meeting.clone())
    }

    fn add_participant(&self, participant: MeetingParticipant) -> BrokerResult<()> {
        let mut records = self.records.lock().unwrap();
        records.entry(participant.meeting_id).or_default().participants.push(participant);
        Ok(())
    }

    fn list_participants(&self, meeting_id: Uuid) -> BrokerResult<Vec<MeetingParticipant>> {
        let mut participants = self
            .records
            .lock()
            .unwrap()
            .get(&meeting_id)
            .map(|r| r.participants.clone())
            .unwrap_or_default();
        participants.sort_by_key(|p| p.speaking_order);
        Ok(participants)
    }

    fn next_speaking_order(&self, meeting_id: Uuid) -> BrokerResult<u32> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&meeting_id)
            .map(|r| r.participants.iter().map(|p| p.speaking_order).max().unwrap_or(0) + 1)
            .unwrap_or(1))
    }

    fn append_message(
        &self,
        meeting_id: Uuid,
        agent_id: String,
        content: String,
        message_type: MessageType,
    ) -> BrokerResult<MeetingMessage> {
        let mut records = self.records.lock().unwrap();
        let record = records.entry(meeting_id).or_default();
        let sequence_number = record.messages.iter().map(|m| m.sequence_number).max().unwrap_or(0) + 1;
        let message = MeetingMessage {
            meeting_id,
            sequence_number,
            agent_id,
            content,
            message_type,
            timestamp: Utc::now(),
        };
        record.messages.push(message.clone());
        Ok(message)
    }

    fn list_messages(&self, meeting_id: Uuid, since_sequence: Option<u64>) -> BrokerResult<Vec<MeetingMessage>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&meeting_id)
            .map(|r| {
                r.messages
                    .iter()
                    .filter(|m| since_sequence.is_none_or(|s| m.sequence_number > s))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn insert_decision(&self, decision: Decision) -> BrokerResult<()> {
        let mut records = self.records.lock().unwrap();
        records.entry(decision.meeting_id).or_default().decisions.push(decision);
        Ok(())
    }

    fn list_decisions(&self, meeting_id: Uuid) -> BrokerResult<Vec<Decision>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&meeting_id)
            .map(|r| r.decisions.clone())
            .unwrap_or_default())
    }
}

pub struct SqliteMeetingStore {
    store: Arc<SqliteStore>,
}

impl SqliteMeetingStore {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        SqliteMeetingStore { store }
    }
}

impl MeetingStore for SqliteMeetingStore {
    fn insert_meeting(&self, meeting: Meeting) -> BrokerResult<()> {
        let conn = self.store.conn.lock().unwrap();
        let data = serde_json::to_string(&meeting).map_err(|e| BrokerError::Internal(e.to_string()))?;
        conn.execute("INSERT INTO meetings (id, data) VALUES (?1, ?2)", params![meeting.id.to_string(), data])?;
        Ok(())
    }

    fn get_meeting(&self, id: Uuid) -> BrokerResult<Option<Meeting>> {
        let conn = self.store.conn.lock().unwrap();
        let data: Option<String> = conn
            .query_row("SELECT data FROM meetings WHERE id=?1", params![id.to_string()], |r| r.get(0))
            .optional()?;
        data.map(|d| serde_json::from_str(&d).map_err(|e| BrokerError::Internal(e.to_string())))
            .transpose()
    }

    fn update_meeting(&self, id: Uuid, f: Box<dyn FnOnce(&mut Meeting) -> BrokerResult<()> + '_>) -> BrokerResult<Meeting> {
        let conn = self.store.conn.lock().unwrap();
        let data: Option<String> = conn
            .query_row("SELECT data FROM meetings WHERE id=?1", params![id.to_string()], |r| r.get(0))
            .optional()?;
        let Some(data) = data else {
            return Err(BrokerError::NotFound(format!("meeting {id}")));
        };
        let mut meeting: Meeting = serde_json::from_str(&data).map_err(|e| BrokerError::Internal(e.to_string()))?;
        f(&mut meeting)?;
        let updated = serde_json::to_string(&meeting).map_err(|e| BrokerError::Internal(e.to_string()))?;
        conn.execute("UPDATE meetings SET data=?2 WHERE id=?1", params![id.to_string(), updated])?;
        Ok(meeting)
    }

    fn add_participant(&self, participant: MeetingParticipant) -> BrokerResult<()> {
        let conn = self.store.conn.lock().unwrap();
        let data = serde_json::to_string(&participant).map_err(|e| BrokerError::Internal(e.to_string()))?;
        conn.execute(
            "INSERT INTO meeting_participants (meeting_id, agent_id, speaking_order, data) VALUES (?1, ?2, ?3, ?4)",
            params![participant.meeting_id.to_string(), participant.agent_id, participant.speaking_order, data],
        )?;
        Ok(())
    }

    fn list_participants(&self, meeting_id: Uuid) -> BrokerResult<Vec<MeetingParticipant>> {
        let conn = self.store.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT data FROM meeting_participants WHERE meeting_id=?1 ORDER BY speaking_order ASC",
        )?;
        let rows = stmt.query_map(params![meeting_id.to_string()], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?).map_err(|e| BrokerError::Internal(e.to_string()))?);
        }
        Ok(out)
    }

    fn next_speaking_order(&self, meeting_id: Uuid) -> BrokerResult<u32> {
        let conn = self.store.conn.lock().unwrap();
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(speaking_order) FROM meeting_participants WHERE meeting_id=?1",
            params![meeting_id.to_string()],
            |r| r.get(0),
        )?;
        Ok(max.unwrap_or(0) as u32 + 1)
    }

    fn append_message(
        &self,
        meeting_id: Uuid,
        agent_id: String,
        content: String,
        message_type: MessageType,
    ) -> BrokerResult<MeetingMessage> {
        let conn = self.store.conn.lock().unwrap();
        let next_seq: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sequence_number), 0) + 1 FROM meeting_messages WHERE meeting_id=?1",
            params![meeting_id.to_string()],
            |r| r.get(0),
        )?;
        let message = MeetingMessage {
            meeting_id,
            sequence_number: next_seq as u64,
            agent_id,
            content,
            message_type,
            timestamp: Utc::now(),
        };
        let data = serde_json::to_string(&message).map_err(|e| BrokerError::Internal(e.to_string()))?;
        conn.execute(
            "INSERT INTO meeting_messages (meeting_id, sequence_number, data) VALUES (?1, ?2, ?3)",
            params![meeting_id.to_string(), next_seq, data],
        )?;
        Ok(message)
    }

    fn list_messages(&self, meeting_id: Uuid, since_sequence: Option<u64>) -> BrokerResult<Vec<MeetingMessage>> {
        let conn = self.store.conn.lock().unwrap();
        let since = since_sequence.unwrap_or(0) as i64;
        let mut stmt = conn.prepare(
            "SELECT data FROM meeting_messages WHERE meeting_id=?1 AND sequence_number > ?2 ORDER BY sequence_number ASC",
        )?;
        let rows = stmt.query_map(params![meeting_id.to_string(), since], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?).map_err(|e| BrokerError::Internal(e.to_string()))?);
        }
        Ok(out)
    }

    fn insert_decision(&self, decision: Decision) -> BrokerResult<()> {
        let conn = self.store.conn.lock().unwrap();
        let data = serde_json::to_string(&decision).map_err(|e| BrokerError::Internal(e.to_string()))?;
        conn.execute(
            "INSERT INTO decisions (id, meeting_id, data) VALUES (?1, ?2, ?3)",
            params![decision.id.to_string(), decision.meeting_id.to_string(), data],
        )?;
        Ok(())
    }

    fn list_decisions(&self, meeting_id: Uuid) -> BrokerResult<Vec<Decision>> {
        let conn = self.store.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT data FROM decisions WHERE meeting_id=?1")?;
        let rows = stmt.query_map(params![meeting_id.to_string()], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?).map_err(|e| BrokerError::Internal(e.to_string()))?);
        }
        Ok(out)
    }
}

pub struct MeetingService {
    store: Box<dyn MeetingStore>,
}

impl MeetingService {
    pub fn new(store: Box<dyn MeetingStore>) -> Self {
        MeetingService { store }
    }

    pub fn create_meeting(&self, req: CreateMeeting) -> BrokerResult<Meeting> {
        if req.participant_ids.len() < 2 {
            return Err(BrokerError::Validation("a meeting requires at least 2 participants".to_string()));
        }
        let meeting = Meeting {
            id: Uuid::new_v4(),
            title: req.title,
            status: MeetingStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            max_discussion_rounds: req.max_discussion_rounds.unwrap_or(3),
            current_round: 0,
            description: req.description,
            agenda: req.agenda,
            max_duration_seconds: req.max_duration_seconds,
        };
        self.store.insert_meeting(meeting.clone())?;
        for (i, agent_id) in req.participant_ids.into_iter().enumerate() {
            self.store.add_participant(MeetingParticipant {
                meeting_id: meeting.id,
                agent_id,
                role: if i == 0 { ParticipantRole::Moderator } else { ParticipantRole::Participant },
                speaking_order: (i + 1) as u32,
            })?;
        }
        Ok(meeting)
    }

    pub fn get_meeting(&self, id: Uuid) -> BrokerResult<Meeting> {
        self.store.get_meeting(id)?.ok_or_else(|| BrokerError::NotFound(format!("meeting {id}")))
    }

    pub fn list_participants(&self, meeting_id: Uuid) -> BrokerResult<Vec<MeetingParticipant>> {
        self.store.list_participants(meeting_id)
    }

    /// Appends at `max(speaking_order)+1`, per the decision recorded in DESIGN.md.
    pub fn add_participant(&self, meeting_id: Uuid, agent_id: String) -> BrokerResult<MeetingParticipant> {
        let order = self.store.next_speaking_order(meeting_id)?;
        let participant = MeetingParticipant {
            meeting_id,
            agent_id,
            role: if order == 1 { ParticipantRole::Moderator } else { ParticipantRole::Participant },
            speaking_order: order,
        };
        self.store.add_participant(participant.clone())?;
        Ok(participant)
    }

    pub fn start_meeting(&self, id: Uuid) -> BrokerResult<Meeting> {
        self.store.update_meeting(
            id,
            Box::new(|m: &mut Meeting| {
                if m.status != MeetingStatus::Pending {
                    return Err(BrokerError::InvalidState(format!("meeting {} is not pending", m.id)));
                }
                m.status = MeetingStatus::Active;
                m.started_at = Some(Utc::now());
                Ok(())
            }),
        )
    }

    pub fn end_meeting(&self, id: Uuid, status: MeetingStatus) -> BrokerResult<Meeting> {
        if matches!(status, MeetingStatus::Pending) {
            return Err(BrokerError::InvalidState("cannot end a meeting into pending".to_string()));
        }
        self.store.update_meeting(
            id,
            Box::new(move |m: &mut Meeting| {
                if m.status != MeetingStatus::Active {
                    return Err(BrokerError::InvalidState(format!("meeting {} is not active", m.id)));
                }
                m.status = status;
                m.ended_at = Some(Utc::now());
                Ok(())
            }),
        )
    }

    pub fn set_current_round(&self, id: Uuid, round: u32) -> BrokerResult<Meeting> {
        self.store.update_meeting(
            id,
            Box::new(move |m: &mut Meeting| {
                m.current_round = round;
                Ok(())
            }),
        )
    }

    pub fn record_message(
        &self,
        meeting_id: Uuid,
        agent_id: String,
        content: String,
        message_type: MessageType,
    ) -> BrokerResult<MeetingMessage> {
        self.store.append_message(meeting_id, agent_id, content, message_type)
    }

    pub fn list_messages(&self, meeting_id: Uuid, since_sequence: Option<u64>) -> BrokerResult<Vec<MeetingMessage>> {
        self.store.list_messages(meeting_id, since_sequence)
    }

    pub fn record_decision(&self, meeting_id: Uuid, req: RecordDecision) -> BrokerResult<Decision> {
        let status = if req.selected_option.is_some() { DecisionStatus::Approved } else { DecisionStatus::Pending };
        let decision = Decision {
            id: Uuid::new_v4(),
            meeting_id,
            title: req.title,
            description: req.description,
            options: req.options,
            selected_option: req.selected_option,
            rationale: req.rationale,
            participant_agreement: req.participant_agreement,
            related_communication_ids: req.related_communication_ids,
            status,
            decided_at: Some(Utc::now()),
        };
        self.store.insert_decision(decision.clone())?;
        Ok(decision)
    }

    pub fn list_decisions(&self, meeting_id: Uuid) -> BrokerResult<Vec<Decision>> {
        self.store.list_decisions(meeting_id)
    }
}
