use dashmap::DashMap;
use std::sync::Mutex;

use crate::error::{BrokerError, BrokerResult};
use crate::models::{Message, Priority, Protocol, Session, SessionStatus};

use super::Store;

type ProtocolKey = (String, String, String);
type SessionKey = (String, String);

/// Per-process broker state, lost on restart. Protocols and sessions are
/// keyed by `(project_id, ...)` so cross-project lookups are structurally
/// impossible; queues are guarded individually to keep enqueue/dequeue
/// cheap under contention.
#[derive(Default)]
pub struct MemoryStore {
    protocols: DashMap<ProtocolKey, Protocol>,
    sessions: DashMap<SessionKey, Session>,
    queues: DashMap<SessionKey, Mutex<Vec<Message>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn save_protocol(&self, project_id: &str, protocol: &Protocol) -> BrokerResult<()> {
        let key = (project_id.to_string(), protocol.name.clone(), protocol.version.clone());
        if self.protocols.contains_key(&key) {
            return Err(BrokerError::Duplicate(format!(
                "protocol {} v{} already registered in project {project_id}",
                protocol.name, protocol.version
            )));
        }
        self.protocols.insert(key, protocol.clone());
        Ok(())
    }

    fn get_protocol(&self, project_id: &str, name: &str, version: &str) -> BrokerResult<Option<Protocol>> {
        let key = (project_id.to_string(), name.to_string(), version.to_string());
        Ok(self.protocols.get(&key).map(|p| p.clone()))
    }

    fn list_protocols(
        &self,
        project_id: &str,
        name: Option<&str>,
        version: Option<&str>,
    ) -> BrokerResult<Vec<Protocol>> {
        Ok(self
            .protocols
            .iter()
            .filter(|entry| entry.key().0 == project_id)
            .map(|entry| entry.value().clone())
            .filter(|p| name.is_none_or(|n| p.name == n))
            .filter(|p| version.is_none_or(|v| p.version == v))
            .collect())
    }

    fn delete_protocol(&self, project_id: &str, name: &str, version: &str) -> BrokerResult<()> {
        let key = (project_id.to_string(), name.to_string(), version.to_string());
        self.protocols.remove(&key);
        Ok(())
    }

    fn save_session(&self, project_id: &str, session: &Session) -> BrokerResult<()> {
        let key = (project_id.to_string(), session.session_id.clone());
        self.sessions.insert(key, session.clone());
        Ok(())
    }

    fn get_session(&self, project_id: &str, session_id: &str) -> BrokerResult<Option<Session>> {
        let key = (project_id.to_string(), session_id.to_string());
        Ok(self.sessions.get(&key).map(|s| s.clone()))
    }

    fn list_sessions(
        &self,
        project_id: &str,
        status: Option<SessionStatus>,
    ) -> BrokerResult<Vec<Session>> {
        Ok(self
            .sessions
            .iter()
            .filter(|entry| entry.key().0 == project_id)
            .map(|entry| entry.value().clone())
            .filter(|s| status.is_none_or(|st| s.status == st))
            .collect())
    }

    fn list_all_sessions(&self) -> BrokerResult<Vec<Session>> {
        Ok(self.sessions.iter().map(|e| e.value().clone()).collect())
    }

    fn delete_session(&self, project_id: &str, session_id: &str) -> BrokerResult<()> {
        let key = (project_id.to_string(), session_id.to_string());
        self.sessions.remove(&key);
        self.queues.remove(&key);
        Ok(())
    }

    fn enqueue(
        &self,
        project_id: &str,
        session_id: &str,
        message: &Message,
        capacity: usize,
    ) -> BrokerResult<usize> {
        let key = (project_id.to_string(), session_id.to_string());
        let entry = self.queues.entry(key.clone()).or_insert_with(|| Mutex::new(Vec::new()));
        let mut queue = entry.lock().unwrap();
        if queue.len() >= capacity {
            return Err(BrokerError::QueueFull(format!(
                "session {session_id} queue at capacity ({capacity})"
            )));
        }
        queue.push(message.clone());
        let size = queue.len();
        drop(queue);
        if let Some(mut s) = self.sessions.get_mut(&key) {
            s.queue_size = size;
        }
        let ratio = size as f64 / capacity as f64;
        if ratio >= 0.9 {
            tracing::warn!(project_id, session_id, size, capacity, "session queue at 90% watermark");
        }
        Ok(size)
    }

    fn dequeue(&self, project_id: &str, session_id: &str, limit: usize) -> BrokerResult<Vec<Message>> {
        let key = (project_id.to_string(), session_id.to_string());
        let Some(entry) = self.queues.get(&key) else {
            return Ok(Vec::new());
        };
        let mut queue = entry.lock().unwrap();
        // Stable sort by priority rank descending, keeping FIFO order within a class.
        queue.sort_by(|a, b| b.headers.priority.rank().cmp(&a.headers.priority.rank()));
        let take = limit.min(queue.len());
        let drained: Vec<Message> = queue.drain(0..take).collect();
        let remaining = queue.len();
        drop(queue);
        if let Some(mut s) = self.sessions.get_mut(&key) {
            s.queue_size = remaining;
        }
        Ok(drained)
    }

    fn queue_size(&self, project_id: &str, session_id: &str) -> BrokerResult<usize> {
        let key = (project_id.to_string(), session_id.to_string());
        Ok(self.queues.get(&key).map(|q| q.lock().unwrap().len()).unwrap_or(0))
    }

    fn clear_queue(&self, project_id: &str, session_id: &str) -> BrokerResult<()> {
        let key = (project_id.to_string(), session_id.to_string());
        if let Some(entry) = self.queues.get(&key) {
            entry.lock().unwrap().clear();
        }
        if let Some(mut s) = self.sessions.get_mut(&key) {
            s.queue_size = 0;
        }
        Ok(())
    }
}

#[allow(dead_code)]
fn _priority_order_is_descending(p: Priority) -> u8 {
    p.rank()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Capabilities, MessageHeaders, ProtocolMetadata, SessionStatus};
    use chrono::Utc;
    use serde_json::{Map, json};

    fn sample_session(id: &str) -> Session {
        Session {
            session_id: id.to_string(),
            project_id: "p1".to_string(),
            connection_time: Utc::now(),
            last_heartbeat: Utc::now(),
            status: SessionStatus::Active,
            capabilities: Capabilities::default(),
            queue_size: 0,
        }
    }

    fn sample_message(sender: &str) -> Message {
        Message {
            message_id: uuid::Uuid::new_v4().to_string(),
            sender_id: sender.to_string(),
            recipient_id: Some("r1".to_string()),
            timestamp: Utc::now(),
            protocol_name: "chat".to_string(),
            protocol_version: "1.0.0".to_string(),
            payload: Map::from_iter([("text".to_string(), json!("hi"))]),
            headers: MessageHeaders::default(),
            delivered_at: None,
        }
    }

    #[test]
    fn project_isolation_of_protocols() {
        let store = MemoryStore::new();
        let protocol = Protocol {
            name: "chat".to_string(),
            version: "1.0.0".to_string(),
            message_schema: json!({"type": "object"}),
            capabilities: vec![],
            metadata: ProtocolMetadata::default(),
        };
        store.save_protocol("project_a", &protocol).unwrap();
        store.save_protocol("project_b", &protocol).unwrap();
        assert_eq!(store.list_protocols("project_a", None, None).unwrap().len(), 1);
        assert_eq!(store.list_protocols("project_b", None, None).unwrap().len(), 1);
        assert!(store.get_protocol("project_c", "chat", "1.0.0").unwrap().is_none());
    }

    #[test]
    fn duplicate_protocol_rejected() {
        let store = MemoryStore::new();
        let protocol = Protocol {
            name: "chat".to_string(),
            version: "1.0.0".to_string(),
            message_schema: json!({"type": "object"}),
            capabilities: vec![],
            metadata: ProtocolMetadata::default(),
        };
        store.save_protocol("p1", &protocol).unwrap();
        let err = store.save_protocol("p1", &protocol).unwrap_err();
        assert_eq!(err.kind(), "DUPLICATE");
    }

    #[test]
    fn queue_capacity_enforced_and_drains() {
        let store = MemoryStore::new();
        store.save_session("p1", &sample_session("s1")).unwrap();
        for _ in 0..100 {
            store.enqueue("p1", "s1", &sample_message("a"), 100).unwrap();
        }
        let err = store.enqueue("p1", "s1", &sample_message("a"), 100).unwrap_err();
        assert_eq!(err.kind(), "QUEUE_FULL");
        let drained = store.dequeue("p1", "s1", 10).unwrap();
        assert_eq!(drained.len(), 10);
        for _ in 0..10 {
            store.enqueue("p1", "s1", &sample_message("a"), 100).unwrap();
        }
        assert_eq!(store.queue_size("p1", "s1").unwrap(), 100);
    }

    #[test]
    fn priority_ordering_within_dequeue() {
        let store = MemoryStore::new();
        store.save_session("p1", &sample_session("s1")).unwrap();
        let mut low = sample_message("a");
        low.headers.priority = Priority::Low;
        let mut urgent = sample_message("b");
        urgent.headers.priority = Priority::Urgent;
        store.enqueue("p1", "s1", &low, 10).unwrap();
        store.enqueue("p1", "s1", &urgent, 10).unwrap();
        let drained = store.dequeue("p1", "s1", 2).unwrap();
        assert_eq!(drained[0].sender_id, "b");
        assert_eq!(drained[1].sender_id, "a");
    }
}
