//! C5: session lifecycle, heartbeat, stale/disconnect GC, bounded per-session queues.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::error::{BrokerError, BrokerResult};
use crate::models::{Capabilities, Message, SendResult, Session, SessionStatus};
use crate::project_registry::ProjectRegistry;
use crate::stats::MessageStats;
use crate::store::Store;

pub struct SessionManager {
    store: Arc<dyn Store>,
    projects: Arc<ProjectRegistry>,
    queue_capacity: usize,
    queue_warning_ratio: f64,
    stale_threshold: Duration,
    disconnect_threshold: Duration,
    stats: Arc<MessageStats>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn Store>,
        projects: Arc<ProjectRegistry>,
        queue_capacity: usize,
        queue_warning_ratio: f64,
        stale_threshold: Duration,
        disconnect_threshold: Duration,
    ) -> Self {
        SessionManager {
            store,
            projects,
            queue_capacity,
            queue_warning_ratio,
            stale_threshold,
            disconnect_threshold,
            stats: Arc::new(MessageStats::new()),
        }
    }

    /// Shared message-statistics tracker; `Router` adopts this same instance
    /// so counters agree regardless of which path drops or delivers a message.
    pub fn message_stats(&self) -> Arc<MessageStats> {
        self.stats.clone()
    }

    /// If `session_id` collides with a live session, the existing one is terminated
    /// first and its queue discarded; the replacement always starts at `queue_size=0`.
    pub fn create_session(
        &self,
        project_id: &str,
        session_id: Option<String>,
        capabilities: Capabilities,
    ) -> BrokerResult<Session> {
        let session_id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if let Some(existing) = self.store.get_session(project_id, &session_id)? {
            if existing.status != SessionStatus::Disconnected {
                tracing::debug!(project_id, session_id, "duplicate session_id, terminating prior session");
                self.store.clear_queue(project_id, &session_id)?;
                self.store.delete_session(project_id, &session_id)?;
                self.projects.increment_session_count(project_id, -1).ok();
            }
        }
        let now = Utc::now();
        let session = Session {
            session_id,
            project_id: project_id.to_string(),
            connection_time: now,
            last_heartbeat: now,
            status: SessionStatus::Active,
            capabilities,
            queue_size: 0,
        };
        self.store.save_session(project_id, &session)?;
        self.projects.increment_session_count(project_id, 1)?;
        Ok(session)
    }

    pub fn get_session(&self, project_id: &str, session_id: &str) -> BrokerResult<Session> {
        self.store
            .get_session(project_id, session_id)?
            .ok_or_else(|| BrokerError::NotFound(format!("session {session_id}")))
    }

    pub fn list_sessions(
        &self,
        project_id: &str,
        status: Option<SessionStatus>,
    ) -> BrokerResult<Vec<Session>> {
        self.store.list_sessions(project_id, status)
    }

    /// Updates the heartbeat timestamp; a `stale` session automatically returns to `active`.
    pub fn update_heartbeat(&self, project_id: &str, session_id: &str) -> BrokerResult<Session> {
        let mut session = self.get_session(project_id, session_id)?;
        session.last_heartbeat = Utc::now();
        if session.status == SessionStatus::Stale {
            session.status = SessionStatus::Active;
        }
        self.store.save_session(project_id, &session)?;
        Ok(session)
    }

    pub fn enqueue_message(
        &self,
        project_id: &str,
        recipient_id: &str,
        message: &Message,
    ) -> BrokerResult<SendResult> {
        let size = self.store.enqueue(project_id, recipient_id, message, self.queue_capacity)?;
        let ratio = size as f64 / self.queue_capacity as f64;
        if ratio >= self.queue_warning_ratio {
            tracing::warn!(project_id, recipient_id, size, capacity = self.queue_capacity, "session queue near capacity");
        }
        Ok(SendResult {
            message_id: message.message_id.clone(),
            delivered: false,
            queued: true,
            queue_size: size,
        })
    }

    pub fn dequeue_messages(
        &self,
        project_id: &str,
        session_id: &str,
        limit: usize,
    ) -> BrokerResult<Vec<Message>> {
        let now = Utc::now();
        let drained = self.store.dequeue(project_id, session_id, limit)?;
        let mut kept = Vec::with_capacity(drained.len());
        for message in drained {
            if message.is_expired_at(now) {
                self.stats.record_expired(project_id);
            } else {
                kept.push(message);
            }
        }
        Ok(kept)
    }

    /// Marks any `active` session whose heartbeat is older than `stale_threshold` as `stale`.
    pub fn check_stale_sessions(&self, project_id: Option<&str>) -> BrokerResult<Vec<Session>> {
        let now = Utc::now();
        let sessions = match project_id {
            Some(pid) => self.store.list_sessions(pid, Some(SessionStatus::Active))?,
            None => self
                .store
                .list_all_sessions()?
                .into_iter()
                .filter(|s| s.status == SessionStatus::Active)
                .collect(),
        };
        let mut transitioned = Vec::new();
        for mut session in sessions {
            let age = now.signed_duration_since(session.last_heartbeat);
            if age > chrono::Duration::from_std(self.stale_threshold).unwrap() {
                session.status = SessionStatus::Stale;
                self.store.save_session(&session.project_id.clone(), &session)?;
                tracing::warn!(project_id = %session.project_id, session_id = %session.session_id, "session marked stale");
                transitioned.push(session);
            }
        }
        Ok(transitioned)
    }

    /// Disconnects any `active|stale` session older than `disconnect_threshold`.
    pub fn cleanup_expired_sessions(&self, project_id: Option<&str>) -> BrokerResult<Vec<Session>> {
        let now = Utc::now();
        let sessions = match project_id {
            Some(pid) => self.store.list_sessions(pid, None)?,
            None => self.store.list_all_sessions()?,
        };
        let mut disconnected = Vec::new();
        for mut session in sessions {
            if session.status == SessionStatus::Disconnected {
                continue;
            }
            let age = now.signed_duration_since(session.last_heartbeat);
            if age > chrono::Duration::from_std(self.disconnect_threshold).unwrap() {
                session.status = SessionStatus::Disconnected;
                self.store.save_session(&session.project_id.clone(), &session)?;
                self.projects.increment_session_count(&session.project_id, -1).ok();
                tracing::info!(project_id = %session.project_id, session_id = %session.session_id, "session disconnected by gc");
                disconnected.push(session);
            }
        }
        Ok(disconnected)
    }

    /// Sets `status=disconnected` directly, e.g. on explicit client disconnect.
    pub fn disconnect_session(&self, project_id: &str, session_id: &str) -> BrokerResult<Session> {
        let mut session = self.get_session(project_id, session_id)?;
        if session.status != SessionStatus::Disconnected {
            session.status = SessionStatus::Disconnected;
            self.store.save_session(project_id, &session)?;
            self.projects.increment_session_count(project_id, -1).ok();
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CreateProject;
    use crate::project_registry::MemoryProjectStore;
    use crate::store::MemoryStore;

    fn manager() -> SessionManager {
        let projects = Arc::new(ProjectRegistry::new(Box::new(MemoryProjectStore::new())));
        projects
            .create_project(CreateProject {
                project_id: "p1".to_string(),
                name: "P1".to_string(),
                description: None,
                config: None,
                tags: vec![],
                owner: None,
            })
            .unwrap();
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        SessionManager::new(
            store,
            projects,
            100,
            0.9,
            Duration::from_secs(30),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn duplicate_session_id_terminates_prior() {
        let mgr = manager();
        let s1 = mgr.create_session("p1", Some("sess".to_string()), Capabilities::default()).unwrap();
        assert_eq!(s1.status, SessionStatus::Active);
        let s2 = mgr.create_session("p1", Some("sess".to_string()), Capabilities::default()).unwrap();
        assert_eq!(s2.queue_size, 0);
    }

    #[test]
    fn heartbeat_returns_stale_to_active() {
        let mgr = manager();
        mgr.create_session("p1", Some("sess".to_string()), Capabilities::default()).unwrap();
        let mut stale = mgr.get_session("p1", "sess").unwrap();
        stale.status = SessionStatus::Stale;
        mgr.store.save_session("p1", &stale).unwrap();
        let refreshed = mgr.update_heartbeat("p1", "sess").unwrap();
        assert_eq!(refreshed.status, SessionStatus::Active);
    }

    #[test]
    fn dequeue_drops_expired_and_counts_them() {
        use crate::models::{Message, MessageHeaders};
        use serde_json::{Map, json};

        let mgr = manager();
        mgr.create_session("p1", Some("sess".to_string()), Capabilities::default()).unwrap();

        let mut expired = Message {
            message_id: "m1".to_string(),
            sender_id: "other".to_string(),
            recipient_id: Some("sess".to_string()),
            timestamp: Utc::now() - chrono::Duration::seconds(120),
            protocol_name: "chat".to_string(),
            protocol_version: "1.0.0".to_string(),
            payload: Map::from_iter([("text".to_string(), json!("hi"))]),
            headers: MessageHeaders::default(),
            delivered_at: None,
        };
        expired.headers.ttl = Some(60);
        mgr.enqueue_message("p1", "sess", &expired).unwrap();

        let drained = mgr.dequeue_messages("p1", "sess", 10).unwrap();
        assert!(drained.is_empty());
        assert_eq!(mgr.message_stats().stats_for("p1").total_expired, 1);
    }
}
