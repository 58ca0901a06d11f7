//! C8: authorized inter-project delivery with a sliding-window rate limiter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::admin_policy::AdminPolicy;
use crate::error::{BrokerError, BrokerResult};
use crate::models::{Message, SendResult};
use crate::router::Router;
use crate::session_manager::SessionManager;

pub struct CrossProjectRouter {
    router: Arc<Router>,
    sessions: Arc<SessionManager>,
    policy: Arc<AdminPolicy>,
    window: Duration,
    /// (sender_project, recipient_project) -> send timestamps within the current window.
    counters: DashMap<(String, String), Vec<Instant>>,
}

impl CrossProjectRouter {
    pub fn new(router: Arc<Router>, sessions: Arc<SessionManager>, policy: Arc<AdminPolicy>, window: Duration) -> Self {
        CrossProjectRouter {
            router,
            sessions,
            policy,
            window,
            counters: DashMap::new(),
        }
    }

    fn check_rate_limit(&self, sender_project: &str, recipient_project: &str, limit: u32) -> bool {
        if limit == 0 {
            return true;
        }
        let key = (sender_project.to_string(), recipient_project.to_string());
        let mut entry = self.counters.entry(key).or_default();
        let now = Instant::now();
        entry.retain(|t| now.duration_since(*t) < self.window);
        if entry.len() as u32 >= limit {
            return false;
        }
        entry.push(now);
        true
    }

    pub fn send_message(
        &self,
        sender_project: &str,
        recipient_project: &str,
        sender_id: &str,
        recipient_id: &str,
        message: Message,
        api_key: Option<&str>,
    ) -> BrokerResult<SendResult> {
        if !self.policy.can_send_cross_project_message(sender_project, recipient_project, &message.protocol_name, api_key) {
            return Err(BrokerError::Forbidden(format!(
                "cross-project send from {sender_project} to {recipient_project} not authorized"
            )));
        }

        let limit = self.policy.get_message_rate_limit(sender_project, recipient_project, api_key);
        if !self.check_rate_limit(sender_project, recipient_project, limit) {
            return Err(BrokerError::RateLimited(format!(
                "rate limit of {limit}/min exceeded for {sender_project} -> {recipient_project}"
            )));
        }

        // Resolve sessions across the project boundary directly; Router::send_message
        // refuses cross-project pairs by design, so we replicate its delivery policy here.
        let sender = self.sessions.get_session(sender_project, sender_id)?;
        let recipient = self.sessions.get_session(recipient_project, recipient_id)?;

        if !self.router.protocols_compatible(&sender, &recipient, &message.protocol_name) {
            self.router.record_protocol_mismatch(sender_project);
            return Err(BrokerError::ProtocolMismatch(format!(
                "no common version for protocol {} between {sender_project} and {recipient_project}",
                message.protocol_name
            )));
        }

        let delivered = recipient.status != crate::models::SessionStatus::Disconnected;
        let mut routed = message;
        routed.recipient_id = Some(recipient_id.to_string());
        if delivered {
            routed.delivered_at = Some(chrono::Utc::now());
        }
        let result = self.sessions.enqueue_message(recipient_project, recipient_id, &routed)?;
        self.router.record_cross_project_send(sender_project, recipient_project, delivered);
        Ok(SendResult { delivered, ..result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Capabilities, CreateProject, CrossProjectPermission, MessageHeaders, ProjectConfig};
    use crate::project_registry::{MemoryProjectStore, ProjectRegistry};
    use crate::store::MemoryStore;
    use serde_json::{Map, json};
    use std::collections::HashMap;

    fn chat_caps() -> Capabilities {
        Capabilities {
            supported_protocols: HashMap::from([("chat".to_string(), vec!["1.0.0".to_string()])]),
            supported_features: Default::default(),
        }
    }

    fn setup() -> (CrossProjectRouter, Arc<SessionManager>, String) {
        let projects = Arc::new(ProjectRegistry::new(Box::new(MemoryProjectStore::new())));
        let key_a = projects
            .create_project(CreateProject {
                project_id: "project_a".to_string(),
                name: "A".to_string(),
                description: None,
                config: Some(ProjectConfig {
                    allow_cross_project: true,
                    ..ProjectConfig::default()
                }),
                tags: vec![],
                owner: None,
            })
            .unwrap()
            .plaintext_api_key;
        projects
            .create_project(CreateProject {
                project_id: "project_b".to_string(),
                name: "B".to_string(),
                description: None,
                config: Some(ProjectConfig {
                    allow_cross_project: true,
                    ..ProjectConfig::default()
                }),
                tags: vec![],
                owner: None,
            })
            .unwrap();
        projects
            .add_cross_project_permission(
                "project_a",
                CrossProjectPermission {
                    target_project_id: "project_b".to_string(),
                    allowed_protocols: vec![],
                    message_rate_limit: 2,
                },
            )
            .unwrap();

        let store: Arc<dyn crate::store::Store> = Arc::new(MemoryStore::new());
        let sessions = Arc::new(SessionManager::new(
            store,
            projects.clone(),
            100,
            0.9,
            std::time::Duration::from_secs(30),
            std::time::Duration::from_secs(60),
        ));
        sessions.create_session("project_a", Some("sender".to_string()), chat_caps()).unwrap();
        sessions.create_session("project_b", Some("recipient".to_string()), chat_caps()).unwrap();

        let policy = Arc::new(AdminPolicy::new(projects, Duration::from_secs(300)));
        let router = Arc::new(Router::new(sessions.clone(), Arc::new(ProjectRegistry::new(Box::new(MemoryProjectStore::new())))));
        (
            CrossProjectRouter::new(router, sessions.clone(), policy, Duration::from_secs(60)),
            sessions,
            key_a,
        )
    }

    fn msg() -> Message {
        Message {
            message_id: uuid::Uuid::new_v4().to_string(),
            sender_id: "sender".to_string(),
            recipient_id: None,
            timestamp: chrono::Utc::now(),
            protocol_name: "chat".to_string(),
            protocol_version: "1.0.0".to_string(),
            payload: Map::from_iter([("text".to_string(), json!("hi"))]),
            headers: MessageHeaders::default(),
            delivered_at: None,
        }
    }

    #[test]
    fn rate_limit_blocks_third_send() {
        let (router, _sessions, _key) = setup();
        assert!(router.send_message("project_a", "project_b", "sender", "recipient", msg(), None).is_ok());
        assert!(router.send_message("project_a", "project_b", "sender", "recipient", msg(), None).is_ok());
        let err = router
            .send_message("project_a", "project_b", "sender", "recipient", msg(), None)
            .unwrap_err();
        assert_eq!(err.kind(), "RATE_LIMITED");
    }

    #[test]
    fn admin_key_bypasses_rate_limit() {
        let (router, _sessions, key_a) = setup();
        for _ in 0..5 {
            router
                .send_message("project_a", "project_b", "sender", "recipient", msg(), Some(&key_a))
                .unwrap();
        }
    }

    #[test]
    fn protocol_mismatch_rejected_cross_project() {
        let (router, sessions, key_a) = setup();
        sessions
            .create_session("project_b", Some("legacy".to_string()), Capabilities::default())
            .unwrap();
        let err = router
            .send_message("project_a", "project_b", "sender", "legacy", msg(), Some(&key_a))
            .unwrap_err();
        assert_eq!(err.kind(), "PROTOCOL_MISMATCH");
    }
}
