//! C7: point-to-point and broadcast delivery with protocol compatibility checks.

use std::sync::Arc;

use chrono::Utc;

use crate::error::{BrokerError, BrokerResult};
use crate::models::{BroadcastResult, Message, MessageStatistics, SendResult, Session, SessionStatus};
use crate::project_registry::ProjectRegistry;
use crate::session_manager::SessionManager;
use crate::stats::MessageStats;

fn protocols_compatible(a: &Session, b: &Session, name: &str) -> bool {
    let a_versions = a.capabilities.supported_protocols.get(name);
    let b_versions = b.capabilities.supported_protocols.get(name);
    match (a_versions, b_versions) {
        (Some(av), Some(bv)) => av.iter().any(|v| bv.contains(v)),
        _ => false,
    }
}

pub struct Router {
    sessions: Arc<SessionManager>,
    projects: Arc<ProjectRegistry>,
    stats: Arc<MessageStats>,
}

impl Router {
    pub fn new(sessions: Arc<SessionManager>, projects: Arc<ProjectRegistry>) -> Self {
        let stats = sessions.message_stats();
        Router { sessions, projects, stats }
    }

    pub fn stats_for(&self, project_id: &str) -> MessageStatistics {
        self.stats.stats_for(project_id)
    }

    /// Shared protocol-compatibility gate; `CrossProjectRouter` delegates here
    /// so cross-project sends enforce the same common-version rule as `send_message`.
    pub fn protocols_compatible(&self, a: &Session, b: &Session, name: &str) -> bool {
        protocols_compatible(a, b, name)
    }

    /// Records a protocol mismatch against `project_id`'s statistics.
    pub fn record_protocol_mismatch(&self, project_id: &str) {
        self.touch_stats(project_id, |s| s.total_failed += 1);
    }

    /// Records a cross-project delivery against both projects' statistics;
    /// called by `CrossProjectRouter` after it resolves sessions itself.
    pub fn record_cross_project_send(&self, sender_project: &str, recipient_project: &str, delivered: bool) {
        self.touch_stats(sender_project, |s| s.total_sent += 1);
        if delivered {
            self.touch_stats(recipient_project, |s| s.total_delivered += 1);
        } else {
            self.touch_stats(recipient_project, |s| s.total_queued += 1);
        }
        self.projects.record_message_activity(sender_project).ok();
    }

    fn touch_stats<F: FnOnce(&mut MessageStatistics)>(&self, project_id: &str, f: F) {
        self.stats.touch(project_id, f);
    }

    /// Sends `message` from `sender_id` to `recipient_id`, both resolved within `project_id`.
    /// Cross-project sends must go through `CrossProjectRouter` instead.
    pub fn send_message(
        &self,
        project_id: &str,
        sender_id: &str,
        recipient_id: &str,
        mut message: Message,
    ) -> BrokerResult<SendResult> {
        let sender = self.sessions.get_session(project_id, sender_id)?;
        let recipient = self.sessions.get_session(project_id, recipient_id)?;

        if sender.project_id != recipient.project_id {
            return Err(BrokerError::Forbidden("cross-project send requires CrossProjectRouter".to_string()));
        }
        if !protocols_compatible(&sender, &recipient, &message.protocol_name) {
            self.touch_stats(project_id, |s| s.total_failed += 1);
            return Err(BrokerError::ProtocolMismatch(format!(
                "no common version for protocol {}",
                message.protocol_name
            )));
        }

        let now = Utc::now();
        if message.is_expired_at(now) {
            self.touch_stats(project_id, |s| s.total_expired += 1);
            return Err(BrokerError::Expired(format!("message {} expired before delivery", message.message_id)));
        }

        message.recipient_id = Some(recipient_id.to_string());
        self.touch_stats(project_id, |s| s.total_sent += 1);
        self.projects.record_message_activity(project_id).ok();

        if recipient.status == SessionStatus::Disconnected {
            let result = self.sessions.enqueue_message(project_id, recipient_id, &message)?;
            self.touch_stats(project_id, |s| s.total_queued += 1);
            return Ok(result);
        }

        message.delivered_at = Some(now);
        let result = self.sessions.enqueue_message(project_id, recipient_id, &message)?;
        self.touch_stats(project_id, |s| s.total_delivered += 1);
        Ok(SendResult {
            delivered: true,
            ..result
        })
    }

    /// Delivers to every other compatible session in `project_id`; per-recipient
    /// failures are recorded but never abort the rest of the fan-out.
    pub fn broadcast_message(
        &self,
        project_id: &str,
        sender_id: &str,
        mut message: Message,
        capability_filter: Option<&std::collections::HashSet<String>>,
    ) -> BrokerResult<BroadcastResult> {
        let sender = self.sessions.get_session(project_id, sender_id)?;
        let recipients = self.sessions.list_sessions(project_id, None)?;
        message.recipient_id = None;
        self.touch_stats(project_id, |s| s.total_broadcast += 1);

        let mut result = BroadcastResult {
            message_id: message.message_id.clone(),
            ..Default::default()
        };

        for recipient in recipients {
            if recipient.session_id == sender.session_id {
                continue;
            }
            if let Some(filter) = capability_filter {
                if !filter.is_subset(&recipient.capabilities.supported_features) {
                    result.skipped.push(recipient.session_id);
                    continue;
                }
            }
            if !protocols_compatible(&sender, &recipient, &message.protocol_name) {
                result.skipped.push(recipient.session_id);
                continue;
            }
            let mut per_recipient = message.clone();
            if recipient.status != SessionStatus::Disconnected {
                per_recipient.delivered_at = Some(Utc::now());
            }
            match self.sessions.enqueue_message(project_id, &recipient.session_id, &per_recipient) {
                Ok(_) => result.delivered.push(recipient.session_id),
                Err(_) => result.failed.push(recipient.session_id),
            }
        }
        Ok(result)
    }
}
