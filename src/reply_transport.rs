//! Bridges the coordinator's `ReplyTransport` trait to HTTP-polling agents:
//! a reply posted to `/meetings/<id>/participants/<agent>/{opinion,vote}`
//! resolves whichever `request_opinion`/`request_vote` call is waiting.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::coordinator::ReplyTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Kind {
    Opinion,
    Vote,
}

#[derive(Default)]
pub struct HttpReplyTransport {
    pending: DashMap<(Uuid, String, Kind), oneshot::Sender<String>>,
}

impl HttpReplyTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a coordinator call was actually waiting on this reply.
    fn resolve(&self, meeting_id: Uuid, agent_id: &str, kind: Kind, content: String) -> bool {
        if let Some((_, sender)) = self.pending.remove(&(meeting_id, agent_id.to_string(), kind)) {
            sender.send(content).is_ok()
        } else {
            false
        }
    }

    pub fn submit_opinion(&self, meeting_id: Uuid, agent_id: &str, content: String) -> bool {
        self.resolve(meeting_id, agent_id, Kind::Opinion, content)
    }

    pub fn submit_vote(&self, meeting_id: Uuid, agent_id: &str, content: String) -> bool {
        self.resolve(meeting_id, agent_id, Kind::Vote, content)
    }

    async fn await_reply(&self, meeting_id: Uuid, agent_id: &str, kind: Kind, timeout: Duration) -> Option<String> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert((meeting_id, agent_id.to_string(), kind), tx);
        let result = tokio::time::timeout(timeout, rx).await;
        self.pending.remove(&(meeting_id, agent_id.to_string(), kind));
        result.ok().and_then(|r| r.ok())
    }
}

#[async_trait]
impl ReplyTransport for HttpReplyTransport {
    async fn request_opinion(&self, meeting_id: Uuid, agent_id: &str, timeout: Duration) -> Option<String> {
        self.await_reply(meeting_id, agent_id, Kind::Opinion, timeout).await
    }

    async fn request_vote(
        &self,
        meeting_id: Uuid,
        agent_id: &str,
        _proposal: &str,
        _options: &[String],
        timeout: Duration,
    ) -> Option<String> {
        self.await_reply(meeting_id, agent_id, Kind::Vote, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submitted_opinion_resolves_the_waiting_request() {
        let transport = HttpReplyTransport::new();
        let meeting_id = Uuid::new_v4();
        let wait = transport.request_opinion(meeting_id, "agent-a", Duration::from_secs(2));
        tokio::task::yield_now().await;
        assert!(transport.submit_opinion(meeting_id, "agent-a", "looks good".to_string()));
        assert_eq!(wait.await, Some("looks good".to_string()));
    }

    #[tokio::test]
    async fn unanswered_request_times_out_to_none() {
        let transport = HttpReplyTransport::new();
        let meeting_id = Uuid::new_v4();
        let result = transport.request_vote(meeting_id, "agent-a", "p", &[], Duration::from_millis(20)).await;
        assert_eq!(result, None);
    }
}
