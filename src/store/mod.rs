pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::BrokerResult;
use crate::models::{Message, Protocol, Session, SessionStatus};

/// Project-namespaced key/value plus bounded queues. No operation succeeds
/// without a `project_id`; every implementation must keep projects mutually
/// invisible to each other even when lower-level IDs collide.
pub trait Store: Send + Sync {
    fn save_protocol(&self, project_id: &str, protocol: &Protocol) -> BrokerResult<()>;
    fn get_protocol(&self, project_id: &str, name: &str, version: &str) -> BrokerResult<Option<Protocol>>;
    fn list_protocols(
        &self,
        project_id: &str,
        name: Option<&str>,
        version: Option<&str>,
    ) -> BrokerResult<Vec<Protocol>>;
    fn delete_protocol(&self, project_id: &str, name: &str, version: &str) -> BrokerResult<()>;

    fn save_session(&self, project_id: &str, session: &Session) -> BrokerResult<()>;
    fn get_session(&self, project_id: &str, session_id: &str) -> BrokerResult<Option<Session>>;
    fn list_sessions(
        &self,
        project_id: &str,
        status: Option<SessionStatus>,
    ) -> BrokerResult<Vec<Session>>;
    /// Lists sessions across every project; used by project-wide GC sweeps.
    fn list_all_sessions(&self) -> BrokerResult<Vec<Session>>;
    fn delete_session(&self, project_id: &str, session_id: &str) -> BrokerResult<()>;

    /// Enqueues a message for `session_id`, failing with `QUEUE_FULL` at `capacity`.
    /// Returns the queue size after the enqueue.
    fn enqueue(
        &self,
        project_id: &str,
        session_id: &str,
        message: &Message,
        capacity: usize,
    ) -> BrokerResult<usize>;
    /// Pops up to `limit` messages oldest-first within each priority class
    /// (urgent > high > normal > low), updating the owning session's `queue_size`.
    fn dequeue(&self, project_id: &str, session_id: &str, limit: usize) -> BrokerResult<Vec<Message>>;
    fn queue_size(&self, project_id: &str, session_id: &str) -> BrokerResult<usize>;
    fn clear_queue(&self, project_id: &str, session_id: &str) -> BrokerResult<()>;
}
