//! Shared per-project message accounting, used by both `Router` and
//! `SessionManager` so `total_expired` (and the other counters) stay
//! consistent regardless of which delivery path drops a message.

use chrono::Utc;
use dashmap::DashMap;

use crate::models::MessageStatistics;

#[derive(Default)]
pub struct MessageStats {
    by_project: DashMap<String, MessageStatistics>,
}

impl MessageStats {
    pub fn new() -> Self {
        MessageStats::default()
    }

    pub fn stats_for(&self, project_id: &str) -> MessageStatistics {
        self.by_project.get(project_id).map(|s| s.clone()).unwrap_or_default()
    }

    pub fn touch<F: FnOnce(&mut MessageStatistics)>(&self, project_id: &str, f: F) {
        let mut entry = self.by_project.entry(project_id.to_string()).or_default();
        f(&mut entry);
        entry.last_activity = Some(Utc::now());
    }

    pub fn record_expired(&self, project_id: &str) {
        self.touch(project_id, |s| s.total_expired += 1);
    }
}
