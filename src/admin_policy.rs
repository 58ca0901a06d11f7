//! C3: admin-role detection and cross-project access decisions, TTL-cached.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::project_registry::ProjectRegistry;

const ADMIN_KEY_IDS: &[&str] = &["admin", "owner"];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheAction {
    Access,
    Send(String),
}

#[derive(Clone)]
struct CacheEntry {
    value: bool,
    inserted_at: Instant,
}

pub struct AdminPolicy {
    registry: Arc<ProjectRegistry>,
    ttl: Duration,
    cache: DashMap<(String, CacheAction, String), CacheEntry>,
    // `Mutex<()>` guards cache-clear races against concurrent inserts; a
    // DashMap alone can't express "clear everything, then nothing stale
    // slips back in" atomically.
    clear_guard: Mutex<()>,
}

impl AdminPolicy {
    pub fn new(registry: Arc<ProjectRegistry>, ttl: Duration) -> Self {
        AdminPolicy {
            registry,
            ttl,
            cache: DashMap::new(),
            clear_guard: Mutex::new(()),
        }
    }

    pub fn clear_permission_cache(&self) {
        let _guard = self.clear_guard.lock().unwrap();
        self.cache.clear();
    }

    /// An API key is admin when its `key_id` is `admin`/`owner` and it validates to `project_id`.
    pub fn is_admin(&self, project_id: &str, api_key: Option<&str>) -> bool {
        let Some(api_key) = api_key else { return false };
        match self.registry.validate_api_key(api_key) {
            Ok(Some((resolved_project, key_id))) => {
                resolved_project == project_id && ADMIN_KEY_IDS.contains(&key_id.as_str())
            }
            _ => false,
        }
    }

    fn cached_or<F: FnOnce() -> bool>(
        &self,
        project_id: &str,
        action: CacheAction,
        target: &str,
        compute: F,
    ) -> bool {
        let key = (project_id.to_string(), action, target.to_string());
        if let Some(entry) = self.cache.get(&key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return entry.value;
            }
        }
        let value = compute();
        self.cache.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
        value
    }

    fn cross_project_allowed(&self, requester: &str, target: &str) -> bool {
        let Ok(requester_project) = self.registry.get_project(requester) else {
            return false;
        };
        let Ok(target_project) = self.registry.get_project(target) else {
            return false;
        };
        if !requester_project.config.allow_cross_project || !target_project.config.allow_cross_project {
            return false;
        }
        if requester_project.cross_project_permissions.is_empty() {
            return true;
        }
        requester_project
            .cross_project_permissions
            .iter()
            .any(|p| p.target_project_id == target)
    }

    pub fn can_access_project(&self, requester: &str, target: &str, api_key: Option<&str>) -> bool {
        if requester == target || self.is_admin(requester, api_key) {
            return true;
        }
        self.cached_or(requester, CacheAction::Access, target, || {
            self.cross_project_allowed(requester, target)
        })
    }

    pub fn can_send_cross_project_message(
        &self,
        sender: &str,
        recipient: &str,
        protocol: &str,
        api_key: Option<&str>,
    ) -> bool {
        if sender == recipient || self.is_admin(sender, api_key) {
            return true;
        }
        self.cached_or(
            sender,
            CacheAction::Send(protocol.to_string()),
            recipient,
            || {
                if !self.cross_project_allowed(sender, recipient) {
                    return false;
                }
                let Ok(sender_project) = self.registry.get_project(sender) else {
                    return false;
                };
                let permission = sender_project
                    .cross_project_permissions
                    .iter()
                    .find(|p| p.target_project_id == recipient);
                match permission {
                    Some(p) => p.allowed_protocols.is_empty() || p.allowed_protocols.iter().any(|a| a == protocol),
                    None => true,
                }
            },
        )
    }

    pub fn get_message_rate_limit(&self, sender: &str, recipient: &str, api_key: Option<&str>) -> u32 {
        if self.is_admin(sender, api_key) {
            return 0;
        }
        self.registry
            .get_project(sender)
            .ok()
            .and_then(|p| {
                p.cross_project_permissions
                    .iter()
                    .find(|perm| perm.target_project_id == recipient)
                    .map(|perm| perm.message_rate_limit)
            })
            .unwrap_or(0)
    }

    pub fn can_manage_project(&self, project_id: &str, api_key: &str) -> bool {
        self.is_admin(project_id, Some(api_key))
    }
}
