//! C2: project CRUD, API-key mint/rotate/validate, cross-project permissions.

use base64::Engine;
use chrono::Utc;
use dashmap::DashMap;
use rand::RngCore;
use rusqlite::OptionalExtension;
use sha2::{Digest, Sha256};

use crate::error::{BrokerError, BrokerResult};
use crate::models::{
    ApiKey, CreateProject, CreatedProject, CrossProjectPermission, Project, ProjectConfig,
    ProjectStatistics, ProjectStatus, RotatedKey, UpdateProject, is_valid_project_id,
};
use crate::store::sqlite::SqliteStore;

/// Backing storage for `Project` records, kept separate from the broker
/// `Store` trait (C1) since projects are the isolation root rather than
/// something namespaced *by* a project.
pub trait ProjectStore: Send + Sync {
    fn insert(&self, project: Project) -> BrokerResult<()>;
    fn get(&self, project_id: &str) -> BrokerResult<Option<Project>>;
    fn list(&self) -> BrokerResult<Vec<Project>>;
    fn delete(&self, project_id: &str) -> BrokerResult<()>;
    /// Atomically load-mutate-store a project under a single guard.
    fn mutate<R>(
        &self,
        project_id: &str,
        f: Box<dyn FnOnce(&mut Project) -> BrokerResult<R> + '_>,
    ) -> BrokerResult<R>;
}

#[derive(Default)]
pub struct MemoryProjectStore {
    projects: DashMap<String, Project>,
}

impl MemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProjectStore for MemoryProjectStore {
    fn insert(&self, project: Project) -> BrokerResult<()> {
        self.projects.insert(project.project_id.clone(), project);
        Ok(())
    }

    fn get(&self, project_id: &str) -> BrokerResult<Option<Project>> {
        Ok(self.projects.get(project_id).map(|p| p.clone()))
    }

    fn list(&self) -> BrokerResult<Vec<Project>> {
        Ok(self.projects.iter().map(|e| e.value().clone()).collect())
    }

    fn delete(&self, project_id: &str) -> BrokerResult<()> {
        self.projects.remove(project_id);
        Ok(())
    }

    fn mutate<R>(
        &self,
        project_id: &str,
        f: Box<dyn FnOnce(&mut Project) -> BrokerResult<R> + '_>,
    ) -> BrokerResult<R> {
        let mut entry = self
            .projects
            .get_mut(project_id)
            .ok_or_else(|| BrokerError::NotFound(format!("project {project_id}")))?;
        f(&mut entry)
    }
}

pub struct SqliteProjectStore {
    store: std::sync::Arc<SqliteStore>,
}

impl SqliteProjectStore {
    pub fn new(store: std::sync::Arc<SqliteStore>) -> Self {
        SqliteProjectStore { store }
    }
}

impl ProjectStore for SqliteProjectStore {
    fn insert(&self, project: Project) -> BrokerResult<()> {
        let conn = self.store.conn.lock().unwrap();
        let data = serde_json::to_string(&project).map_err(|e| BrokerError::Internal(e.to_string()))?;
        conn.execute(
            "INSERT INTO projects (project_id, data) VALUES (?1, ?2)",
            rusqlite::params![project.project_id, data],
        )?;
        Ok(())
    }

    fn get(&self, project_id: &str) -> BrokerResult<Option<Project>> {
        let conn = self.store.conn.lock().unwrap();
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM projects WHERE project_id=?1",
                rusqlite::params![project_id],
                |r| r.get(0),
            )
            .optional()?;
        data.map(|d| serde_json::from_str(&d).map_err(|e| BrokerError::Internal(e.to_string())))
            .transpose()
    }

    fn list(&self) -> BrokerResult<Vec<Project>> {
        let conn = self.store.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT data FROM projects")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?).map_err(|e| BrokerError::Internal(e.to_string()))?);
        }
        Ok(out)
    }

    fn delete(&self, project_id: &str) -> BrokerResult<()> {
        let conn = self.store.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM projects WHERE project_id=?1",
            rusqlite::params![project_id],
        )?;
        Ok(())
    }

    fn mutate<R>(
        &self,
        project_id: &str,
        f: Box<dyn FnOnce(&mut Project) -> BrokerResult<R> + '_>,
    ) -> BrokerResult<R> {
        let conn = self.store.conn.lock().unwrap();
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM projects WHERE project_id=?1",
                rusqlite::params![project_id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(data) = data else {
            return Err(BrokerError::NotFound(format!("project {project_id}")));
        };
        let mut project: Project =
            serde_json::from_str(&data).map_err(|e| BrokerError::Internal(e.to_string()))?;
        let result = f(&mut project)?;
        let updated = serde_json::to_string(&project).map_err(|e| BrokerError::Internal(e.to_string()))?;
        conn.execute(
            "UPDATE projects SET data=?2 WHERE project_id=?1",
            rusqlite::params![project_id, updated],
        )?;
        Ok(result)
    }
}

pub struct ProjectRegistry {
    store: Box<dyn ProjectStore>,
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

fn mint_key(project_id: &str, key_id: &str) -> (ApiKey, String) {
    let secret = generate_secret();
    let plaintext = format!("{project_id}_{key_id}_{secret}");
    let key = ApiKey {
        key_id: key_id.to_string(),
        secret_hash: hash_secret(&secret),
        created_at: Utc::now(),
        expires_at: None,
        is_active: true,
    };
    (key, plaintext)
}

impl ProjectRegistry {
    pub fn new(store: Box<dyn ProjectStore>) -> Self {
        ProjectRegistry { store }
    }

    /// Creates the canonical seed project idempotently if the registry holds no projects yet.
    pub fn ensure_seed_project(&self, seed_project_id: &str) -> BrokerResult<()> {
        if !self.store.list()?.is_empty() {
            return Ok(());
        }
        self.create_project(CreateProject {
            project_id: seed_project_id.to_string(),
            name: "Default Project".to_string(),
            description: Some("Canonical seed project created on first startup".to_string()),
            config: None,
            tags: vec![],
            owner: None,
        })
        .map(|_| ())
    }

    pub fn create_project(&self, req: CreateProject) -> BrokerResult<CreatedProject> {
        if !is_valid_project_id(&req.project_id) {
            return Err(BrokerError::Validation(format!(
                "invalid or reserved project_id: {}",
                req.project_id
            )));
        }
        if req.name.len() > 100 {
            return Err(BrokerError::Validation("project name exceeds 100 chars".to_string()));
        }
        if let Some(desc) = &req.description {
            if desc.len() > 500 {
                return Err(BrokerError::Validation("project description exceeds 500 chars".to_string()));
            }
        }
        if self.store.get(&req.project_id)?.is_some() {
            return Err(BrokerError::Duplicate(format!("project {} already exists", req.project_id)));
        }
        let (key, plaintext) = mint_key(&req.project_id, "owner");
        let project = Project {
            project_id: req.project_id,
            name: req.name,
            description: req.description,
            tags: req.tags,
            owner: req.owner,
            config: req.config.unwrap_or_default(),
            statistics: ProjectStatistics::default(),
            status: ProjectStatus::Active,
            api_keys: vec![key],
            cross_project_permissions: vec![],
            created_at: Utc::now(),
        };
        self.store.insert(project.clone())?;
        Ok(CreatedProject {
            project,
            plaintext_api_key: plaintext,
        })
    }

    pub fn get_project(&self, project_id: &str) -> BrokerResult<Project> {
        self.store
            .get(project_id)?
            .ok_or_else(|| BrokerError::NotFound(format!("project {project_id}")))
    }

    pub fn list_projects(
        &self,
        name_filter: Option<&str>,
        include_inactive: bool,
        include_discoverable_only: bool,
    ) -> BrokerResult<Vec<Project>> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .filter(|p| include_inactive || p.status == ProjectStatus::Active)
            .filter(|p| !include_discoverable_only || p.config.discoverable)
            .filter(|p| name_filter.is_none_or(|f| p.name.contains(f)))
            .collect())
    }

    pub fn update_project(&self, project_id: &str, update: UpdateProject) -> BrokerResult<Project> {
        self.store.mutate(
            project_id,
            Box::new(move |p: &mut Project| {
                if let Some(name) = update.name {
                    if name.len() > 100 {
                        return Err(BrokerError::Validation("project name exceeds 100 chars".to_string()));
                    }
                    p.name = name;
                }
                if let Some(description) = update.description {
                    if description.len() > 500 {
                        return Err(BrokerError::Validation(
                            "project description exceeds 500 chars".to_string(),
                        ));
                    }
                    p.description = Some(description);
                }
                if let Some(config) = update.config {
                    p.config = config;
                }
                if let Some(tags) = update.tags {
                    p.tags = tags;
                }
                if let Some(status) = update.status {
                    p.status = status;
                }
                Ok(p.clone())
            }),
        )
    }

    pub fn delete_project(&self, project_id: &str) -> BrokerResult<()> {
        let project = self.get_project(project_id)?;
        if project.statistics.session_count > 0 {
            return Err(BrokerError::InvalidState(format!(
                "project {project_id} still has {} active sessions",
                project.statistics.session_count
            )));
        }
        self.store.delete(project_id)
    }

    /// Parses by the last two `_` delimiters so project IDs may contain underscores.
    pub fn validate_api_key(&self, plaintext: &str) -> BrokerResult<Option<(String, String)>> {
        let parts: Vec<&str> = plaintext.rsplitn(3, '_').collect();
        if parts.len() != 3 {
            return Ok(None);
        }
        let secret = parts[0];
        let key_id = parts[1];
        let project_id = parts[2];
        let Some(project) = self.store.get(project_id)? else {
            return Ok(None);
        };
        let hash = hash_secret(secret);
        let now = Utc::now();
        let found = project
            .api_keys
            .iter()
            .find(|k| k.key_id == key_id && k.secret_hash == hash);
        match found {
            Some(k) if k.is_active && k.expires_at.is_none_or(|exp| exp > now) => {
                Ok(Some((project_id.to_string(), key_id.to_string())))
            }
            _ => Ok(None),
        }
    }

    /// Sets `expires_at = now + grace` on the target key(s) and mints a fresh replacement each.
    pub fn rotate_api_keys(
        &self,
        project_id: &str,
        key_id: Option<&str>,
        grace_period_seconds: i64,
    ) -> BrokerResult<Vec<RotatedKey>> {
        let key_id = key_id.map(|s| s.to_string());
        self.store.mutate(
            project_id,
            Box::new(move |p: &mut Project| {
                let grace_until = Utc::now() + chrono::Duration::seconds(grace_period_seconds);
                let mut rotated = Vec::new();
                let targets: Vec<String> = p
                    .api_keys
                    .iter()
                    .filter(|k| key_id.as_deref().is_none_or(|id| k.key_id == id))
                    .map(|k| k.key_id.clone())
                    .collect();
                if targets.is_empty() {
                    return Err(BrokerError::NotFound("no matching api key to rotate".to_string()));
                }
                for target in targets {
                    if let Some(k) = p.api_keys.iter_mut().find(|k| k.key_id == target) {
                        k.expires_at = Some(grace_until);
                    }
                    let (new_key, plaintext) = mint_key(&p.project_id, &target);
                    p.api_keys.push(new_key);
                    rotated.push(RotatedKey {
                        key_id: target,
                        plaintext_api_key: plaintext,
                        expires_old_at: grace_until,
                    });
                }
                Ok(rotated)
            }),
        )
    }

    pub fn add_cross_project_permission(
        &self,
        project_id: &str,
        permission: CrossProjectPermission,
    ) -> BrokerResult<()> {
        self.store.mutate(
            project_id,
            Box::new(move |p: &mut Project| {
                p.cross_project_permissions
                    .retain(|perm| perm.target_project_id != permission.target_project_id);
                p.cross_project_permissions.push(permission);
                Ok(())
            }),
        )
    }

    pub fn increment_session_count(&self, project_id: &str, delta: i64) -> BrokerResult<()> {
        self.store.mutate(
            project_id,
            Box::new(move |p: &mut Project| {
                p.statistics.session_count = (p.statistics.session_count as i64 + delta).max(0) as u32;
                p.statistics.last_activity = Some(Utc::now());
                Ok(())
            }),
        )
    }

    pub fn increment_protocol_count(&self, project_id: &str, delta: i64) -> BrokerResult<()> {
        self.store.mutate(
            project_id,
            Box::new(move |p: &mut Project| {
                p.statistics.protocol_count = (p.statistics.protocol_count as i64 + delta).max(0) as u32;
                Ok(())
            }),
        )
    }

    pub fn record_message_activity(&self, project_id: &str) -> BrokerResult<()> {
        self.store.mutate(
            project_id,
            Box::new(move |p: &mut Project| {
                p.statistics.message_count += 1;
                p.statistics.last_activity = Some(Utc::now());
                Ok(())
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ProjectRegistry {
        ProjectRegistry::new(Box::new(MemoryProjectStore::new()))
    }

    #[test]
    fn create_and_validate_api_key() {
        let reg = registry();
        let created = reg
            .create_project(CreateProject {
                project_id: "project_a".to_string(),
                name: "A".to_string(),
                description: None,
                config: None,
                tags: vec![],
                owner: None,
            })
            .unwrap();
        let resolved = reg.validate_api_key(&created.plaintext_api_key).unwrap();
        assert_eq!(resolved, Some(("project_a".to_string(), "owner".to_string())));
    }

    #[test]
    fn rotate_preserves_old_key_until_expiry() {
        let reg = registry();
        let created = reg
            .create_project(CreateProject {
                project_id: "project_a".to_string(),
                name: "A".to_string(),
                description: None,
                config: None,
                tags: vec![],
                owner: None,
            })
            .unwrap();
        reg.rotate_api_keys("project_a", Some("owner"), 300).unwrap();
        assert!(reg.validate_api_key(&created.plaintext_api_key).unwrap().is_some());
    }

    #[test]
    fn reserved_project_id_rejected() {
        let reg = registry();
        let err = reg
            .create_project(CreateProject {
                project_id: "admin".to_string(),
                name: "X".to_string(),
                description: None,
                config: None,
                tags: vec![],
                owner: None,
            })
            .unwrap_err();
        assert_eq!(err.kind(), "VALIDATION");
    }

    #[test]
    fn delete_blocked_while_sessions_active() {
        let reg = registry();
        reg.create_project(CreateProject {
            project_id: "project_a".to_string(),
            name: "A".to_string(),
            description: None,
            config: None,
            tags: vec![],
            owner: None,
        })
        .unwrap();
        reg.increment_session_count("project_a", 1).unwrap();
        let err = reg.delete_project("project_a").unwrap_err();
        assert_eq!(err.kind(), "INVALID_STATE");
    }
}
