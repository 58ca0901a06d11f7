//! C4: protocol registration, schema validation, discovery, cross-project sharing.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{BrokerError, BrokerResult, ValidationDetail};
use crate::models::{Protocol, SessionStatus, SharedProtocol};
use crate::project_registry::ProjectRegistry;
use crate::store::Store;

type ShareKey = (String, String, String); // (source_project, name, version)

pub struct ProtocolRegistry {
    store: Arc<dyn Store>,
    projects: Arc<ProjectRegistry>,
    /// source_project/name/version -> target projects with read-only visibility.
    sharing: DashMap<ShareKey, Vec<String>>,
}

fn schema_validation_error(project_id: &str) -> BrokerError {
    BrokerError::SchemaValidation {
        message: "message_schema is not a valid JSON Schema Draft-07 document".to_string(),
        detail: ValidationDetail {
            path: "$".to_string(),
            constraint: "draft-07".to_string(),
            expected: "a compilable JSON Schema".to_string(),
            actual: format!("schema rejected by compiler (project {project_id})"),
            message: "failed to compile message_schema as JSON Schema Draft-07".to_string(),
        },
    }
}

impl ProtocolRegistry {
    pub fn new(store: Arc<dyn Store>, projects: Arc<ProjectRegistry>) -> Self {
        ProtocolRegistry {
            store,
            projects,
            sharing: DashMap::new(),
        }
    }

    pub fn register(&self, project_id: &str, protocol: Protocol) -> BrokerResult<Protocol> {
        jsonschema::JSONSchema::options()
            .with_draft(jsonschema::Draft::Draft7)
            .compile(&protocol.message_schema)
            .map_err(|_| schema_validation_error(project_id))?;
        self.store.save_protocol(project_id, &protocol)?;
        self.projects.increment_protocol_count(project_id, 1)?;
        Ok(protocol)
    }

    pub fn get(&self, project_id: &str, name: &str, version: &str) -> BrokerResult<Protocol> {
        self.store
            .get_protocol(project_id, name, version)?
            .ok_or_else(|| BrokerError::NotFound(format!("protocol {name} v{version}")))
    }

    pub fn discover(
        &self,
        project_id: &str,
        name: Option<&str>,
        version: Option<&str>,
        tags: &[String],
        include_shared: bool,
    ) -> BrokerResult<Vec<SharedProtocol>> {
        let mut out: Vec<SharedProtocol> = self
            .store
            .list_protocols(project_id, name, version)?
            .into_iter()
            .map(|p| SharedProtocol {
                protocol: p,
                source_project_id: project_id.to_string(),
            })
            .collect();

        if include_shared {
            for entry in self.sharing.iter() {
                let (source, share_name, share_version) = entry.key();
                if !entry.value().iter().any(|t| t == project_id) {
                    continue;
                }
                if name.is_some_and(|n| n != share_name) || version.is_some_and(|v| v != share_version) {
                    continue;
                }
                if let Some(protocol) = self.store.get_protocol(source, share_name, share_version)? {
                    out.push(SharedProtocol {
                        protocol,
                        source_project_id: source.clone(),
                    });
                }
            }
        }

        if !tags.is_empty() {
            out.retain(|sp| sp.protocol.metadata.tags.iter().any(|t| tags.contains(t)));
        }
        Ok(out)
    }

    pub fn share_protocol(
        &self,
        name: &str,
        version: &str,
        source_project: &str,
        target_project: &str,
    ) -> BrokerResult<()> {
        if source_project == target_project {
            return Err(BrokerError::Validation("cannot share a protocol with its own project".to_string()));
        }
        if self.store.get_protocol(source_project, name, version)?.is_none() {
            return Err(BrokerError::NotFound(format!("protocol {name} v{version}")));
        }
        let key = (source_project.to_string(), name.to_string(), version.to_string());
        let mut targets = self.sharing.entry(key).or_default();
        if !targets.iter().any(|t| t == target_project) {
            targets.push(target_project.to_string());
        }
        Ok(())
    }

    pub fn unshare_protocol(
        &self,
        name: &str,
        version: &str,
        source_project: &str,
        target_project: &str,
    ) -> BrokerResult<()> {
        let key = (source_project.to_string(), name.to_string(), version.to_string());
        if let Some(mut targets) = self.sharing.get_mut(&key) {
            targets.retain(|t| t != target_project);
        }
        Ok(())
    }

    /// Blocks deletion without force if any active session still references the protocol.
    pub fn can_delete_protocol(
        &self,
        project_id: &str,
        name: &str,
        version: &str,
    ) -> BrokerResult<(bool, Option<String>)> {
        let sessions = self.store.list_sessions(project_id, Some(SessionStatus::Active))?;
        let referenced = sessions.iter().any(|s| {
            s.capabilities
                .supported_protocols
                .get(name)
                .is_some_and(|versions| versions.iter().any(|v| v == version))
        });
        if referenced {
            Ok((false, Some(format!("protocol {name} v{version} is referenced by an active session"))))
        } else {
            Ok((true, None))
        }
    }

    pub fn delete(&self, project_id: &str, name: &str, version: &str, force: bool) -> BrokerResult<()> {
        if !force {
            let (can, reason) = self.can_delete_protocol(project_id, name, version)?;
            if !can {
                return Err(BrokerError::Forbidden(reason.unwrap_or_default()));
            }
        }
        self.store.delete_protocol(project_id, name, version)?;
        self.projects.increment_protocol_count(project_id, -1)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreateProject, ProtocolMetadata};
    use crate::project_registry::MemoryProjectStore;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn setup() -> (ProtocolRegistry, Arc<ProjectRegistry>) {
        let projects = Arc::new(ProjectRegistry::new(Box::new(MemoryProjectStore::new())));
        for id in ["project_a", "project_b"] {
            projects
                .create_project(CreateProject {
                    project_id: id.to_string(),
                    name: id.to_string(),
                    description: None,
                    config: None,
                    tags: vec![],
                    owner: None,
                })
                .unwrap();
        }
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        (ProtocolRegistry::new(store, projects.clone()), projects)
    }

    fn chat_protocol() -> Protocol {
        Protocol {
            name: "chat".to_string(),
            version: "1.0.0".to_string(),
            message_schema: json!({"type": "object"}),
            capabilities: vec!["point_to_point".to_string()],
            metadata: ProtocolMetadata::default(),
        }
    }

    #[test]
    fn rejects_invalid_schema() {
        let (registry, _) = setup();
        let mut protocol = chat_protocol();
        protocol.message_schema = json!("not a schema object at all \u{0}");
        let err = registry.register("project_a", protocol).unwrap_err();
        assert_eq!(err.kind(), "VALIDATION");
    }

    #[test]
    fn discover_excludes_other_projects_unless_shared() {
        let (registry, _) = setup();
        registry.register("project_a", chat_protocol()).unwrap();
        let found = registry.discover("project_b", Some("chat"), None, &[], false).unwrap();
        assert!(found.is_empty());
        registry.share_protocol("chat", "1.0.0", "project_a", "project_b").unwrap();
        let found = registry.discover("project_b", Some("chat"), None, &[], true).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source_project_id, "project_a");
    }

    #[test]
    fn cannot_share_with_self() {
        let (registry, _) = setup();
        registry.register("project_a", chat_protocol()).unwrap();
        let err = registry
            .share_protocol("chat", "1.0.0", "project_a", "project_a")
            .unwrap_err();
        assert_eq!(err.kind(), "VALIDATION");
    }
}
