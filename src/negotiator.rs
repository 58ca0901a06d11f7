//! C6: pairwise capability negotiation and compatibility matrix.

use std::collections::{HashMap, HashSet};

use semver::Version;
use serde::Serialize;

use crate::models::Session;

#[derive(Debug, Clone, Serialize)]
pub struct NegotiationResult {
    pub compatible: bool,
    /// name -> highest shared version.
    pub supported_protocols: HashMap<String, String>,
    pub feature_intersections: Vec<String>,
    pub unsupported_features: Vec<String>,
    pub incompatibilities: Vec<String>,
    pub cross_project: bool,
    pub suggestion: String,
}

fn parse_version(raw: &str) -> Option<Version> {
    Version::parse(raw).ok().or_else(|| Version::parse(&format!("{raw}.0.0")).ok())
}

fn highest_shared_version(a: &[String], b: &[String]) -> Option<String> {
    let b_set: HashSet<&String> = b.iter().collect();
    a.iter()
        .filter(|v| b_set.contains(v))
        .filter_map(|v| parse_version(v).map(|parsed| (parsed, v.clone())))
        .max_by(|x, y| x.0.cmp(&y.0))
        .map(|(_, raw)| raw)
}

pub struct Negotiator;

impl Negotiator {
    pub fn new() -> Self {
        Negotiator
    }

    pub fn negotiate(&self, a: &Session, b: &Session, allow_cross_project: bool) -> NegotiationResult {
        let cross_project = a.project_id != b.project_id;
        if cross_project && !allow_cross_project {
            return NegotiationResult {
                compatible: false,
                supported_protocols: HashMap::new(),
                feature_intersections: vec![],
                unsupported_features: vec![],
                incompatibilities: vec!["cross-project negotiation disallowed".to_string()],
                cross_project: true,
                suggestion: "enable allow_cross_project on both projects to negotiate across boundaries".to_string(),
            };
        }

        let mut supported = HashMap::new();
        for (name, versions_a) in &a.capabilities.supported_protocols {
            if let Some(versions_b) = b.capabilities.supported_protocols.get(name) {
                if let Some(shared) = highest_shared_version(versions_a, versions_b) {
                    supported.insert(name.clone(), shared);
                }
            }
        }

        let feature_intersections: Vec<String> = a
            .capabilities
            .supported_features
            .intersection(&b.capabilities.supported_features)
            .cloned()
            .collect();
        let unsupported_features: Vec<String> = a
            .capabilities
            .supported_features
            .symmetric_difference(&b.capabilities.supported_features)
            .cloned()
            .collect();

        let mut incompatibilities = Vec::new();
        if supported.is_empty() {
            incompatibilities.push("no shared protocol version between sessions".to_string());
        }

        let compatible = incompatibilities.is_empty();
        let suggestion = if compatible {
            format!("negotiated {} shared protocol(s)", supported.len())
        } else {
            "register a common protocol version on both sessions".to_string()
        };

        NegotiationResult {
            compatible,
            supported_protocols: supported,
            feature_intersections,
            unsupported_features,
            incompatibilities,
            cross_project,
            suggestion,
        }
    }

    pub fn compatibility_matrix(
        &self,
        sessions: &[Session],
        allow_cross_project: bool,
    ) -> (Vec<((String, String), NegotiationResult)>, HashMap<String, Vec<String>>) {
        let mut pairs = Vec::new();
        let mut by_project: HashMap<String, Vec<String>> = HashMap::new();
        for session in sessions {
            by_project
                .entry(session.project_id.clone())
                .or_default()
                .push(session.session_id.clone());
        }
        for i in 0..sessions.len() {
            for j in (i + 1)..sessions.len() {
                let result = self.negotiate(&sessions[i], &sessions[j], allow_cross_project);
                pairs.push(((sessions[i].session_id.clone(), sessions[j].session_id.clone()), result));
            }
        }
        (pairs, by_project)
    }
}

impl Default for Negotiator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Capabilities, SessionStatus};
    use chrono::Utc;
    use std::collections::HashMap as Map;

    fn session(id: &str, project: &str, protocols: Map<String, Vec<String>>, features: &[&str]) -> Session {
        Session {
            session_id: id.to_string(),
            project_id: project.to_string(),
            connection_time: Utc::now(),
            last_heartbeat: Utc::now(),
            status: SessionStatus::Active,
            capabilities: Capabilities {
                supported_protocols: protocols,
                supported_features: features.iter().map(|f| f.to_string()).collect(),
            },
            queue_size: 0,
        }
    }

    #[test]
    fn cross_project_denied_without_flag() {
        let negotiator = Negotiator::new();
        let a = session("a", "p1", Map::new(), &[]);
        let b = session("b", "p2", Map::new(), &[]);
        let result = negotiator.negotiate(&a, &b, false);
        assert!(!result.compatible);
        assert!(result.cross_project);
    }

    #[test]
    fn picks_highest_shared_version() {
        let negotiator = Negotiator::new();
        let a = session(
            "a",
            "p1",
            Map::from([("chat".to_string(), vec!["1.0.0".to_string(), "2.0.0".to_string()])]),
            &["streaming"],
        );
        let b = session(
            "b",
            "p1",
            Map::from([("chat".to_string(), vec!["1.0.0".to_string()])]),
            &["streaming"],
        );
        let result = negotiator.negotiate(&a, &b, false);
        assert!(result.compatible);
        assert_eq!(result.supported_protocols.get("chat"), Some(&"1.0.0".to_string()));
        assert_eq!(result.feature_intersections, vec!["streaming".to_string()]);
    }
}
