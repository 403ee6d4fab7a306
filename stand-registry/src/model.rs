//! Persisted record types for the Template Registry (C3) and Group Index (C9).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One source template's placement record: where it lives natively, and
/// which nodes already carry a verified replica.
///
/// Keyed externally by `source_vmid` (spec.md §3 keys this as a string).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateRegistryEntry {
    pub source_node: String,
    /// `target_node -> replica_vmid`.
    pub replicas: BTreeMap<String, u32>,
}

impl TemplateRegistryEntry {
    pub fn new(source_node: impl Into<String>) -> Self {
        Self {
            source_node: source_node.into(),
            replicas: BTreeMap::new(),
        }
    }
}

/// A named pairing of a stand spec and a user list whose members have a
/// live deployment (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentGroup {
    pub stand_id: String,
    pub user_list_id: String,
    pub members: Vec<String>,
    pub created_at: DateTime<Utc>,
}
