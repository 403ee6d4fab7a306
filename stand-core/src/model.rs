//! The stand topology data model (spec.md §3), rendered as explicit typed
//! records per SPEC_FULL.md §3's resolution of the "unknown fields" open
//! question: `deny_unknown_fields` on every user-facing spec type.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Linux,
    EcoRouter,
}

/// A NIC binding as it appears in a stand spec: `**vmbr0`, `lan`, or
/// `lan.200` (spec.md §3). Parsed eagerly so every later consumer works
/// with the decoded alias/vlan pair instead of re-splitting strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NicBinding {
    /// `**name` — a pre-existing bridge, attached to directly.
    Static(String),
    /// `alias` or `alias.vlan` — a per-deployment symbolic bridge.
    Symbolic { alias: String, vlan: Option<u16> },
}

impl NicBinding {
    /// The alias this binding resolves against in a [`crate::bridge::BridgePlan`],
    /// or `None` for a static binding (spec.md §4.6: "Let `alias = bridge.split('.')[0]`").
    pub fn alias(&self) -> Option<&str> {
        match self {
            NicBinding::Static(_) => None,
            NicBinding::Symbolic { alias, .. } => Some(alias),
        }
    }

    pub fn vlan(&self) -> Option<u16> {
        match self {
            NicBinding::Static(_) => None,
            NicBinding::Symbolic { vlan, .. } => *vlan,
        }
    }
}

impl TryFrom<String> for NicBinding {
    type Error = Error;

    fn try_from(raw: String) -> Result<Self> {
        if let Some(rest) = raw.strip_prefix("**") {
            if rest.is_empty() {
                return Err(Error::Validation(format!("empty static bridge token: {raw:?}")));
            }
            return Ok(NicBinding::Static(rest.to_string()));
        }
        match raw.split_once('.') {
            Some((alias, vlan_str)) => {
                if alias.is_empty() {
                    return Err(Error::Validation(format!("empty bridge alias: {raw:?}")));
                }
                let vlan = vlan_str
                    .parse::<u16>()
                    .map_err(|_| Error::Validation(format!("unparseable VLAN id in {raw:?}")))?;
                Ok(NicBinding::Symbolic {
                    alias: alias.to_string(),
                    vlan: Some(vlan),
                })
            }
            None => {
                if raw.is_empty() {
                    return Err(Error::Validation("empty bridge token".to_string()));
                }
                Ok(NicBinding::Symbolic {
                    alias: raw,
                    vlan: None,
                })
            }
        }
    }
}

impl From<NicBinding> for String {
    fn from(binding: NicBinding) -> String {
        match binding {
            NicBinding::Static(name) => format!("**{name}"),
            NicBinding::Symbolic { alias, vlan: None } => alias,
            NicBinding::Symbolic {
                alias,
                vlan: Some(vlan),
            } => format!("{alias}.{vlan}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Machine {
    pub name: String,
    pub device_type: DeviceType,
    pub template_vmid: u32,
    pub template_node: String,
    #[serde(default)]
    pub networks: Vec<NicBinding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Stand {
    pub machines: Vec<Machine>,
}

impl Stand {
    /// Groups machines by `(template_vmid, template_node)` so the
    /// synchronizer coalesces replica work (spec.md §4.4 "Grouping").
    pub fn template_groups(&self) -> Vec<(u32, String)> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for machine in &self.machines {
            let key = (machine.template_vmid, machine.template_node.clone());
            if seen.insert(key.clone()) {
                out.push(key);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserList {
    pub name: String,
    pub users: Vec<String>,
}

/// Normalizes a bare login to `<login>@pve` when no realm is given
/// (spec.md §6: "a missing realm defaults to `@pve`").
pub fn normalize_userid(login: &str) -> String {
    if login.contains('@') {
        login.to_string()
    } else {
        format!("{login}@pve")
    }
}

/// The login portion before `@`, used as the pool name (spec.md §6).
pub fn login_of(userid: &str) -> &str {
    userid.split('@').next().unwrap_or(userid)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub user: String,
    pub generated_password: String,
    pub node: String,
}

/// Collects per-user outcomes for one batch so one user's failure does not
/// abort the others (spec.md §7 "one user's failure does not abort a batch").
#[derive(Debug, Default)]
pub struct DeploymentOutcome {
    pub successes: Vec<DeploymentResult>,
    pub failures: Vec<(String, Error)>,
}

impl DeploymentOutcome {
    pub fn is_partial_failure(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentGroupView {
    pub stand_id: String,
    pub user_list_id: String,
    pub members: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Deterministic group name derivation (spec.md §6): each stem is the
/// persisted entity's name with a trailing `_stand`/`_list` removed.
pub fn group_name(stand_name: &str, user_list_name: &str) -> String {
    let stand_stem = stand_name.strip_suffix("_stand").unwrap_or(stand_name);
    let list_stem = user_list_name.strip_suffix("_list").unwrap_or(user_list_name);
    format!("{stand_stem}-{list_stem}")
}
