//! Wire-shaped response types for the Proxmox VE REST surface consumed here.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct NodeEntry {
    pub node: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VmEntry {
    pub vmid: u32,
    #[serde(default)]
    pub name: Option<String>,
    /// `1` if the VM is a template.
    #[serde(default)]
    pub template: Option<u8>,
    pub status: String,
}

impl VmEntry {
    pub fn is_template(&self) -> bool {
        self.template.unwrap_or(0) == 1
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkInterface {
    pub iface: String,
    #[serde(rename = "type")]
    pub iface_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolMember {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub vmid: Option<u32>,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolInfo {
    #[serde(default)]
    pub members: Vec<PoolMember>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserEntry {
    pub userid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VmStatusInfo {
    pub status: String,
}

/// Clone mode: a full copy of the disk images, or a linked clone against
/// the source's base image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CloneMode {
    Full,
    Linked,
}

impl CloneMode {
    pub fn as_full_flag(self) -> u8 {
        match self {
            CloneMode::Full => 1,
            CloneMode::Linked => 0,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiEnvelope<T> {
    pub data: T,
}
