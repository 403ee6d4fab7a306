//! Connection and authentication descriptor for a Proxmox VE cluster.

use serde::{Deserialize, Serialize};

/// Authentication method for a cluster connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Auth {
    /// API token pair, sent as `Authorization: PVEAPIToken=user@realm!tokenid=secret`.
    Token {
        user: String,
        token_id: String,
        secret: String,
    },
    /// Password login; `user` must carry a realm suffix (e.g. `root@pam`).
    Password { user: String, password: String },
}

/// Everything needed to reach and authenticate against one cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionProfile {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub auth: Auth,
    /// Classroom clusters are frequently self-signed; verification is off
    /// by default per spec, but can be opted back in.
    #[serde(default)]
    pub verify_tls: bool,
}

fn default_port() -> u16 {
    8006
}

impl ConnectionProfile {
    pub fn base_url(&self) -> String {
        format!("https://{}:{}/api2/json", self.host, self.port)
    }
}
