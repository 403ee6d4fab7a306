//! Audit record shape, grounded on `mvirt_log::{LogEntry, LogLevel}` minus
//! the gRPC transport and Raft replication the teacher layers on top —
//! this tool is a single operator-driven process, so the trail is a plain
//! local append log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    /// A deploy/teardown/sync outcome worth keeping regardless of severity.
    Audit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Ulid,
    pub ts: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
    pub related_ids: Vec<String>,
}
