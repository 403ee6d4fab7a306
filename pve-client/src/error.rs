//! Error kinds surfaced by the hypervisor client and task waiter.

use thiserror::Error;

use crate::task::{TaskId, TaskKind};

/// Errors that can occur talking to a Proxmox VE cluster.
#[derive(Debug, Error)]
pub enum Error {
    /// Could not reach the hypervisor at all (DNS, TCP, TLS).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Credentials were rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A named node/VM/pool/user/bridge does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Proxmox rejected a create call because the resource already exists.
    ///
    /// Callers at the engine layer treat this as success (spec: idempotent
    /// creation). It is classified here because only the raw API error body
    /// carries the distinction.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The hypervisor-side task reached a terminal state that was not `OK`.
    #[error("task {task_id:?} ({kind:?}) failed: {exit_status}")]
    TaskFailed {
        task_id: TaskId,
        kind: TaskKind,
        exit_status: String,
    },

    /// The waiter exceeded the per-kind timeout bound.
    ///
    /// The hypervisor-side task is not cancelled; it may still be running.
    #[error("task {task_id:?} ({kind:?}) timed out after {timeout_secs}s")]
    Timeout {
        task_id: TaskId,
        kind: TaskKind,
        timeout_secs: u64,
    },

    /// Other non-2xx API response.
    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },
}

pub type Result<T> = std::result::Result<T, Error>;
