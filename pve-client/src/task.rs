//! Asynchronous hypervisor task polling (C2).

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Identifies one asynchronous task on one node (a Proxmox UPID).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskId {
    pub node: String,
    pub upid: String,
}

/// The kind of operation a task represents, driving its interval/timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Clone,
    ConvertToTemplate,
    MigrateOffline,
    SnapshotCreate,
    SnapshotDelete,
    SnapshotRollback,
    /// delete / start / stop and anything else without a dedicated bound.
    Generic,
}

impl TaskKind {
    /// `(poll interval, timeout)` contract from spec.md §4.2.
    pub fn bounds(self) -> (Duration, Duration) {
        match self {
            TaskKind::Clone => (Duration::from_secs(2), Duration::from_secs(1800)),
            TaskKind::ConvertToTemplate => (Duration::from_secs(2), Duration::from_secs(1800)),
            TaskKind::MigrateOffline => (Duration::from_secs(5), Duration::from_secs(1200)),
            TaskKind::SnapshotCreate | TaskKind::SnapshotDelete | TaskKind::SnapshotRollback => {
                (Duration::from_secs(2), Duration::from_secs(600))
            }
            TaskKind::Generic => (Duration::from_secs(2), Duration::from_secs(300)),
        }
    }
}

/// A terminal exit status is `ok` iff it begins with `OK` (spec.md §4.2).
fn is_ok_exit(exit_status: &str) -> bool {
    exit_status.starts_with("OK")
}

#[derive(Debug, Deserialize)]
struct TaskStatusResponse {
    data: TaskStatusData,
}

#[derive(Debug, Deserialize)]
struct TaskStatusData {
    status: String,
    #[serde(default)]
    exitstatus: Option<String>,
}

/// Polls a hypervisor task to a terminal state.
///
/// Classifies the terminal `exitstatus` as success iff it begins with `OK`;
/// anything else is `Error::TaskFailed`. Timeouts do not cancel the
/// hypervisor-side task — there is no such API — they only abort the wait.
pub struct TaskWaiter<'a> {
    http: &'a reqwest::Client,
    base_url: &'a str,
}

impl<'a> TaskWaiter<'a> {
    pub fn new(http: &'a reqwest::Client, base_url: &'a str) -> Self {
        Self { http, base_url }
    }

    pub async fn wait(&self, task_id: &TaskId, kind: TaskKind) -> Result<()> {
        let (interval, timeout) = kind.bounds();
        let url = format!(
            "{}/nodes/{}/tasks/{}/status",
            self.base_url, task_id.node, task_id.upid
        );
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let resp = self.http.get(&url).send().await?;
            if !resp.status().is_success() {
                return Err(Error::Api {
                    status: resp.status().as_u16(),
                    body: resp.text().await.unwrap_or_default(),
                });
            }
            let parsed: TaskStatusResponse = resp.json().await?;

            if parsed.data.status == "stopped" {
                let exit = parsed.data.exitstatus.unwrap_or_default();
                if is_ok_exit(&exit) {
                    debug!(?task_id, ?kind, "task completed");
                    return Ok(());
                }
                return Err(Error::TaskFailed {
                    task_id: task_id.clone(),
                    kind,
                    exit_status: exit,
                });
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(?task_id, ?kind, "task wait timed out");
                return Err(Error::Timeout {
                    task_id: task_id.clone(),
                    kind,
                    timeout_secs: timeout.as_secs(),
                });
            }

            tokio::time::sleep(interval).await;
        }
    }
}
