//! Teardown Engine (C8): safely remove a user's VMs, pool, account, and the
//! bridges created for them (spec.md §4.8).

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use pve_client::{HypervisorApi, TaskKind};
use stand_audit::{AuditLogger, LogLevel};
use stand_registry::GroupIndex;
use tracing::{error, info, warn};

use crate::bridge::{BRIDGE_RANGE_END, BRIDGE_RANGE_START};
use crate::deploy::BASELINE_SNAPSHOT;
use crate::error::{Error, Result};
use crate::model::login_of;

const STOP_POLL_INTERVAL: Duration = Duration::from_secs(2);
const STOP_WAIT_BUDGET: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
pub struct TeardownReport {
    /// VMs that failed to stop within the 30s budget; deletion proceeds
    /// regardless and the caller sees these surfaced (spec.md §4.8 step 4).
    pub stop_timeouts: Vec<u32>,
    /// `(vmid, error)` pairs where VM deletion itself failed.
    pub vm_delete_failures: Vec<(u32, Error)>,
    pub pool_delete_failed: bool,
    pub user_delete_failed: bool,
    pub bridges_deleted: Vec<(String, String)>,
}

pub struct TeardownEngine<'a> {
    client: &'a dyn HypervisorApi,
    groups: &'a GroupIndex,
    audit: &'a AuditLogger,
}

impl<'a> TeardownEngine<'a> {
    pub fn new(client: &'a dyn HypervisorApi, groups: &'a GroupIndex, audit: &'a AuditLogger) -> Self {
        Self {
            client,
            groups,
            audit,
        }
    }

    /// `userid` must already be normalized to `<login>@pve` (spec.md §4.8).
    pub async fn teardown(&self, userid: &str) -> Result<TeardownReport> {
        let login = login_of(userid).to_string();

        let users = self.client.user_list().await?;
        if !users.iter().any(|u| u == userid) {
            return Err(Error::NotFound(format!("user {userid} does not exist")));
        }
        let pool = match self.client.pool_get(&login).await {
            Ok(pool) => pool,
            Err(pve_client::Error::NotFound(_)) => {
                return Err(Error::NotFound(format!("pool {login} does not exist")))
            }
            Err(err) => return Err(Error::Hypervisor(err)),
        };

        let members: Vec<(String, u32)> = pool
            .members
            .iter()
            .filter(|m| m.kind == "qemu" || m.vmid.is_some())
            .filter_map(|m| Some((m.node.clone()?, m.vmid?)))
            .collect();

        let mut nodes_in_use: BTreeSet<String> = BTreeSet::new();
        for (node, _) in &members {
            nodes_in_use.insert(node.clone());
        }

        let mut report = TeardownReport::default();

        // 3. Collect bridges used exclusively by this user's VMs.
        let mut to_delete: HashSet<(String, String)> = HashSet::new();
        for (node, vmid) in &members {
            let config = self.client.vm_config_get(node, *vmid).await?;
            for (key, value) in &config {
                if !key.starts_with("net") {
                    continue;
                }
                if let Some(bridge) = extract_bridge(value) {
                    if let Some(n) = bridge.strip_prefix("vmbr").and_then(|s| s.parse::<u32>().ok()) {
                        if (BRIDGE_RANGE_START..=BRIDGE_RANGE_END).contains(&n) {
                            to_delete.insert((node.clone(), bridge));
                        }
                    }
                }
            }
        }

        // 4. Running VMs: stop unconditionally (bulk contract).
        for (node, vmid) in &members {
            let status = self.client.vm_status(node, *vmid).await?;
            if status != "running" {
                continue;
            }
            let stop_task = self.client.vm_stop(node, *vmid).await?;
            self.client.wait(&stop_task, TaskKind::Generic).await?;

            if !self.wait_for_stopped(node, *vmid).await? {
                warn!(vmid, node, "VM did not report stopped within 30s");
                report.stop_timeouts.push(*vmid);
            }
        }

        // 5. Snapshots: tolerate absence (spec.md §9 open question).
        for (node, vmid) in &members {
            match self.client.snapshot_exists(node, *vmid, BASELINE_SNAPSHOT).await {
                Ok(true) => {
                    if let Ok(task) = self.client.snapshot_delete(node, *vmid, BASELINE_SNAPSHOT).await {
                        let _ = self.client.wait(&task, TaskKind::SnapshotDelete).await;
                    }
                }
                Ok(false) => {}
                Err(err) => warn!(vmid, node, %err, "could not check for baseline snapshot"),
            }
        }

        // 6. Delete VMs.
        for (node, vmid) in &members {
            match self.client.delete_vm(node, *vmid).await {
                Ok(task) => {
                    if let Err(err) = self.client.wait(&task, TaskKind::Generic).await {
                        error!(vmid, node, %err, "VM delete task failed");
                        report.vm_delete_failures.push((*vmid, Error::Hypervisor(err)));
                    }
                }
                Err(err) => {
                    error!(vmid, node, %err, "VM delete request failed");
                    report.vm_delete_failures.push((*vmid, Error::Hypervisor(err)));
                }
            }
        }

        // 7. Delete pool, then user — non-fatal.
        if let Err(err) = self.client.pool_delete(&login).await {
            warn!(pool = login, %err, "pool delete failed");
            report.pool_delete_failed = true;
        }
        if let Err(err) = self.client.user_delete(userid).await {
            warn!(user = userid, %err, "user delete failed");
            report.user_delete_failed = true;
        }

        // 8. Delete bridges, per node (after VMs, to avoid "device busy").
        for (node, bridge) in &to_delete {
            if let Err(err) = self.client.delete_bridge(node, bridge).await {
                warn!(node, bridge, %err, "bridge delete failed");
                continue;
            }
            report.bridges_deleted.push((node.clone(), bridge.clone()));
        }

        // 9. Reload network on every node that held a member.
        for node in &nodes_in_use {
            if let Ok(task) = self.client.reload_network(node).await {
                let _ = self.client.wait(&task, TaskKind::Generic).await;
            }
        }

        // 10. Remove the user from every group that lists them.
        for (group_name, group) in self.groups.list()? {
            if group.members.iter().any(|m| m == userid) {
                self.groups.remove_member(&group_name, userid)?;
            }
        }

        info!(user = userid, vms = members.len(), "teardown complete");
        let _ = self.audit.log(
            LogLevel::Audit,
            format!("tore down {userid}: {} VMs, {} bridges", members.len(), report.bridges_deleted.len()),
            vec![userid.to_string()],
        );

        Ok(report)
    }

    async fn wait_for_stopped(&self, node: &str, vmid: u32) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + STOP_WAIT_BUDGET;
        loop {
            let status = self.client.vm_status(node, vmid).await?;
            if status == "stopped" {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
    }
}

/// Pulls `bridge=vmbrNNNN` out of a Proxmox `net*` config string such as
/// `model=virtio,bridge=vmbr1000,tag=200`.
fn extract_bridge(config_value: &str) -> Option<String> {
    config_value
        .split(',')
        .find_map(|part| part.strip_prefix("bridge=").map(|s| s.to_string()))
}
