//! Lifecycle operations on already-provisioned stands (spec.md §1: "start,
//! stop, rollback to the baseline snapshot"), surfaced by the CLI as
//! `stand start|stop|rollback <group>`. Not one of C1-C9's per-user
//! teardown/deploy primitives, but built entirely from C1 calls against
//! every VM a group's members own.

use pve_client::{HypervisorApi, TaskKind};
use stand_registry::DeploymentGroup;

use crate::deploy::BASELINE_SNAPSHOT;
use crate::error::Error;
use crate::model::login_of;

#[derive(Debug, Default)]
pub struct LifecycleReport {
    pub succeeded: Vec<(String, u32)>,
    pub failed: Vec<(String, u32, Error)>,
}

async fn for_each_member_vm<F, Fut>(
    client: &dyn HypervisorApi,
    group: &DeploymentGroup,
    mut op: F,
) -> crate::error::Result<LifecycleReport>
where
    F: FnMut(String, u32) -> Fut,
    Fut: std::future::Future<Output = crate::error::Result<()>>,
{
    let mut report = LifecycleReport::default();
    for user in &group.members {
        let login = login_of(user);
        let pool = client.pool_get(login).await?;
        for member in pool.members {
            let (Some(node), Some(vmid)) = (member.node, member.vmid) else {
                continue;
            };
            match op(node.clone(), vmid).await {
                Ok(()) => report.succeeded.push((node, vmid)),
                Err(err) => report.failed.push((node, vmid, err)),
            }
        }
    }
    Ok(report)
}

pub async fn start_all(
    client: &dyn HypervisorApi,
    group: &DeploymentGroup,
) -> crate::error::Result<LifecycleReport> {
    for_each_member_vm(client, group, |node, vmid| async move {
        let task = client.vm_start(&node, vmid).await?;
        client.wait(&task, TaskKind::Generic).await?;
        Ok(())
    })
    .await
}

pub async fn stop_all(
    client: &dyn HypervisorApi,
    group: &DeploymentGroup,
) -> crate::error::Result<LifecycleReport> {
    for_each_member_vm(client, group, |node, vmid| async move {
        let task = client.vm_stop(&node, vmid).await?;
        client.wait(&task, TaskKind::Generic).await?;
        Ok(())
    })
    .await
}

/// Rolls every member VM back to the `start` baseline snapshot.
pub async fn rollback_all(
    client: &dyn HypervisorApi,
    group: &DeploymentGroup,
) -> crate::error::Result<LifecycleReport> {
    for_each_member_vm(client, group, |node, vmid| async move {
        let task = client.snapshot_rollback(&node, vmid, BASELINE_SNAPSHOT).await?;
        client.wait(&task, TaskKind::SnapshotRollback).await?;
        Ok(())
    })
    .await
}
