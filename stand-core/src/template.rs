//! Template Synchronizer (C4): for a set of target nodes, ensure each
//! required template has a verified replica (spec.md §4.4).

use pve_client::{CloneMode, HypervisorApi, TaskKind};
use stand_audit::{AuditLogger, LogLevel};
use stand_registry::TemplateRegistry;
use tracing::{error, info};

use crate::error::Result;

/// One synchronization attempt's outcome, `(source_vmid, target_node)`.
#[derive(Debug)]
pub struct SyncFailure {
    pub source_vmid: u32,
    pub target_node: String,
    pub error: crate::error::Error,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    /// `(source_vmid, target_node, replica_vmid)` pairs that ended up
    /// verified, whether freshly created or already present.
    pub verified: Vec<(u32, String, u32)>,
    /// `(source_vmid, target_node)` pairs that required a fresh clone.
    pub created: Vec<(u32, String)>,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn no_changes(&self) -> bool {
        self.created.is_empty()
    }
}

async fn verify_on_node(client: &dyn HypervisorApi, node: &str, vmid: u32) -> Result<bool> {
    let vms = client.list_vms(node).await?;
    Ok(vms.iter().any(|vm| vm.vmid == vmid && vm.is_template()))
}

/// Ensures every `(source_vmid, source_node)` in `groups` has a verified
/// replica on every node in `targets` other than its own source node.
/// Pre-grouping by `source_vmid` (spec.md §4.4 "Grouping") is the caller's
/// job — see [`crate::model::Stand::template_groups`].
pub async fn sync_templates(
    client: &dyn HypervisorApi,
    registry: &TemplateRegistry,
    audit: &AuditLogger,
    groups: &[(u32, String)],
    targets: &[String],
) -> Result<SyncReport> {
    let mut report = SyncReport::default();

    for (source_vmid, source_node) in groups {
        registry.register(*source_vmid, source_node)?;

        for target in targets {
            if target == source_node {
                continue;
            }

            if let Err(err) =
                sync_one(client, registry, audit, *source_vmid, source_node, target, &mut report).await
            {
                error!(source_vmid, %source_node, target, %err, "template sync failed for pair");
                let _ = audit.log(
                    LogLevel::Error,
                    format!("template sync failed: {source_vmid}@{source_node} -> {target}: {err}"),
                    vec![source_vmid.to_string(), target.clone()],
                );
                report.failures.push(SyncFailure {
                    source_vmid: *source_vmid,
                    target_node: target.clone(),
                    error: err,
                });
            }
        }
    }

    Ok(report)
}

async fn sync_one(
    client: &dyn HypervisorApi,
    registry: &TemplateRegistry,
    audit: &AuditLogger,
    source_vmid: u32,
    source_node: &str,
    target: &str,
    report: &mut SyncReport,
) -> Result<()> {
    if let Some(replica) = registry.lookup(source_vmid, target)? {
        if verify_on_node(client, target, replica).await? {
            report.verified.push((source_vmid, target.to_string(), replica));
            return Ok(());
        }
        info!(source_vmid, target, replica, "registry entry stale, recreating");
        registry.forget_replica(source_vmid, target)?;
    }

    let new_vmid = client.next_vmid().await?;
    let name = format!("tpl-{source_vmid}-{target}");

    let clone_task = client
        .clone(source_node, source_vmid, new_vmid, &name, CloneMode::Full, None)
        .await?;
    client.wait(&clone_task, TaskKind::Clone).await?;

    let template_task = client.convert_to_template(source_node, new_vmid).await?;
    client.wait(&template_task, TaskKind::ConvertToTemplate).await?;

    let migrate_task = client.migrate_offline(source_node, new_vmid, target).await?;
    client.wait(&migrate_task, TaskKind::MigrateOffline).await?;

    registry.register_replica(source_vmid, source_node, target, new_vmid)?;
    let _ = audit.log(
        LogLevel::Audit,
        format!("template {source_vmid} replicated to {target} as {new_vmid}"),
        vec![source_vmid.to_string(), target.to_string()],
    );

    report.created.push((source_vmid, target.to_string()));
    report.verified.push((source_vmid, target.to_string(), new_vmid));
    Ok(())
}
