//! Deployment Engine (C6): realize one topology instance for one user
//! (spec.md §4.6).

use rand::Rng;
use pve_client::{CloneMode, HypervisorApi, TaskKind};
use stand_audit::{AuditLogger, LogLevel};
use stand_registry::{GroupIndex, TemplateRegistry};
use tracing::{error, info};

use crate::bridge;
use crate::error::{Error, Result};
use crate::model::{login_of, normalize_userid, DeploymentResult, Machine, Stand};
use crate::nic;

const VM_ROLE: &str = "PVEVMUser";
pub const BASELINE_SNAPSHOT: &str = "start";

/// An 8 decimal digit password (spec.md §6).
fn generate_password() -> String {
    let mut rng = rand::thread_rng();
    (0..8).map(|_| rng.gen_range(0..10).to_string()).collect()
}

/// Treats Proxmox's "already exists" rejection as success, per spec.md §7
/// "Idempotent creation errors ... are classified as success."
async fn idempotent_create<F, Fut>(op: F) -> Result<()>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<(), pve_client::Error>>,
{
    match op().await {
        Ok(()) => Ok(()),
        Err(pve_client::Error::AlreadyExists(_)) => Ok(()),
        Err(err) => Err(Error::Hypervisor(err)),
    }
}

pub struct DeploymentEngine<'a> {
    pub client: &'a dyn HypervisorApi,
    pub registry: &'a TemplateRegistry,
    pub groups: &'a GroupIndex,
    pub audit: &'a AuditLogger,
}

impl<'a> DeploymentEngine<'a> {
    pub fn new(
        client: &'a dyn HypervisorApi,
        registry: &'a TemplateRegistry,
        groups: &'a GroupIndex,
        audit: &'a AuditLogger,
    ) -> Self {
        Self {
            client,
            registry,
            groups,
            audit,
        }
    }

    /// Deploys `stand` for every `user` on `target_node`, sequentially
    /// (spec.md §4.6: "Per user (sequential; no intra-user parallelism)").
    pub async fn deploy(
        &self,
        stand: &Stand,
        stand_id: &str,
        users: &[String],
        user_list_id: &str,
        group: &str,
        target_node: &str,
        clone_mode: CloneMode,
    ) -> crate::model::DeploymentOutcome {
        let mut outcome = crate::model::DeploymentOutcome::default();
        for login in users {
            let userid = normalize_userid(login);
            match self
                .deploy_one(stand, stand_id, &userid, user_list_id, group, target_node, clone_mode)
                .await
            {
                Ok(result) => outcome.successes.push(result),
                Err(err) => {
                    error!(user = %userid, node = target_node, %err, "deployment failed");
                    let _ = self.audit.log(
                        LogLevel::Error,
                        format!("deploy failed for {userid} on {target_node}: {err}"),
                        vec![userid.clone()],
                    );
                    outcome.failures.push((userid, err));
                }
            }
        }
        outcome
    }

    async fn resolve_template_vmid(&self, machine: &Machine, target_node: &str) -> Result<u32> {
        if machine.template_node == target_node {
            return Ok(machine.template_vmid);
        }
        if let Some(replica) = self.registry.lookup(machine.template_vmid, target_node)? {
            return Ok(replica);
        }
        // No verified replica on this node: fall back to the source VMID.
        // This only succeeds if the deploy also targets the source node —
        // otherwise the clone call below fails loudly (spec.md §4.4).
        Ok(machine.template_vmid)
    }

    async fn deploy_one(
        &self,
        stand: &Stand,
        stand_id: &str,
        userid: &str,
        user_list_id: &str,
        group: &str,
        target_node: &str,
        clone_mode: CloneMode,
    ) -> Result<DeploymentResult> {
        let login = login_of(userid).to_string();

        // 1. Planning & bridges.
        let existing = self.client.list_networks(target_node).await?;
        let plan = bridge::plan(stand, target_node, &existing)?;
        bridge::create_bridges(self.client, target_node, &plan).await;

        // 2. Identity.
        let password = generate_password();
        {
            let userid = userid.to_string();
            let password = password.clone();
            let client = self.client;
            idempotent_create(move || async move { client.user_create(&userid, &password).await }).await?;
        }
        {
            let login = login.clone();
            let client = self.client;
            idempotent_create(move || async move { client.pool_create(&login).await }).await?;
        }
        self.client
            .acl_put(&format!("/pool/{login}"), userid, VM_ROLE)
            .await?;

        // 3. VMs.
        for machine in &stand.machines {
            let new_vmid = self.client.next_vmid().await?;
            let resolved_vmid = self.resolve_template_vmid(machine, target_node).await?;

            let clone_task = self
                .client
                .clone(
                    target_node,
                    resolved_vmid,
                    new_vmid,
                    &machine.name,
                    clone_mode,
                    Some(&login),
                )
                .await?;
            self.client.wait(&clone_task, TaskKind::Clone).await?;

            for (net_key, value) in nic::build_nic_fields(machine, &plan) {
                let Some(value) = value else {
                    error!(machine = %machine.name, net_key, "NIC alias has no bridge plan entry; skipping");
                    continue;
                };
                self.client
                    .vm_config_set(target_node, new_vmid, &[(net_key, value)])
                    .await?;
            }

            self.client
                .acl_put(&format!("/vms/{new_vmid}"), userid, VM_ROLE)
                .await?;

            let snapshot_task = self
                .client
                .snapshot_create(target_node, new_vmid, BASELINE_SNAPSHOT)
                .await?;
            self.client.wait(&snapshot_task, TaskKind::SnapshotCreate).await?;
        }

        // 4. Network commit.
        let reload_task = self.client.reload_network(target_node).await?;
        self.client.wait(&reload_task, TaskKind::Generic).await?;

        // 5. Record outcome.
        self.groups
            .upsert_member(group, stand_id, user_list_id, userid)?;
        info!(user = userid, node = target_node, "deployment succeeded");
        let _ = self.audit.log(
            LogLevel::Audit,
            format!("deployed {userid} on {target_node} ({} machines)", stand.machines.len()),
            vec![userid.to_string()],
        );

        Ok(DeploymentResult {
            user: userid.to_string(),
            generated_password: password,
            node: target_node.to_string(),
        })
    }
}
