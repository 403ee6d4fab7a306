//! The typed hypervisor contract (C1) plus task waiting (C2), exposed as a
//! trait so `stand-core` can be exercised against a fake in unit tests.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use crate::client::PveClient;
use crate::error::Result;
use crate::task::{TaskId, TaskKind, TaskWaiter};
use crate::types::{CloneMode, NetworkInterface, NodeEntry, PoolInfo, UserEntry, VmEntry, VmStatusInfo};

#[async_trait]
pub trait HypervisorApi: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<String>>;
    async fn next_vmid(&self) -> Result<u32>;
    async fn list_vms(&self, node: &str) -> Result<Vec<VmEntry>>;

    async fn clone(
        &self,
        source_node: &str,
        source_vmid: u32,
        new_vmid: u32,
        name: &str,
        mode: CloneMode,
        pool: Option<&str>,
    ) -> Result<TaskId>;

    async fn convert_to_template(&self, node: &str, vmid: u32) -> Result<TaskId>;
    async fn migrate_offline(&self, source_node: &str, vmid: u32, target_node: &str) -> Result<TaskId>;
    async fn delete_vm(&self, node: &str, vmid: u32) -> Result<TaskId>;

    async fn snapshot_create(&self, node: &str, vmid: u32, snapname: &str) -> Result<TaskId>;
    async fn snapshot_rollback(&self, node: &str, vmid: u32, snapname: &str) -> Result<TaskId>;
    async fn snapshot_delete(&self, node: &str, vmid: u32, snapname: &str) -> Result<TaskId>;
    async fn snapshot_exists(&self, node: &str, vmid: u32, snapname: &str) -> Result<bool>;

    async fn vm_config_set(&self, node: &str, vmid: u32, fields: &[(String, String)]) -> Result<()>;
    async fn vm_config_get(&self, node: &str, vmid: u32) -> Result<HashMap<String, String>>;

    async fn vm_status(&self, node: &str, vmid: u32) -> Result<String>;
    async fn vm_start(&self, node: &str, vmid: u32) -> Result<TaskId>;
    async fn vm_stop(&self, node: &str, vmid: u32) -> Result<TaskId>;

    async fn list_networks(&self, node: &str) -> Result<Vec<NetworkInterface>>;
    async fn create_bridge(&self, node: &str, name: &str, vlan_aware: bool) -> Result<()>;
    async fn update_bridge_vlan_aware(&self, node: &str, name: &str, vlan_aware: bool) -> Result<()>;
    async fn delete_bridge(&self, node: &str, name: &str) -> Result<()>;
    async fn reload_network(&self, node: &str) -> Result<TaskId>;

    async fn pool_create(&self, name: &str) -> Result<()>;
    async fn pool_get(&self, name: &str) -> Result<PoolInfo>;
    async fn pool_delete(&self, name: &str) -> Result<()>;
    async fn pool_list(&self) -> Result<Vec<String>>;

    async fn user_create(&self, userid: &str, password: &str) -> Result<()>;
    async fn user_delete(&self, userid: &str) -> Result<()>;
    async fn user_list(&self) -> Result<Vec<String>>;

    async fn acl_put(&self, path: &str, userid: &str, role: &str) -> Result<()>;

    async fn wait(&self, task_id: &TaskId, kind: TaskKind) -> Result<()>;
}

fn form1<'a>(k: &'a str, v: String) -> HashMap<&'a str, String> {
    HashMap::from([(k, v)])
}

#[async_trait]
impl HypervisorApi for PveClient {
    async fn list_nodes(&self) -> Result<Vec<String>> {
        let entries: Vec<NodeEntry> = self.get_json("/nodes").await?;
        Ok(entries.into_iter().map(|e| e.node).collect())
    }

    async fn next_vmid(&self) -> Result<u32> {
        let id: String = self.get_json("/cluster/nextid").await?;
        Ok(id.parse().unwrap_or_default())
    }

    async fn list_vms(&self, node: &str) -> Result<Vec<VmEntry>> {
        self.get_json(&format!("/nodes/{node}/qemu")).await
    }

    async fn clone(
        &self,
        source_node: &str,
        source_vmid: u32,
        new_vmid: u32,
        name: &str,
        mode: CloneMode,
        pool: Option<&str>,
    ) -> Result<TaskId> {
        let mut form = HashMap::from([
            ("newid", new_vmid.to_string()),
            ("name", name.to_string()),
            ("full", mode.as_full_flag().to_string()),
        ]);
        if let Some(pool) = pool {
            form.insert("pool", pool.to_string());
        }
        self.mutate_task(
            source_node,
            Method::POST,
            &format!("/nodes/{source_node}/qemu/{source_vmid}/clone"),
            Some(&form),
        )
        .await
    }

    async fn convert_to_template(&self, node: &str, vmid: u32) -> Result<TaskId> {
        self.mutate_task(
            node,
            Method::POST,
            &format!("/nodes/{node}/qemu/{vmid}/template"),
            None,
        )
        .await
    }

    async fn migrate_offline(&self, source_node: &str, vmid: u32, target_node: &str) -> Result<TaskId> {
        let form = HashMap::from([
            ("target", target_node.to_string()),
            ("with-local-disks", "1".to_string()),
        ]);
        self.mutate_task(
            source_node,
            Method::POST,
            &format!("/nodes/{source_node}/qemu/{vmid}/migrate"),
            Some(&form),
        )
        .await
    }

    async fn delete_vm(&self, node: &str, vmid: u32) -> Result<TaskId> {
        let form = form1("purge", "1".to_string());
        self.mutate_task(
            node,
            Method::DELETE,
            &format!("/nodes/{node}/qemu/{vmid}"),
            Some(&form),
        )
        .await
    }

    async fn snapshot_create(&self, node: &str, vmid: u32, snapname: &str) -> Result<TaskId> {
        let form = form1("snapname", snapname.to_string());
        self.mutate_task(
            node,
            Method::POST,
            &format!("/nodes/{node}/qemu/{vmid}/snapshot"),
            Some(&form),
        )
        .await
    }

    async fn snapshot_rollback(&self, node: &str, vmid: u32, snapname: &str) -> Result<TaskId> {
        self.mutate_task(
            node,
            Method::POST,
            &format!("/nodes/{node}/qemu/{vmid}/snapshot/{snapname}/rollback"),
            None,
        )
        .await
    }

    async fn snapshot_delete(&self, node: &str, vmid: u32, snapname: &str) -> Result<TaskId> {
        self.mutate_task(
            node,
            Method::DELETE,
            &format!("/nodes/{node}/qemu/{vmid}/snapshot/{snapname}"),
            None,
        )
        .await
    }

    async fn snapshot_exists(&self, node: &str, vmid: u32, snapname: &str) -> Result<bool> {
        #[derive(serde::Deserialize)]
        struct SnapEntry {
            name: String,
        }
        let snaps: Vec<SnapEntry> = self
            .get_json(&format!("/nodes/{node}/qemu/{vmid}/snapshot"))
            .await?;
        Ok(snaps.iter().any(|s| s.name == snapname))
    }

    async fn vm_config_set(&self, node: &str, vmid: u32, fields: &[(String, String)]) -> Result<()> {
        let form: HashMap<&str, String> = fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();
        self.put(&format!("/nodes/{node}/qemu/{vmid}/config"), &form)
            .await
    }

    async fn vm_config_get(&self, node: &str, vmid: u32) -> Result<HashMap<String, String>> {
        let value: Value = self
            .get_json(&format!("/nodes/{node}/qemu/{vmid}/config"))
            .await?;
        let mut out = HashMap::new();
        if let Value::Object(map) = value {
            for (k, v) in map {
                let rendered = match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                out.insert(k, rendered);
            }
        }
        Ok(out)
    }

    async fn vm_status(&self, node: &str, vmid: u32) -> Result<String> {
        let status: VmStatusInfo = self
            .get_json(&format!("/nodes/{node}/qemu/{vmid}/status/current"))
            .await?;
        Ok(status.status)
    }

    async fn vm_start(&self, node: &str, vmid: u32) -> Result<TaskId> {
        self.mutate_task(
            node,
            Method::POST,
            &format!("/nodes/{node}/qemu/{vmid}/status/start"),
            None,
        )
        .await
    }

    async fn vm_stop(&self, node: &str, vmid: u32) -> Result<TaskId> {
        self.mutate_task(
            node,
            Method::POST,
            &format!("/nodes/{node}/qemu/{vmid}/status/stop"),
            None,
        )
        .await
    }

    async fn list_networks(&self, node: &str) -> Result<Vec<NetworkInterface>> {
        self.get_json(&format!("/nodes/{node}/network")).await
    }

    async fn create_bridge(&self, node: &str, name: &str, vlan_aware: bool) -> Result<()> {
        let mut form = HashMap::from([
            ("iface", name.to_string()),
            ("type", "bridge".to_string()),
            ("autostart", "1".to_string()),
        ]);
        if vlan_aware {
            form.insert("bridge_vlan_aware", "1".to_string());
        }
        self.post(&format!("/nodes/{node}/network"), &form).await
    }

    async fn update_bridge_vlan_aware(&self, node: &str, name: &str, vlan_aware: bool) -> Result<()> {
        let form = HashMap::from([
            ("type", "bridge".to_string()),
            (
                "bridge_vlan_aware",
                if vlan_aware { "1" } else { "0" }.to_string(),
            ),
        ]);
        self.put(&format!("/nodes/{node}/network/{name}"), &form)
            .await
    }

    async fn delete_bridge(&self, node: &str, name: &str) -> Result<()> {
        self.delete(&format!("/nodes/{node}/network/{name}"), None)
            .await
    }

    async fn reload_network(&self, node: &str) -> Result<TaskId> {
        self.mutate_task(node, Method::PUT, &format!("/nodes/{node}/network"), None)
            .await
    }

    async fn pool_create(&self, name: &str) -> Result<()> {
        let form = form1("poolid", name.to_string());
        self.post("/pools", &form).await
    }

    async fn pool_get(&self, name: &str) -> Result<PoolInfo> {
        self.get_json(&format!("/pools/{name}")).await
    }

    async fn pool_delete(&self, name: &str) -> Result<()> {
        self.delete(&format!("/pools/{name}"), None).await
    }

    async fn pool_list(&self) -> Result<Vec<String>> {
        #[derive(serde::Deserialize)]
        struct Entry {
            poolid: String,
        }
        let entries: Vec<Entry> = self.get_json("/pools").await?;
        Ok(entries.into_iter().map(|e| e.poolid).collect())
    }

    async fn user_create(&self, userid: &str, password: &str) -> Result<()> {
        let form = HashMap::from([
            ("userid", userid.to_string()),
            ("password", password.to_string()),
        ]);
        self.post("/access/users", &form).await
    }

    async fn user_delete(&self, userid: &str) -> Result<()> {
        self.delete(&format!("/access/users/{userid}"), None).await
    }

    async fn user_list(&self) -> Result<Vec<String>> {
        let entries: Vec<UserEntry> = self.get_json("/access/users").await?;
        Ok(entries.into_iter().map(|e| e.userid).collect())
    }

    async fn acl_put(&self, path: &str, userid: &str, role: &str) -> Result<()> {
        let form = HashMap::from([
            ("path", path.to_string()),
            ("users", userid.to_string()),
            ("roles", role.to_string()),
        ]);
        self.put("/access/acl", &form).await
    }

    async fn wait(&self, task_id: &TaskId, kind: TaskKind) -> Result<()> {
        TaskWaiter::new(self.http(), self.base_url())
            .wait(task_id, kind)
            .await
    }
}
