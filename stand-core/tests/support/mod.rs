//! In-memory fake of `pve_client::HypervisorApi`, standing in for the real
//! REST client in integration-shaped tests against spec.md §8's scenarios.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use pve_client::{CloneMode, Error, HypervisorApi, NetworkInterface, PoolInfo, PoolMember, Result, TaskId, TaskKind, VmEntry};

#[derive(Debug, Clone)]
struct FakeVm {
    node: String,
    name: String,
    template: bool,
    status: String,
    pool: Option<String>,
    config: HashMap<String, String>,
    snapshots: std::collections::HashSet<String>,
}

#[derive(Default)]
struct State {
    vms: HashMap<u32, FakeVm>,
    bridges: HashMap<String, Vec<(String, bool)>>, // node -> [(iface, vlan_aware)]
    pools: std::collections::HashSet<String>,
    users: std::collections::HashSet<String>,
    acls: Vec<(String, String, String)>,
    next_vmid: u32,
}

pub struct FakeHypervisor {
    nodes: Vec<String>,
    state: Mutex<State>,
    counter: AtomicU32,
}

impl FakeHypervisor {
    pub fn new(nodes: &[&str]) -> Self {
        Self {
            nodes: nodes.iter().map(|s| s.to_string()).collect(),
            state: Mutex::new(State {
                next_vmid: 1000,
                ..Default::default()
            }),
            counter: AtomicU32::new(1000),
        }
    }

    /// Seeds a template VM directly (bypassing clone) on `node`.
    pub fn seed_template(&self, vmid: u32, node: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.vms.insert(
            vmid,
            FakeVm {
                node: node.to_string(),
                name: name.to_string(),
                template: true,
                status: "stopped".to_string(),
                pool: None,
                config: HashMap::new(),
                snapshots: Default::default(),
            },
        );
    }

    pub fn vm_exists(&self, vmid: u32) -> bool {
        self.state.lock().unwrap().vms.contains_key(&vmid)
    }

    pub fn vm_config(&self, vmid: u32) -> HashMap<String, String> {
        self.state.lock().unwrap().vms[&vmid].config.clone()
    }

    pub fn vm_node(&self, vmid: u32) -> String {
        self.state.lock().unwrap().vms[&vmid].node.clone()
    }

    pub fn bridges_on(&self, node: &str) -> Vec<(String, bool)> {
        self.state
            .lock()
            .unwrap()
            .bridges
            .get(node)
            .cloned()
            .unwrap_or_default()
    }

    pub fn pool_exists(&self, name: &str) -> bool {
        self.state.lock().unwrap().pools.contains(name)
    }

    pub fn user_exists(&self, userid: &str) -> bool {
        self.state.lock().unwrap().users.contains(userid)
    }

    pub fn acl_has(&self, path: &str, user: &str, role: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .acls
            .iter()
            .any(|(p, u, r)| p == path && u == user && r == role)
    }

    pub fn set_status(&self, vmid: u32, status: &str) {
        self.state.lock().unwrap().vms.get_mut(&vmid).unwrap().status = status.to_string();
    }

    fn task(&self, node: &str) -> TaskId {
        TaskId {
            node: node.to_string(),
            upid: format!("UPID:{node}:fake"),
        }
    }
}

#[async_trait]
impl HypervisorApi for FakeHypervisor {
    async fn list_nodes(&self) -> Result<Vec<String>> {
        Ok(self.nodes.clone())
    }

    async fn next_vmid(&self) -> Result<u32> {
        Ok(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn list_vms(&self, node: &str) -> Result<Vec<VmEntry>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .vms
            .iter()
            .filter(|(_, vm)| vm.node == node)
            .map(|(vmid, vm)| VmEntry {
                vmid: *vmid,
                name: Some(vm.name.clone()),
                template: Some(if vm.template { 1 } else { 0 }),
                status: vm.status.clone(),
            })
            .collect())
    }

    async fn clone(
        &self,
        source_node: &str,
        source_vmid: u32,
        new_vmid: u32,
        name: &str,
        _mode: CloneMode,
        pool: Option<&str>,
    ) -> Result<TaskId> {
        let mut state = self.state.lock().unwrap();
        if !state.vms.contains_key(&source_vmid) {
            return Err(Error::NotFound(format!("source vm {source_vmid}")));
        }
        state.vms.insert(
            new_vmid,
            FakeVm {
                node: source_node.to_string(),
                name: name.to_string(),
                template: false,
                status: "stopped".to_string(),
                pool: pool.map(|p| p.to_string()),
                config: HashMap::new(),
                snapshots: Default::default(),
            },
        );
        Ok(self.task(source_node))
    }

    async fn convert_to_template(&self, node: &str, vmid: u32) -> Result<TaskId> {
        let mut state = self.state.lock().unwrap();
        state.vms.get_mut(&vmid).unwrap().template = true;
        Ok(self.task(node))
    }

    async fn migrate_offline(&self, source_node: &str, vmid: u32, target_node: &str) -> Result<TaskId> {
        let mut state = self.state.lock().unwrap();
        state.vms.get_mut(&vmid).unwrap().node = target_node.to_string();
        Ok(self.task(source_node))
    }

    async fn delete_vm(&self, node: &str, vmid: u32) -> Result<TaskId> {
        let mut state = self.state.lock().unwrap();
        state.vms.remove(&vmid);
        Ok(self.task(node))
    }

    async fn snapshot_create(&self, node: &str, vmid: u32, snapname: &str) -> Result<TaskId> {
        let mut state = self.state.lock().unwrap();
        state.vms.get_mut(&vmid).unwrap().snapshots.insert(snapname.to_string());
        Ok(self.task(node))
    }

    async fn snapshot_rollback(&self, node: &str, _vmid: u32, _snapname: &str) -> Result<TaskId> {
        Ok(self.task(node))
    }

    async fn snapshot_delete(&self, node: &str, vmid: u32, snapname: &str) -> Result<TaskId> {
        let mut state = self.state.lock().unwrap();
        state.vms.get_mut(&vmid).unwrap().snapshots.remove(snapname);
        Ok(self.task(node))
    }

    async fn snapshot_exists(&self, _node: &str, vmid: u32, snapname: &str) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state
            .vms
            .get(&vmid)
            .map(|vm| vm.snapshots.contains(snapname))
            .unwrap_or(false))
    }

    async fn vm_config_set(&self, _node: &str, vmid: u32, fields: &[(String, String)]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let vm = state.vms.get_mut(&vmid).unwrap();
        for (k, v) in fields {
            vm.config.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    async fn vm_config_get(&self, _node: &str, vmid: u32) -> Result<HashMap<String, String>> {
        let state = self.state.lock().unwrap();
        Ok(state.vms.get(&vmid).map(|vm| vm.config.clone()).unwrap_or_default())
    }

    async fn vm_status(&self, _node: &str, vmid: u32) -> Result<String> {
        let state = self.state.lock().unwrap();
        Ok(state
            .vms
            .get(&vmid)
            .map(|vm| vm.status.clone())
            .unwrap_or_else(|| "stopped".to_string()))
    }

    async fn vm_start(&self, node: &str, vmid: u32) -> Result<TaskId> {
        let mut state = self.state.lock().unwrap();
        state.vms.get_mut(&vmid).unwrap().status = "running".to_string();
        Ok(self.task(node))
    }

    async fn vm_stop(&self, node: &str, vmid: u32) -> Result<TaskId> {
        let mut state = self.state.lock().unwrap();
        state.vms.get_mut(&vmid).unwrap().status = "stopped".to_string();
        Ok(self.task(node))
    }

    async fn list_networks(&self, node: &str) -> Result<Vec<NetworkInterface>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .bridges
            .get(node)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|(iface, _)| NetworkInterface {
                iface,
                iface_type: "bridge".to_string(),
            })
            .collect())
    }

    async fn create_bridge(&self, node: &str, name: &str, vlan_aware: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .bridges
            .entry(node.to_string())
            .or_default()
            .push((name.to_string(), vlan_aware));
        Ok(())
    }

    async fn update_bridge_vlan_aware(&self, node: &str, name: &str, vlan_aware: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(list) = state.bridges.get_mut(node) {
            if let Some(entry) = list.iter_mut().find(|(iface, _)| iface == name) {
                entry.1 = vlan_aware;
            }
        }
        Ok(())
    }

    async fn delete_bridge(&self, node: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(list) = state.bridges.get_mut(node) {
            list.retain(|(iface, _)| iface != name);
        }
        Ok(())
    }

    async fn reload_network(&self, node: &str) -> Result<TaskId> {
        Ok(self.task(node))
    }

    async fn pool_create(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.pools.insert(name.to_string()) {
            return Err(Error::AlreadyExists(format!("pool {name} already exists")));
        }
        Ok(())
    }

    async fn pool_get(&self, name: &str) -> Result<PoolInfo> {
        let state = self.state.lock().unwrap();
        if !state.pools.contains(name) {
            return Err(Error::NotFound(format!("pool {name}")));
        }
        let members = state
            .vms
            .iter()
            .filter(|(_, vm)| vm.pool.as_deref() == Some(name))
            .map(|(vmid, vm)| PoolMember {
                kind: "qemu".to_string(),
                vmid: Some(*vmid),
                node: Some(vm.node.clone()),
                name: Some(vm.name.clone()),
            })
            .collect();
        Ok(PoolInfo { members })
    }

    async fn pool_delete(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.pools.remove(name);
        Ok(())
    }

    async fn pool_list(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().pools.iter().cloned().collect())
    }

    async fn user_create(&self, userid: &str, _password: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.users.insert(userid.to_string()) {
            return Err(Error::AlreadyExists(format!("user {userid} already exists")));
        }
        Ok(())
    }

    async fn user_delete(&self, userid: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.users.remove(userid);
        Ok(())
    }

    async fn user_list(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().users.iter().cloned().collect())
    }

    async fn acl_put(&self, path: &str, userid: &str, role: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.acls.push((path.to_string(), userid.to_string(), role.to_string()));
        Ok(())
    }

    async fn wait(&self, _task_id: &TaskId, _kind: TaskKind) -> Result<()> {
        Ok(())
    }
}
