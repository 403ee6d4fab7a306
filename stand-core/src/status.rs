//! Status query supplement (SPEC_FULL.md §10, grounded on
//! `original_source/modules/active_users.py`): for a deployed group, report
//! each member's VMs and their running/stopped state. Read-only; built
//! entirely from existing C1 calls, so it lives as a function here rather
//! than a new top-level component.

use pve_client::HypervisorApi;
use stand_registry::DeploymentGroup;

use crate::error::Result;
use crate::model::login_of;

#[derive(Debug, Clone)]
pub struct VmStatus {
    pub node: String,
    pub vmid: u32,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct UserStatus {
    pub user: String,
    pub vms: Vec<VmStatus>,
}

#[derive(Debug, Clone)]
pub struct GroupStatus {
    pub group_name: String,
    pub members: Vec<UserStatus>,
}

pub async fn group_status(
    client: &dyn HypervisorApi,
    group_name: &str,
    group: &DeploymentGroup,
) -> Result<GroupStatus> {
    let mut members = Vec::new();
    for user in &group.members {
        let login = login_of(user);
        let pool = client.pool_get(login).await?;
        let mut vms = Vec::new();
        for member in pool.members {
            let (Some(node), Some(vmid)) = (member.node, member.vmid) else {
                continue;
            };
            let status = client.vm_status(&node, vmid).await?;
            vms.push(VmStatus { node, vmid, status });
        }
        members.push(UserStatus {
            user: user.clone(),
            vms,
        });
    }
    Ok(GroupStatus {
        group_name: group_name.to_string(),
        members,
    })
}
