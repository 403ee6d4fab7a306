//! Bridge Planner (C5): translate a stand's symbolic bridges into concrete
//! `vmbr<N>` allocations per node (spec.md §4.5).

use std::collections::{BTreeSet, HashMap};

use pve_client::{HypervisorApi, NetworkInterface};
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::{NicBinding, Stand};

pub const BRIDGE_RANGE_START: u32 = 1000;
pub const BRIDGE_RANGE_END: u32 = 1999;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeAllocation {
    pub vmbr_name: String,
    pub vlan_aware: bool,
    pub vlans: BTreeSet<u16>,
}

/// `alias -> allocation`, for one user on one node.
pub type BridgePlan = HashMap<String, BridgeAllocation>;

fn taken_numbers(existing: &[NetworkInterface]) -> BTreeSet<u32> {
    existing
        .iter()
        .filter_map(|iface| iface.iface.strip_prefix("vmbr"))
        .filter_map(|num| num.parse::<u32>().ok())
        .collect()
}

/// Plans bridges for `stand` on `node`, given that node's live `vmbr*`
/// interfaces. Pure function over inputs so it is unit-testable without a
/// hypervisor connection (spec.md §8's bridge-numbering invariants).
pub fn plan(stand: &Stand, node: &str, existing: &[NetworkInterface]) -> Result<BridgePlan> {
    let mut taken = taken_numbers(existing);
    let mut next_number = BRIDGE_RANGE_START;
    let mut plan: BridgePlan = HashMap::new();

    for machine in &stand.machines {
        for binding in &machine.networks {
            let NicBinding::Symbolic { alias, vlan } = binding else {
                continue; // `**name` bindings reference pre-existing bridges.
            };

            match plan.get_mut(alias) {
                Some(allocation) => {
                    if let Some(vlan) = vlan {
                        allocation.vlans.insert(*vlan);
                        allocation.vlan_aware = true;
                    }
                }
                None => {
                    while taken.contains(&next_number) {
                        next_number += 1;
                    }
                    if next_number > BRIDGE_RANGE_END {
                        return Err(Error::BridgeExhausted {
                            node: node.to_string(),
                        });
                    }
                    taken.insert(next_number);
                    let mut vlans = BTreeSet::new();
                    let vlan_aware = if let Some(vlan) = vlan {
                        vlans.insert(*vlan);
                        true
                    } else {
                        false
                    };
                    plan.insert(
                        alias.clone(),
                        BridgeAllocation {
                            vmbr_name: format!("vmbr{next_number}"),
                            vlan_aware,
                            vlans,
                        },
                    );
                    next_number += 1;
                }
            }
        }
    }

    Ok(plan)
}

/// Creates every bridge in `plan` on `node`, then flips VLAN-aware ones.
/// Errors are logged and do not abort the rest of the plan (spec.md §4.5
/// "Errors during creation are logged; an absent bridge will cause the
/// dependent NIC configuration to fail later").
pub async fn create_bridges(client: &dyn HypervisorApi, node: &str, plan: &BridgePlan) {
    for allocation in plan.values() {
        if let Err(err) = client
            .create_bridge(node, &allocation.vmbr_name, allocation.vlan_aware)
            .await
        {
            warn!(node, bridge = %allocation.vmbr_name, %err, "failed to create bridge");
            continue;
        }
        if allocation.vlan_aware {
            if let Err(err) = client
                .update_bridge_vlan_aware(node, &allocation.vmbr_name, true)
                .await
            {
                warn!(node, bridge = %allocation.vmbr_name, %err, "failed to set vlan_aware on bridge");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeviceType, Machine};

    fn iface(name: &str) -> NetworkInterface {
        NetworkInterface {
            iface: name.to_string(),
            iface_type: "bridge".to_string(),
        }
    }

    fn machine(name: &str, networks: Vec<NicBinding>) -> Machine {
        Machine {
            name: name.to_string(),
            device_type: DeviceType::Linux,
            template_vmid: 100,
            template_node: "pve1".into(),
            networks,
        }
    }

    #[test]
    fn static_bindings_are_skipped() {
        let stand = Stand {
            machines: vec![machine("m1", vec![NicBinding::Static("vmbr0".into())])],
        };
        let plan = plan(&stand, "pve1", &[]).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn first_free_number_is_allocated_skipping_existing() {
        let existing: Vec<NetworkInterface> = (1000..1005).map(|n| iface(&format!("vmbr{n}"))).collect();
        let stand = Stand {
            machines: vec![machine(
                "m1",
                vec![NicBinding::Symbolic {
                    alias: "lan".into(),
                    vlan: None,
                }],
            )],
        };
        let plan = plan(&stand, "pve1", &existing).unwrap();
        assert_eq!(plan["lan"].vmbr_name, "vmbr1005");
        assert!(!plan["lan"].vlan_aware);
    }

    #[test]
    fn mixed_tagged_and_untagged_alias_is_vlan_aware() {
        let stand = Stand {
            machines: vec![machine(
                "m1",
                vec![
                    NicBinding::Symbolic {
                        alias: "lan".into(),
                        vlan: None,
                    },
                    NicBinding::Symbolic {
                        alias: "lan".into(),
                        vlan: Some(200),
                    },
                ],
            )],
        };
        let plan = plan(&stand, "pve1", &[]).unwrap();
        assert_eq!(plan.len(), 1);
        assert!(plan["lan"].vlan_aware);
        assert_eq!(plan["lan"].vlans, BTreeSet::from([200]));
    }

    #[test]
    fn each_alias_gets_a_unique_number() {
        let stand = Stand {
            machines: vec![machine(
                "m1",
                vec![
                    NicBinding::Symbolic {
                        alias: "lan".into(),
                        vlan: None,
                    },
                    NicBinding::Symbolic {
                        alias: "wan".into(),
                        vlan: Some(10),
                    },
                ],
            )],
        };
        let plan = plan(&stand, "pve1", &[]).unwrap();
        assert_eq!(plan["lan"].vmbr_name, "vmbr1000");
        assert_eq!(plan["wan"].vmbr_name, "vmbr1001");
    }

    #[test]
    fn exhausted_range_fails_validation() {
        let existing: Vec<NetworkInterface> =
            (BRIDGE_RANGE_START..=BRIDGE_RANGE_END).map(|n| iface(&format!("vmbr{n}"))).collect();
        let stand = Stand {
            machines: vec![machine(
                "m1",
                vec![NicBinding::Symbolic {
                    alias: "lan".into(),
                    vlan: None,
                }],
            )],
        };
        let err = plan(&stand, "pve1", &existing).unwrap_err();
        assert!(matches!(err, Error::BridgeExhausted { .. }));
    }
}
