//! NIC wiring rules (spec.md §4.6), shared by the deployment engine and its
//! tests — kept separate from `deploy.rs` so the pure string-building logic
//! can be exercised without a fake hypervisor.

use rand::Rng;

use crate::bridge::BridgePlan;
use crate::model::{DeviceType, Machine, NicBinding};

/// `1C:87:76:40:xx:xx` with uniformly random trailing bytes (spec.md §6).
pub fn generate_ecorouter_mac() -> String {
    let mut rng = rand::thread_rng();
    let a: u8 = rng.gen();
    let b: u8 = rng.gen();
    format!("1C:87:76:40:{a:02X}:{b:02X}")
}

fn resolve_bridge(binding: &NicBinding, plan: &BridgePlan) -> Option<String> {
    match binding {
        NicBinding::Static(name) => Some(name.clone()),
        NicBinding::Symbolic { alias, .. } => plan.get(alias).map(|a| a.vmbr_name.clone()),
    }
}

/// Builds the `(net<N>, config string)` pairs for one machine's NICs,
/// applying the linux vs. ecorouter rules of spec.md §4.6. Returns `None`
/// for a symbolic binding whose alias never got a bridge plan entry —
/// the caller logs that as the NIC configuration failure the bridge
/// planner's doc comment warns about.
pub fn build_nic_fields(machine: &Machine, plan: &BridgePlan) -> Vec<(String, Option<String>)> {
    let mut fields = Vec::new();
    let mut next_index = 0usize;

    if machine.device_type == DeviceType::EcoRouter {
        fields.push((
            "net0".to_string(),
            Some(format!(
                "model=vmxnet3,bridge=vmbr0,link_down=1,macaddr={}",
                generate_ecorouter_mac()
            )),
        ));
        next_index = 1;
    }

    for binding in &machine.networks {
        let net_key = format!("net{next_index}");
        next_index += 1;

        let Some(bridge) = resolve_bridge(binding, plan) else {
            fields.push((net_key, None));
            continue;
        };

        let value = match machine.device_type {
            DeviceType::Linux => match binding.vlan() {
                Some(vlan) => format!("model=virtio,bridge={bridge},tag={vlan}"),
                None => format!("model=virtio,bridge={bridge}"),
            },
            DeviceType::EcoRouter => {
                let mac = generate_ecorouter_mac();
                match binding.vlan() {
                    Some(vlan) => format!("model=vmxnet3,bridge={bridge},tag={vlan},macaddr={mac}"),
                    None => format!("model=vmxnet3,bridge={bridge},macaddr={mac}"),
                }
            }
        };
        fields.push((net_key, Some(value)));
    }

    fields
}
