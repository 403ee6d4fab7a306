//! Integration-shaped tests against spec.md §8's concrete scenarios,
//! exercising stand-core against the in-memory fake hypervisor rather than
//! a real Proxmox cluster.

mod support;

use pve_client::{CloneMode, HypervisorApi};
use stand_audit::AuditLogger;
use stand_core::deploy::DeploymentEngine;
use stand_core::distribute::Distributor;
use stand_core::model::{DeviceType, Machine, NicBinding, Stand};
use stand_core::teardown::TeardownEngine;
use stand_core::template;
use stand_core::Error;
use stand_registry::Store;
use support::FakeHypervisor;

fn harness() -> (tempfile::TempDir, Store, AuditLogger) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("registry.redb")).unwrap();
    let audit = AuditLogger::open(dir.path().join("audit.redb"), "test").unwrap();
    (dir, store, audit)
}

/// S1: synchronize a single template across a two-node cluster.
#[tokio::test]
async fn s1_sync_single_template_two_node_cluster() {
    let (_dir, store, audit) = harness();
    let registry = store.templates();
    let hv = FakeHypervisor::new(&["pve1", "pve2"]);
    hv.seed_template(100, "pve1", "tpl-base");

    let groups = vec![(100u32, "pve1".to_string())];
    let targets = vec!["pve1".to_string(), "pve2".to_string()];
    let report = template::sync_templates(&hv, &registry, &audit, &groups, &targets)
        .await
        .unwrap();

    assert!(report.failures.is_empty());
    assert_eq!(report.created, vec![(100, "pve2".to_string())]);

    let replica = registry.lookup(100, "pve2").unwrap().unwrap();
    assert!(hv.vm_exists(replica));
    assert_eq!(hv.vm_node(replica), "pve2");

    // Re-running with no changes produces no new clones.
    let second = template::sync_templates(&hv, &registry, &audit, &groups, &targets)
        .await
        .unwrap();
    assert!(second.no_changes());
}

/// S2: deploy one user, one linux machine, VLAN-mixed alias.
#[tokio::test]
async fn s2_deploy_linux_machine_with_mixed_vlan_alias() {
    let (_dir, store, audit) = harness();
    let registry = store.templates();
    let groups = store.groups();
    let hv = FakeHypervisor::new(&["pve1", "pve2"]);
    hv.seed_template(100, "pve1", "tpl-base");
    for n in 0..1000 {
        hv.create_bridge("pve1", &format!("vmbr{n}"), false).await.unwrap();
    }

    let stand = Stand {
        machines: vec![Machine {
            name: "m1".into(),
            device_type: DeviceType::Linux,
            template_vmid: 100,
            template_node: "pve1".into(),
            networks: vec![
                NicBinding::Symbolic {
                    alias: "lan".into(),
                    vlan: None,
                },
                NicBinding::Symbolic {
                    alias: "lan".into(),
                    vlan: Some(200),
                },
            ],
        }],
    };

    let engine = DeploymentEngine::new(&hv, &registry, &groups, &audit);
    let outcome = engine
        .deploy(
            &stand,
            "lab1_stand",
            &["alice".to_string()],
            "cohort1_list",
            "lab1-cohort1",
            "pve1",
            CloneMode::Full,
        )
        .await;

    assert!(outcome.failures.is_empty(), "{:?}", outcome.failures);
    let result = &outcome.successes[0];
    assert_eq!(result.user, "alice@pve");
    assert_eq!(result.generated_password.len(), 8);

    let bridges = hv.bridges_on("pve1");
    let lan_bridge = bridges
        .iter()
        .find(|(iface, _)| iface == "vmbr1000")
        .expect("vmbr1000 created");
    assert!(lan_bridge.1, "vmbr1000 must be vlan-aware");

    assert!(hv.pool_exists("alice"));
    assert!(hv.user_exists("alice@pve"));
    assert!(hv.acl_has("/pool/alice", "alice@pve", "PVEVMUser"));

    let group = groups.get("lab1-cohort1").unwrap().unwrap();
    assert_eq!(group.members, vec!["alice@pve".to_string()]);
}

/// S3: ecorouter machine reserves net0 and offsets declared NICs.
#[tokio::test]
async fn s3_ecorouter_reserved_management_nic() {
    let (_dir, store, audit) = harness();
    let registry = store.templates();
    let groups = store.groups();
    let hv = FakeHypervisor::new(&["pve1"]);
    hv.seed_template(200, "pve1", "tpl-router");
    hv.create_bridge("pve1", "vmbr0", false).await.unwrap();

    let stand = Stand {
        machines: vec![Machine {
            name: "r1".into(),
            device_type: DeviceType::EcoRouter,
            template_vmid: 200,
            template_node: "pve1".into(),
            networks: vec![
                NicBinding::Symbolic {
                    alias: "lan".into(),
                    vlan: None,
                },
                NicBinding::Symbolic {
                    alias: "wan".into(),
                    vlan: Some(10),
                },
            ],
        }],
    };

    let engine = DeploymentEngine::new(&hv, &registry, &groups, &audit);
    let outcome = engine
        .deploy(
            &stand,
            "lab2_stand",
            &["bob".to_string()],
            "cohort1_list",
            "lab2-cohort1",
            "pve1",
            CloneMode::Full,
        )
        .await;
    assert!(outcome.failures.is_empty(), "{:?}", outcome.failures);
    assert!(hv.pool_exists("bob"));

    let bridges = hv.bridges_on("pve1");
    assert!(bridges.iter().any(|(n, aware)| n == "vmbr1000" && !*aware));
    assert!(bridges.iter().any(|(n, aware)| n == "vmbr1001" && *aware));
}

/// S5: teardown with one running VM among a user's two VMs.
#[tokio::test]
async fn s5_teardown_with_running_vm() {
    let (_dir, store, audit) = harness();
    let registry = store.templates();
    let groups = store.groups();
    let hv = FakeHypervisor::new(&["pve1"]);
    hv.seed_template(100, "pve1", "tpl-base");
    hv.create_bridge("pve1", "vmbr0", false).await.unwrap();

    let stand = Stand {
        machines: vec![
            Machine {
                name: "m1".into(),
                device_type: DeviceType::Linux,
                template_vmid: 100,
                template_node: "pve1".into(),
                networks: vec![NicBinding::Symbolic {
                    alias: "lan".into(),
                    vlan: None,
                }],
            },
            Machine {
                name: "m2".into(),
                device_type: DeviceType::Linux,
                template_vmid: 100,
                template_node: "pve1".into(),
                networks: vec![NicBinding::Symbolic {
                    alias: "lan".into(),
                    vlan: None,
                }],
            },
        ],
    };

    let engine = DeploymentEngine::new(&hv, &registry, &groups, &audit);
    let outcome = engine
        .deploy(
            &stand,
            "lab1_stand",
            &["alice".to_string()],
            "cohort1_list",
            "lab1-cohort1",
            "pve1",
            CloneMode::Full,
        )
        .await;
    assert!(outcome.failures.is_empty(), "{:?}", outcome.failures);

    let pool = hv.pool_exists("alice");
    assert!(pool);

    // Mark one of alice's VMs as running.
    let pve_pool = pool_members(&hv);
    hv.set_status(pve_pool[0], "running");

    let teardown = TeardownEngine::new(&hv, &groups, &audit);
    let report = teardown.teardown("alice@pve").await.unwrap();
    assert!(report.stop_timeouts.is_empty());
    assert!(report.vm_delete_failures.is_empty());

    assert!(!hv.pool_exists("alice"));
    assert!(!hv.user_exists("alice@pve"));
    assert!(groups.get("lab1-cohort1").unwrap().is_none());
    let bridges = hv.bridges_on("pve1");
    assert!(bridges.iter().any(|(n, _)| n == "vmbr0"), "vmbr0 must survive");
    assert!(!bridges.iter().any(|(n, _)| n == "vmbr1000"), "user bridge must be gone");
}

fn pool_members(hv: &FakeHypervisor) -> Vec<u32> {
    (1001..1010).filter(|vmid| hv.vm_exists(*vmid)).collect()
}

/// S4: three users round-robin across two nodes; template sync runs once
/// up front, covering the target node the stand's template isn't native to.
#[tokio::test]
async fn s4_distributed_three_users_two_nodes() {
    let (_dir, store, audit) = harness();
    let registry = store.templates();
    let groups = store.groups();
    let hv = FakeHypervisor::new(&["pve1", "pve2"]);
    hv.seed_template(100, "pve1", "tpl-base");

    let stand = Stand {
        machines: vec![Machine {
            name: "m1".into(),
            device_type: DeviceType::Linux,
            template_vmid: 100,
            template_node: "pve1".into(),
            networks: vec![NicBinding::Symbolic {
                alias: "lan".into(),
                vlan: None,
            }],
        }],
    };

    let users = vec!["u1".to_string(), "u2".to_string(), "u3".to_string()];
    let nodes = vec!["pve1".to_string(), "pve2".to_string()];

    let distributor = Distributor::new(&hv, &registry, &groups, &audit);
    let (sync_report, outcome) = distributor
        .distribute(&stand, "lab1_stand", &users, "cohort1_list", "lab1-cohort1", &nodes, CloneMode::Full)
        .await
        .unwrap();

    assert!(outcome.failures.is_empty(), "{:?}", outcome.failures);
    assert_eq!(sync_report.created, vec![(100, "pve2".to_string())]);

    let by_user: std::collections::HashMap<_, _> = outcome
        .successes
        .iter()
        .map(|r| (r.user.clone(), r.node.clone()))
        .collect();
    assert_eq!(by_user["u1@pve"], "pve1");
    assert_eq!(by_user["u2@pve"], "pve2");
    assert_eq!(by_user["u3@pve"], "pve1");

    let group = groups.get("lab1-cohort1").unwrap().unwrap();
    assert_eq!(group.members.len(), 3);
}

/// Boundary: the distributor refuses a single-node cluster outright rather
/// than silently falling back to local deployment.
#[tokio::test]
async fn distributor_refuses_single_node_cluster() {
    let (_dir, store, audit) = harness();
    let registry = store.templates();
    let groups = store.groups();
    let hv = FakeHypervisor::new(&["pve1"]);
    let stand = Stand { machines: vec![] };

    let distributor = Distributor::new(&hv, &registry, &groups, &audit);
    let err = distributor
        .distribute(
            &stand,
            "lab1_stand",
            &["u1".to_string()],
            "cohort1_list",
            "lab1-cohort1",
            &["pve1".to_string()],
            CloneMode::Full,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

/// Boundary: a stand with zero machines still creates the user/pool/ACL
/// scaffolding, and teardown cleans it back up.
#[tokio::test]
async fn zero_machine_stand_deploy_and_teardown_round_trip() {
    let (_dir, store, audit) = harness();
    let registry = store.templates();
    let groups = store.groups();
    let hv = FakeHypervisor::new(&["pve1"]);
    let stand = Stand { machines: vec![] };

    let engine = DeploymentEngine::new(&hv, &registry, &groups, &audit);
    let outcome = engine
        .deploy(
            &stand,
            "empty_stand",
            &["carol".to_string()],
            "cohort1_list",
            "empty-cohort1",
            "pve1",
            CloneMode::Full,
        )
        .await;
    assert!(outcome.failures.is_empty(), "{:?}", outcome.failures);
    assert!(hv.pool_exists("carol"));
    assert!(hv.user_exists("carol@pve"));

    let teardown = TeardownEngine::new(&hv, &groups, &audit);
    teardown.teardown("carol@pve").await.unwrap();
    assert!(!hv.pool_exists("carol"));
    assert!(!hv.user_exists("carol@pve"));
    assert!(groups.get("empty-cohort1").unwrap().is_none());
}

/// Round-trip property: tearing down the same user twice succeeds once and
/// then reports `NotFound` without mutating state further.
#[tokio::test]
async fn teardown_twice_reports_not_found_second_time() {
    let (_dir, store, audit) = harness();
    let registry = store.templates();
    let groups = store.groups();
    let hv = FakeHypervisor::new(&["pve1"]);
    let stand = Stand { machines: vec![] };

    let engine = DeploymentEngine::new(&hv, &registry, &groups, &audit);
    engine
        .deploy(
            &stand,
            "empty_stand",
            &["dave".to_string()],
            "cohort1_list",
            "empty-cohort1",
            "pve1",
            CloneMode::Full,
        )
        .await;

    let teardown = TeardownEngine::new(&hv, &groups, &audit);
    teardown.teardown("dave@pve").await.unwrap();

    let second = teardown.teardown("dave@pve").await.unwrap_err();
    assert!(matches!(second, Error::NotFound(_)));
}

/// S6: a stale registry entry is discovered and replaced.
#[tokio::test]
async fn s6_stale_registry_recovery() {
    let (_dir, store, audit) = harness();
    let registry = store.templates();
    let hv = FakeHypervisor::new(&["pve1", "pve2"]);
    hv.seed_template(100, "pve1", "tpl-base");
    // A VM that exists but without the template flag: stale entry.
    hv.clone("pve1", 100, 500, "stale", CloneMode::Full, None)
        .await
        .unwrap();
    registry.register_replica(100, "pve1", "pve2", 500).unwrap();

    let groups = vec![(100u32, "pve1".to_string())];
    let targets = vec!["pve1".to_string(), "pve2".to_string()];
    let report = template::sync_templates(&hv, &registry, &audit, &groups, &targets)
        .await
        .unwrap();

    assert!(report.failures.is_empty());
    let new_replica = registry.lookup(100, "pve2").unwrap().unwrap();
    assert_ne!(new_replica, 500);
    assert!(hv.vm_exists(new_replica));
}
