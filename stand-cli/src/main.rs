//! Command-line surface over stand-core: connection catalog, user lists,
//! stand specs, and the deploy/teardown/lifecycle subcommands
//! (SPEC_FULL.md §6), in the shape of the teacher's `mvirt-cli::main`
//! (a `clap` derive `Cli`/`Commands` pair dispatched from `#[tokio::main]`).

mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pve_client::{Auth, CloneMode, ConnectionProfile, HypervisorApi, PveClient};
use stand_audit::AuditLogger;
use stand_core::deploy::DeploymentEngine;
use stand_core::distribute::Distributor;
use stand_core::model::{group_name, normalize_userid, Stand, UserList};
use stand_core::teardown::TeardownEngine;
use stand_core::{lifecycle, status};
use stand_registry::{GroupIndex, Store, TemplateRegistry};
use tabled::{Table, Tabled};
use tracing_subscriber::EnvFilter;

use config::{ConnectionCatalog, Paths};

#[derive(Parser)]
#[command(name = "stand")]
#[command(about = "Deploy, tear down, and manage classroom VM stands on a Proxmox VE cluster")]
struct Cli {
    /// Override the default config directory (~/.config/stand).
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Override the default data directory (~/.local/share/stand).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage saved cluster connections.
    Connection {
        #[command(subcommand)]
        action: ConnectionAction,
    },
    /// Manage named lists of students.
    Userlist {
        #[command(subcommand)]
        action: UserlistAction,
    },
    /// Manage stand topologies and run deployments against them.
    Stand {
        #[command(subcommand)]
        action: StandAction,
    },
    /// Inspect deployment groups.
    Group {
        #[command(subcommand)]
        action: GroupAction,
    },
}

#[derive(Subcommand)]
enum ConnectionAction {
    /// Add or replace a connection profile.
    Add {
        name: String,
        #[arg(long)]
        host: String,
        #[arg(long, default_value_t = 8006)]
        port: u16,
        /// `user@realm` for password auth (prompts for the password).
        #[arg(long, conflicts_with_all = ["token_user", "token_id", "token_secret"])]
        user: Option<String>,
        #[arg(long, requires_all = ["token_id", "token_secret"])]
        token_user: Option<String>,
        #[arg(long)]
        token_id: Option<String>,
        #[arg(long)]
        token_secret: Option<String>,
        #[arg(long)]
        verify_tls: bool,
        /// Make this the default connection for future commands.
        #[arg(long)]
        make_default: bool,
    },
    /// List saved connections.
    List,
    /// Remove a saved connection.
    Remove { name: String },
    /// Select the default connection.
    Use { name: String },
}

#[derive(Subcommand)]
enum UserlistAction {
    /// Create or overwrite a user list.
    Add {
        name: String,
        /// Student logins, realm-less entries default to `@pve`.
        #[arg(required = true)]
        users: Vec<String>,
    },
    Show { name: String },
    Remove { name: String },
    /// List all saved user lists.
    #[command(name = "ls")]
    List,
}

#[derive(Subcommand)]
enum StandAction {
    /// Load a stand topology from a YAML file.
    Add { name: String, file: PathBuf },
    Show { name: String },
    Remove { name: String },
    /// List all saved stand topologies.
    #[command(name = "ls")]
    List,
    /// Deploy a stand topology to every user in a user list.
    Deploy {
        stand: String,
        userlist: String,
        #[arg(long)]
        connection: Option<String>,
        /// Deploy every user on this single node.
        #[arg(long, conflicts_with = "distributed")]
        node: Option<String>,
        /// Round-robin deployment across every cluster node (spec.md §4.7).
        #[arg(long)]
        distributed: bool,
        #[arg(long, default_value_t = 1)]
        workers: usize,
        #[arg(long, value_enum, default_value = "full")]
        mode: CloneModeArg,
    },
    /// Start every VM belonging to a deployment group.
    Start {
        group: String,
        #[arg(long)]
        connection: Option<String>,
    },
    /// Stop every VM belonging to a deployment group.
    Stop {
        group: String,
        #[arg(long)]
        connection: Option<String>,
    },
    /// Roll every VM in a deployment group back to its baseline snapshot.
    Rollback {
        group: String,
        #[arg(long)]
        connection: Option<String>,
    },
    /// Remove one user's VMs, pool, account, and dedicated bridges.
    Teardown {
        login: String,
        #[arg(long)]
        connection: Option<String>,
        /// Skip the interactive confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum GroupAction {
    #[command(name = "ls")]
    List,
    /// Show a group's membership and, if a connection is given, each
    /// member's live VM status (spec.md §6: status query under `group show`).
    Show {
        name: String,
        #[arg(long)]
        connection: Option<String>,
    },
}

#[derive(Copy, Clone, clap::ValueEnum)]
enum CloneModeArg {
    Full,
    Linked,
}

impl From<CloneModeArg> for CloneMode {
    fn from(mode: CloneModeArg) -> Self {
        match mode {
            CloneModeArg::Full => CloneMode::Full,
            CloneModeArg::Linked => CloneMode::Linked,
        }
    }
}

#[derive(Tabled)]
struct DeployRow {
    #[tabled(rename = "USER")]
    user: String,
    #[tabled(rename = "PASSWORD")]
    password: String,
    #[tabled(rename = "NODE")]
    node: String,
}

#[derive(Tabled)]
struct VmRow {
    #[tabled(rename = "USER")]
    user: String,
    #[tabled(rename = "NODE")]
    node: String,
    #[tabled(rename = "VMID")]
    vmid: u32,
    #[tabled(rename = "STATUS")]
    status: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(Outcome::Ok) => ExitCode::from(0),
        Ok(Outcome::PartialFailure) => ExitCode::from(2),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

enum Outcome {
    Ok,
    PartialFailure,
}

async fn run(cli: Cli) -> Result<Outcome> {
    let paths = Paths::resolve(cli.config_dir, cli.data_dir);

    match cli.command {
        Commands::Connection { action } => run_connection(&paths, action),
        Commands::Userlist { action } => run_userlist(&paths, action),
        Commands::Stand { action } => run_stand(&paths, action).await,
        Commands::Group { action } => run_group(&paths, action).await,
    }
}

fn run_connection(paths: &Paths, action: ConnectionAction) -> Result<Outcome> {
    let mut catalog = ConnectionCatalog::load(paths)?;
    match action {
        ConnectionAction::Add {
            name,
            host,
            port,
            user,
            token_user,
            token_id,
            token_secret,
            verify_tls,
            make_default,
        } => {
            let auth = if let Some(user) = user {
                let password = dialoguer::Password::new()
                    .with_prompt(format!("password for {user}"))
                    .interact()
                    .context("reading password")?;
                Auth::Password { user, password }
            } else if let (Some(user), Some(token_id), Some(secret)) = (token_user, token_id, token_secret) {
                Auth::Token {
                    user,
                    token_id,
                    secret,
                }
            } else {
                bail!("either --user (password auth) or --token-user/--token-id/--token-secret must be given");
            };

            let profile = ConnectionProfile {
                name: name.clone(),
                host,
                port,
                auth,
                verify_tls,
            };
            catalog.connections.retain(|c| c.name != name);
            catalog.connections.push(profile);
            if make_default || catalog.default.is_none() {
                catalog.default = Some(name.clone());
            }
            catalog.save(paths)?;
            println!("saved connection {name}");
            Ok(Outcome::Ok)
        }
        ConnectionAction::List => {
            for conn in &catalog.connections {
                let marker = if catalog.default.as_deref() == Some(conn.name.as_str())
                {
                    "*"
                } else {
                    " "
                };
                println!("{marker} {} ({}:{})", conn.name, conn.host, conn.port);
            }
            Ok(Outcome::Ok)
        }
        ConnectionAction::Remove { name } => {
            catalog.connections.retain(|c| c.name != name);
            if catalog.default.as_deref() == Some(name.as_str()) {
                catalog.default = None;
            }
            catalog.save(paths)?;
            println!("removed connection {name}");
            Ok(Outcome::Ok)
        }
        ConnectionAction::Use { name } => {
            if catalog.find(&name).is_none() {
                bail!("no such connection: {name}");
            }
            catalog.default = Some(name.clone());
            catalog.save(paths)?;
            println!("default connection is now {name}");
            Ok(Outcome::Ok)
        }
    }
}

fn run_userlist(paths: &Paths, action: UserlistAction) -> Result<Outcome> {
    match action {
        UserlistAction::Add { name, users } => {
            let users: Vec<String> = users.iter().map(|u| normalize_userid(u)).collect();
            let list = UserList {
                name: name.clone(),
                users,
            };
            config::save_user_list(paths, &list)?;
            println!("saved user list {name} ({} users)", list.users.len());
            Ok(Outcome::Ok)
        }
        UserlistAction::Show { name } => {
            let list = config::load_user_list(paths, &name)?;
            for user in &list.users {
                println!("{user}");
            }
            Ok(Outcome::Ok)
        }
        UserlistAction::Remove { name } => {
            config::remove_user_list(paths, &name)?;
            println!("removed user list {name}");
            Ok(Outcome::Ok)
        }
        UserlistAction::List => {
            for name in config::list_user_lists(paths)? {
                println!("{name}");
            }
            Ok(Outcome::Ok)
        }
    }
}

async fn run_stand(paths: &Paths, action: StandAction) -> Result<Outcome> {
    match action {
        StandAction::Add { name, file } => {
            let raw = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let stand: Stand = serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", file.display()))?;
            config::save_stand(paths, &name, &stand)?;
            println!("saved stand {name} ({} machines)", stand.machines.len());
            Ok(Outcome::Ok)
        }
        StandAction::Show { name } => {
            let stand = config::load_stand(paths, &name)?;
            println!("{}", serde_yaml::to_string(&stand)?);
            Ok(Outcome::Ok)
        }
        StandAction::Remove { name } => {
            config::remove_stand(paths, &name)?;
            println!("removed stand {name}");
            Ok(Outcome::Ok)
        }
        StandAction::List => {
            for name in config::list_stands(paths)? {
                println!("{name}");
            }
            Ok(Outcome::Ok)
        }
        StandAction::Deploy {
            stand,
            userlist,
            connection,
            node,
            distributed,
            workers,
            mode,
        } => deploy(paths, &stand, &userlist, connection.as_deref(), node, distributed, workers, mode.into()).await,
        StandAction::Start { group, connection } => {
            lifecycle_command(paths, &group, connection.as_deref(), LifecycleOp::Start).await
        }
        StandAction::Stop { group, connection } => {
            lifecycle_command(paths, &group, connection.as_deref(), LifecycleOp::Stop).await
        }
        StandAction::Rollback { group, connection } => {
            lifecycle_command(paths, &group, connection.as_deref(), LifecycleOp::Rollback).await
        }
        StandAction::Teardown {
            login,
            connection,
            yes,
        } => teardown(paths, &login, connection.as_deref(), yes).await,
    }
}

async fn run_group(paths: &Paths, action: GroupAction) -> Result<Outcome> {
    let store = Store::open(paths.registry_db())?;
    let groups = store.groups();
    match action {
        GroupAction::List => {
            for (name, group) in groups.list()? {
                println!("{name}: {} members ({}/{})", group.members.len(), group.stand_id, group.user_list_id);
            }
            Ok(Outcome::Ok)
        }
        GroupAction::Show { name, connection } => {
            let Some(group) = groups.get(&name)? else {
                bail!("no such group: {name}");
            };
            println!("stand:     {}", group.stand_id);
            println!("userlist:  {}", group.user_list_id);
            println!("created:   {}", group.created_at);
            println!("members:");
            for member in &group.members {
                println!("  {member}");
            }

            let audit = AuditLogger::open(paths.audit_db(), "stand-cli")?;
            let mut history = Vec::new();
            for member in &group.members {
                history.extend(audit.for_object(member)?);
            }
            if !history.is_empty() {
                history.sort_by_key(|entry| entry.ts);
                println!("\nhistory:");
                for entry in &history {
                    println!("  [{}] {:?} {}", entry.ts, entry.level, entry.message);
                }
            }

            let recent = audit.recent(10)?;
            if !recent.is_empty() {
                println!("\nrecent activity:");
                for entry in &recent {
                    println!("  [{}] {:?} {}", entry.ts, entry.level, entry.message);
                }
            }

            if let Ok(client) = open_client(paths, connection.as_deref()) {
                let group_status = status::group_status(&client, &name, &group).await?;
                let mut rows = Vec::new();
                for member in &group_status.members {
                    for vm in &member.vms {
                        rows.push(VmRow {
                            user: member.user.clone(),
                            node: vm.node.clone(),
                            vmid: vm.vmid,
                            status: vm.status.clone(),
                        });
                    }
                }
                if !rows.is_empty() {
                    println!("\nVM status:");
                    println!("{}", Table::new(rows));
                }
            }
            Ok(Outcome::Ok)
        }
    }
}

fn open_client(paths: &Paths, requested: Option<&str>) -> Result<PveClient> {
    let catalog = ConnectionCatalog::load(paths)?;
    let profile = catalog.resolve_active(requested)?;
    PveClient::new(profile.clone()).context("building PVE client")
}

fn open_registry(paths: &Paths) -> Result<(TemplateRegistry, GroupIndex, AuditLogger)> {
    let store = Store::open(paths.registry_db())?;
    let audit = AuditLogger::open(paths.audit_db(), "stand-cli")?;
    Ok((store.templates(), store.groups(), audit))
}

#[allow(clippy::too_many_arguments)]
async fn deploy(
    paths: &Paths,
    stand_name: &str,
    userlist_name: &str,
    connection: Option<&str>,
    node: Option<String>,
    distributed: bool,
    workers: usize,
    clone_mode: CloneMode,
) -> Result<Outcome> {
    let stand = config::load_stand(paths, stand_name)?;
    let user_list = config::load_user_list(paths, userlist_name)?;
    let client = open_client(paths, connection)?;
    let (registry, groups, audit) = open_registry(paths)?;
    let group = group_name(stand_name, userlist_name);

    let outcome = if distributed {
        let mut nodes = client.list_nodes().await?;
        nodes.sort();
        let distributor = Distributor::new(&client, &registry, &groups, &audit).with_workers(workers);
        let (sync_report, outcome) = distributor
            .distribute(&stand, stand_name, &user_list.users, userlist_name, &group, &nodes, clone_mode)
            .await?;
        println!(
            "template sync: {} replicas created, {} failures",
            sync_report.created.len(),
            sync_report.failures.len()
        );
        outcome
    } else {
        let target_node = match node {
            Some(n) => n,
            None => {
                let mut nodes = client.list_nodes().await?;
                nodes.sort();
                nodes
                    .into_iter()
                    .next()
                    .context("cluster reports no nodes")?
            }
        };
        let engine = DeploymentEngine::new(&client, &registry, &groups, &audit);
        engine
            .deploy(
                &stand,
                stand_name,
                &user_list.users,
                userlist_name,
                &group,
                &target_node,
                clone_mode,
            )
            .await
    };

    if !outcome.successes.is_empty() {
        let rows: Vec<DeployRow> = outcome
            .successes
            .iter()
            .map(|r| DeployRow {
                user: r.user.clone(),
                password: r.generated_password.clone(),
                node: r.node.clone(),
            })
            .collect();
        println!("{}", Table::new(rows));
    }
    if !outcome.failures.is_empty() {
        println!("failures:");
        for (user, err) in &outcome.failures {
            println!("  {user}: {err}");
        }
    }

    if outcome.is_partial_failure() {
        Ok(Outcome::PartialFailure)
    } else {
        Ok(Outcome::Ok)
    }
}

enum LifecycleOp {
    Start,
    Stop,
    Rollback,
}

async fn lifecycle_command(paths: &Paths, group_name: &str, connection: Option<&str>, op: LifecycleOp) -> Result<Outcome> {
    let client = open_client(paths, connection)?;
    let store = Store::open(paths.registry_db())?;
    let groups = store.groups();
    let Some(group) = groups.get(group_name)? else {
        bail!("no such deployment group: {group_name}");
    };

    let report = match op {
        LifecycleOp::Start => lifecycle::start_all(&client, &group).await?,
        LifecycleOp::Stop => lifecycle::stop_all(&client, &group).await?,
        LifecycleOp::Rollback => lifecycle::rollback_all(&client, &group).await?,
    };

    println!("{} succeeded, {} failed", report.succeeded.len(), report.failed.len());
    for (node, vmid, err) in &report.failed {
        println!("  {node}/{vmid}: {err}");
    }

    if report.failed.is_empty() {
        Ok(Outcome::Ok)
    } else {
        Ok(Outcome::PartialFailure)
    }
}

async fn teardown(paths: &Paths, login: &str, connection: Option<&str>, yes: bool) -> Result<Outcome> {
    let userid = normalize_userid(login);

    if !yes {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!("tear down all VMs, pool, and account for {userid}?"))
            .default(false)
            .interact()
            .context("reading confirmation")?;
        if !confirmed {
            println!("aborted");
            return Ok(Outcome::Ok);
        }
    }

    let client = open_client(paths, connection)?;
    let (_, groups, audit) = open_registry(paths)?;
    let engine = TeardownEngine::new(&client, &groups, &audit);
    let report = engine.teardown(&userid).await?;

    println!(
        "deleted {} bridges, {} stop timeouts, {} VM delete failures",
        report.bridges_deleted.len(),
        report.stop_timeouts.len(),
        report.vm_delete_failures.len()
    );

    let partial = !report.stop_timeouts.is_empty()
        || !report.vm_delete_failures.is_empty()
        || report.pool_delete_failed
        || report.user_delete_failed;

    if partial {
        Ok(Outcome::PartialFailure)
    } else {
        Ok(Outcome::Ok)
    }
}
