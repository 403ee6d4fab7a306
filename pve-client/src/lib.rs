//! Typed async client for the Proxmox VE REST API.
//!
//! Exposes the hypervisor contract (C1) as the [`HypervisorApi`] trait,
//! implemented by [`PveClient`], plus the asynchronous task poller (C2) via
//! [`HypervisorApi::wait`].

mod api;
mod auth;
mod client;
mod error;
mod task;
mod types;

pub use api::HypervisorApi;
pub use auth::{Auth, ConnectionProfile};
pub use client::PveClient;
pub use error::{Error, Result};
pub use task::{TaskId, TaskKind};
pub use types::{
    CloneMode, NetworkInterface, NodeEntry, PoolInfo, PoolMember, UserEntry, VmEntry, VmStatusInfo,
};
