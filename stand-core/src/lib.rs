//! Bridge planner (C5), template synchronizer (C4), deployment engine (C6),
//! distributor (C7), and teardown engine (C8) — the engineering substance
//! of spec.md §2's component table, grounded on the teacher's
//! `mvirt-node::reconciler` module shape (one file per resource kind).

pub mod bridge;
pub mod deploy;
pub mod distribute;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod nic;
pub mod status;
pub mod teardown;
pub mod template;

pub use error::{Error, Result};
