//! The Rust rendering of spec.md §7's error Kinds, unified across
//! `pve-client` and `stand-registry` per SPEC_FULL.md §7: a flat
//! `thiserror` enum, one variant per failure kind, following the teacher's
//! `mvirt-api::store::error::StoreError` split between library crates
//! (`thiserror`) and binaries (`anyhow`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Hypervisor(#[from] pve_client::Error),

    #[error(transparent)]
    Registry(#[from] stand_registry::Error),

    #[error(transparent)]
    Audit(#[from] stand_audit::Error),

    /// The stand spec or another input was malformed (spec.md §7).
    #[error("validation error: {0}")]
    Validation(String),

    /// The `[1000, 1999]` bridge-number space is exhausted on a node
    /// (spec.md §8 boundary behavior).
    #[error("bridge number space [1000, 1999] exhausted on node {node}")]
    BridgeExhausted { node: String },

    /// User or pool does not exist where the operation requires it
    /// (spec.md §4.8 step 1).
    #[error("{0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;
