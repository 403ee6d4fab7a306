//! File-backed Template Registry (C3) and Group Index (C9).
//!
//! Both live in one `redb::Database` (see [`Store`]), mirroring the
//! teacher's `mvirt-log::storage::LogManager` convention of a single
//! persistent handle per process rather than one file per table.

mod error;
mod groups;
mod model;
mod registry;
mod store;

pub use error::{Error, Result};
pub use groups::GroupIndex;
pub use model::{DeploymentGroup, TemplateRegistryEntry};
pub use registry::TemplateRegistry;
pub use store::Store;
