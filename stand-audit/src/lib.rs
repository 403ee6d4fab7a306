//! Local, file-backed audit trail for stand-core and stand-cli.
//!
//! Not a spec.md module — spec.md §1 names "logging setup" an external
//! collaborator. This crate renders that ambient concern in the teacher's
//! idiom (`mvirt-log`) rather than leaving it as bare `tracing` calls: every
//! resource created/failed/finalized gets a queryable record an operator can
//! later pull up by user id or group name.

mod error;
mod logger;
mod model;

pub use error::{Error, Result};
pub use logger::AuditLogger;
pub use model::{LogEntry, LogLevel};
