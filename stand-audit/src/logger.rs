//! Append-only audit trail, grounded on `mvirt_log::storage::LogManager`'s
//! table layout (a primary log table plus a secondary index by related
//! object id), swapping `prost`-encoded entries for `serde_json` ones since
//! this store has no gRPC wire format to share with any peer.

use chrono::Utc;
use redb::{Database, TableDefinition};
use std::path::Path;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::error::Result;
use crate::model::{LogEntry, LogLevel};

const TABLE_LOGS: TableDefinition<u128, &[u8]> = TableDefinition::new("logs");
const TABLE_IDX_OBJECT: TableDefinition<(&str, u128), ()> = TableDefinition::new("idx_object");

pub struct AuditLogger {
    db: Database,
    component: String,
}

impl AuditLogger {
    pub fn open(path: impl AsRef<Path>, component: impl Into<String>) -> Result<Self> {
        let db = Database::create(path.as_ref())?;
        let txn = db.begin_write()?;
        {
            txn.open_table(TABLE_LOGS)?;
            txn.open_table(TABLE_IDX_OBJECT)?;
        }
        txn.commit()?;
        Ok(Self {
            db,
            component: component.into(),
        })
    }

    /// Appends one entry and mirrors it to `tracing` so an operator
    /// watching stderr sees the same event live.
    pub fn log(&self, level: LogLevel, message: impl Into<String>, related_ids: Vec<String>) -> Result<()> {
        let message = message.into();
        let entry = LogEntry {
            id: Ulid::new(),
            ts: Utc::now(),
            level,
            component: self.component.clone(),
            message,
            related_ids,
        };

        match entry.level {
            LogLevel::Error => tracing::error!(target: "audit", component = %entry.component, objects = ?entry.related_ids, "{}", entry.message),
            LogLevel::Warn => tracing::warn!(target: "audit", component = %entry.component, objects = ?entry.related_ids, "{}", entry.message),
            LogLevel::Info | LogLevel::Audit => tracing::info!(target: "audit", component = %entry.component, objects = ?entry.related_ids, "{}", entry.message),
        }

        let encoded = serde_json::to_vec(&entry)?;
        let key = entry.id.0;
        let txn = self.db.begin_write()?;
        {
            let mut logs = txn.open_table(TABLE_LOGS)?;
            let mut idx = txn.open_table(TABLE_IDX_OBJECT)?;
            logs.insert(key, encoded.as_slice())?;
            for related in &entry.related_ids {
                idx.insert((related.as_str(), key), ())?;
            }
        }
        txn.commit()?;
        debug!(id = %entry.id, "audit entry appended");
        Ok(())
    }

    /// Entries mentioning `object_id`, oldest first — used by `group show`
    /// to explain a historical failure (SPEC_FULL.md §7).
    pub fn for_object(&self, object_id: &str) -> Result<Vec<LogEntry>> {
        let txn = self.db.begin_read()?;
        let logs = txn.open_table(TABLE_LOGS)?;
        let idx = txn.open_table(TABLE_IDX_OBJECT)?;
        let mut out = Vec::new();
        let start = (object_id, u128::MIN);
        let end = (object_id, u128::MAX);
        for row in idx.range(start..=end)? {
            let (key, _) = row?;
            let (_, log_key) = key.value();
            if let Some(bytes) = logs.get(log_key)? {
                out.push(serde_json::from_slice(bytes.value())?);
            }
        }
        Ok(out)
    }

    /// All entries, oldest first. Used for `group show`'s plain activity feed.
    pub fn recent(&self, limit: usize) -> Result<Vec<LogEntry>> {
        let txn = self.db.begin_read()?;
        let logs = txn.open_table(TABLE_LOGS)?;
        let mut out = Vec::new();
        for row in logs.iter()?.rev() {
            let (_, bytes) = row?;
            out.push(serde_json::from_slice::<LogEntry>(bytes.value())?);
            if out.len() >= limit {
                break;
            }
        }
        out.reverse();
        Ok(out)
    }
}
