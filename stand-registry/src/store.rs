//! Single `redb::Database` backing both the Template Registry (C3) and the
//! Group Index (C9) — grounded on `mvirt-log::storage::LogManager`, which
//! opens one `redb::Database` at startup and keeps table handles as
//! `TableDefinition` constants rather than re-opening per call.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, TableDefinition};

use crate::error::Result;
use crate::groups::GroupIndex;
use crate::registry::TemplateRegistry;

pub(crate) const TABLE_TEMPLATES: TableDefinition<&str, &[u8]> = TableDefinition::new("templates");
pub(crate) const TABLE_GROUPS: TableDefinition<&str, &[u8]> = TableDefinition::new("groups");

/// Opens the on-disk store and hands out the two facades that share it.
///
/// Both facades hold an `Arc<Database>` clone; redb itself admits only one
/// write transaction at a time, so this is the single-writer invariant
/// spec.md §4.3 and §5 ask for without any additional locking here.
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path.as_ref())?;
        let txn = db.begin_write()?;
        {
            txn.open_table(TABLE_TEMPLATES)?;
            txn.open_table(TABLE_GROUPS)?;
        }
        txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn templates(&self) -> TemplateRegistry {
        TemplateRegistry::new(self.db.clone())
    }

    pub fn groups(&self) -> GroupIndex {
        GroupIndex::new(self.db.clone())
    }
}
