//! Template Registry (C3): `(source_vmid, node) -> replica_vmid`, backed by
//! one table of the shared [`crate::Store`].

use std::sync::Arc;

use redb::Database;

use crate::error::{Error, Result};
use crate::model::TemplateRegistryEntry;
use crate::store::TABLE_TEMPLATES;

/// Read/write facade over the templates table.
///
/// This is the single source of truth for template placement decisions
/// (spec.md §4.3); callers must still `verify_on_node` through the
/// hypervisor client before trusting a looked-up replica — this store
/// records what was last known to be true, not what is true now.
pub struct TemplateRegistry {
    db: Arc<Database>,
}

impl TemplateRegistry {
    pub(crate) fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn get_entry(&self, source_vmid: &str) -> Result<Option<TemplateRegistryEntry>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(TABLE_TEMPLATES)?;
        match table.get(source_vmid)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes.value())?)),
            None => Ok(None),
        }
    }

    fn put_entry(&self, source_vmid: &str, entry: &TemplateRegistryEntry) -> Result<()> {
        let encoded = serde_json::to_vec(entry)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(TABLE_TEMPLATES)?;
            table.insert(source_vmid, encoded.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// `lookup(source_vmid, target_node) -> replica_vmid?`
    pub fn lookup(&self, source_vmid: u32, target_node: &str) -> Result<Option<u32>> {
        let key = source_vmid.to_string();
        Ok(self
            .get_entry(&key)?
            .and_then(|entry| entry.replicas.get(target_node).copied()))
    }

    /// `source_of(source_vmid) -> node?`
    pub fn source_of(&self, source_vmid: u32) -> Result<Option<String>> {
        let key = source_vmid.to_string();
        Ok(self.get_entry(&key)?.map(|entry| entry.source_node))
    }

    /// `register(source_vmid, source_node)` — records the home node for a
    /// template if it is not already known; idempotent.
    pub fn register(&self, source_vmid: u32, source_node: &str) -> Result<()> {
        let key = source_vmid.to_string();
        if self.get_entry(&key)?.is_some() {
            return Ok(());
        }
        self.put_entry(&key, &TemplateRegistryEntry::new(source_node))
    }

    /// `register_replica(source_vmid, source_node, target_node, replica_vmid)`
    pub fn register_replica(
        &self,
        source_vmid: u32,
        source_node: &str,
        target_node: &str,
        replica_vmid: u32,
    ) -> Result<()> {
        let key = source_vmid.to_string();
        let mut entry = self
            .get_entry(&key)?
            .unwrap_or_else(|| TemplateRegistryEntry::new(source_node));
        entry
            .replicas
            .insert(target_node.to_string(), replica_vmid);
        self.put_entry(&key, &entry)
    }

    /// `forget_replica(source_vmid, target_node)` — drops a stale entry
    /// discovered at verify time (spec.md §4.3, §4.4 step 3).
    pub fn forget_replica(&self, source_vmid: u32, target_node: &str) -> Result<()> {
        let key = source_vmid.to_string();
        let Some(mut entry) = self.get_entry(&key)? else {
            return Ok(());
        };
        entry.replicas.remove(target_node);
        self.put_entry(&key, &entry)
    }

    /// All `(source_vmid, source_node)` pairs currently registered, used by
    /// the CLI to report registry contents.
    pub fn list_sources(&self) -> Result<Vec<(u32, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(TABLE_TEMPLATES)?;
        let mut out = Vec::new();
        for row in table.iter()? {
            let (key, value) = row?;
            let vmid: u32 = key
                .value()
                .parse()
                .map_err(|_| Error::NoSuchTemplate(key.value().to_string()))?;
            let entry: TemplateRegistryEntry = serde_json::from_slice(value.value())?;
            out.push((vmid, entry.source_node));
        }
        Ok(out)
    }
}
