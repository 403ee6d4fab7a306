//! Group Index (C9): deployment-group name -> `(stand, user list, members)`.

use std::sync::Arc;

use chrono::Utc;
use redb::Database;

use crate::error::Result;
use crate::model::DeploymentGroup;
use crate::store::TABLE_GROUPS;

pub struct GroupIndex {
    db: Arc<Database>,
}

impl GroupIndex {
    pub(crate) fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get(&self, group_name: &str) -> Result<Option<DeploymentGroup>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(TABLE_GROUPS)?;
        match table.get(group_name)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes.value())?)),
            None => Ok(None),
        }
    }

    pub fn list(&self) -> Result<Vec<(String, DeploymentGroup)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(TABLE_GROUPS)?;
        let mut out = Vec::new();
        for row in table.iter()? {
            let (key, value) = row?;
            let group: DeploymentGroup = serde_json::from_slice(value.value())?;
            out.push((key.value().to_string(), group));
        }
        Ok(out)
    }

    fn put(&self, group_name: &str, group: &DeploymentGroup) -> Result<()> {
        let encoded = serde_json::to_vec(group)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(TABLE_GROUPS)?;
            table.insert(group_name, encoded.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn delete(&self, group_name: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(TABLE_GROUPS)?;
            table.remove(group_name)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Appends `user` to the group, creating it from `stand_id`/`user_list_id`
    /// if it does not exist yet. Called once per user at the end of a
    /// successful deployment (spec.md §4.6 step 5, §5 "updated only after a
    /// user's final step succeeds").
    pub fn upsert_member(
        &self,
        group_name: &str,
        stand_id: &str,
        user_list_id: &str,
        user: &str,
    ) -> Result<()> {
        let mut group = self.get(group_name)?.unwrap_or_else(|| DeploymentGroup {
            stand_id: stand_id.to_string(),
            user_list_id: user_list_id.to_string(),
            members: Vec::new(),
            created_at: Utc::now(),
        });
        if !group.members.iter().any(|m| m == user) {
            group.members.push(user.to_string());
        }
        self.put(group_name, &group)
    }

    /// Removes `user` from the group; deletes the group entirely once
    /// `members` becomes empty (spec.md §3 Deployment Group invariant).
    pub fn remove_member(&self, group_name: &str, user: &str) -> Result<()> {
        let Some(mut group) = self.get(group_name)? else {
            return Ok(());
        };
        group.members.retain(|m| m != user);
        if group.members.is_empty() {
            self.delete(group_name)
        } else {
            self.put(group_name, &group)
        }
    }
}
