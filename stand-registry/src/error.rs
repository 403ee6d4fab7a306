//! Errors surfaced by the template registry and group index stores.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("redb database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("no such template registered for source {0}")]
    NoSuchTemplate(String),

    #[error("no such deployment group {0}")]
    NoSuchGroup(String),
}

pub type Result<T> = std::result::Result<T, Error>;
