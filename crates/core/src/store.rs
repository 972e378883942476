use async_trait::async_trait;
use thiserror::Error;

use crate::domain::records::PrivateMessage;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("record store backend failure: {0}")]
    Backend(String),
    #[error("stored record could not be decoded: {0}")]
    Decode(String),
}

/// Append-only persistence for one record kind.
#[async_trait]
pub trait RecordStore<R>: Send + Sync {
    /// Persists `record` and returns it as stored.
    async fn append(&self, record: R) -> Result<R, StoreError>;

    /// Every stored record, oldest first.
    async fn list_all(&self) -> Result<Vec<R>, StoreError>;
}

#[async_trait]
pub trait PrivateMessageStore: RecordStore<PrivateMessage> {
    /// Messages exchanged between two users in either direction, oldest first.
    async fn conversation_between(
        &self,
        first: &str,
        second: &str,
    ) -> Result<Vec<PrivateMessage>, StoreError>;
}
