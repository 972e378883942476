use tokio::sync::RwLock;

use switchboard_core::{PrivateMessage, PrivateMessageStore, RecordStore, StoreError};

/// Process-local store; nothing survives a restart.
pub struct InMemoryRecordStore<R> {
    records: RwLock<Vec<R>>,
}

impl<R> Default for InMemoryRecordStore<R> {
    fn default() -> Self {
        Self { records: RwLock::new(Vec::new()) }
    }
}

impl<R> InMemoryRecordStore<R> {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl<R> RecordStore<R> for InMemoryRecordStore<R>
where
    R: Clone + Send + Sync + 'static,
{
    async fn append(&self, record: R) -> Result<R, StoreError> {
        let mut records = self.records.write().await;
        records.push(record.clone());
        Ok(record)
    }

    async fn list_all(&self) -> Result<Vec<R>, StoreError> {
        let records = self.records.read().await;
        Ok(records.clone())
    }
}

#[async_trait::async_trait]
impl PrivateMessageStore for InMemoryRecordStore<PrivateMessage> {
    async fn conversation_between(
        &self,
        first: &str,
        second: &str,
    ) -> Result<Vec<PrivateMessage>, StoreError> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|message| message.is_between(first, second)).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use switchboard_core::{PrivateMessage, PrivateMessageStore, RecordStore, Reminder};

    use super::InMemoryRecordStore;

    #[tokio::test]
    async fn appended_records_are_listed_in_order() {
        let store = InMemoryRecordStore::<Reminder>::new();
        let first = Reminder::new("0612345678").expect("reminder");
        let second = Reminder::new("0700000000").expect("reminder");

        store.append(first.clone()).await.expect("append");
        store.append(second.clone()).await.expect("append");

        assert_eq!(store.list_all().await.expect("list"), vec![first, second]);
    }

    #[tokio::test]
    async fn private_conversation_filters_other_pairs() {
        let store = InMemoryRecordStore::<PrivateMessage>::new();
        let ask = PrivateMessage::new("alice", "bob", "dispo ?").expect("message");
        let other = PrivateMessage::new("carol", "bob", "hello").expect("message");
        store.append(ask.clone()).await.expect("append");
        store.append(other).await.expect("append");

        assert_eq!(store.conversation_between("alice", "bob").await.expect("load"), vec![ask]);
    }
}
