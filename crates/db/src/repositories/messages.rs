use sqlx::{sqlite::SqliteRow, Row};
use switchboard_core::{GeneralMessage, PrivateMessage, PrivateMessageStore, RecordStore, StoreError};

use super::{encode_timestamp, parse_timestamp, RepositoryError};
use crate::DbPool;

/// Public chat room history.
pub struct SqlMessageStore {
    pool: DbPool,
}

impl SqlMessageStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RecordStore<GeneralMessage> for SqlMessageStore {
    async fn append(&self, message: GeneralMessage) -> Result<GeneralMessage, StoreError> {
        sqlx::query("INSERT INTO messages (sender, content, created_at) VALUES (?, ?, ?)")
            .bind(&message.sender)
            .bind(&message.content)
            .bind(encode_timestamp(&message.timestamp))
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(message)
    }

    async fn list_all(&self) -> Result<Vec<GeneralMessage>, StoreError> {
        let rows = sqlx::query("SELECT sender, content, created_at FROM messages ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        let messages = rows
            .into_iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>, RepositoryError>>()?;
        Ok(messages)
    }
}

pub struct SqlPrivateMessageStore {
    pool: DbPool,
}

impl SqlPrivateMessageStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RecordStore<PrivateMessage> for SqlPrivateMessageStore {
    async fn append(&self, message: PrivateMessage) -> Result<PrivateMessage, StoreError> {
        sqlx::query(
            "INSERT INTO private_messages (sender, recipient, content, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&message.sender)
        .bind(&message.recipient)
        .bind(&message.content)
        .bind(encode_timestamp(&message.timestamp))
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;
        Ok(message)
    }

    async fn list_all(&self) -> Result<Vec<PrivateMessage>, StoreError> {
        let rows = sqlx::query(
            "SELECT sender, recipient, content, created_at
             FROM private_messages
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let messages = rows
            .into_iter()
            .map(private_message_from_row)
            .collect::<Result<Vec<_>, RepositoryError>>()?;
        Ok(messages)
    }
}

#[async_trait::async_trait]
impl PrivateMessageStore for SqlPrivateMessageStore {
    async fn conversation_between(
        &self,
        first: &str,
        second: &str,
    ) -> Result<Vec<PrivateMessage>, StoreError> {
        let rows = sqlx::query(
            "SELECT sender, recipient, content, created_at
             FROM private_messages
             WHERE (sender = ? AND recipient = ?) OR (sender = ? AND recipient = ?)
             ORDER BY id ASC",
        )
        .bind(first)
        .bind(second)
        .bind(second)
        .bind(first)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let messages = rows
            .into_iter()
            .map(private_message_from_row)
            .collect::<Result<Vec<_>, RepositoryError>>()?;
        Ok(messages)
    }
}

fn message_from_row(row: SqliteRow) -> Result<GeneralMessage, RepositoryError> {
    Ok(GeneralMessage {
        sender: row.try_get("sender")?,
        content: row.try_get("content")?,
        timestamp: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn private_message_from_row(row: SqliteRow) -> Result<PrivateMessage, RepositoryError> {
    Ok(PrivateMessage {
        sender: row.try_get("sender")?,
        recipient: row.try_get("recipient")?,
        content: row.try_get("content")?,
        timestamp: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use switchboard_core::{GeneralMessage, PrivateMessage, PrivateMessageStore, RecordStore};

    use super::{SqlMessageStore, SqlPrivateMessageStore};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        pool
    }

    #[tokio::test]
    async fn general_messages_list_in_arrival_order() {
        let store = SqlMessageStore::new(setup_pool().await);
        let hello = GeneralMessage::new("alice", "bonjour").expect("message");
        let reply = GeneralMessage::new("bob", "salut").expect("message");

        store.append(hello.clone()).await.expect("append");
        store.append(reply.clone()).await.expect("append");

        assert_eq!(store.list_all().await.expect("list"), vec![hello, reply]);
    }

    #[tokio::test]
    async fn conversation_between_covers_both_directions_only() {
        let store = SqlPrivateMessageStore::new(setup_pool().await);
        let ask = PrivateMessage::new("alice", "bob", "dispo ?").expect("message");
        let answer = PrivateMessage::new("bob", "alice", "oui").expect("message");
        let unrelated = PrivateMessage::new("alice", "carol", "coucou").expect("message");

        for message in [ask.clone(), unrelated.clone(), answer.clone()] {
            store.append(message).await.expect("append");
        }

        let conversation = store.conversation_between("bob", "alice").await.expect("load");
        assert_eq!(conversation, vec![ask, answer]);
        assert_eq!(store.list_all().await.expect("list").len(), 3);
    }
}
