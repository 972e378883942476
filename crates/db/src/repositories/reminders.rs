use sqlx::{sqlite::SqliteRow, Row};
use switchboard_core::{RecordStore, Reminder, StoreError};

use super::{encode_timestamp, parse_timestamp, RepositoryError};
use crate::DbPool;

pub struct SqlReminderStore {
    pool: DbPool,
}

impl SqlReminderStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RecordStore<Reminder> for SqlReminderStore {
    async fn append(&self, reminder: Reminder) -> Result<Reminder, StoreError> {
        sqlx::query("INSERT INTO reminders (numero, created_at) VALUES (?, ?)")
            .bind(&reminder.number)
            .bind(encode_timestamp(&reminder.timestamp))
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(reminder)
    }

    async fn list_all(&self) -> Result<Vec<Reminder>, StoreError> {
        let rows = sqlx::query("SELECT numero, created_at FROM reminders ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        let reminders = rows
            .into_iter()
            .map(reminder_from_row)
            .collect::<Result<Vec<_>, RepositoryError>>()?;
        Ok(reminders)
    }
}

fn reminder_from_row(row: SqliteRow) -> Result<Reminder, RepositoryError> {
    Ok(Reminder {
        number: row.try_get("numero")?,
        timestamp: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
