use chrono::{DateTime, Utc};
use switchboard_core::StoreError;
use thiserror::Error;

pub mod appointments;
pub mod memory;
pub mod messages;
pub mod reminders;

pub use appointments::SqlAppointmentStore;
pub use memory::InMemoryRecordStore;
pub use messages::{SqlMessageStore, SqlPrivateMessageStore};
pub use reminders::SqlReminderStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(error) => StoreError::Backend(error.to_string()),
            RepositoryError::Decode(message) => StoreError::Decode(message),
        }
    }
}

fn encode_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339()
}

fn parse_timestamp(field: &str, raw: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid {field} `{raw}`: {error}")))
}
