use std::sync::Arc;
use std::time::Duration;

use switchboard_agent::{DialogueEngine, DialogueRuntime, DialogueServices, ExtensionPair, RuleSet};
use switchboard_ami::{CallOriginator, ManagerLink, ManagerSettings, OriginateSettings, ReconnectPolicy};
use switchboard_core::config::{AppConfig, ConfigError, LoadOptions};
use switchboard_core::realtime::RealtimeHub;
use switchboard_core::{Appointment, GeneralMessage, PrivateMessageStore, RecordStore, Reminder};
use switchboard_db::{
    connect_with_config, migrations, DbPool, SqlAppointmentStore, SqlMessageStore,
    SqlPrivateMessageStore, SqlReminderStore,
};
use thiserror::Error;
use tracing::info;

use crate::routes::AppState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub hub: RealtimeHub,
    pub link: ManagerLink,
    pub dialogue: Arc<DialogueRuntime>,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

/// Wires stores, the manager link and the dialogue runtime. The link is
/// started in the background: an unreachable PBX does not prevent startup.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", correlation_id = "bootstrap", "starting application bootstrap");

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let hub = RealtimeHub::new(config.realtime.channel_capacity);
    let link = ManagerLink::spawn(
        ManagerSettings::from_config(&config.manager),
        ReconnectPolicy::from_config(&config.manager),
    );
    info!(
        event_name = "system.bootstrap.manager_link_started",
        correlation_id = "bootstrap",
        address = %config.manager.address(),
        "manager link supervisor started"
    );
    let dialer =
        Arc::new(CallOriginator::new(Arc::new(link.clone()), OriginateSettings::from_config(&config.manager)));

    let reminders: Arc<dyn RecordStore<Reminder>> = Arc::new(SqlReminderStore::new(db_pool.clone()));
    let appointments: Arc<dyn RecordStore<Appointment>> =
        Arc::new(SqlAppointmentStore::new(db_pool.clone()));
    let messages: Arc<dyn RecordStore<GeneralMessage>> = Arc::new(SqlMessageStore::new(db_pool.clone()));
    let private_messages: Arc<dyn PrivateMessageStore> =
        Arc::new(SqlPrivateMessageStore::new(db_pool.clone()));

    let dialogue = Arc::new(DialogueRuntime::new(
        DialogueEngine::new(RuleSet::default(), ExtensionPair::from_config(&config.dialogue)),
        DialogueServices {
            reminders: reminders.clone(),
            appointments: appointments.clone(),
            dialer: dialer.clone(),
            hub: hub.clone(),
        },
        Duration::from_secs(config.dialogue.session_ttl_secs),
    )
    .with_max_sessions(config.dialogue.max_sessions));

    let state = AppState {
        hub: hub.clone(),
        dialogue: dialogue.clone(),
        dialer,
        reminders,
        appointments,
        messages,
        private_messages,
    };

    Ok(Application { config, db_pool, hub, link, dialogue, state })
}

#[cfg(test)]
mod tests {
    use switchboard_ami::LinkState;
    use switchboard_core::config::{ConfigOverrides, LoadOptions};
    use tokio::net::TcpListener;

    use crate::bootstrap::bootstrap;

    #[tokio::test]
    async fn bootstrap_fails_fast_without_manager_secret() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("manager.secret"));
    }

    #[tokio::test]
    async fn bootstrap_starts_without_a_reachable_pbx() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:?cache=shared".to_string()),
                manager_host: Some("127.0.0.1".to_string()),
                manager_port: Some(port),
                manager_secret: Some("amp111".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed with the PBX down");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('reminders', 'appointments', 'messages', 'private_messages')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("record tables after bootstrap");
        assert_eq!(table_count, 4);
        assert_ne!(app.link.state(), LinkState::Authenticated);

        let turn = app.dialogue.handle_message(None, "bonjour").await;
        assert_eq!(turn.reply, switchboard_agent::rules::replies::GREETING);

        app.link.shutdown().await;
        app.db_pool.close().await;
    }
}
