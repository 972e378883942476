use std::sync::Arc;

use switchboard_ami::{CallOriginator, ManagerLink, ManagerSettings, OriginateSettings, ReconnectPolicy};
use switchboard_core::config::{AppConfig, LoadOptions};
use switchboard_core::CallDialer;

use crate::commands::CommandResult;

pub fn run(from: &str, to: &str) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "call",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "call",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let link = ManagerLink::connect(
            ManagerSettings::from_config(&config.manager),
            ReconnectPolicy::from_config(&config.manager),
        )
        .await
        .map_err(|error| ("manager_connectivity", error.to_string(), 4u8))?;

        let originator = CallOriginator::new(
            Arc::new(link.clone()),
            OriginateSettings::from_config(&config.manager),
        );
        let outcome = originator.originate(from, to).await;
        link.shutdown().await;

        if outcome.is_accepted() {
            Ok::<String, (&'static str, String, u8)>(outcome.describe())
        } else {
            Err(("originate", outcome.describe(), 5u8))
        }
    });

    match result {
        Ok(message) => CommandResult::success("call", format!("{from} -> {to}: {message}")),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("call", error_class, message, exit_code)
        }
    }
}
