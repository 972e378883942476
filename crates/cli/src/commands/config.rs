use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use switchboard_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    for (key_path, value, env_key) in effective_values(&config) {
        lines.push(render_line(
            key_path,
            &value,
            field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref()),
        ));
    }

    lines.join("\n")
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String, &'static str)> {
    vec![
        ("database.url", config.database.url.clone(), "SWITCHBOARD_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "SWITCHBOARD_DATABASE_MAX_CONNECTIONS",
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            "SWITCHBOARD_DATABASE_TIMEOUT_SECS",
        ),
        ("manager.host", config.manager.host.clone(), "SWITCHBOARD_MANAGER_HOST"),
        ("manager.port", config.manager.port.to_string(), "SWITCHBOARD_MANAGER_PORT"),
        ("manager.username", config.manager.username.clone(), "SWITCHBOARD_MANAGER_USERNAME"),
        (
            "manager.secret",
            redact_secret(config.manager.secret.expose_secret()),
            "SWITCHBOARD_MANAGER_SECRET",
        ),
        (
            "manager.connect_timeout_secs",
            config.manager.connect_timeout_secs.to_string(),
            "SWITCHBOARD_MANAGER_CONNECT_TIMEOUT_SECS",
        ),
        (
            "manager.action_timeout_secs",
            config.manager.action_timeout_secs.to_string(),
            "SWITCHBOARD_MANAGER_ACTION_TIMEOUT_SECS",
        ),
        (
            "manager.reconnect_base_delay_ms",
            config.manager.reconnect_base_delay_ms.to_string(),
            "SWITCHBOARD_MANAGER_RECONNECT_BASE_DELAY_MS",
        ),
        (
            "manager.reconnect_max_delay_ms",
            config.manager.reconnect_max_delay_ms.to_string(),
            "SWITCHBOARD_MANAGER_RECONNECT_MAX_DELAY_MS",
        ),
        (
            "manager.channel_technology",
            config.manager.channel_technology.clone(),
            "SWITCHBOARD_MANAGER_CHANNEL_TECHNOLOGY",
        ),
        ("manager.context", config.manager.context.clone(), "SWITCHBOARD_MANAGER_CONTEXT"),
        (
            "dialogue.offer_from_extension",
            config.dialogue.offer_from_extension.clone(),
            "SWITCHBOARD_DIALOGUE_OFFER_FROM_EXTENSION",
        ),
        (
            "dialogue.offer_to_extension",
            config.dialogue.offer_to_extension.clone(),
            "SWITCHBOARD_DIALOGUE_OFFER_TO_EXTENSION",
        ),
        (
            "dialogue.session_ttl_secs",
            config.dialogue.session_ttl_secs.to_string(),
            "SWITCHBOARD_DIALOGUE_SESSION_TTL_SECS",
        ),
        (
            "dialogue.max_sessions",
            config.dialogue.max_sessions.to_string(),
            "SWITCHBOARD_DIALOGUE_MAX_SESSIONS",
        ),
        (
            "realtime.channel_capacity",
            config.realtime.channel_capacity.to_string(),
            "SWITCHBOARD_REALTIME_CHANNEL_CAPACITY",
        ),
        (
            "server.bind_address",
            config.server.bind_address.clone(),
            "SWITCHBOARD_SERVER_BIND_ADDRESS",
        ),
        ("server.port", config.server.port.to_string(), "SWITCHBOARD_SERVER_PORT"),
        (
            "server.static_dir",
            config.server.static_dir.display().to_string(),
            "SWITCHBOARD_SERVER_STATIC_DIR",
        ),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            "SWITCHBOARD_SERVER_GRACEFUL_SHUTDOWN_SECS",
        ),
        ("logging.level", config.logging.level.clone(), "SWITCHBOARD_LOGGING_LEVEL"),
        (
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            "SWITCHBOARD_LOGGING_FORMAT",
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("switchboard.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/switchboard.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: &str) -> String {
    if secret.trim().is_empty() {
        "<empty>".to_string()
    } else {
        "<redacted>".to_string()
    }
}
