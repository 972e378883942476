use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub manager: ManagerConfig,
    pub dialogue: DialogueConfig,
    pub realtime: RealtimeConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Asterisk manager interface (AMI) connection and origination settings.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: SecretString,
    pub connect_timeout_secs: u64,
    pub action_timeout_secs: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    /// Channel driver prefixed to the calling extension (`PJSIP/1001`).
    pub channel_technology: String,
    /// Dialplan context the originated call enters.
    pub context: String,
}

#[derive(Clone, Debug)]
pub struct DialogueConfig {
    /// Extension pair dialled when a visitor accepts the advisor offer.
    pub offer_from_extension: String,
    pub offer_to_extension: String,
    pub session_ttl_secs: u64,
    pub max_sessions: usize,
}

#[derive(Clone, Debug)]
pub struct RealtimeConfig {
    pub channel_capacity: usize,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub static_dir: PathBuf,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub manager_host: Option<String>,
    pub manager_port: Option<u16>,
    pub manager_username: Option<String>,
    pub manager_secret: Option<String>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://switchboard.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            manager: ManagerConfig {
                host: "127.0.0.1".to_string(),
                port: 5038,
                username: "switchboard".to_string(),
                secret: String::new().into(),
                connect_timeout_secs: 10,
                action_timeout_secs: 30,
                reconnect_base_delay_ms: 500,
                reconnect_max_delay_ms: 30_000,
                channel_technology: "PJSIP".to_string(),
                context: "from-internal".to_string(),
            },
            dialogue: DialogueConfig {
                offer_from_extension: "1001".to_string(),
                offer_to_extension: "1002".to_string(),
                session_ttl_secs: 1_800,
                max_sessions: 10_000,
            },
            realtime: RealtimeConfig { channel_capacity: 256 },
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 3000,
                static_dir: PathBuf::from("public"),
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl ManagerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("switchboard.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(manager) = patch.manager {
            if let Some(host) = manager.host {
                self.manager.host = host;
            }
            if let Some(port) = manager.port {
                self.manager.port = port;
            }
            if let Some(username) = manager.username {
                self.manager.username = username;
            }
            if let Some(manager_secret_value) = manager.secret {
                self.manager.secret = secret_value(manager_secret_value);
            }
            if let Some(connect_timeout_secs) = manager.connect_timeout_secs {
                self.manager.connect_timeout_secs = connect_timeout_secs;
            }
            if let Some(action_timeout_secs) = manager.action_timeout_secs {
                self.manager.action_timeout_secs = action_timeout_secs;
            }
            if let Some(base_delay) = manager.reconnect_base_delay_ms {
                self.manager.reconnect_base_delay_ms = base_delay;
            }
            if let Some(max_delay) = manager.reconnect_max_delay_ms {
                self.manager.reconnect_max_delay_ms = max_delay;
            }
            if let Some(channel_technology) = manager.channel_technology {
                self.manager.channel_technology = channel_technology;
            }
            if let Some(context) = manager.context {
                self.manager.context = context;
            }
        }

        if let Some(dialogue) = patch.dialogue {
            if let Some(from) = dialogue.offer_from_extension {
                self.dialogue.offer_from_extension = from;
            }
            if let Some(to) = dialogue.offer_to_extension {
                self.dialogue.offer_to_extension = to;
            }
            if let Some(session_ttl_secs) = dialogue.session_ttl_secs {
                self.dialogue.session_ttl_secs = session_ttl_secs;
            }
            if let Some(max_sessions) = dialogue.max_sessions {
                self.dialogue.max_sessions = max_sessions;
            }
        }

        if let Some(realtime) = patch.realtime {
            if let Some(channel_capacity) = realtime.channel_capacity {
                self.realtime.channel_capacity = channel_capacity;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(static_dir) = server.static_dir {
                self.server.static_dir = static_dir;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SWITCHBOARD_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("SWITCHBOARD_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("SWITCHBOARD_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("SWITCHBOARD_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SWITCHBOARD_MANAGER_HOST") {
            self.manager.host = value;
        }
        if let Some(value) = read_env("SWITCHBOARD_MANAGER_PORT") {
            self.manager.port = parse_u16("SWITCHBOARD_MANAGER_PORT", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_MANAGER_USERNAME") {
            self.manager.username = value;
        }
        if let Some(value) = read_env("SWITCHBOARD_MANAGER_SECRET") {
            self.manager.secret = secret_value(value);
        }
        if let Some(value) = read_env("SWITCHBOARD_MANAGER_CONNECT_TIMEOUT_SECS") {
            self.manager.connect_timeout_secs =
                parse_u64("SWITCHBOARD_MANAGER_CONNECT_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_MANAGER_ACTION_TIMEOUT_SECS") {
            self.manager.action_timeout_secs =
                parse_u64("SWITCHBOARD_MANAGER_ACTION_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_MANAGER_RECONNECT_BASE_DELAY_MS") {
            self.manager.reconnect_base_delay_ms =
                parse_u64("SWITCHBOARD_MANAGER_RECONNECT_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_MANAGER_RECONNECT_MAX_DELAY_MS") {
            self.manager.reconnect_max_delay_ms =
                parse_u64("SWITCHBOARD_MANAGER_RECONNECT_MAX_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_MANAGER_CHANNEL_TECHNOLOGY") {
            self.manager.channel_technology = value;
        }
        if let Some(value) = read_env("SWITCHBOARD_MANAGER_CONTEXT") {
            self.manager.context = value;
        }

        if let Some(value) = read_env("SWITCHBOARD_DIALOGUE_OFFER_FROM_EXTENSION") {
            self.dialogue.offer_from_extension = value;
        }
        if let Some(value) = read_env("SWITCHBOARD_DIALOGUE_OFFER_TO_EXTENSION") {
            self.dialogue.offer_to_extension = value;
        }
        if let Some(value) = read_env("SWITCHBOARD_DIALOGUE_SESSION_TTL_SECS") {
            self.dialogue.session_ttl_secs =
                parse_u64("SWITCHBOARD_DIALOGUE_SESSION_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_DIALOGUE_MAX_SESSIONS") {
            self.dialogue.max_sessions = parse_usize("SWITCHBOARD_DIALOGUE_MAX_SESSIONS", &value)?;
        }

        if let Some(value) = read_env("SWITCHBOARD_REALTIME_CHANNEL_CAPACITY") {
            self.realtime.channel_capacity =
                parse_usize("SWITCHBOARD_REALTIME_CHANNEL_CAPACITY", &value)?;
        }

        if let Some(value) = read_env("SWITCHBOARD_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        // PORT is honoured for parity with common PaaS launchers.
        if let Some(value) = read_env("SWITCHBOARD_SERVER_PORT").or_else(|| read_env("PORT")) {
            self.server.port = parse_u16("SWITCHBOARD_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_SERVER_STATIC_DIR") {
            self.server.static_dir = PathBuf::from(value);
        }
        if let Some(value) = read_env("SWITCHBOARD_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("SWITCHBOARD_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("SWITCHBOARD_LOGGING_LEVEL").or_else(|| read_env("SWITCHBOARD_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SWITCHBOARD_LOGGING_FORMAT").or_else(|| read_env("SWITCHBOARD_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(host) = overrides.manager_host {
            self.manager.host = host;
        }
        if let Some(port) = overrides.manager_port {
            self.manager.port = port;
        }
        if let Some(username) = overrides.manager_username {
            self.manager.username = username;
        }
        if let Some(manager_secret) = overrides.manager_secret {
            self.manager.secret = secret_value(manager_secret);
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_manager(&self.manager)?;
        validate_dialogue(&self.dialogue)?;
        validate_realtime(&self.realtime)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("switchboard.toml"), PathBuf::from("config/switchboard.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_manager(manager: &ManagerConfig) -> Result<(), ConfigError> {
    if manager.host.trim().is_empty() {
        return Err(ConfigError::Validation("manager.host is required".to_string()));
    }

    if manager.port == 0 {
        return Err(ConfigError::Validation(
            "manager.port must be greater than zero (Asterisk listens on 5038 by default)"
                .to_string(),
        ));
    }

    if manager.username.trim().is_empty() {
        return Err(ConfigError::Validation(
            "manager.username is required. Use the user section name from manager.conf"
                .to_string(),
        ));
    }

    if manager.secret.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "manager.secret is required. Set SWITCHBOARD_MANAGER_SECRET or `[manager] secret` to the AMI user's secret from manager.conf".to_string(),
        ));
    }

    if manager.connect_timeout_secs == 0 || manager.connect_timeout_secs > 60 {
        return Err(ConfigError::Validation(
            "manager.connect_timeout_secs must be in range 1..=60".to_string(),
        ));
    }

    if manager.action_timeout_secs == 0 || manager.action_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "manager.action_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if manager.reconnect_max_delay_ms < manager.reconnect_base_delay_ms {
        return Err(ConfigError::Validation(
            "manager.reconnect_max_delay_ms must be >= manager.reconnect_base_delay_ms"
                .to_string(),
        ));
    }

    if manager.channel_technology.trim().is_empty() || manager.context.trim().is_empty() {
        return Err(ConfigError::Validation(
            "manager.channel_technology and manager.context must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_dialogue(dialogue: &DialogueConfig) -> Result<(), ConfigError> {
    if dialogue.offer_from_extension.trim().is_empty()
        || dialogue.offer_to_extension.trim().is_empty()
    {
        return Err(ConfigError::Validation(
            "dialogue.offer_from_extension and dialogue.offer_to_extension are required"
                .to_string(),
        ));
    }

    if dialogue.session_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "dialogue.session_ttl_secs must be greater than zero".to_string(),
        ));
    }

    if dialogue.max_sessions == 0 {
        return Err(ConfigError::Validation(
            "dialogue.max_sessions must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_realtime(realtime: &RealtimeConfig) -> Result<(), ConfigError> {
    if realtime.channel_capacity == 0 || realtime.channel_capacity > 65_536 {
        return Err(ConfigError::Validation(
            "realtime.channel_capacity must be in range 1..=65536".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    manager: Option<ManagerPatch>,
    dialogue: Option<DialoguePatch>,
    realtime: Option<RealtimePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ManagerPatch {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    secret: Option<String>,
    connect_timeout_secs: Option<u64>,
    action_timeout_secs: Option<u64>,
    reconnect_base_delay_ms: Option<u64>,
    reconnect_max_delay_ms: Option<u64>,
    channel_technology: Option<String>,
    context: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DialoguePatch {
    offer_from_extension: Option<String>,
    offer_to_extension: Option<String>,
    session_ttl_secs: Option<u64>,
    max_sessions: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct RealtimePatch {
    channel_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    static_dir: Option<PathBuf>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
