use std::env;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use switchboard_cli::commands::{call, config, doctor, migrate};

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(
        &[("SWITCHBOARD_MANAGER_SECRET", "amp111"), ("SWITCHBOARD_DATABASE_URL", "sqlite::memory:")],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 0, "expected successful migrate run");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "migrate");
            assert_eq!(payload["status"], "ok");
        },
    );
}

#[test]
fn migrate_returns_config_failure_without_manager_secret() {
    with_env(&[("SWITCHBOARD_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
        assert!(payload["message"].as_str().unwrap_or_default().contains("manager.secret"));
    });
}

#[test]
fn call_reports_manager_connectivity_when_pbx_is_down() {
    let port = closed_port();
    with_env(
        &[
            ("SWITCHBOARD_MANAGER_SECRET", "amp111"),
            ("SWITCHBOARD_MANAGER_HOST", "127.0.0.1"),
            ("SWITCHBOARD_MANAGER_PORT", &port.to_string()),
            ("SWITCHBOARD_MANAGER_CONNECT_TIMEOUT_SECS", "1"),
        ],
        || {
            let result = call::run("1001", "1002");
            assert_eq!(result.exit_code, 4, "expected manager connectivity failure code");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "call");
            assert_eq!(payload["error_class"], "manager_connectivity");
        },
    );
}

#[test]
fn config_redacts_the_manager_secret() {
    with_env(
        &[("SWITCHBOARD_MANAGER_SECRET", "super-secret-value"), ("SWITCHBOARD_MANAGER_PORT", "5039")],
        || {
            let output = config::run();
            assert!(output.contains("- manager.secret = <redacted> (source: env (SWITCHBOARD_MANAGER_SECRET))"));
            assert!(output.contains("- manager.port = 5039 (source: env (SWITCHBOARD_MANAGER_PORT))"));
            assert!(!output.contains("super-secret-value"));
        },
    );
}

#[test]
fn doctor_skips_connectivity_checks_when_config_is_invalid() {
    with_env(&[], || {
        let report: Value =
            serde_json::from_str(&doctor::run(true)).expect("doctor output should be valid JSON");
        assert_eq!(report["overall_status"], "fail");

        let checks = report["checks"].as_array().expect("checks");
        assert_eq!(checks[0]["name"], "config_validation");
        assert_eq!(checks[0]["status"], "fail");
        assert!(checks[1..].iter().all(|check| check["status"] == "skipped"));
    });
}

#[test]
fn doctor_flags_an_unreachable_manager() {
    let port = closed_port();
    with_env(
        &[
            ("SWITCHBOARD_MANAGER_SECRET", "amp111"),
            ("SWITCHBOARD_DATABASE_URL", "sqlite::memory:"),
            ("SWITCHBOARD_MANAGER_HOST", "127.0.0.1"),
            ("SWITCHBOARD_MANAGER_PORT", &port.to_string()),
            ("SWITCHBOARD_MANAGER_CONNECT_TIMEOUT_SECS", "1"),
        ],
        || {
            let output = doctor::run(false);
            assert!(output.contains("- [ok] database_connectivity"));
            assert!(output.contains("- [fail] manager_login"));
        },
    );
}

fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("addr").port()
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "SWITCHBOARD_DATABASE_URL",
        "SWITCHBOARD_DATABASE_MAX_CONNECTIONS",
        "SWITCHBOARD_DATABASE_TIMEOUT_SECS",
        "SWITCHBOARD_MANAGER_HOST",
        "SWITCHBOARD_MANAGER_PORT",
        "SWITCHBOARD_MANAGER_USERNAME",
        "SWITCHBOARD_MANAGER_SECRET",
        "SWITCHBOARD_MANAGER_CONNECT_TIMEOUT_SECS",
        "SWITCHBOARD_MANAGER_ACTION_TIMEOUT_SECS",
        "SWITCHBOARD_SERVER_BIND_ADDRESS",
        "SWITCHBOARD_SERVER_PORT",
        "SWITCHBOARD_LOGGING_LEVEL",
        "SWITCHBOARD_LOGGING_FORMAT",
        "SWITCHBOARD_LOG_LEVEL",
        "SWITCHBOARD_LOG_FORMAT",
        "PORT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
