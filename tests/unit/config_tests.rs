//! Unit tests for `SessionConfig` parsing and `ProcessSpec` construction.

use std::time::Duration;

use agent_conduit::config::DEFAULT_MAX_BUFFER_SIZE;
use agent_conduit::{ProcessSpec, SdkError, SessionConfig};

#[test]
fn defaults_match_documented_values() {
    let config = SessionConfig::default();
    assert_eq!(config.max_buffer_size, DEFAULT_MAX_BUFFER_SIZE);
    assert_eq!(config.max_buffer_size, 1_048_576);
    assert_eq!(config.message_queue_capacity, 100);
    assert_eq!(config.initialize_timeout(), Duration::from_secs(60));
    assert_eq!(config.control_timeout(), Duration::from_secs(60));
    assert_eq!(config.stream_close_timeout(), Duration::from_secs(60));
    assert_eq!(config.shutdown_grace(), Duration::from_millis(5000));
    assert_eq!(config.stderr_tail_lines, 50);
}

#[test]
fn empty_toml_yields_defaults() {
    let config = SessionConfig::from_toml_str("").expect("empty config");
    assert_eq!(config, SessionConfig::default());
}

#[test]
fn toml_overrides_selected_fields() {
    let config = SessionConfig::from_toml_str(
        r"
max_buffer_size = 4096
stream_close_timeout_seconds = 5
shutdown_grace_millis = 250
",
    )
    .expect("valid config");
    assert_eq!(config.max_buffer_size, 4096);
    assert_eq!(config.stream_close_timeout(), Duration::from_secs(5));
    assert_eq!(config.shutdown_grace(), Duration::from_millis(250));
    assert_eq!(config.message_queue_capacity, 100);
}

#[test]
fn unknown_fields_are_rejected() {
    let err = SessionConfig::from_toml_str("max_bufer_size = 10").unwrap_err();
    let SdkError::Config(message) = err else {
        panic!("expected config error");
    };
    assert!(message.starts_with("invalid config"), "got {message}");
}

#[test]
fn zero_values_fail_validation() {
    for (raw, field) in [
        ("max_buffer_size = 0", "max_buffer_size"),
        ("message_queue_capacity = 0", "message_queue_capacity"),
        ("control_timeout_seconds = 0", "timeouts"),
    ] {
        let err = SessionConfig::from_toml_str(raw).unwrap_err();
        assert!(
            matches!(&err, SdkError::Config(msg) if msg.contains(field)),
            "{raw}: got {err:?}"
        );
    }
}

#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("session.toml");
    std::fs::write(&path, "control_timeout_seconds = 7\n").expect("write config");

    let config = SessionConfig::load_from_path(&path).expect("load");
    assert_eq!(config.control_timeout(), Duration::from_secs(7));
}

#[test]
fn load_from_missing_path_is_config_error() {
    let err = SessionConfig::load_from_path("/nonexistent/session.toml").unwrap_err();
    assert!(matches!(err, SdkError::Config(msg) if msg.starts_with("failed to read config")));
}

#[test]
fn process_spec_builder() {
    let spec = ProcessSpec::new("agent")
        .args(["--output-format", "stream-json"])
        .env("AGENT_ENTRYPOINT", "sdk")
        .cwd("/work");
    assert_eq!(spec.command, "agent");
    assert_eq!(spec.args, vec!["--output-format", "stream-json"]);
    assert_eq!(spec.env.get("AGENT_ENTRYPOINT").map(String::as_str), Some("sdk"));
    assert_eq!(spec.cwd.as_deref(), Some(std::path::Path::new("/work")));
    assert!(spec.inherit_env);
    assert!(spec.capture_stderr);
    assert!(spec.stderr_callback.is_none());

    let debug = format!("{spec:?}");
    assert!(debug.contains("agent"));
}
