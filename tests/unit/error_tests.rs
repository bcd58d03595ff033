//! Unit tests for `SdkError` display format and conversions.

use agent_conduit::SdkError;

#[test]
fn display_uses_lowercase_kind_prefix() {
    let cases = [
        (SdkError::Connection("broken pipe".into()), "connection: broken pipe"),
        (SdkError::Dispatch("handler failed".into()), "dispatch: handler failed"),
        (SdkError::Control("model not found".into()), "control: model not found"),
        (SdkError::Cancelled("session closed".into()), "cancelled: session closed"),
        (SdkError::InvalidState("session is closed".into()), "invalid state: session is closed"),
        (SdkError::Config("bad value".into()), "config: bad value"),
        (SdkError::Io("disk full".into()), "io: disk full"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
        assert!(!expected.ends_with('.'), "error message must not end with a period");
    }
}

#[test]
fn overflow_names_the_limit() {
    let err = SdkError::Overflow { limit: 1024 };
    assert_eq!(
        err.to_string(),
        "overflow: frame exceeded maximum buffer size of 1024 bytes"
    );
}

#[test]
fn timeout_names_the_subtype() {
    let err = SdkError::Timeout {
        subtype: "initialize".into(),
    };
    assert_eq!(
        err.to_string(),
        "timeout: control request 'initialize' received no response"
    );
}

#[test]
fn process_error_includes_code_and_stderr_tail() {
    let err = SdkError::Process {
        exit_code: Some(2),
        stderr: "error: unknown flag".into(),
    };
    assert_eq!(
        err.to_string(),
        "process: exited with code 2; stderr: error: unknown flag"
    );

    let killed = SdkError::Process {
        exit_code: None,
        stderr: String::new(),
    };
    assert_eq!(killed.to_string(), "process: terminated by signal");
}

#[test]
fn decode_error_keeps_raw_payload_out_of_display() {
    let err = SdkError::decode("unknown message type: 'bogus'", r#"{"type":"bogus"}"#);
    assert_eq!(err.to_string(), "decode: unknown message type: 'bogus'");
    let SdkError::Decode { raw, .. } = err else {
        panic!("expected decode error");
    };
    assert_eq!(raw, r#"{"type":"bogus"}"#);
}

#[test]
fn only_decode_errors_are_non_fatal() {
    assert!(!SdkError::decode("bad", "").is_fatal());
    assert!(SdkError::Overflow { limit: 1 }.is_fatal());
    assert!(SdkError::Connection("gone".into()).is_fatal());
    assert!(SdkError::Process {
        exit_code: Some(1),
        stderr: String::new()
    }
    .is_fatal());
}

#[test]
fn io_errors_map_by_kind() {
    let pipe = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
    assert!(matches!(SdkError::from(pipe), SdkError::Connection(_)));

    let other = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    assert!(matches!(SdkError::from(other), SdkError::Io(_)));
}

#[test]
fn json_errors_become_decode_errors() {
    let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    assert!(matches!(SdkError::from(err), SdkError::Decode { .. }));
}

#[test]
fn implements_std_error() {
    fn assert_error<E: std::error::Error + Send + Sync + 'static>(_: &E) {}
    assert_error(&SdkError::Io("x".into()));
}
