//! Unit tests for `AppError` display and conversions.

use ami_link::ami::LinkState;
use ami_link::AppError;

#[test]
fn display_prefixes_name_the_failure_kind() {
    let cases = [
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::Connection("refused".into()), "connection: refused"),
        (AppError::Link("eof".into()), "link: eof"),
        (AppError::Protocol("too long".into()), "protocol: too long"),
        (AppError::Auth("Authentication failed".into()), "auth: Authentication failed"),
        (
            AppError::ReconnectExhausted("pbx:5038".into()),
            "reconnect exhausted: pbx:5038",
        ),
        (AppError::Timeout("Ping".into()), "timeout: Ping"),
        (AppError::ConnectionLost("dropped".into()), "connection lost: dropped"),
        (AppError::AlreadyConsumed("events".into()), "already consumed: events"),
        (AppError::Closed("bye".into()), "closed: bye"),
        (AppError::Io("disk".into()), "io: disk"),
    ];

    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn io_errors_convert_to_io_variant() {
    let err: AppError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe gone").into();
    assert_eq!(err, AppError::Io("pipe gone".into()));
}

#[test]
fn toml_errors_convert_to_config_variant() {
    let parse = toml::from_str::<toml::Value>("= nope").expect_err("invalid toml");
    let err: AppError = parse.into();
    assert!(matches!(err, AppError::Config(ref msg) if msg.starts_with("invalid config")));
}

/// Terminal status belongs to the link state: any fatal cause ends the
/// adapter, including a rejected re-login.
#[test]
fn every_fatal_state_is_terminal() {
    for cause in [
        AppError::ReconnectExhausted("pbx:5038".into()),
        AppError::Auth("Authentication failed".into()),
        AppError::Timeout("no response to Login".into()),
    ] {
        assert!(LinkState::Fatal(cause).is_terminal());
    }
    assert!(LinkState::Closed.is_terminal());
    assert!(!LinkState::Connected.is_terminal());
    assert!(!LinkState::Reconnecting { attempt: 3 }.is_terminal());
}
