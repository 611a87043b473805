use crate::*;

#[test]
fn test_relay_error_display() {
    let device_error = RelayError::device("terminal unreachable");
    assert_eq!(device_error.to_string(), "device error: terminal unreachable");

    let status_error = RelayError::HttpStatus {
        status: 500,
        body: "boom".to_string(),
    };
    assert_eq!(status_error.to_string(), "unexpected HTTP status 500: boom");

    assert_eq!(RelayError::Cancelled.to_string(), "operation cancelled");

    let config_error = RelayError::config_error("bad interval");
    assert_eq!(config_error.to_string(), "configuration error: bad interval");
}

#[test]
fn test_connection_refused_only_for_connect() {
    assert!(RelayError::Connect("refused".into()).is_connection_refused());
    assert!(!RelayError::Timeout("slow".into()).is_connection_refused());
    assert!(!RelayError::Network("reset".into()).is_connection_refused());
}

#[test]
fn test_from_serde_json_error() {
    let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let relay: RelayError = err.into();
    assert!(matches!(relay, RelayError::Serialization(_)));
}

#[test]
fn test_from_anyhow_error() {
    let relay: RelayError = anyhow::anyhow!("wrapped").into();
    assert_eq!(relay.to_string(), "internal error: wrapped");
}
