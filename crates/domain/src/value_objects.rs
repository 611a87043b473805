use chrono::{DateTime, Duration, Local};
use serde::{Deserialize, Serialize};

/// Boundary of already-delivered data.
///
/// Only moves forward when a batch has been confirmed by the remote API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    last_successful_sync: Option<DateTime<Local>>,
}

impl SyncCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(instant: DateTime<Local>) -> Self {
        Self {
            last_successful_sync: Some(instant),
        }
    }

    pub fn last_successful_sync(&self) -> Option<DateTime<Local>> {
        self.last_successful_sync
    }

    /// Start of the next fetch window; `now - lookback` until the first success.
    pub fn window_start(&self, now: DateTime<Local>, lookback: Duration) -> DateTime<Local> {
        self.last_successful_sync.unwrap_or(now - lookback)
    }

    pub fn advanced_to(self, instant: DateTime<Local>) -> Self {
        Self::at(instant)
    }
}

/// Result of handing one batch to the delivery client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryOutcome {
    Success,
    Failure {
        reason: String,
        retries_exhausted: bool,
    },
}

impl DeliveryOutcome {
    pub fn failure<S: Into<String>>(reason: S, retries_exhausted: bool) -> Self {
        Self::Failure {
            reason: reason.into(),
            retries_exhausted,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Success)
    }
}

/// Effective settings reported alongside the service status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub device_address: String,
    pub device_port: u16,
    pub api_url: String,
    pub poll_interval_seconds: u64,
}

/// Point-in-time view of the sync service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub running: bool,
    pub last_check: Option<DateTime<Local>>,
    pub last_successful_sync: Option<DateTime<Local>>,
    pub error_count: u32,
    pub config: ConfigSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub address: String,
    pub port: u16,
    pub status: String,
    pub tested_at: DateTime<Local>,
}

/// Outcome of checking both ends of the relay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityReport {
    pub device: bool,
    pub api: bool,
    pub device_info: Option<DeviceInfo>,
    pub device_error: Option<String>,
    pub api_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_start_defaults_to_lookback() {
        let now = Local.with_ymd_and_hms(2024, 3, 18, 9, 0, 0).unwrap();
        let cursor = SyncCursor::new();
        assert_eq!(
            cursor.window_start(now, Duration::hours(24)),
            Local.with_ymd_and_hms(2024, 3, 17, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_window_start_uses_last_success() {
        let now = Local.with_ymd_and_hms(2024, 3, 18, 9, 0, 0).unwrap();
        let synced = Local.with_ymd_and_hms(2024, 3, 18, 8, 55, 0).unwrap();
        let cursor = SyncCursor::new().advanced_to(synced);

        assert_eq!(cursor.last_successful_sync(), Some(synced));
        assert_eq!(cursor.window_start(now, Duration::hours(24)), synced);
    }

    #[test]
    fn test_delivery_outcome() {
        assert!(DeliveryOutcome::Success.is_success());
        let failed = DeliveryOutcome::failure("HTTP 500", true);
        assert!(!failed.is_success());
        assert_eq!(
            failed,
            DeliveryOutcome::Failure {
                reason: "HTTP 500".to_string(),
                retries_exhausted: true
            }
        );
    }
}
