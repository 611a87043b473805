use async_trait::async_trait;
use chrono::{DateTime, Local};
use relay_errors::RelayResult;

use crate::entities::AttendanceRecord;

/// Interface to the time-clock terminal.
///
/// Implementations report an unreachable terminal as `false` or as an
/// `Err(RelayError::Device)`, never by panicking.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait AttendanceSource: Send + Sync {
    async fn test_connection(&self) -> bool;
    async fn fetch_since(&self, since: DateTime<Local>) -> RelayResult<Vec<AttendanceRecord>>;
    async fn fetch_between(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
    ) -> RelayResult<Vec<AttendanceRecord>>;
    /// Human-readable location of the terminal, used in logs and reports.
    fn describe(&self) -> String;
}
