use std::sync::Arc;

use chrono::{DateTime, Local};
use relay_config::AppConfig;
use relay_domain::{AttendanceSource, DeliveryOutcome, SyncCursor};
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::delivery_client::{DeliveryClient, DeliverySettings};

/// Per-cycle parameters, re-read from the configuration before every cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CyclePlan {
    pub endpoint: String,
    pub max_retries: u32,
    pub delivery: DeliverySettings,
    pub lookback: chrono::Duration,
}

impl CyclePlan {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            endpoint: config.api.url.clone(),
            max_retries: config.api.max_retries,
            delivery: DeliverySettings::from_config(&config.api),
            lookback: chrono::Duration::hours(i64::from(config.service.initial_lookback_hours)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    NothingToSend,
    Delivered { count: usize },
    DeliveryFailed { reason: String, retries_exhausted: bool },
    DeviceFailed { reason: String },
}

impl CycleOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CycleOutcome::DeliveryFailed { .. } | CycleOutcome::DeviceFailed { .. }
        )
    }
}

/// What one cycle produced; the caller owns applying it to service state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub cursor: SyncCursor,
    pub outcome: CycleOutcome,
    /// Set when the cycle reached a conclusive answer (delivered or nothing to send).
    pub checked_at: Option<DateTime<Local>>,
}

pub struct SyncOrchestrator {
    source: Arc<dyn AttendanceSource>,
    delivery: DeliveryClient,
}

impl SyncOrchestrator {
    pub fn new(source: Arc<dyn AttendanceSource>, delivery: DeliveryClient) -> Self {
        Self { source, delivery }
    }

    pub fn source(&self) -> &Arc<dyn AttendanceSource> {
        &self.source
    }

    pub fn delivery(&self) -> &DeliveryClient {
        &self.delivery
    }

    /// Runs one fetch-and-deliver pass starting from `cursor`.
    ///
    /// `now` becomes the new cursor on success, so punches recorded while the
    /// batch was in flight are fetched again next time.
    #[instrument(skip_all, fields(cycle_id = %Uuid::new_v4(), device = %self.source.describe()))]
    pub async fn run_cycle(
        &self,
        cursor: SyncCursor,
        plan: &CyclePlan,
        now: DateTime<Local>,
        stop: watch::Receiver<bool>,
    ) -> CycleReport {
        let since = cursor.window_start(now, plan.lookback);
        info!(since = %since, "Checking terminal for new punches");

        let records = match self.source.fetch_since(since).await {
            Ok(records) => records,
            Err(e) => {
                error!("Device fetch failed: {}", e);
                return CycleReport {
                    cursor,
                    outcome: CycleOutcome::DeviceFailed {
                        reason: e.to_string(),
                    },
                    checked_at: None,
                };
            }
        };

        if records.is_empty() {
            info!("No new punches");
            return CycleReport {
                cursor,
                outcome: CycleOutcome::NothingToSend,
                checked_at: Some(now),
            };
        }

        let count = records.len();
        info!(records = count, "New punches to deliver");
        let client = self.delivery.with_settings(plan.delivery.clone());

        match client
            .deliver_until(records, &plan.endpoint, plan.max_retries, stop)
            .await
        {
            DeliveryOutcome::Success => {
                info!(records = count, "Punches delivered");
                CycleReport {
                    cursor: cursor.advanced_to(now),
                    outcome: CycleOutcome::Delivered { count },
                    checked_at: Some(now),
                }
            }
            DeliveryOutcome::Failure {
                reason,
                retries_exhausted,
            } => {
                warn!(records = count, retries_exhausted, "Punches not delivered: {}", reason);
                CycleReport {
                    cursor,
                    outcome: CycleOutcome::DeliveryFailed {
                        reason,
                        retries_exhausted,
                    },
                    checked_at: None,
                }
            }
        }
    }
}
