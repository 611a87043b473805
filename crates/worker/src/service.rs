use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use relay_config::{AppConfig, ConfigPatch, ConfigStore};
use relay_domain::{
    AttendanceRecord, AttendanceSource, ConfigSummary, ConnectivityReport, DeviceInfo,
    ServiceStatus, SyncCursor,
};
use relay_errors::{RelayError, RelayResult};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::components::stop_signal::{detached, stop_requested};
use crate::components::{
    tcp_reachable, CycleOutcome, CyclePlan, DeliveryClient, DeliverySettings, SyncOrchestrator,
};

/// Mutable service state; always read and written as a whole.
#[derive(Debug, Clone, Default)]
struct SyncState {
    running: bool,
    last_check: Option<DateTime<Local>>,
    cursor: SyncCursor,
    error_count: u32,
}

struct ServiceInner {
    store: Arc<ConfigStore>,
    orchestrator: SyncOrchestrator,
    state: RwLock<SyncState>,
    /// Serializes scheduled and manual cycles.
    cycle_lock: Mutex<()>,
    stop_tx: watch::Sender<bool>,
}

/// Periodic terminal-to-API relay with a consecutive-failure circuit breaker.
///
/// `Stopped -> Running -> Stopped`. The service stops itself once
/// `service.max_errors` cycles in a row have failed; only `start()` resumes it.
pub struct SyncService {
    inner: Arc<ServiceInner>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncService {
    pub fn new(
        store: Arc<ConfigStore>,
        source: Arc<dyn AttendanceSource>,
        delivery: DeliveryClient,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ServiceInner {
                store,
                orchestrator: SyncOrchestrator::new(source, delivery),
                state: RwLock::new(SyncState::default()),
                cycle_lock: Mutex::new(()),
                stop_tx,
            }),
            poll_task: Mutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.inner.state.read().await.running
    }

    /// Starts the periodic task. Warns and does nothing when already running.
    pub async fn start(&self) -> RelayResult<()> {
        let mut poll_task = self.poll_task.lock().await;
        {
            let mut state = self.inner.state.write().await;
            if state.running {
                warn!("Sync service already running");
                return Ok(());
            }
            state.running = true;
            state.error_count = 0;
        }

        if let Some(finished) = poll_task.take() {
            finished.abort();
        }

        let config = self.inner.store.snapshot().await;
        let period = Duration::from_secs(config.service.poll_interval_seconds);
        let first_tick = if config.service.sync_on_startup {
            Instant::now()
        } else {
            Instant::now() + period
        };

        self.inner.stop_tx.send_replace(false);
        let stop_rx = self.inner.stop_tx.subscribe();
        let inner = Arc::clone(&self.inner);
        *poll_task = Some(tokio::spawn(async move {
            ServiceInner::poll_loop(inner, stop_rx, first_tick, period).await;
        }));

        info!(
            poll_interval_seconds = period.as_secs(),
            device = %config.device.address,
            api_url = %config.api.url,
            "Sync service started"
        );
        Ok(())
    }

    /// Stops the periodic task, giving an in-flight cycle
    /// `service.shutdown_grace_seconds` before aborting it.
    pub async fn stop(&self) -> RelayResult<()> {
        let mut poll_task = self.poll_task.lock().await;
        {
            let mut state = self.inner.state.write().await;
            if !state.running {
                info!("Sync service already stopped");
                poll_task.take();
                return Ok(());
            }
            state.running = false;
        }

        info!("Stopping sync service");
        self.inner.stop_tx.send_replace(true);

        if let Some(mut handle) = poll_task.take() {
            let grace = Duration::from_secs(
                self.inner.store.snapshot().await.service.shutdown_grace_seconds,
            );
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(())) => info!("Polling task finished"),
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => error!("Polling task failed: {}", e),
                Err(_) => {
                    warn!(
                        grace_seconds = grace.as_secs(),
                        "In-flight cycle did not finish in time, aborting"
                    );
                    handle.abort();
                }
            }
        }

        info!("Sync service stopped");
        Ok(())
    }

    /// Runs one cycle now, outside the schedule. Returns `true` when the
    /// service has no accumulated errors afterwards.
    pub async fn force_sync(&self) -> bool {
        info!("Manual sync requested");
        let tripped = ServiceInner::execute_cycle(&self.inner, detached()).await;

        if tripped && self.is_running().await {
            error!("Too many consecutive failures, stopping sync service");
            if let Err(e) = self.stop().await {
                error!("Failed to stop sync service: {}", e);
            }
        }

        self.inner.state.read().await.error_count == 0
    }

    /// Consistent snapshot of the service state and effective settings.
    pub async fn status(&self) -> ServiceStatus {
        let config = self.inner.store.snapshot().await;
        let state = self.inner.state.read().await.clone();
        ServiceStatus {
            running: state.running,
            last_check: state.last_check,
            last_successful_sync: state.cursor.last_successful_sync(),
            error_count: state.error_count,
            config: summarize(&config),
        }
    }

    /// Checks the terminal (optionally at another address) and the API.
    pub async fn test_connections(&self, address_override: Option<String>) -> ConnectivityReport {
        let config = self.inner.store.snapshot().await;
        let port = config.device.port;
        let mut report = ConnectivityReport::default();

        let (address, device_ok) = match address_override {
            Some(address) => {
                let timeout = Duration::from_secs(config.device.timeout_seconds);
                let ok = tcp_reachable(&address, port, timeout).await;
                (address, ok)
            }
            None => (
                config.device.address.clone(),
                self.inner.orchestrator.source().test_connection().await,
            ),
        };

        report.device = device_ok;
        if device_ok {
            report.device_info = Some(DeviceInfo {
                address,
                port,
                status: "connected".to_string(),
                tested_at: Local::now(),
            });
        } else {
            report.device_error = Some(format!("cannot reach terminal at {address}:{port}"));
        }

        let client = self
            .inner
            .orchestrator
            .delivery()
            .with_settings(DeliverySettings::from_config(&config.api));
        report.api = client.probe(&config.api.url).await;
        if !report.api {
            report.api_error = Some(format!("API unreachable at {}", config.api.url));
        }

        info!(device = report.device, api = report.api, "Connectivity test finished");
        report
    }

    /// Range query against the terminal; leaves service state alone.
    pub async fn fetch_between(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
    ) -> RelayResult<Vec<AttendanceRecord>> {
        if start > end {
            return Err(RelayError::config_error(format!(
                "range start {start} is after end {end}"
            )));
        }
        self.inner
            .orchestrator
            .source()
            .fetch_between(start, end)
            .await
    }

    /// Endpoint, retries and backoff apply from the next cycle; the poll
    /// interval from the next `start()`.
    pub async fn update_config(&self, patch: &ConfigPatch) -> RelayResult<AppConfig> {
        self.inner
            .store
            .update(patch)
            .await
            .map_err(|e| RelayError::config_error(e.to_string()))
    }
}

impl ServiceInner {
    async fn poll_loop(
        inner: Arc<ServiceInner>,
        mut stop_rx: watch::Receiver<bool>,
        first_tick: Instant,
        period: Duration,
    ) {
        let mut ticker = interval_at(first_tick, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop_requested(&mut stop_rx) => {
                    info!("Polling task shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                    if Self::execute_cycle(&inner, stop_rx.clone()).await {
                        let mut state = inner.state.write().await;
                        state.running = false;
                        error!(
                            error_count = state.error_count,
                            "Too many consecutive failures, sync service stopped itself"
                        );
                        break;
                    }
                }
            }
        }
    }

    /// Runs one cycle under the cycle lock and applies its report.
    /// Returns `true` when the error threshold has been reached.
    async fn execute_cycle(inner: &ServiceInner, stop_rx: watch::Receiver<bool>) -> bool {
        let _cycle = inner.cycle_lock.lock().await;

        let config = inner.store.snapshot().await;
        let plan = CyclePlan::from_config(&config);
        let cursor = inner.state.read().await.cursor;
        let now = Local::now();

        let report = inner.orchestrator.run_cycle(cursor, &plan, now, stop_rx).await;

        let mut state = inner.state.write().await;
        state.cursor = report.cursor;
        if let Some(checked_at) = report.checked_at {
            state.last_check = Some(checked_at);
        }
        match &report.outcome {
            CycleOutcome::Delivered { .. } => state.error_count = 0,
            CycleOutcome::NothingToSend => {}
            CycleOutcome::DeliveryFailed { .. } | CycleOutcome::DeviceFailed { .. } => {
                state.error_count = state.error_count.saturating_add(1);
                warn!(
                    error_count = state.error_count,
                    max_errors = config.service.max_errors,
                    "Sync cycle failed"
                );
            }
        }

        report.outcome.is_failure() && state.error_count >= config.service.max_errors
    }
}

fn summarize(config: &AppConfig) -> ConfigSummary {
    ConfigSummary {
        device_address: config.device.address.clone(),
        device_port: config.device.port,
        api_url: config.api.url.clone(),
        poll_interval_seconds: config.service.poll_interval_seconds,
    }
}
