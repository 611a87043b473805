use std::sync::Arc;
use std::time::Duration;

use relay_config::ApiConfig;
use relay_domain::{AttendanceRecord, DeliveryOutcome};
use relay_errors::{RelayError, RelayResult};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::stop_signal::{detached, stop_requested};
use super::transport::{HttpMethod, HttpReply, HttpTransport, ReqwestTransport, TransportSettings};

const MAX_LOGGED_BODY: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverySettings {
    pub request_timeout: Duration,
    pub probe_timeout: Duration,
    /// Failed attempt `n` (0-based) waits `retry_delay * (n + 1)` before the next one.
    pub retry_delay: Duration,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
            retry_delay: Duration::from_secs(10),
        }
    }
}

impl DeliverySettings {
    pub fn from_config(api: &ApiConfig) -> Self {
        Self {
            request_timeout: Duration::from_secs(api.request_timeout_seconds),
            probe_timeout: Duration::from_secs(api.probe_timeout_seconds),
            retry_delay: Duration::from_secs(api.retry_delay_seconds),
        }
    }
}

/// Sends attendance batches to the remote API.
///
/// Never returns an error: every transport or status failure is folded into
/// [`DeliveryOutcome::Failure`].
pub struct DeliveryClient {
    transport: Arc<dyn HttpTransport>,
    settings: DeliverySettings,
}

impl DeliveryClient {
    pub fn new(transport: Arc<dyn HttpTransport>, settings: DeliverySettings) -> Self {
        Self { transport, settings }
    }

    pub fn from_config(api: &ApiConfig) -> RelayResult<Self> {
        let transport = ReqwestTransport::new(&TransportSettings {
            user_agent: api.user_agent.clone(),
            insecure_skip_verify: api.insecure_skip_verify,
            auth_token: None,
        })?;
        Ok(Self::new(Arc::new(transport), DeliverySettings::from_config(api)))
    }

    /// Same transport, different timeouts and backoff.
    pub fn with_settings(&self, settings: DeliverySettings) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            settings,
        }
    }

    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.settings.retry_delay.saturating_mul(attempt.saturating_add(1))
    }

    pub async fn deliver(
        &self,
        records: Vec<AttendanceRecord>,
        endpoint: &str,
        max_retries: u32,
    ) -> DeliveryOutcome {
        self.deliver_until(records, endpoint, max_retries, detached()).await
    }

    /// Like [`deliver`](Self::deliver), but gives up between attempts once
    /// `stop` turns `true`.
    #[instrument(skip_all, fields(endpoint = %endpoint, records = records.len()))]
    pub async fn deliver_until(
        &self,
        records: Vec<AttendanceRecord>,
        endpoint: &str,
        max_retries: u32,
        mut stop: watch::Receiver<bool>,
    ) -> DeliveryOutcome {
        if records.is_empty() {
            info!("No records to deliver");
            return DeliveryOutcome::Success;
        }

        let payload = match serde_json::to_string(&records) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Cannot encode attendance batch: {}", e);
                return DeliveryOutcome::failure(format!("cannot encode batch: {e}"), false);
            }
        };

        let attempts = max_retries.max(1);
        let mut last_reason = String::new();

        for attempt in 0..attempts {
            info!(
                attempt = attempt + 1,
                max_retries = attempts,
                records = records.len(),
                "Sending attendance batch"
            );

            match self
                .transport
                .send(
                    HttpMethod::Post,
                    endpoint,
                    Some(payload.clone()),
                    self.settings.request_timeout,
                )
                .await
            {
                Ok(reply) if matches!(reply.status, 200 | 201) => {
                    log_acknowledgement(&reply);
                    return DeliveryOutcome::Success;
                }
                Ok(reply) => {
                    let body = truncate(&reply.body);
                    warn!(status = reply.status, body = %body, "API rejected attendance batch");
                    last_reason = format!("HTTP {}: {}", reply.status, body);
                }
                Err(e) => {
                    error!(attempt = attempt + 1, "Delivery attempt failed: {}", e);
                    last_reason = e.to_string();
                }
            }

            if attempt + 1 < attempts {
                let wait = self.backoff_for(attempt);
                info!(wait_seconds = wait.as_secs(), "Retrying after backoff");
                tokio::select! {
                    biased;
                    _ = stop_requested(&mut stop) => {
                        warn!("Delivery abandoned between attempts, service is stopping");
                        return DeliveryOutcome::failure(RelayError::Cancelled.to_string(), false);
                    }
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }

        error!(attempts, "Delivery failed after all attempts");
        DeliveryOutcome::failure(last_reason, true)
    }

    /// Best-effort reachability check: OPTIONS, then HEAD, then POST `[]`.
    #[instrument(skip(self))]
    pub async fn probe(&self, endpoint: &str) -> bool {
        let timeout = self.settings.probe_timeout;
        info!("Probing API endpoint");

        match self.transport.send(HttpMethod::Options, endpoint, None, timeout).await {
            Ok(reply) if matches!(reply.status, 200 | 204 | 405) => {
                info!(status = reply.status, "OPTIONS probe succeeded");
                return true;
            }
            Ok(reply) => debug!(status = reply.status, "OPTIONS probe inconclusive"),
            Err(e) if e.is_connection_refused() => {
                error!("API unreachable: {}", e);
                return false;
            }
            Err(e) => debug!("OPTIONS probe failed: {}", e),
        }

        match self.transport.send(HttpMethod::Head, endpoint, None, timeout).await {
            Ok(reply) if reply.status != 404 => {
                info!(status = reply.status, "HEAD probe succeeded");
                return true;
            }
            Ok(_) => debug!("HEAD probe returned 404"),
            Err(e) if e.is_connection_refused() => {
                error!("API unreachable: {}", e);
                return false;
            }
            Err(e) => debug!("HEAD probe failed: {}", e),
        }

        match self
            .transport
            .send(HttpMethod::Post, endpoint, Some("[]".to_string()), timeout)
            .await
        {
            Ok(reply) if reply.status != 404 => {
                info!(status = reply.status, "Empty POST probe succeeded");
                return true;
            }
            Ok(_) => debug!("Empty POST probe returned 404"),
            Err(e) if e.is_connection_refused() => {
                error!("API unreachable: {}", e);
                return false;
            }
            Err(e) if !e.to_string().contains("404") => {
                info!("Endpoint answered with a non-404 error, treating as reachable: {}", e);
                return true;
            }
            Err(e) => debug!("Empty POST probe failed: {}", e),
        }

        error!("No probe method reached the API");
        false
    }
}

fn log_acknowledgement(reply: &HttpReply) {
    match serde_json::from_str::<serde_json::Value>(&reply.body) {
        Ok(ack) => info!(
            status = reply.status,
            api_message = ack.get("message").and_then(|m| m.as_str()).unwrap_or("ok"),
            saved = ack.get("saved_count").and_then(|v| v.as_u64()).unwrap_or(0),
            duplicates = ack.get("duplicates_skipped").and_then(|v| v.as_u64()).unwrap_or(0),
            "Attendance batch accepted"
        ),
        Err(_) => info!(status = reply.status, "Attendance batch accepted"),
    }
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_LOGGED_BODY {
        body.to_string()
    } else {
        let head: String = body.chars().take(MAX_LOGGED_BODY).collect();
        format!("{head}...")
    }
}
