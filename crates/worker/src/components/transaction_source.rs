use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime};
use relay_config::DeviceConfig;
use relay_domain::{AttendanceRecord, AttendanceSource, PunchType, PUNCH_TIME_FORMAT};
use relay_errors::{RelayError, RelayResult};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::net::TcpStream;
use tracing::{debug, info, instrument, warn};

use super::transport::{HttpMethod, HttpTransport, ReqwestTransport, TransportSettings};

const TRANSACTIONS_PATH: &str = "/iclock/api/transactions/";
const QUERY_TIME_FORMAT: &str = "%Y-%m-%d%%20%H:%M:%S";
const MAX_PAGES: usize = 1_000;

/// One page of the terminal's transaction export.
#[derive(Debug, Deserialize)]
struct TransactionPage {
    #[serde(default)]
    count: u64,
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    data: Vec<Map<String, Value>>,
}

/// Reads punches from a terminal-management transaction export.
pub struct TransactionApiSource {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    address: String,
    port: u16,
    page_size: u32,
    timeout: Duration,
}

impl TransactionApiSource {
    pub fn new(transport: Arc<dyn HttpTransport>, config: &DeviceConfig) -> Self {
        Self {
            transport,
            base_url: config.source_url.trim_end_matches('/').to_string(),
            address: config.address.clone(),
            port: config.port,
            page_size: config.page_size,
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }

    pub fn from_config(config: &DeviceConfig, user_agent: &str) -> RelayResult<Self> {
        let transport = ReqwestTransport::new(&TransportSettings {
            user_agent: user_agent.to_string(),
            insecure_skip_verify: false,
            auth_token: config.auth_token.clone().filter(|t| !t.is_empty()),
        })?;
        Ok(Self::new(Arc::new(transport), config))
    }

    fn first_page_url(&self, start: NaiveDateTime, end: Option<NaiveDateTime>) -> String {
        let mut url = format!(
            "{}{}?page_size={}&start_time={}",
            self.base_url,
            TRANSACTIONS_PATH,
            self.page_size,
            start.format(QUERY_TIME_FORMAT)
        );
        if let Some(end) = end {
            url.push_str(&format!("&end_time={}", end.format(QUERY_TIME_FORMAT)));
        }
        url
    }

    async fn fetch_window(
        &self,
        start: NaiveDateTime,
        end: Option<NaiveDateTime>,
    ) -> RelayResult<Vec<AttendanceRecord>> {
        let mut records = Vec::new();
        let mut next = Some(self.first_page_url(start, end));
        let mut pages = 0;

        while let Some(url) = next.take() {
            pages += 1;
            if pages > MAX_PAGES {
                return Err(RelayError::device(format!(
                    "transaction export still paging after {MAX_PAGES} pages"
                )));
            }

            let reply = self
                .transport
                .send(HttpMethod::Get, &url, None, self.timeout)
                .await
                .map_err(|e| RelayError::device(format!("cannot read transactions: {e}")))?;
            if reply.status != 200 {
                return Err(RelayError::device(format!(
                    "transaction export returned HTTP {}",
                    reply.status
                )));
            }

            let page: TransactionPage = serde_json::from_str(&reply.body)
                .map_err(|e| RelayError::device(format!("malformed transaction page: {e}")))?;
            debug!(page = pages, total = page.count, items = page.data.len(), "Read transaction page");

            for item in page.data {
                match to_record(item) {
                    Ok(record) if record.is_within(start, end) => records.push(record),
                    Ok(_) => {}
                    Err(reason) => warn!("Skipping transaction: {}", reason),
                }
            }

            next = page.next.filter(|n| !n.is_empty() && *n != url);
        }

        info!(records = records.len(), "Fetched punches from terminal");
        Ok(records)
    }
}

/// Maps one export item. The export's own `id` is the transaction key and
/// moves to `transaction_id`; `id` carries the numeric employee code and
/// `state` the verification mode. Every other field is kept as-is.
fn to_record(mut item: Map<String, Value>) -> Result<AttendanceRecord, String> {
    let subject_id = match item.remove("emp_code") {
        Some(Value::String(code)) if !code.is_empty() => code,
        Some(Value::Number(code)) => code.to_string(),
        _ => return Err("missing emp_code".to_string()),
    };
    let timestamp = match item.remove("punch_time") {
        Some(Value::String(raw)) => NaiveDateTime::parse_from_str(&raw, PUNCH_TIME_FORMAT)
            .map_err(|e| format!("bad punch_time '{raw}': {e}"))?,
        _ => return Err(format!("missing punch_time for {subject_id}")),
    };
    let event_type = match item.remove("punch_state") {
        Some(Value::String(raw)) => raw.parse::<PunchType>()?,
        Some(Value::Number(code)) => code
            .as_u64()
            .and_then(|c| u8::try_from(c).ok())
            .map(PunchType::from)
            .ok_or_else(|| format!("bad punch_state {code}"))?,
        _ => PunchType::CheckIn,
    };

    let state = item
        .remove("verify_type")
        .filter(Value::is_u64)
        .unwrap_or_else(|| Value::from(0));

    item.retain(|_, v| !v.is_null());
    if let Some(transaction_id) = item.remove("id") {
        item.insert("transaction_id".to_string(), transaction_id);
    }
    if let Ok(id) = subject_id.trim().parse::<i64>() {
        item.insert("id".to_string(), Value::from(id));
    }
    item.insert("state".to_string(), state);

    Ok(AttendanceRecord {
        subject_id,
        timestamp,
        event_type,
        extra: item,
    })
}

/// TCP reachability of `address:port` within `timeout`.
pub async fn tcp_reachable(address: &str, port: u16, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect((address, port))).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            warn!(address, port, "Terminal unreachable: {}", e);
            false
        }
        Err(_) => {
            warn!(address, port, "Terminal connection timed out");
            false
        }
    }
}

#[async_trait]
impl AttendanceSource for TransactionApiSource {
    async fn test_connection(&self) -> bool {
        tcp_reachable(&self.address, self.port, self.timeout).await
    }

    #[instrument(skip(self), fields(source = %self.base_url))]
    async fn fetch_since(&self, since: DateTime<Local>) -> RelayResult<Vec<AttendanceRecord>> {
        self.fetch_window(since.naive_local(), None).await
    }

    #[instrument(skip(self), fields(source = %self.base_url))]
    async fn fetch_between(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
    ) -> RelayResult<Vec<AttendanceRecord>> {
        self.fetch_window(start.naive_local(), Some(end.naive_local())).await
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}
