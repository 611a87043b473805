use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, Timelike};
use relay_config::{AppConfig, ConfigStore};
use relay_domain::{AttendanceRecord, AttendanceSource, PunchType};
use relay_errors::{RelayError, RelayResult};
use relay_worker::{
    DeliveryClient, DeliverySettings, HttpMethod, HttpReply, HttpTransport, SyncService,
};

/// Terminal fake that replays scripted fetch results, then returns nothing.
#[derive(Default)]
struct ScriptedSource {
    script: Mutex<VecDeque<RelayResult<Vec<AttendanceRecord>>>>,
    always_fail: bool,
    fetched_since: Mutex<Vec<DateTime<Local>>>,
}

impl ScriptedSource {
    fn replaying(script: Vec<RelayResult<Vec<AttendanceRecord>>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    fn unreachable() -> Self {
        Self {
            always_fail: true,
            ..Self::default()
        }
    }

    fn fetches(&self) -> Vec<DateTime<Local>> {
        self.fetched_since.lock().unwrap().clone()
    }
}

#[async_trait]
impl AttendanceSource for ScriptedSource {
    async fn test_connection(&self) -> bool {
        !self.always_fail
    }

    async fn fetch_since(&self, since: DateTime<Local>) -> RelayResult<Vec<AttendanceRecord>> {
        self.fetched_since.lock().unwrap().push(since);
        if self.always_fail {
            return Err(RelayError::device("no route to terminal"));
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn fetch_between(
        &self,
        _start: DateTime<Local>,
        _end: DateTime<Local>,
    ) -> RelayResult<Vec<AttendanceRecord>> {
        Ok(Vec::new())
    }

    fn describe(&self) -> String {
        "scripted-terminal".to_string()
    }
}

/// Terminal fake whose fetch never completes.
#[derive(Default)]
struct HangingSource {
    fetches: AtomicUsize,
}

#[async_trait]
impl AttendanceSource for HangingSource {
    async fn test_connection(&self) -> bool {
        true
    }

    async fn fetch_since(&self, _since: DateTime<Local>) -> RelayResult<Vec<AttendanceRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn fetch_between(
        &self,
        _start: DateTime<Local>,
        _end: DateTime<Local>,
    ) -> RelayResult<Vec<AttendanceRecord>> {
        std::future::pending().await
    }

    fn describe(&self) -> String {
        "hanging-terminal".to_string()
    }
}

/// API fake answering every POST with a fixed status.
struct FixedStatusApi {
    status: Mutex<u16>,
    posts: Mutex<Vec<String>>,
}

impl FixedStatusApi {
    fn answering(status: u16) -> Self {
        Self {
            status: Mutex::new(status),
            posts: Mutex::new(Vec::new()),
        }
    }

    fn set_status(&self, status: u16) {
        *self.status.lock().unwrap() = status;
    }

    fn posts(&self) -> Vec<String> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for FixedStatusApi {
    async fn send(
        &self,
        method: HttpMethod,
        _url: &str,
        body: Option<String>,
        _timeout: Duration,
    ) -> RelayResult<HttpReply> {
        if method == HttpMethod::Post {
            self.posts.lock().unwrap().push(body.unwrap_or_default());
        }
        let status = *self.status.lock().unwrap();
        Ok(HttpReply::new(status, r#"{"message":"stored","saved_count":3,"duplicates_skipped":0}"#))
    }
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.api.max_retries = 3;
    config.api.retry_delay_seconds = 0;
    config.service.poll_interval_seconds = 1;
    config.service.max_errors = 5;
    config.service.shutdown_grace_seconds = 10;
    config
}

fn punches_today(n: u32) -> Vec<AttendanceRecord> {
    let morning = Local::now()
        .naive_local()
        .date()
        .and_hms_opt(8, 0, 0)
        .unwrap();
    (0..n)
        .map(|i| {
            AttendanceRecord::new(
                format!("{}", 1000 + i),
                morning.with_minute(i).unwrap(),
                PunchType::CheckIn,
            )
            .with_extra("terminal_sn", serde_json::json!("CJDE193560303"))
        })
        .collect()
}

fn build(
    config: AppConfig,
    source: Arc<dyn AttendanceSource>,
    api: Arc<FixedStatusApi>,
) -> SyncService {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let delivery = DeliveryClient::new(api, DeliverySettings::default());
    SyncService::new(Arc::new(ConfigStore::in_memory(config)), source, delivery)
}

async fn wait_until_stopped(service: &SyncService) {
    for _ in 0..600 {
        if !service.is_running().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("service did not stop");
}

#[tokio::test]
async fn delivered_batch_advances_cursor() {
    let source = Arc::new(ScriptedSource::replaying(vec![Ok(punches_today(3))]));
    let api = Arc::new(FixedStatusApi::answering(201));
    let service = build(test_config(), source.clone(), api.clone());

    assert!(service.force_sync().await);

    let status = service.status().await;
    assert!(status.last_successful_sync.is_some());
    assert_eq!(status.last_check, status.last_successful_sync);
    assert_eq!(status.error_count, 0);

    let posts = api.posts();
    assert_eq!(posts.len(), 1);
    let sent: serde_json::Value = serde_json::from_str(&posts[0]).unwrap();
    let sent = sent.as_array().unwrap();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0]["uid"], "1000");
    assert_eq!(sent[0]["type"], 0);
    assert_eq!(sent[0]["terminal_sn"], "CJDE193560303");
}

#[tokio::test]
async fn rejected_batch_keeps_cursor_and_refetches_same_window() {
    let source = Arc::new(ScriptedSource::replaying(vec![
        Ok(punches_today(1)),
        Ok(punches_today(2)),
        Ok(punches_today(2)),
    ]));
    let api = Arc::new(FixedStatusApi::answering(200));
    let service = build(test_config(), source.clone(), api.clone());

    assert!(service.force_sync().await);
    let synced = service.status().await.last_successful_sync;

    api.set_status(500);
    assert!(!service.force_sync().await);

    let status = service.status().await;
    assert_eq!(status.error_count, 1);
    assert_eq!(status.last_successful_sync, synced);
    assert_eq!(api.posts().len(), 1 + 3);

    assert!(!service.force_sync().await);
    let fetches = source.fetches();
    assert_eq!(fetches.len(), 3);
    assert_eq!(Some(fetches[1]), synced);
    assert_eq!(fetches[2], fetches[1]);
    assert_eq!(service.status().await.error_count, 2);
}

#[tokio::test(start_paused = true)]
async fn consecutive_failures_stop_the_service() {
    let source = Arc::new(ScriptedSource::unreachable());
    let api = Arc::new(FixedStatusApi::answering(200));
    let service = build(test_config(), source.clone(), api.clone());

    service.start().await.unwrap();
    wait_until_stopped(&service).await;

    let status = service.status().await;
    assert!(!status.running);
    assert_eq!(status.error_count, 5);
    assert_eq!(source.fetches().len(), 5);
    assert_eq!(status.last_check, None);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(source.fetches().len(), 5);

    service.stop().await.unwrap();
    service.start().await.unwrap();
    assert!(service.is_running().await);
    assert_eq!(service.status().await.error_count, 0);
    wait_until_stopped(&service).await;
    assert_eq!(source.fetches().len(), 10);
    assert!(api.posts().is_empty());
}

#[tokio::test]
async fn empty_fetch_only_updates_last_check() {
    let source = Arc::new(ScriptedSource::replaying(Vec::new()));
    let api = Arc::new(FixedStatusApi::answering(200));
    let service = build(test_config(), source, api.clone());

    assert!(service.force_sync().await);

    let status = service.status().await;
    assert!(status.last_check.is_some());
    assert_eq!(status.last_successful_sync, None);
    assert_eq!(status.error_count, 0);
    assert!(api.posts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_abandons_retries_between_attempts() {
    let mut config = test_config();
    config.api.retry_delay_seconds = 120;
    let source = Arc::new(ScriptedSource::replaying(vec![Ok(punches_today(2))]));
    let api = Arc::new(FixedStatusApi::answering(503));
    let service = build(config, source, api.clone());

    service.start().await.unwrap();
    for _ in 0..100 {
        if !api.posts().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(api.posts().len(), 1);

    let started = tokio::time::Instant::now();
    service.stop().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(api.posts().len(), 1);
    assert!(!service.is_running().await);
}

#[tokio::test(start_paused = true)]
async fn stop_aborts_a_hung_cycle_after_the_grace_period() {
    let source = Arc::new(HangingSource::default());
    let api = Arc::new(FixedStatusApi::answering(201));
    let service = build(test_config(), source.clone(), api.clone());

    service.start().await.unwrap();
    for _ in 0..100 {
        if source.fetches.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

    let started = tokio::time::Instant::now();
    service.stop().await.unwrap();
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(10), "stopped after {waited:?}");
    assert!(waited < Duration::from_secs(15), "stopped after {waited:?}");
    assert!(!service.is_running().await);
    assert!(api.posts().is_empty());

    service.start().await.unwrap();
    assert!(service.is_running().await);
    service.stop().await.unwrap();
    assert!(!service.is_running().await);
}

#[tokio::test]
async fn status_snapshots_match_a_completed_cycle() {
    let source = Arc::new(ScriptedSource::replaying(vec![
        Ok(punches_today(2)),
        Ok(punches_today(2)),
    ]));
    let api = Arc::new(FixedStatusApi::answering(201));
    let service = Arc::new(build(test_config(), source, api.clone()));

    let reader = {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..200 {
                let status = service.status().await;
                seen.push((status.error_count, status.last_successful_sync.is_some()));
                tokio::task::yield_now().await;
            }
            seen
        })
    };

    assert!(service.force_sync().await);
    api.set_status(500);
    assert!(!service.force_sync().await);

    for (error_count, synced) in reader.await.unwrap() {
        let consistent = matches!((error_count, synced), (0, false) | (0, true) | (1, true));
        assert!(consistent, "inconsistent snapshot: errors={error_count} synced={synced}");
    }
}
