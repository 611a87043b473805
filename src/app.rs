use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use relay_config::ConfigStore;
use relay_worker::{DeliveryClient, SyncService, TransactionApiSource};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{error, info};

/// Wires the configuration store, the terminal source and the delivery
/// client into one [`SyncService`].
pub struct Application {
    store: Arc<ConfigStore>,
    service: Arc<SyncService>,
}

impl Application {
    pub async fn open(config_path: &Path) -> Result<Self> {
        let store = Arc::new(
            ConfigStore::open(config_path)
                .with_context(|| format!("failed to open config file {}", config_path.display()))?,
        );
        let config = store.snapshot().await;

        let source = TransactionApiSource::from_config(&config.device, &config.api.user_agent)
            .context("failed to create terminal client")?;
        let delivery =
            DeliveryClient::from_config(&config.api).context("failed to create API client")?;

        info!(
            config = %config_path.display(),
            device = %config.device.address,
            api_url = %config.api.url,
            "Application initialized"
        );

        Ok(Self {
            service: Arc::new(SyncService::new(Arc::clone(&store), Arc::new(source), delivery)),
            store,
        })
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn service(&self) -> &Arc<SyncService> {
        &self.service
    }

    /// Runs the service until shutdown is requested. Fails if the service
    /// stops itself, so a supervisor can restart the process.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.service.start().await?;

        let mut watchdog = interval(Duration::from_secs(1));
        let self_stopped = loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Application received shutdown signal");
                    break false;
                }
                _ = watchdog.tick() => {
                    if !self.service.is_running().await {
                        break true;
                    }
                }
            }
        };

        if self_stopped {
            let status = self.service.status().await;
            error!(error_count = status.error_count, "Sync service stopped after repeated failures");
            bail!(
                "sync service stopped after {} consecutive failures",
                status.error_count
            );
        }

        self.service.stop().await?;
        Ok(())
    }
}
