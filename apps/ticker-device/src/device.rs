use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use tracing::info;

use crate::config::DeviceConfig;
use crate::hub::ClientHub;
use crate::invocations::InvocationTracker;
use crate::local_messages::LocalMessageStore;
use crate::pages::{self, MAIN_PAGE};
use crate::settings_store::{default_groups, SettingsStore};
use crate::spa::Spa;

/// Everything a connection handler or background task needs.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

struct DeviceInner {
    config: DeviceConfig,
    hub: ClientHub,
    tracker: InvocationTracker,
    spa: Spa,
    settings: SettingsStore,
    messages: LocalMessageStore,
    inputs: DashMap<String, String>,
}

impl Device {
    /// Prepares the data directory, loads the stores and installs the pages.
    pub async fn open(config: DeviceConfig) -> Result<Self> {
        let data_dir = config.data_dir.clone();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        pages::seed_system_files(&data_dir)
            .await
            .context("failed to seed system files")?;

        let settings = SettingsStore::open(&data_dir, default_groups())
            .await
            .context("failed to load settings")?;
        let messages = LocalMessageStore::open(&data_dir)
            .await
            .context("failed to load local messages")?;

        let hub = ClientHub::new(config.per_client_buffer);
        let tracker = InvocationTracker::new(config.ack_timeout);
        let spa = Spa::new(hub.clone(), tracker.clone());
        pages::install(&spa, &settings.groups()).context("failed to install pages")?;

        info!(
            data_dir = %data_dir.display(),
            groups = settings.keys().len(),
            messages = messages.list().len(),
            "device ready"
        );
        Ok(Self {
            inner: Arc::new(DeviceInner {
                config,
                hub,
                tracker,
                spa,
                settings,
                messages,
                inputs: DashMap::new(),
            }),
        })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.inner.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.inner.config.data_dir
    }

    pub fn hub(&self) -> &ClientHub {
        &self.inner.hub
    }

    pub fn tracker(&self) -> &InvocationTracker {
        &self.inner.tracker
    }

    pub fn spa(&self) -> &Spa {
        &self.inner.spa
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.inner.settings
    }

    pub fn messages(&self) -> &LocalMessageStore {
        &self.inner.messages
    }

    /// Last value reported for an input element.
    pub fn input_value(&self, id: &str) -> Option<String> {
        self.inner.inputs.get(id).map(|value| value.clone())
    }

    pub fn record_input(&self, id: &str, value: &str) {
        self.inner.inputs.insert(id.to_string(), value.to_string());
    }

    /// Re-reads both stores from disk and returns everyone to the main page.
    pub async fn restart(&self) -> Result<()> {
        info!("restarting device state");
        self.inner
            .settings
            .reload()
            .await
            .context("failed to reload settings")?;
        self.inner
            .messages
            .reload()
            .await
            .context("failed to reload local messages")?;
        self.inner.inputs.clear();
        self.inner
            .spa
            .activate_page(MAIN_PAGE)
            .context("main page missing")?;
        Ok(())
    }
}
