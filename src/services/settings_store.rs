use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context, Result};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::models::{Settings, SettingsPatch};
use crate::utils::config::apply_env_defaults;

/// Process-wide settings with an explicit change channel. The persisted copy
/// is what lives in `settings.json`; subscribers see the effective copy with
/// environment defaults applied.
#[derive(Clone)]
pub struct SettingsStore {
    path: Arc<PathBuf>,
    persisted: Arc<Mutex<Settings>>,
    tx: Arc<watch::Sender<Settings>>,
}

impl SettingsStore {
    /// Load stored settings merged over defaults and write the merged object
    /// back, so a fresh install ends up with every default on disk.
    pub fn open(path: PathBuf) -> Result<Self> {
        let (persisted, healthy) = match read_settings(&path) {
            Ok(settings) => (settings, true),
            Err(e) => {
                log::warn!("Ignoring unreadable settings at {}: {:#}", path.display(), e);
                (Settings::default(), false)
            }
        };

        if healthy {
            write_settings(&path, &persisted)?;
        }

        let (tx, _rx) = watch::channel(effective(&persisted));
        Ok(Self {
            path: Arc::new(path),
            persisted: Arc::new(Mutex::new(persisted)),
            tx: Arc::new(tx),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub fn current(&self) -> Settings {
        self.tx.borrow().clone()
    }

    /// The settings as written to disk, without environment defaults. This
    /// is what an editing surface should show and send back.
    pub fn stored(&self) -> Settings {
        match self.persisted.lock() {
            Ok(persisted) => persisted.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }

    /// Apply a partial update, persist it and notify subscribers. The patch
    /// is applied over what is on disk now, so edits made by another process
    /// since this store last looked are kept. Returns the stored settings.
    pub fn update(&self, patch: SettingsPatch) -> Result<Settings> {
        let mut persisted = self
            .persisted
            .lock()
            .map_err(|_| anyhow!("settings lock poisoned"))?;

        let mut next = match read_settings(&self.path) {
            Ok(on_disk) => on_disk,
            Err(e) => {
                log::warn!("Updating from in-memory settings: {:#}", e);
                persisted.clone()
            }
        };
        next.apply(patch);
        write_settings(&self.path, &next)?;
        *persisted = next;

        self.tx.send_replace(effective(&persisted));
        log::info!("Settings updated");
        Ok(persisted.clone())
    }

    pub fn set_field(&self, key: &str, value: &str) -> Result<Settings> {
        let patch = SettingsPatch::from_key_value(key, value).map_err(|e| anyhow!(e))?;
        self.update(patch)
    }

    /// Re-read the settings file and publish it if it differs from what this
    /// store holds. Returns whether subscribers were notified. An unreadable
    /// file keeps the current settings.
    pub fn reload(&self) -> Result<bool> {
        let mut persisted = self
            .persisted
            .lock()
            .map_err(|_| anyhow!("settings lock poisoned"))?;

        let on_disk = match read_settings(&self.path) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Keeping current settings: {:#}", e);
                return Ok(false);
            }
        };
        if on_disk == *persisted {
            return Ok(false);
        }

        *persisted = on_disk;
        self.tx.send_replace(effective(&persisted));
        log::info!("Settings reloaded from {}", self.path.display());
        Ok(true)
    }

    /// Poll the settings file until cancelled, reloading whenever its
    /// modification time or size changes. Picks up edits made by the CLI
    /// while the host is running.
    pub async fn follow_file(self, period: Duration, cancel: CancellationToken) {
        let mut last_seen = file_stamp(&self.path);
        if let Err(e) = self.reload() {
            log::error!("Failed to reload settings: {:#}", e);
        }
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let stamp = file_stamp(&self.path);
                    if stamp == last_seen {
                        continue;
                    }
                    last_seen = stamp;
                    if let Err(e) = self.reload() {
                        log::error!("Failed to reload settings: {:#}", e);
                    }
                }
            }
        }
    }
}

fn file_stamp(path: &Path) -> Option<(SystemTime, u64)> {
    let meta = path.metadata().ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

fn effective(persisted: &Settings) -> Settings {
    let mut settings = persisted.clone();
    apply_env_defaults(&mut settings);
    settings
}

fn read_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let settings = serde_json::from_str::<Settings>(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(settings)
}

fn write_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
