use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use harvd_events::{Event, EventBus, EventKind, ListenerId};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Persisted overall harvest timing, `time-keeper.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestTimestamps {
    pub last_harvest_started: Option<DateTime<Utc>>,
    pub last_harvest_finished: Option<DateTime<Utc>>,
    pub last_harvest_successful: Option<bool>,
}

/// Records overall harvest begin/end times from bus events and keeps
/// them across restarts.
pub struct TimeKeeper {
    cache_path: Option<PathBuf>,
    inner: RwLock<HarvestTimestamps>,
    bus: EventBus,
    listeners: Mutex<Vec<(EventKind, ListenerId)>>,
}

impl TimeKeeper {
    pub fn new(cache_path: Option<PathBuf>, bus: EventBus) -> Self {
        Self {
            cache_path,
            inner: RwLock::new(HarvestTimestamps::default()),
            bus,
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn attach(self: Arc<Self>) {
        let keeper = Arc::clone(&self);
        let started_id = self.bus.add_listener(EventKind::HarvestStarted, move |event| {
            if let Event::HarvestStarted { started_at, .. } = event {
                keeper.on_started(*started_at);
            }
        });

        let keeper = Arc::clone(&self);
        let finished_id = self.bus.add_listener(EventKind::HarvestFinished, move |event| {
            if let Event::HarvestFinished { success, finished_at, .. } = event {
                keeper.on_finished(*finished_at, *success);
            }
        });

        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.push((EventKind::HarvestStarted, started_id));
        listeners.push((EventKind::HarvestFinished, finished_id));
    }

    pub fn detach(&self) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        for (kind, id) in listeners.drain(..) {
            self.bus.remove_listener(kind, id);
        }
    }

    fn on_started(&self, at: DateTime<Utc>) {
        {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            inner.last_harvest_started = Some(at);
            inner.last_harvest_finished = None;
            inner.last_harvest_successful = None;
        }
        if let Err(e) = self.save_to_disk() {
            warn!(error = %e, "could not persist harvest timing");
        }
    }

    fn on_finished(&self, at: DateTime<Utc>, success: bool) {
        {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            inner.last_harvest_finished = Some(at);
            inner.last_harvest_successful = Some(success);
        }
        if let Err(e) = self.save_to_disk() {
            warn!(error = %e, "could not persist harvest timing");
        }
    }

    pub fn timestamps(&self) -> HarvestTimestamps {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Short human summary for the info endpoint.
    pub fn describe(&self) -> String {
        let snapshot = self.timestamps();
        match (snapshot.last_harvest_started, snapshot.last_harvest_finished) {
            (None, _) => "no harvest on record".to_string(),
            (Some(started), None) => format!("harvest running since {}", started.to_rfc3339()),
            (Some(_), Some(finished)) => {
                let verdict = match snapshot.last_harvest_successful {
                    Some(true) => "successful",
                    Some(false) => "failed",
                    None => "unknown",
                };
                format!("last harvest finished {} ({})", finished.to_rfc3339(), verdict)
            }
        }
    }

    pub fn load_from_disk(&self) -> std::io::Result<()> {
        let Some(path) = &self.cache_path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }
        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str::<HarvestTimestamps>(&content) {
            Ok(loaded) => {
                *self.inner.write().unwrap_or_else(|e| e.into_inner()) = loaded;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "unreadable time keeper file"),
        }
        Ok(())
    }

    pub fn save_to_disk(&self) -> std::io::Result<()> {
        let Some(path) = &self.cache_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let snapshot = self.timestamps();
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }
}
