use std::collections::BTreeSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use harvd_events::{Event, EventBus};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ScheduleError;

#[derive(Debug, Serialize, Deserialize, Default)]
struct ScheduleFile {
    crons: Vec<String>,
}

/// Cron-driven harvest trigger.
///
/// Holds a set of 5-field UNIX cron expressions, persisted as JSON on
/// every mutation. One timer task sleeps until the earliest next fire
/// across all entries; firing sends `StartHarvest` on the bus and
/// re-arms. Precision is one minute.
pub struct Scheduler {
    cache_path: Option<PathBuf>,
    bus: EventBus,
    crons: RwLock<BTreeSet<String>>,
    rearm: Notify,
    stopped: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(cache_path: Option<PathBuf>, bus: EventBus) -> Self {
        Self {
            cache_path,
            bus,
            crons: RwLock::new(BTreeSet::new()),
            rearm: Notify::new(),
            stopped: AtomicBool::new(false),
            timer: Mutex::new(None),
        }
    }

    // ── Mutation ──────────────────────────────────────────────────────────────

    /// Schedule `expression`. Rejects syntactically invalid expressions
    /// and duplicates.
    pub fn add(&self, expression: &str) -> Result<(), ScheduleError> {
        let normalized = normalize(expression)?;
        {
            let mut crons = self.crons.write().unwrap_or_else(|e| e.into_inner());
            if !crons.insert(normalized.clone()) {
                return Err(ScheduleError::Duplicate(normalized));
            }
        }
        info!(cron = %normalized, "schedule added");
        self.save_to_disk()?;
        self.rearm.notify_waiters();
        Ok(())
    }

    /// Remove `expression`. Unknown entries are rejected.
    pub fn delete(&self, expression: &str) -> Result<(), ScheduleError> {
        let normalized = normalize(expression)?;
        {
            let mut crons = self.crons.write().unwrap_or_else(|e| e.into_inner());
            if !crons.remove(&normalized) {
                return Err(ScheduleError::Unknown(normalized));
            }
        }
        info!(cron = %normalized, "schedule removed");
        self.save_to_disk()?;
        self.rearm.notify_waiters();
        Ok(())
    }

    /// Remove every entry. Succeeds on an empty set.
    pub fn delete_all(&self) -> Result<(), ScheduleError> {
        self.crons
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        info!("all schedules removed");
        self.save_to_disk()?;
        self.rearm.notify_waiters();
        Ok(())
    }

    // ── Lookups ───────────────────────────────────────────────────────────────

    pub fn size(&self) -> usize {
        self.crons.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn get_all(&self) -> Vec<String> {
        self.crons
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// The earliest upcoming fire time across all entries.
    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        let crons = self.crons.read().unwrap_or_else(|e| e.into_inner());
        crons
            .iter()
            .filter_map(|expr| parse(expr).ok())
            .filter_map(|schedule| schedule.upcoming(Utc).next())
            .min()
    }

    // ── Persistence ───────────────────────────────────────────────────────────

    pub fn load_from_disk(&self) -> Result<(), ScheduleError> {
        let Some(path) = &self.cache_path else {
            return Ok(());
        };
        if !path.exists() {
            debug!(path = %path.display(), "no schedule cache yet");
            return Ok(());
        }
        let content = std::fs::read_to_string(path).map_err(|e| ScheduleError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let file: ScheduleFile =
            serde_json::from_str(&content).map_err(|e| ScheduleError::Json {
                path: path.display().to_string(),
                source: e,
            })?;

        let mut crons = self.crons.write().unwrap_or_else(|e| e.into_inner());
        for expr in file.crons {
            match normalize(&expr) {
                Ok(normalized) => {
                    crons.insert(normalized);
                }
                Err(e) => warn!(cron = %expr, error = %e, "skipping unreadable schedule entry"),
            }
        }
        Ok(())
    }

    pub fn save_to_disk(&self) -> Result<(), ScheduleError> {
        let Some(path) = &self.cache_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ScheduleError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        let file = ScheduleFile { crons: self.get_all() };
        let json = serde_json::to_string_pretty(&file).map_err(|e| ScheduleError::Json {
            path: path.display().to_string(),
            source: e,
        })?;
        std::fs::write(path, json).map_err(|e| ScheduleError::Io {
            path: path.display().to_string(),
            source: e,
        })
    }

    // ── Timer ─────────────────────────────────────────────────────────────────

    /// Spawn the timer task. Must run inside a tokio runtime.
    pub fn start(self: Arc<Self>) {
        let scheduler = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            loop {
                if scheduler.stopped.load(Ordering::SeqCst) {
                    break;
                }
                match scheduler.next_fire() {
                    None => {
                        // Nothing scheduled; wait for a mutation.
                        scheduler.rearm.notified().await;
                    }
                    Some(at) => {
                        let wait = (at - Utc::now())
                            .to_std()
                            .unwrap_or(Duration::ZERO);
                        tokio::select! {
                            _ = tokio::time::sleep(wait) => {
                                info!(fired_at = %at, "schedule fired, requesting harvest");
                                scheduler.bus.send(&Event::StartHarvest);
                            }
                            // A mutation re-arms against the new set.
                            _ = scheduler.rearm.notified() => {}
                        }
                    }
                }
            }
        });
        *self.timer.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Cancel the timer and clear the set. Called on context teardown;
    /// the persisted file is left untouched.
    pub fn on_context_destroyed(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(handle) = self.timer.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
        self.crons
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

/// Collapse whitespace and validate the 5-field form.
fn normalize(expression: &str) -> Result<String, ScheduleError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(ScheduleError::InvalidCron {
            expression: expression.to_string(),
            message: format!("expected 5 fields, got {}", fields.len()),
        });
    }
    let normalized = fields.join(" ");
    parse(&normalized)?;
    Ok(normalized)
}

/// Parse a normalized 5-field expression. The cron crate wants a
/// seconds field, so one is prepended.
fn parse(expression: &str) -> Result<Schedule, ScheduleError> {
    Schedule::from_str(&format!("0 {}", expression)).map_err(|e| ScheduleError::InvalidCron {
        expression: expression.to_string(),
        message: e.to_string(),
    })
}
