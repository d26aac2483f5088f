use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use harvd_config::{Category, Configuration, Parameter};
use harvd_domain::{EtlHealth, EtlName, EtlStatus, HistoryEntry, TimestampedHistory};
use harvd_events::{Event, EventBus};
use tracing::{info, warn};

use crate::contracts::EtlContext;
use crate::error::EtlError;
use crate::pipeline::{Etl, HarvestOutcome, PrepareOutcome};
use crate::registry::LoaderRegistry;
use crate::snapshot::{sha256_hex, EtlSnapshot};

const HARVESTER_CATEGORY: &str = "harvester";
const AUTO_SUBMIT_KEY: &str = "autoSubmit";
const AUTO_SAVE_KEY: &str = "autoSave";
const AGGREGATE_HEALTH_CAPACITY: usize = 10;

/// Coordinates all registered ETL pipelines as one harvest.
///
/// Pipelines run sequentially in registration order on a single
/// worker. A per-pipeline failure is recorded but does not stop the
/// run; only an abort command short-circuits the queue.
pub struct EtlManager {
    module_name: String,
    cache_folder: PathBuf,
    bus: EventBus,
    config: Arc<Configuration>,
    loaders: Arc<LoaderRegistry>,
    pipelines: RwLock<Vec<Arc<dyn Etl>>>,
    queue: Mutex<Vec<Arc<dyn Etl>>>,
    health_history: RwLock<TimestampedHistory<EtlHealth>>,
    harvester_hash: RwLock<Option<String>>,
    running: AtomicBool,
    params_registered: AtomicBool,
}

impl EtlManager {
    pub fn new(
        module_name: impl Into<String>,
        cache_folder: PathBuf,
        config: Arc<Configuration>,
        bus: EventBus,
        loaders: Arc<LoaderRegistry>,
    ) -> Self {
        Self {
            module_name: module_name.into(),
            cache_folder,
            bus,
            config,
            loaders,
            pipelines: RwLock::new(Vec::new()),
            queue: Mutex::new(Vec::new()),
            health_history: RwLock::new(TimestampedHistory::new(
                EtlHealth::Ok,
                AGGREGATE_HEALTH_CAPACITY,
            )),
            harvester_hash: RwLock::new(None),
            running: AtomicBool::new(false),
            params_registered: AtomicBool::new(false),
        }
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    fn etl_dir(&self) -> PathBuf {
        self.cache_folder.join("etl")
    }

    /// The context handed to every stage of a pipeline named `name`.
    pub fn context_for(&self, name: EtlName) -> EtlContext {
        EtlContext {
            name,
            config: Arc::clone(&self.config),
            bus: self.bus.clone(),
            loaders: Arc::clone(&self.loaders),
        }
    }

    // ── Registration ──────────────────────────────────────────────────────────

    /// Add a pipeline. Names must be unique within the service. The
    /// manager's own parameters are registered on the first call.
    pub fn register(&self, etl: Arc<dyn Etl>) -> Result<(), EtlError> {
        if !self.params_registered.swap(true, Ordering::SeqCst) {
            let category = Category::idle_only(HARVESTER_CATEGORY);
            self.config
                .register_parameter(Parameter::boolean(category.clone(), AUTO_SUBMIT_KEY, false));
            self.config
                .register_parameter(Parameter::boolean(category, AUTO_SAVE_KEY, false));
        }

        let mut pipelines = self.pipelines.write().unwrap_or_else(|e| e.into_inner());
        if pipelines.iter().any(|p| p.name() == etl.name()) {
            return Err(EtlError::Precondition(format!(
                "a pipeline named '{}' is already registered",
                etl.name()
            )));
        }
        pipelines.push(etl);
        Ok(())
    }

    pub fn pipelines(&self) -> Vec<Arc<dyn Etl>> {
        self.pipelines
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Etl>> {
        self.pipelines()
            .into_iter()
            .find(|p| p.name().as_str().eq_ignore_ascii_case(name))
    }

    /// Initialize every registered pipeline, in order.
    pub fn init_all(&self) -> Result<(), EtlError> {
        for etl in self.pipelines() {
            etl.init(self.context_for(etl.name().clone()))?;
        }
        Ok(())
    }

    /// Best-effort update of every pipeline; failures are logged and
    /// retried at the next harvest's prepare step.
    pub fn update_all(&self) {
        for etl in self.pipelines() {
            if let Err(e) = etl.update() {
                warn!(etl = %etl.name(), error = %e, "initial source update failed");
            }
        }
    }

    // ── Harvest ───────────────────────────────────────────────────────────────

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Prepare every pipeline and build the harvest queue from those
    /// that are ready. Claims the single harvest slot; the slot is
    /// released when `harvest()` finishes, or here when preparation
    /// fails.
    pub fn prepare_harvest(&self) -> Result<(), EtlError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(EtlError::Busy);
        }

        let mut ready = Vec::new();
        for etl in self.pipelines() {
            match etl.prepare_harvest() {
                PrepareOutcome::Ready => ready.push(etl),
                PrepareOutcome::Skipped(reason) => {
                    info!(etl = %etl.name(), reason = %reason, "pipeline skipped");
                }
                PrepareOutcome::Failed(reason) => {
                    warn!(etl = %etl.name(), reason = %reason, "pipeline failed to prepare");
                }
            }
        }

        if ready.is_empty() {
            self.running.store(false, Ordering::SeqCst);
            return Err(EtlError::Precondition("no eligible pipelines".to_string()));
        }

        let merged = merge_hashes(ready.iter().filter_map(|e| e.hash()));
        *self.harvester_hash.write().unwrap_or_else(|e| e.into_inner()) = merged;

        *self.queue.lock().unwrap_or_else(|e| e.into_inner()) = ready;
        Ok(())
    }

    /// Run the queued pipelines to completion. Blocking; executed on
    /// the harvest worker.
    pub fn harvest(&self) {
        let queue: Vec<Arc<dyn Etl>> = self
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let ranges: Vec<(u64, u64)> = queue.iter().filter_map(|e| e.range()).collect();
        self.bus.send(&Event::HarvestStarted {
            started_at: Utc::now(),
            start_index: ranges.iter().map(|(from, _)| *from).min(),
            end_index: ranges.iter().map(|(_, to)| *to).max(),
        });

        let mut success = true;
        let mut aborted = false;
        for etl in &queue {
            if !etl.status().is_busy() {
                // Cancelled while waiting in the queue.
                continue;
            }
            // The pipeline emits DocumentsHarvested per loaded document.
            match etl.harvest() {
                HarvestOutcome::Completed { .. } => {}
                HarvestOutcome::Aborted { .. } => aborted = true,
                HarvestOutcome::Failed { .. } => success = false,
            }
        }

        let health = self.health();
        self.health_history
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .add_value(health);

        let hash = self.harvester_hash();
        self.bus.send(&Event::HarvestFinished {
            success: success && !aborted,
            health,
            hash,
            finished_at: Utc::now(),
        });

        if success && !aborted {
            if self.auto_submit() {
                if let Err(e) = self.submit() {
                    warn!(error = %e, "automatic submission failed");
                }
            }
            if self.auto_save() {
                if let Err(e) = self.save_to_disk() {
                    warn!(error = %e, "automatic snapshot save failed");
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        if aborted {
            self.bus.send(&Event::AbortingFinished);
        }
    }

    /// Abort the harvest: flag the running pipeline, cancel the queued
    /// remainder. The worker emits `AbortingFinished` once it drains;
    /// with no worker running the event is emitted here.
    pub fn abort(&self) {
        self.bus.send(&Event::AbortingStarted);
        let queue: Vec<Arc<dyn Etl>> = self
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for etl in &queue {
            match etl.status() {
                EtlStatus::Harvesting => etl.abort_harvest(),
                EtlStatus::Queued => etl.cancel_harvest(),
                _ => {}
            }
        }
        if !self.is_running() {
            self.bus.send(&Event::AbortingFinished);
        }
    }

    // ── Submission ────────────────────────────────────────────────────────────

    fn auto_submit(&self) -> bool {
        self.config
            .get_boolean_value(&format!("{}/{}", HARVESTER_CATEGORY, AUTO_SUBMIT_KEY))
            .unwrap_or(false)
    }

    fn auto_save(&self) -> bool {
        self.config
            .get_boolean_value(&format!("{}/{}", HARVESTER_CATEGORY, AUTO_SAVE_KEY))
            .unwrap_or(false)
    }

    /// Flush every pipeline's loader to its sink.
    pub fn submit(&self) -> Result<(), EtlError> {
        self.bus.send(&Event::SubmissionStarted);
        let mut first_error = None;
        for etl in self.pipelines() {
            if let Err(e) = etl.flush_loader() {
                warn!(etl = %etl.name(), error = %e, "loader flush failed");
                first_error.get_or_insert(e);
            }
        }
        self.bus.send(&Event::SubmissionFinished { success: first_error.is_none() });
        match first_error {
            None => Ok(()),
            Some(e) => Err(EtlError::Loader(e)),
        }
    }

    // ── Aggregates ────────────────────────────────────────────────────────────

    /// Worst health across all pipelines.
    pub fn health(&self) -> EtlHealth {
        self.pipelines()
            .iter()
            .fold(EtlHealth::Ok, |acc, etl| acc.worst(etl.health()))
    }

    pub fn health_history(&self) -> Vec<HistoryEntry<EtlHealth>> {
        self.health_history
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .to_vec()
    }

    /// Total number of documents loaded across all pipelines.
    pub fn total_harvested(&self) -> u64 {
        self.pipelines().iter().map(|e| e.harvested_count()).sum()
    }

    /// Sum of known per-pipeline document bounds; `-1` when any
    /// enabled pipeline's bound is unknown.
    pub fn total_max_documents(&self) -> i64 {
        let mut total = 0i64;
        for etl in self.pipelines() {
            if !etl.is_enabled() {
                continue;
            }
            match etl.max_documents() {
                -1 => return -1,
                n => total += n,
            }
        }
        total
    }

    pub fn harvester_hash(&self) -> Option<String> {
        self.harvester_hash
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// True when the merged checksum of the pipelines' current version
    /// hashes differs from the one recorded at the last harvest.
    pub fn is_outdated(&self) -> bool {
        let current = merge_hashes(
            self.pipelines()
                .iter()
                .filter(|e| e.is_enabled())
                .filter_map(|e| e.hash()),
        );
        current != self.harvester_hash()
    }

    // ── Persistence ───────────────────────────────────────────────────────────

    /// Write one snapshot file per pipeline under `etl/`.
    pub fn save_to_disk(&self) -> Result<(), EtlError> {
        let dir = self.etl_dir();
        std::fs::create_dir_all(&dir).map_err(|e| EtlError::Io {
            path: dir.display().to_string(),
            source: e,
        })?;
        for etl in self.pipelines() {
            let path = dir.join(format!("{}.json", etl.name()));
            let json = serde_json::to_string_pretty(&etl.snapshot()).map_err(|e| {
                EtlError::Json { path: path.display().to_string(), source: e }
            })?;
            std::fs::write(&path, json).map_err(|e| EtlError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Fold persisted snapshots into the registered pipelines, then
    /// rebuild the merged checksum from what was restored.
    pub fn load_from_disk(&self) -> Result<(), EtlError> {
        let dir = self.etl_dir();
        for etl in self.pipelines() {
            let path = dir.join(format!("{}.json", etl.name()));
            if !path.exists() {
                continue;
            }
            let content = std::fs::read_to_string(&path).map_err(|e| EtlError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
            match serde_json::from_str::<EtlSnapshot>(&content) {
                Ok(snapshot) => etl.load_snapshot(snapshot),
                Err(e) => {
                    warn!(etl = %etl.name(), error = %e, "skipping unreadable snapshot");
                }
            }
        }
        let merged = merge_hashes(
            self.pipelines()
                .iter()
                .filter(|e| e.is_enabled())
                .filter_map(|e| e.hash()),
        );
        *self.harvester_hash.write().unwrap_or_else(|e| e.into_inner()) = merged;
        Ok(())
    }
}

/// SHA-256 over the concatenation of per-pipeline hashes. `None` when
/// there is nothing to merge.
fn merge_hashes(hashes: impl Iterator<Item = String>) -> Option<String> {
    let concat: String = hashes.collect();
    if concat.is_empty() {
        None
    } else {
        Some(sha256_hex(concat.as_bytes()))
    }
}
