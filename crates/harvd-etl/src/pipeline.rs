use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use harvd_config::{Category, Parameter};
use harvd_domain::{EtlHealth, EtlName, EtlStatus, StateTag, TimestampedHistory};
use harvd_events::Event;
use tracing::{info, warn};

use crate::contracts::{EtlContext, Extractor, Loader, Transformer};
use crate::error::{EtlError, LoaderError};
use crate::snapshot::{sha256_hex, EtlSnapshot};

const STATUS_HISTORY_CAPACITY: usize = 10;
const HEALTH_HISTORY_CAPACITY: usize = 1;

pub const ENABLED_KEY: &str = "enabled";
pub const LOADER_TYPE_KEY: &str = "loaderType";
pub const RANGE_FROM_KEY: &str = "rangeFrom";
pub const RANGE_TO_KEY: &str = "rangeTo";

// ── Outcomes ──────────────────────────────────────────────────────────────────

/// Result of [`Etl::prepare_harvest`]. Skips and failures carry the
/// reason; neither stops the manager from preparing the remaining
/// pipelines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareOutcome {
    Ready,
    Skipped(String),
    Failed(String),
}

/// Result of [`Etl::harvest`]. `count` is the number of documents the
/// loader accepted before the run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarvestOutcome {
    Completed { count: u64 },
    Aborted { count: u64 },
    Failed { health: EtlHealth, message: String, count: u64 },
}

impl HarvestOutcome {
    pub fn count(&self) -> u64 {
        match self {
            HarvestOutcome::Completed { count }
            | HarvestOutcome::Aborted { count }
            | HarvestOutcome::Failed { count, .. } => *count,
        }
    }
}

// ── Object-safe pipeline facade ───────────────────────────────────────────────

/// Lifecycle surface of one Extract→Transform→Load pipeline, as the
/// manager sees it. [`EtlPipeline`] is the single implementation; the
/// trait erases its stage type parameters.
pub trait Etl: Send + Sync {
    fn name(&self) -> &EtlName;

    /// Pre: status `Initializing`. Registers this pipeline's parameters
    /// and stores the context. Post: status `Idle`.
    fn init(&self, ctx: EtlContext) -> Result<(), EtlError>;

    /// Recreate the extractor, recompute the version hash and the
    /// maximum document count.
    fn update(&self) -> Result<(), EtlError>;

    fn prepare_harvest(&self) -> PrepareOutcome;

    fn harvest(&self) -> HarvestOutcome;

    /// Cooperative abort: `Harvesting` → `Aborting` (the harvest loop
    /// observes the flag between items), `Queued` → `Done`. Other
    /// states are ignored.
    fn abort_harvest(&self);

    /// Fast-path exit for a pipeline that never started:
    /// `Queued` → `Cancelling` → `Done`, clearing stage resources.
    /// A no-op on a `Done` pipeline.
    fn cancel_harvest(&self);

    fn status(&self) -> EtlStatus;
    fn health(&self) -> EtlHealth;
    fn harvested_count(&self) -> u64;

    /// `min(size, rangeTo) - rangeFrom` for ranged pipelines, the
    /// extractor size otherwise; `-1` when the size is unknown.
    fn max_documents(&self) -> i64;

    fn hash(&self) -> Option<String>;
    fn is_enabled(&self) -> bool;

    /// The configured `[from, to)` record range of a ranged pipeline.
    fn range(&self) -> Option<(u64, u64)>;

    /// Flush the loader's buffered documents, if a loader is active.
    fn flush_loader(&self) -> Result<(), LoaderError>;

    fn snapshot(&self) -> EtlSnapshot;
    fn load_snapshot(&self, snapshot: EtlSnapshot);
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

struct Stages<X, T> {
    extractor: Option<X>,
    transformer: Option<T>,
    loader: Option<Box<dyn Loader>>,
}

/// One harvest unit composing Extract → Transform → Load as a lazy
/// pull pipeline.
///
/// Stage factories recreate the extractor on every `update()` and the
/// transformer/loader on every `prepare_harvest()`, so a harvest always
/// runs against fresh stage state.
pub struct EtlPipeline<X, T>
where
    X: Extractor,
    T: Transformer<Input = X::Item>,
{
    name: EtlName,
    ranged: bool,
    extractor_factory: Box<dyn Fn() -> X + Send + Sync>,
    transformer_factory: Box<dyn Fn() -> T + Send + Sync>,
    status_history: RwLock<TimestampedHistory<EtlStatus>>,
    health_history: RwLock<TimestampedHistory<EtlHealth>>,
    harvested: AtomicU64,
    extractor_size: AtomicI64,
    hash: RwLock<Option<String>>,
    stages: Mutex<Stages<X, T>>,
    ctx: RwLock<Option<EtlContext>>,
}

impl<X, T> EtlPipeline<X, T>
where
    X: Extractor + 'static,
    T: Transformer<Input = X::Item> + 'static,
{
    pub fn new<FX, FT>(name: EtlName, extractor_factory: FX, transformer_factory: FT) -> Self
    where
        FX: Fn() -> X + Send + Sync + 'static,
        FT: Fn() -> T + Send + Sync + 'static,
    {
        let mut status_history =
            TimestampedHistory::new(EtlStatus::Initializing, STATUS_HISTORY_CAPACITY);
        status_history.add_value(EtlStatus::Initializing);
        Self {
            name,
            ranged: false,
            extractor_factory: Box::new(extractor_factory),
            transformer_factory: Box::new(transformer_factory),
            status_history: RwLock::new(status_history),
            health_history: RwLock::new(TimestampedHistory::new(
                EtlHealth::Ok,
                HEALTH_HISTORY_CAPACITY,
            )),
            harvested: AtomicU64::new(0),
            extractor_size: AtomicI64::new(-1),
            hash: RwLock::new(None),
            stages: Mutex::new(Stages { extractor: None, transformer: None, loader: None }),
            ctx: RwLock::new(None),
        }
    }

    /// A pipeline over an indexable record sequence. Registers
    /// `rangeFrom`/`rangeTo` parameters and harvests the half-open
    /// record range `[from, to)`.
    pub fn ranged<FX, FT>(name: EtlName, extractor_factory: FX, transformer_factory: FT) -> Self
    where
        FX: Fn() -> X + Send + Sync + 'static,
        FT: Fn() -> T + Send + Sync + 'static,
    {
        let mut pipeline = Self::new(name, extractor_factory, transformer_factory);
        pipeline.ranged = true;
        pipeline
    }

    fn set_status(&self, status: EtlStatus) {
        self.status_history
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .add_value(status);
    }

    fn set_health(&self, health: EtlHealth) {
        self.health_history
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .add_value(health);
    }

    fn context(&self) -> Result<EtlContext, EtlError> {
        self.ctx
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| {
                EtlError::Precondition(format!("pipeline '{}' is not initialized", self.name))
            })
    }

    fn param_key(&self, key: &str) -> String {
        format!("{}/{}", self.name, key)
    }

    /// `(from, to)` from the range parameters, defaulting to the full
    /// sequence. Negative values are clamped to zero.
    fn configured_range(&self, ctx: &EtlContext) -> (u64, u64) {
        let from = ctx
            .config
            .get_integer_value(&self.param_key(RANGE_FROM_KEY))
            .unwrap_or(0)
            .max(0) as u64;
        let to = ctx
            .config
            .get_integer_value(&self.param_key(RANGE_TO_KEY))
            .unwrap_or(i64::MAX)
            .max(0) as u64;
        (from, to)
    }

    fn fail_prepare(&self, message: String) -> PrepareOutcome {
        self.set_status(EtlStatus::Done);
        self.set_health(EtlHealth::HarvestFailed);
        warn!(etl = %self.name, reason = %message, "harvest preparation failed");
        PrepareOutcome::Failed(message)
    }
}

impl<X, T> Etl for EtlPipeline<X, T>
where
    X: Extractor + 'static,
    T: Transformer<Input = X::Item> + 'static,
{
    fn name(&self) -> &EtlName {
        &self.name
    }

    fn init(&self, ctx: EtlContext) -> Result<(), EtlError> {
        let category = Category::new(self.name.as_str(), vec![StateTag::Idle]);
        ctx.config
            .register_parameter(Parameter::boolean(category.clone(), ENABLED_KEY, true));
        let default_loader = ctx.loaders.default_name().unwrap_or_default().to_string();
        ctx.config.register_parameter(Parameter::enumerated(
            category.clone(),
            LOADER_TYPE_KEY,
            &default_loader,
        ));
        if self.ranged {
            ctx.config
                .register_parameter(Parameter::integer(category.clone(), RANGE_FROM_KEY, 0));
            ctx.config
                .register_parameter(Parameter::integer(category, RANGE_TO_KEY, i64::MAX));
        }
        *self.ctx.write().unwrap_or_else(|e| e.into_inner()) = Some(ctx);
        self.set_status(EtlStatus::Idle);
        info!(etl = %self.name, "pipeline initialized");
        Ok(())
    }

    fn update(&self) -> Result<(), EtlError> {
        let ctx = self.context()?;
        let mut extractor = (self.extractor_factory)();
        extractor.init(&ctx).map_err(|e| {
            EtlError::Precondition(format!("extractor of '{}' failed to start: {}", self.name, e))
        })?;

        let hash = extractor
            .unique_version_string()
            .map(|version| sha256_hex(version.as_bytes()));
        let size = extractor.size().map(|s| s as i64).unwrap_or(-1);

        *self.hash.write().unwrap_or_else(|e| e.into_inner()) = hash;
        self.extractor_size.store(size, Ordering::SeqCst);
        self.stages.lock().unwrap_or_else(|e| e.into_inner()).extractor = Some(extractor);
        Ok(())
    }

    fn prepare_harvest(&self) -> PrepareOutcome {
        let ctx = match self.context() {
            Ok(ctx) => ctx,
            Err(e) => return self.fail_prepare(e.to_string()),
        };

        self.set_status(EtlStatus::Queued);
        self.set_health(EtlHealth::Ok);

        if !self.is_enabled() {
            self.set_status(EtlStatus::Done);
            info!(etl = %self.name, "pipeline disabled, skipping");
            return PrepareOutcome::Skipped("disabled".to_string());
        }

        if let Err(e) = self.update() {
            return self.fail_prepare(e.to_string());
        }

        let loader_name = ctx
            .config
            .get_string_value(&self.param_key(LOADER_TYPE_KEY))
            .unwrap_or_default();
        let Some(mut loader) = ctx.loaders.create(&loader_name) else {
            return self.fail_prepare(format!(
                "loader create error: no loader named '{}'",
                loader_name
            ));
        };
        let mut transformer = (self.transformer_factory)();
        if let Err(e) = transformer.init(&ctx) {
            return self.fail_prepare(format!("transformer of '{}' failed to start: {}", self.name, e));
        }
        if let Err(e) = loader.init(&ctx) {
            return self.fail_prepare(format!("loader of '{}' failed to start: {}", self.name, e));
        }

        if self.ranged {
            let (from, to) = self.configured_range(&ctx);
            if from >= to {
                self.set_status(EtlStatus::Done);
                info!(etl = %self.name, from, to, "record range is empty, skipping");
                return PrepareOutcome::Skipped(format!("record range [{}, {}) is empty", from, to));
            }
        }

        self.harvested.store(0, Ordering::SeqCst);
        {
            let mut stages = self.stages.lock().unwrap_or_else(|e| e.into_inner());
            stages.transformer = Some(transformer);
            stages.loader = Some(loader);
        }
        PrepareOutcome::Ready
    }

    fn harvest(&self) -> HarvestOutcome {
        let ctx = match self.context() {
            Ok(ctx) => ctx,
            Err(e) => {
                self.set_status(EtlStatus::Done);
                self.set_health(EtlHealth::HarvestFailed);
                return HarvestOutcome::Failed {
                    health: EtlHealth::HarvestFailed,
                    message: e.to_string(),
                    count: 0,
                };
            }
        };

        self.set_status(EtlStatus::Harvesting);
        info!(etl = %self.name, "harvest started");

        let (mut extractor, mut transformer, mut loader) = {
            let mut stages = self.stages.lock().unwrap_or_else(|e| e.into_inner());
            match (stages.extractor.take(), stages.transformer.take(), stages.loader.take()) {
                (Some(x), Some(t), Some(l)) => (x, t, l),
                _ => {
                    self.set_status(EtlStatus::Done);
                    self.set_health(EtlHealth::HarvestFailed);
                    return HarvestOutcome::Failed {
                        health: EtlHealth::HarvestFailed,
                        message: format!("pipeline '{}' was not prepared", self.name),
                        count: 0,
                    };
                }
            }
        };

        // The half-open record window and the document bound for this run.
        let size = self.extractor_size.load(Ordering::SeqCst);
        let (skip, limit) = if self.ranged {
            let (from, to) = self.configured_range(&ctx);
            let mut limit = to.saturating_sub(from);
            if size >= 0 {
                limit = limit.min((size as u64).saturating_sub(from));
            }
            (from, Some(limit))
        } else if size >= 0 {
            (0, Some(size as u64))
        } else {
            (0, None)
        };

        let mut count = 0u64;
        let mut aborted = false;
        let mut failure: Option<(EtlHealth, String)> = None;

        match extractor.extract() {
            Err(e) => failure = Some((EtlHealth::ExtractionFailed, e.to_string())),
            Ok(iter) => {
                let mut iter = iter.skip(skip as usize);
                loop {
                    // Cooperative cancellation: observe the status flag
                    // between items.
                    if self.status() == EtlStatus::Aborting {
                        aborted = true;
                        break;
                    }
                    if let Some(limit) = limit {
                        if count >= limit {
                            break;
                        }
                    }
                    let Some(item) = iter.next() else { break };
                    let record = match item {
                        Ok(record) => record,
                        Err(e) => {
                            failure = Some((EtlHealth::ExtractionFailed, e.to_string()));
                            break;
                        }
                    };
                    let document = match transformer.transform(record) {
                        Ok(document) => document,
                        Err(e) => {
                            failure = Some((EtlHealth::TransformationFailed, e.to_string()));
                            break;
                        }
                    };
                    if let Err(e) = loader.load(&document) {
                        failure = Some((EtlHealth::LoadingFailed, e.to_string()));
                        break;
                    }
                    count += 1;
                    self.harvested.fetch_add(1, Ordering::SeqCst);
                    ctx.bus.send(&Event::DocumentsHarvested { count: 1 });
                }
            }
        }

        if failure.is_none() && !aborted {
            if let Err(e) = loader.flush() {
                failure = Some((EtlHealth::LoadingFailed, e.to_string()));
            }
        }

        // Keep the stages around so the loader stays reachable for a
        // later submit, and clearing happens in one place.
        {
            let mut stages = self.stages.lock().unwrap_or_else(|e| e.into_inner());
            stages.extractor = Some(extractor);
            stages.transformer = Some(transformer);
            stages.loader = Some(loader);
        }

        self.set_status(EtlStatus::Done);
        match failure {
            Some((health, message)) => {
                self.set_health(health);
                warn!(etl = %self.name, health = %health, reason = %message, documents = count,
                    "harvest failed");
                HarvestOutcome::Failed { health, message, count }
            }
            None if aborted => {
                info!(etl = %self.name, documents = count, "harvest aborted");
                HarvestOutcome::Aborted { count }
            }
            None => {
                info!(etl = %self.name, documents = count, "harvest finished");
                HarvestOutcome::Completed { count }
            }
        }
    }

    fn abort_harvest(&self) {
        match self.status() {
            EtlStatus::Harvesting => self.set_status(EtlStatus::Aborting),
            EtlStatus::Queued => self.set_status(EtlStatus::Done),
            _ => {}
        }
    }

    fn cancel_harvest(&self) {
        if self.status() != EtlStatus::Queued {
            return;
        }
        self.set_status(EtlStatus::Cancelling);
        {
            let mut stages = self.stages.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(loader) = stages.loader.as_mut() {
                loader.clear();
            }
            if let Some(transformer) = stages.transformer.as_mut() {
                transformer.clear();
            }
            if let Some(extractor) = stages.extractor.as_mut() {
                extractor.clear();
            }
            stages.loader = None;
            stages.transformer = None;
            stages.extractor = None;
        }
        self.set_status(EtlStatus::Done);
        info!(etl = %self.name, "queued harvest cancelled");
    }

    fn status(&self) -> EtlStatus {
        self.status_history
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .latest()
    }

    fn health(&self) -> EtlHealth {
        self.health_history
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .latest()
    }

    fn harvested_count(&self) -> u64 {
        self.harvested.load(Ordering::SeqCst)
    }

    fn max_documents(&self) -> i64 {
        let size = self.extractor_size.load(Ordering::SeqCst);
        if !self.ranged {
            return size;
        }
        if size < 0 {
            return -1;
        }
        match self.context() {
            Ok(ctx) => {
                let (from, to) = self.configured_range(&ctx);
                ((size as u64).min(to).saturating_sub(from)) as i64
            }
            Err(_) => -1,
        }
    }

    fn hash(&self) -> Option<String> {
        self.hash.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn is_enabled(&self) -> bool {
        match self.context() {
            Ok(ctx) => ctx
                .config
                .get_boolean_value(&self.param_key(ENABLED_KEY))
                .unwrap_or(true),
            Err(_) => false,
        }
    }

    fn range(&self) -> Option<(u64, u64)> {
        if !self.ranged {
            return None;
        }
        self.context().ok().map(|ctx| self.configured_range(&ctx))
    }

    fn flush_loader(&self) -> Result<(), LoaderError> {
        let mut stages = self.stages.lock().unwrap_or_else(|e| e.into_inner());
        match stages.loader.as_mut() {
            Some(loader) => loader.flush(),
            None => Ok(()),
        }
    }

    fn snapshot(&self) -> EtlSnapshot {
        EtlSnapshot {
            name: self.name.to_string(),
            status_history: self
                .status_history
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .to_vec(),
            health_history: self
                .health_history
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .to_vec(),
            harvested_count: self.harvested_count(),
            max_document_count: self.extractor_size.load(Ordering::SeqCst),
            hash: self.hash(),
        }
    }

    fn load_snapshot(&self, snapshot: EtlSnapshot) {
        self.status_history
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .add_all_sorted(snapshot.status_history);

        // A fresh successful init must not be overwritten by a stale
        // failed one, and a fresh failure must not be hidden by a stale
        // success.
        let persisted_latest = snapshot.health_history.last().map(|e| e.value);
        if self.health().is_ok() && persisted_latest != Some(EtlHealth::InitializationFailed) {
            let mut health = self.health_history.write().unwrap_or_else(|e| e.into_inner());
            *health = TimestampedHistory::from_entries(
                EtlHealth::Ok,
                HEALTH_HISTORY_CAPACITY,
                snapshot.health_history,
            );
        }

        self.harvested.store(snapshot.harvested_count, Ordering::SeqCst);
        // A hash computed by a live update() beats the persisted one.
        let mut hash = self.hash.write().unwrap_or_else(|e| e.into_inner());
        if hash.is_none() {
            *hash = snapshot.hash;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::LoaderRegistry;
    use crate::test_support::{
        BrokenStreamExtractor, CountingLoader, EndlessExtractor, IdentityTransformer, VecExtractor,
    };
    use harvd_config::Configuration;
    use harvd_domain::HistoryEntry;
    use harvd_events::EventBus;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::Duration;

    fn context(loaded: &Arc<AtomicU64>, flushed: &Arc<AtomicBool>) -> EtlContext {
        let mut registry = LoaderRegistry::new();
        let (l, f) = (Arc::clone(loaded), Arc::clone(flushed));
        registry.register("counting", move || {
            Box::new(CountingLoader::observing(Arc::clone(&l), Arc::clone(&f)))
        });
        EtlContext {
            name: EtlName::new("MyEtl").unwrap(),
            config: Arc::new(Configuration::new("test", None, EventBus::new())),
            bus: EventBus::new(),
            loaders: Arc::new(registry),
        }
    }

    fn counting_pipeline(
        items: usize,
    ) -> (Arc<dyn Etl>, EtlContext, Arc<AtomicU64>, Arc<AtomicBool>) {
        let loaded = Arc::new(AtomicU64::new(0));
        let flushed = Arc::new(AtomicBool::new(false));
        let ctx = context(&loaded, &flushed);
        let pipeline = EtlPipeline::new(
            EtlName::new("MyEtl").unwrap(),
            move || VecExtractor::numbered(items),
            IdentityTransformer::new,
        );
        pipeline.init(ctx.clone()).unwrap();
        (Arc::new(pipeline), ctx, loaded, flushed)
    }

    #[test]
    fn init_transitions_to_idle_and_registers_parameters() {
        let (etl, ctx, _, _) = counting_pipeline(3);
        assert_eq!(etl.status(), EtlStatus::Idle);
        assert_eq!(ctx.config.get_boolean_value("MyEtl/enabled"), Some(true));
        assert_eq!(
            ctx.config.get_string_value("MyEtl/loaderType"),
            Some("counting".to_string())
        );
    }

    #[test]
    fn update_computes_hash_and_size() {
        let (etl, _, _, _) = counting_pipeline(3);
        etl.update().unwrap();
        assert_eq!(etl.hash(), Some(sha256_hex(b"v1")));
        assert_eq!(etl.max_documents(), 3);
    }

    #[test]
    fn happy_path_harvests_every_record() {
        let (etl, _, loaded, flushed) = counting_pipeline(3);
        assert_eq!(etl.prepare_harvest(), PrepareOutcome::Ready);
        assert_eq!(etl.status(), EtlStatus::Queued);

        let outcome = etl.harvest();
        assert_eq!(outcome, HarvestOutcome::Completed { count: 3 });
        assert_eq!(etl.status(), EtlStatus::Done);
        assert!(etl.health().is_ok());
        assert_eq!(etl.harvested_count(), 3);
        assert_eq!(loaded.load(Ordering::SeqCst), 3);
        assert!(flushed.load(Ordering::SeqCst));
    }

    #[test]
    fn disabled_pipeline_is_skipped() {
        let (etl, ctx, _, _) = counting_pipeline(3);
        ctx.config.set_parameter("MyEtl/enabled", "false").unwrap();

        let outcome = etl.prepare_harvest();
        assert_eq!(outcome, PrepareOutcome::Skipped("disabled".to_string()));
        assert_eq!(etl.status(), EtlStatus::Done);
        assert!(etl.health().is_ok());
    }

    #[test]
    fn missing_loader_fails_preparation() {
        let ctx = EtlContext {
            name: EtlName::new("NoLoader").unwrap(),
            config: Arc::new(Configuration::new("test", None, EventBus::new())),
            bus: EventBus::new(),
            loaders: Arc::new(LoaderRegistry::new()),
        };
        let pipeline = EtlPipeline::new(
            EtlName::new("NoLoader").unwrap(),
            || VecExtractor::numbered(1),
            IdentityTransformer::new,
        );
        pipeline.init(ctx).unwrap();

        match pipeline.prepare_harvest() {
            PrepareOutcome::Failed(reason) => assert!(reason.contains("loader create error")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(pipeline.status(), EtlStatus::Done);
        assert_eq!(pipeline.health(), EtlHealth::HarvestFailed);
    }

    #[test]
    fn loader_failure_classifies_loading_health() {
        let loaded = Arc::new(AtomicU64::new(0));
        let flushed = Arc::new(AtomicBool::new(false));
        let mut registry = LoaderRegistry::new();
        let (l, f) = (Arc::clone(&loaded), Arc::clone(&flushed));
        registry.register("counting", move || {
            Box::new(CountingLoader::observing_failing_after(
                Arc::clone(&l),
                Arc::clone(&f),
                2,
            ))
        });
        let ctx = EtlContext {
            name: EtlName::new("MyEtl").unwrap(),
            config: Arc::new(Configuration::new("test", None, EventBus::new())),
            bus: EventBus::new(),
            loaders: Arc::new(registry),
        };
        let pipeline = EtlPipeline::new(
            EtlName::new("MyEtl").unwrap(),
            || VecExtractor::numbered(5),
            IdentityTransformer::new,
        );
        pipeline.init(ctx).unwrap();

        assert_eq!(pipeline.prepare_harvest(), PrepareOutcome::Ready);
        match pipeline.harvest() {
            HarvestOutcome::Failed { health, count, .. } => {
                assert_eq!(health, EtlHealth::LoadingFailed);
                assert_eq!(count, 2);
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(pipeline.status(), EtlStatus::Done);
        assert_eq!(pipeline.health(), EtlHealth::LoadingFailed);
    }

    #[test]
    fn transformer_failure_classifies_transformation_health() {
        let loaded = Arc::new(AtomicU64::new(0));
        let flushed = Arc::new(AtomicBool::new(false));
        let ctx = context(&loaded, &flushed);
        let pipeline = EtlPipeline::new(
            EtlName::new("MyEtl").unwrap(),
            || VecExtractor::numbered(3),
            || IdentityTransformer::failing_on("record-1"),
        );
        pipeline.init(ctx).unwrap();

        assert_eq!(pipeline.prepare_harvest(), PrepareOutcome::Ready);
        match pipeline.harvest() {
            HarvestOutcome::Failed { health, count, .. } => {
                assert_eq!(health, EtlHealth::TransformationFailed);
                assert_eq!(count, 1);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn broken_stream_classifies_extraction_health() {
        let loaded = Arc::new(AtomicU64::new(0));
        let flushed = Arc::new(AtomicBool::new(false));
        let ctx = context(&loaded, &flushed);
        let pipeline = EtlPipeline::new(
            EtlName::new("MyEtl").unwrap(),
            || BrokenStreamExtractor { good_items: 2 },
            IdentityTransformer::new,
        );
        pipeline.init(ctx).unwrap();

        assert_eq!(pipeline.prepare_harvest(), PrepareOutcome::Ready);
        match pipeline.harvest() {
            HarvestOutcome::Failed { health, count, .. } => {
                assert_eq!(health, EtlHealth::ExtractionFailed);
                assert_eq!(count, 2);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn abort_mid_harvest_exits_cooperatively() {
        let loaded = Arc::new(AtomicU64::new(0));
        let flushed = Arc::new(AtomicBool::new(false));
        let ctx = context(&loaded, &flushed);
        let pipeline: Arc<dyn Etl> = {
            let p = EtlPipeline::new(
                EtlName::new("MyEtl").unwrap(),
                || EndlessExtractor::new(Duration::from_millis(10)),
                IdentityTransformer::new,
            );
            p.init(ctx).unwrap();
            Arc::new(p)
        };

        assert_eq!(pipeline.prepare_harvest(), PrepareOutcome::Ready);

        let worker = {
            let p = Arc::clone(&pipeline);
            std::thread::spawn(move || p.harvest())
        };
        std::thread::sleep(Duration::from_millis(50));
        pipeline.abort_harvest();

        let outcome = worker.join().unwrap();
        assert!(matches!(outcome, HarvestOutcome::Aborted { .. }));
        assert_eq!(pipeline.status(), EtlStatus::Done);
        assert!(pipeline.health().is_ok());
    }

    #[test]
    fn cancel_is_a_fast_path_for_queued_pipelines() {
        let (etl, _, _, _) = counting_pipeline(3);
        assert_eq!(etl.prepare_harvest(), PrepareOutcome::Ready);
        etl.cancel_harvest();
        assert_eq!(etl.status(), EtlStatus::Done);
        // Safe on a finished pipeline.
        etl.cancel_harvest();
        assert_eq!(etl.status(), EtlStatus::Done);
    }

    #[test]
    fn empty_range_is_skipped() {
        let loaded = Arc::new(AtomicU64::new(0));
        let flushed = Arc::new(AtomicBool::new(false));
        let ctx = context(&loaded, &flushed);
        let pipeline = EtlPipeline::ranged(
            EtlName::new("MyEtl").unwrap(),
            || VecExtractor::numbered(10),
            IdentityTransformer::new,
        );
        pipeline.init(ctx.clone()).unwrap();
        ctx.config.set_parameter("MyEtl/rangeFrom", "4").unwrap();
        ctx.config.set_parameter("MyEtl/rangeTo", "4").unwrap();

        match pipeline.prepare_harvest() {
            PrepareOutcome::Skipped(reason) => assert!(reason.contains("empty")),
            other => panic!("expected skip, got {:?}", other),
        }
        assert_eq!(pipeline.status(), EtlStatus::Done);
    }

    #[test]
    fn ranged_harvest_covers_half_open_window() {
        let loaded = Arc::new(AtomicU64::new(0));
        let flushed = Arc::new(AtomicBool::new(false));
        let ctx = context(&loaded, &flushed);
        let pipeline = EtlPipeline::ranged(
            EtlName::new("MyEtl").unwrap(),
            || VecExtractor::numbered(10),
            IdentityTransformer::new,
        );
        pipeline.init(ctx.clone()).unwrap();
        ctx.config.set_parameter("MyEtl/rangeFrom", "2").unwrap();
        ctx.config.set_parameter("MyEtl/rangeTo", "5").unwrap();

        assert_eq!(pipeline.prepare_harvest(), PrepareOutcome::Ready);
        assert_eq!(pipeline.max_documents(), 3);
        assert_eq!(pipeline.harvest(), HarvestOutcome::Completed { count: 3 });
        assert_eq!(loaded.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn harvested_count_respects_document_bound() {
        let (etl, _, _, _) = counting_pipeline(3);
        assert_eq!(etl.prepare_harvest(), PrepareOutcome::Ready);
        etl.harvest();
        assert!(etl.harvested_count() <= etl.max_documents() as u64);
    }

    #[test]
    fn snapshot_health_rule_keeps_fresh_failure() {
        let loaded = Arc::new(AtomicU64::new(0));
        let flushed = Arc::new(AtomicBool::new(false));
        let ctx = context(&loaded, &flushed);
        let failing = EtlPipeline::new(
            EtlName::new("Failing").unwrap(),
            || VecExtractor::numbered(1).failing_init(),
            IdentityTransformer::new,
        );
        failing.init(ctx).unwrap();
        assert!(matches!(failing.prepare_harvest(), PrepareOutcome::Failed(_)));
        assert_eq!(failing.health(), EtlHealth::HarvestFailed);

        // A stale healthy snapshot must not hide the fresh failure.
        failing.load_snapshot(EtlSnapshot {
            name: "Failing".into(),
            status_history: vec![],
            health_history: vec![HistoryEntry { ts: 1, value: EtlHealth::Ok }],
            harvested_count: 0,
            max_document_count: -1,
            hash: None,
        });
        assert_eq!(failing.health(), EtlHealth::HarvestFailed);
    }

    #[test]
    fn snapshot_health_rule_ignores_stale_init_failure() {
        let (etl, _, _, _) = counting_pipeline(3);
        let stale = EtlSnapshot {
            name: "MyEtl".into(),
            status_history: vec![],
            health_history: vec![HistoryEntry {
                ts: 1,
                value: EtlHealth::InitializationFailed,
            }],
            harvested_count: 0,
            max_document_count: -1,
            hash: None,
        };
        etl.load_snapshot(stale);
        // The fresh successful init wins over the persisted failure.
        assert!(etl.health().is_ok());
    }

    #[test]
    fn update_failure_is_a_precondition_error() {
        let loaded = Arc::new(AtomicU64::new(0));
        let flushed = Arc::new(AtomicBool::new(false));
        let ctx = context(&loaded, &flushed);
        let pipeline = EtlPipeline::new(
            EtlName::new("MyEtl").unwrap(),
            || VecExtractor::numbered(1).failing_init(),
            IdentityTransformer::new,
        );
        pipeline.init(ctx).unwrap();

        match pipeline.update() {
            Err(EtlError::Precondition(reason)) => {
                assert!(reason.contains("source unreachable"), "{}", reason);
            }
            other => panic!("expected precondition error, got {:?}", other),
        }
    }

    #[test]
    fn harvest_without_preparation_fails() {
        let (etl, _, _, _) = counting_pipeline(3);
        match etl.harvest() {
            HarvestOutcome::Failed { health, message, .. } => {
                assert_eq!(health, EtlHealth::HarvestFailed);
                assert!(message.contains("not prepared"), "{}", message);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn flush_without_loader_is_ok() {
        let (etl, _, _, _) = counting_pipeline(3);
        assert!(etl.flush_loader().is_ok());
    }

    #[test]
    fn flush_after_harvest_reaches_the_loader() {
        let (etl, _, _, flushed) = counting_pipeline(3);
        etl.prepare_harvest();
        etl.harvest();
        flushed.store(false, Ordering::SeqCst);
        etl.flush_loader().unwrap();
        assert!(flushed.load(Ordering::SeqCst));
    }

    #[test]
    fn range_end_beyond_size_is_clamped() {
        let loaded = Arc::new(AtomicU64::new(0));
        let flushed = Arc::new(AtomicBool::new(false));
        let ctx = context(&loaded, &flushed);
        let pipeline = EtlPipeline::ranged(
            EtlName::new("MyEtl").unwrap(),
            || VecExtractor::numbered(4),
            IdentityTransformer::new,
        );
        pipeline.init(ctx.clone()).unwrap();
        ctx.config.set_parameter("MyEtl/rangeFrom", "2").unwrap();
        // rangeTo keeps its open-ended default.

        assert_eq!(pipeline.prepare_harvest(), PrepareOutcome::Ready);
        assert_eq!(pipeline.max_documents(), 2);
        assert_eq!(pipeline.harvest(), HarvestOutcome::Completed { count: 2 });
    }

    #[test]
    fn status_history_stays_bounded_over_many_harvests() {
        let (etl, _, _, _) = counting_pipeline(1);
        for _ in 0..10 {
            assert_eq!(etl.prepare_harvest(), PrepareOutcome::Ready);
            etl.harvest();
        }
        let snapshot = etl.snapshot();
        assert_eq!(snapshot.status_history.len(), 10);
        assert_eq!(snapshot.status_history.last().unwrap().value, EtlStatus::Done);
    }

    #[test]
    fn each_document_announces_itself_on_the_bus() {
        let loaded = Arc::new(AtomicU64::new(0));
        let flushed = Arc::new(AtomicBool::new(false));
        let ctx = context(&loaded, &flushed);
        let announced = Arc::new(AtomicU64::new(0));
        let a = Arc::clone(&announced);
        ctx.bus
            .add_listener(harvd_events::EventKind::DocumentsHarvested, move |event| {
                if let Event::DocumentsHarvested { count } = event {
                    a.fetch_add(*count, Ordering::SeqCst);
                }
            });

        let pipeline = EtlPipeline::new(
            EtlName::new("MyEtl").unwrap(),
            || VecExtractor::numbered(3),
            IdentityTransformer::new,
        );
        pipeline.init(ctx).unwrap();
        pipeline.prepare_harvest();
        pipeline.harvest();
        assert_eq!(announced.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn snapshot_restores_count_and_hash() {
        let (etl, _, _, _) = counting_pipeline(3);
        let snapshot = EtlSnapshot {
            name: "MyEtl".into(),
            status_history: vec![HistoryEntry { ts: 5, value: EtlStatus::Done }],
            health_history: vec![HistoryEntry { ts: 5, value: EtlHealth::Ok }],
            harvested_count: 42,
            max_document_count: 100,
            hash: Some("cafe".into()),
        };
        etl.load_snapshot(snapshot);
        assert_eq!(etl.harvested_count(), 42);
        assert_eq!(etl.hash().as_deref(), Some("cafe"));
    }
}
