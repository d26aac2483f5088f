use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use harvd_config::Configuration;
use harvd_domain::DeploymentType;
use harvd_etl::{Etl, EtlManager, LoaderRegistry};
use harvd_events::{Answer, Event, EventBus, EventKind, QueryKind};
use harvd_scheduler::Scheduler;
use harvd_state::{CommandOutcome, StateMachine};
use tracing::{debug, error, info, warn};

use crate::eventlog::EventLog;
use crate::logging;
use crate::paths::ServicePaths;
use crate::timekeeper::TimeKeeper;

// ── Service spec ──────────────────────────────────────────────────────────────

/// Everything a concrete harvester supplies at startup: its name, a
/// factory producing fresh pipelines, and a factory producing the
/// loader registry. Factories are re-run on every context (re)build,
/// so they must return pipelines in their pristine `Initializing`
/// state.
#[derive(Clone)]
pub struct ServiceSpec {
    pub module_name: String,
    pub etl_factory: Arc<dyn Fn() -> Vec<Arc<dyn Etl>> + Send + Sync>,
    pub loader_factory: Arc<dyn Fn() -> LoaderRegistry + Send + Sync>,
    pub cache_root: Option<PathBuf>,
}

impl ServiceSpec {
    pub fn new<FE, FL>(module_name: impl Into<String>, etl_factory: FE, loader_factory: FL) -> Self
    where
        FE: Fn() -> Vec<Arc<dyn Etl>> + Send + Sync + 'static,
        FL: Fn() -> LoaderRegistry + Send + Sync + 'static,
    {
        Self {
            module_name: module_name.into(),
            etl_factory: Arc::new(etl_factory),
            loader_factory: Arc::new(loader_factory),
            cache_root: None,
        }
    }

    /// Pin the cache root instead of resolving it from the deployment
    /// type. Used by tests and embedders.
    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = Some(root.into());
        self
    }
}

// ── Service context ───────────────────────────────────────────────────────────

/// Process-wide assembly of the harvester subsystems: configuration,
/// loader registry, ETL manager, scheduler, state machine and time
/// keeper, all wired over one event bus.
///
/// Must be created inside a tokio runtime (the scheduler owns a timer
/// task and commands spawn blocking workers).
pub struct ServiceContext {
    module_name: String,
    deployment: DeploymentType,
    paths: ServicePaths,
    bus: EventBus,
    config: Arc<Configuration>,
    loaders: Arc<LoaderRegistry>,
    manager: Arc<EtlManager>,
    scheduler: Arc<Scheduler>,
    machine: Arc<StateMachine>,
    time_keeper: Arc<TimeKeeper>,
    event_log: Arc<EventLog>,
    log_path: Option<PathBuf>,
}

impl ServiceContext {
    /// Assemble and wire all subsystems. Initialization failures leave
    /// the state machine in `Error`; the returned context still serves
    /// status and health lookups.
    pub fn init(spec: &ServiceSpec) -> Arc<Self> {
        let deployment = DeploymentType::from_env();
        let paths = match &spec.cache_root {
            Some(root) => ServicePaths::at(root.clone(), &spec.module_name),
            None => ServicePaths::resolve(&spec.module_name, deployment),
        };
        let log_path = logging::init_logging(deployment, &paths);

        let bus = EventBus::new();
        let config = Arc::new(Configuration::new(
            &spec.module_name,
            Some(paths.config_file()),
            bus.clone(),
        ));
        if let Err(e) = config.load_from_disk() {
            warn!(error = %e, "could not load the configuration cache");
        }

        let loaders = Arc::new((spec.loader_factory)());
        let manager = Arc::new(EtlManager::new(
            &spec.module_name,
            paths.module_dir(),
            Arc::clone(&config),
            bus.clone(),
            Arc::clone(&loaders),
        ));

        let mut init_ok = true;
        for etl in (spec.etl_factory)() {
            if let Err(e) = manager.register(etl) {
                error!(error = %e, "pipeline registration failed");
                init_ok = false;
            }
        }
        if init_ok {
            if let Err(e) = manager.init_all() {
                error!(error = %e, "pipeline initialization failed");
                init_ok = false;
            }
        }
        if init_ok {
            manager.update_all();
            if let Err(e) = manager.load_from_disk() {
                warn!(error = %e, "could not load pipeline snapshots");
            }
        }

        let scheduler = Arc::new(Scheduler::new(Some(paths.scheduler_file()), bus.clone()));
        if let Err(e) = scheduler.load_from_disk() {
            warn!(error = %e, "could not load the schedule cache");
        }
        Arc::clone(&scheduler).start();

        let machine = Arc::new(StateMachine::new(Arc::clone(&manager), bus.clone()));
        Arc::clone(&machine).attach();
        {
            let machine = Arc::clone(&machine);
            config.set_state_source(move || Some(machine.current_tag()));
        }

        let time_keeper = Arc::new(TimeKeeper::new(Some(paths.time_keeper_file()), bus.clone()));
        Arc::clone(&time_keeper).attach();
        if let Err(e) = time_keeper.load_from_disk() {
            warn!(error = %e, "could not load the time keeper cache");
        }

        let event_log = Arc::new(EventLog::new(bus.clone()));
        Arc::clone(&event_log).attach();

        let ctx = Arc::new(Self {
            module_name: spec.module_name.clone(),
            deployment,
            paths,
            bus: bus.clone(),
            config,
            loaders,
            manager,
            scheduler,
            machine,
            time_keeper,
            event_log,
            log_path,
        });
        ctx.register_responders();
        Arc::clone(&ctx).attach_listeners();

        bus.send(&Event::ServiceInitialized { success: init_ok });
        info!(
            module = %ctx.module_name,
            deployment = %ctx.deployment,
            success = init_ok,
            "service context initialized"
        );
        ctx
    }

    fn register_responders(&self) {
        let loaders = Arc::clone(&self.loaders);
        self.bus.add_responder(QueryKind::LoaderNames, move |_| {
            Answer::LoaderNames(loaders.names())
        });

        let manager = Arc::clone(&self.manager);
        self.bus.add_responder(QueryKind::HarvestedDocumentCount, move |_| {
            Answer::HarvestedDocumentCount(manager.total_harvested())
        });

        let version = format!("{} {}", self.module_name, env!("CARGO_PKG_VERSION"));
        self.bus.add_responder(QueryKind::VersionInfo, move |_| {
            Answer::VersionInfo(version.clone())
        });

        let log_path = self.log_path.clone();
        self.bus.add_responder(QueryKind::MainLogPath, move |_| {
            Answer::MainLogPath(log_path.clone())
        });
    }

    fn attach_listeners(self: Arc<Self>) {
        // Scheduler-triggered harvests run through the same command
        // path as REST ones.
        let weak = Arc::downgrade(&self);
        self.bus.add_listener(EventKind::StartHarvest, move |_| {
            if let Some(ctx) = weak.upgrade() {
                let outcome = ctx.start_harvest();
                debug!(outcome = ?outcome, "scheduled harvest requested");
            }
        });

        let manager = Arc::clone(&self.manager);
        self.bus.add_listener(EventKind::StartAborting, move |_| {
            manager.abort();
        });
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    /// Start a harvest: arbitrate, prepare the queue synchronously (so
    /// precondition problems surface in the response), then run the
    /// queue on a blocking worker.
    pub fn start_harvest(&self) -> CommandOutcome {
        let gate = self.machine.start_harvest();
        if !matches!(gate, CommandOutcome::Accepted { .. }) {
            return gate;
        }
        match self.manager.prepare_harvest() {
            Err(e) => CommandOutcome::Busy { message: e.to_string(), retry_after: None },
            Ok(()) => {
                let manager = Arc::clone(&self.manager);
                tokio::task::spawn_blocking(move || manager.harvest());
                gate
            }
        }
    }

    pub fn abort(&self) -> CommandOutcome {
        self.machine.abort()
    }

    /// Flush every loader to its sink on a blocking worker.
    pub fn submit(&self) -> CommandOutcome {
        let gate = self.machine.submit();
        if matches!(gate, CommandOutcome::Accepted { .. }) {
            let manager = Arc::clone(&self.manager);
            tokio::task::spawn_blocking(move || {
                let _ = manager.submit();
            });
        }
        gate
    }

    /// Persist pipeline snapshots, configuration, schedules and timing
    /// on a blocking worker.
    pub fn save(&self) -> CommandOutcome {
        let gate = self.machine.save();
        if matches!(gate, CommandOutcome::Accepted { .. }) {
            let bus = self.bus.clone();
            let manager = Arc::clone(&self.manager);
            let config = Arc::clone(&self.config);
            let scheduler = Arc::clone(&self.scheduler);
            let time_keeper = Arc::clone(&self.time_keeper);
            tokio::task::spawn_blocking(move || {
                bus.send(&Event::SaveStarted);
                let mut success = true;
                if let Err(e) = manager.save_to_disk() {
                    warn!(error = %e, "pipeline snapshot save failed");
                    success = false;
                }
                if let Err(e) = config.save_to_disk() {
                    warn!(error = %e, "configuration save failed");
                    success = false;
                }
                if let Err(e) = scheduler.save_to_disk() {
                    warn!(error = %e, "schedule save failed");
                    success = false;
                }
                if let Err(e) = time_keeper.save_to_disk() {
                    warn!(error = %e, "time keeper save failed");
                    success = false;
                }
                bus.send(&Event::SaveFinished { success });
            });
        }
        gate
    }

    pub fn reset(&self) -> CommandOutcome {
        self.machine.reset()
    }

    // ── Lookups ───────────────────────────────────────────────────────────────

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn deployment(&self) -> DeploymentType {
        self.deployment
    }

    pub fn paths(&self) -> &ServicePaths {
        &self.paths
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn config(&self) -> &Arc<Configuration> {
        &self.config
    }

    pub fn manager(&self) -> &Arc<EtlManager> {
        &self.manager
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn machine(&self) -> &Arc<StateMachine> {
        &self.machine
    }

    pub fn time_keeper(&self) -> &Arc<TimeKeeper> {
        &self.time_keeper
    }

    pub fn event_log(&self) -> &Arc<EventLog> {
        &self.event_log
    }

    pub fn log_path(&self) -> Option<&PathBuf> {
        self.log_path.as_ref()
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    /// Tear down in reverse assembly order, detaching every listener.
    /// The persisted caches are written a final time.
    pub fn destroy(&self) {
        info!(module = %self.module_name, "tearing down service context");
        self.scheduler.on_context_destroyed();
        self.event_log.detach();
        self.time_keeper.detach();
        if let Err(e) = self.time_keeper.save_to_disk() {
            warn!(error = %e, "time keeper save failed during teardown");
        }
        self.machine.detach();
        if let Err(e) = self.config.save_to_disk() {
            warn!(error = %e, "configuration save failed during teardown");
        }
        self.bus.reset();
    }
}

// ── Context handle ────────────────────────────────────────────────────────────

/// Owns the live [`ServiceContext`] and rebuilds it when a
/// `ResetContext` event fires, swapping the fresh context into place.
pub struct ContextHandle {
    spec: ServiceSpec,
    slot: RwLock<Arc<ServiceContext>>,
}

impl ContextHandle {
    pub fn start(spec: ServiceSpec) -> Arc<Self> {
        let ctx = ServiceContext::init(&spec);
        let handle = Arc::new(Self { slot: RwLock::new(ctx), spec });
        Arc::clone(&handle).watch_reset();
        handle
    }

    /// The currently live context.
    pub fn context(&self) -> Arc<ServiceContext> {
        self.slot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn watch_reset(self: Arc<Self>) {
        let bus = self.context().bus().clone();
        let weak = Arc::downgrade(&self);
        bus.add_listener(EventKind::ResetContext, move |_| {
            if let Some(handle) = weak.upgrade() {
                handle.rebuild();
            }
        });
    }

    fn rebuild(self: Arc<Self>) {
        info!("rebuilding the service context");
        let old = self.context();
        old.destroy();
        let fresh = ServiceContext::init(&self.spec);
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = fresh;
        self.watch_reset();
    }

    pub fn shutdown(&self) {
        self.context().destroy();
    }
}
