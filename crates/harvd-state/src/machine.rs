use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use harvd_domain::{EtlHealth, HistoryEntry, StateTag, TimestampedHistory};
use harvd_etl::EtlManager;
use harvd_events::{Event, EventBus, EventKind, ListenerId};
use tracing::info;

use crate::progress::ProgressReport;

const TRANSITION_HISTORY_CAPACITY: usize = 50;

// ── States ────────────────────────────────────────────────────────────────────

/// The single current state of the service. Long-running states carry
/// their start timestamp for progress extrapolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Initialization,
    Idle,
    Harvesting { started_at: DateTime<Utc> },
    Submitting { started_at: DateTime<Utc> },
    Saving { started_at: DateTime<Utc> },
    Aborting { started_at: DateTime<Utc> },
    Error,
}

impl ServiceState {
    pub fn tag(&self) -> StateTag {
        match self {
            ServiceState::Initialization => StateTag::Initialization,
            ServiceState::Idle => StateTag::Idle,
            ServiceState::Harvesting { .. } => StateTag::Harvesting,
            ServiceState::Submitting { .. } => StateTag::Submitting,
            ServiceState::Saving { .. } => StateTag::Saving,
            ServiceState::Aborting { .. } => StateTag::Aborting,
            ServiceState::Error => StateTag::Error,
        }
    }

    /// True for states whose work has a known or estimable end.
    pub fn is_progressing(&self) -> bool {
        matches!(
            self,
            ServiceState::Harvesting { .. }
                | ServiceState::Submitting { .. }
                | ServiceState::Saving { .. }
        )
    }
}

// ── Command outcomes ──────────────────────────────────────────────────────────

/// Transport-free result of a service command. The REST facade maps
/// these onto status codes and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The command was accepted and work has started or will start.
    /// `retry_after` hints when the work should be done.
    Accepted { message: String, retry_after: Option<u64> },
    /// The command completed synchronously.
    Ok(String),
    /// The service is doing something that conflicts with the command.
    Busy { message: String, retry_after: Option<u64> },
    /// The command itself is invalid.
    Rejected(String),
}

impl CommandOutcome {
    pub fn accepted(message: impl Into<String>) -> Self {
        CommandOutcome::Accepted { message: message.into(), retry_after: None }
    }

    pub fn message(&self) -> &str {
        match self {
            CommandOutcome::Accepted { message, .. }
            | CommandOutcome::Ok(message)
            | CommandOutcome::Busy { message, .. }
            | CommandOutcome::Rejected(message) => message,
        }
    }
}

// ── State machine ─────────────────────────────────────────────────────────────

/// Arbitrates REST-driven commands against long-running work.
///
/// Transitions are driven exclusively by bus events; command methods
/// only read the current state, answer, and emit request events
/// (`StartAborting`, `ResetContext`). The state pointer is swapped
/// under a short lock; no lock is held across a bus callback.
pub struct StateMachine {
    current: RwLock<ServiceState>,
    history: Mutex<TimestampedHistory<StateTag>>,
    manager: Arc<EtlManager>,
    bus: EventBus,
    listeners: Mutex<Vec<(EventKind, ListenerId)>>,
}

impl StateMachine {
    pub fn new(manager: Arc<EtlManager>, bus: EventBus) -> Self {
        let mut history =
            TimestampedHistory::new(StateTag::Initialization, TRANSITION_HISTORY_CAPACITY);
        history.add_value(StateTag::Initialization);
        Self {
            current: RwLock::new(ServiceState::Initialization),
            history: Mutex::new(history),
            manager,
            bus,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to the transition-driving events.
    pub fn attach(self: Arc<Self>) {
        let kinds = [
            EventKind::ServiceInitialized,
            EventKind::HarvestStarted,
            EventKind::HarvestFinished,
            EventKind::AbortingStarted,
            EventKind::AbortingFinished,
            EventKind::SubmissionStarted,
            EventKind::SubmissionFinished,
            EventKind::SaveStarted,
            EventKind::SaveFinished,
            EventKind::ResetContext,
        ];
        let mut collected = Vec::new();
        for kind in kinds {
            let machine = Arc::clone(&self);
            let id = self.bus.add_listener(kind, move |event| machine.on_event(event));
            collected.push((kind, id));
        }
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(collected);
    }

    /// Detach every listener registered by [`attach`](Self::attach).
    pub fn detach(&self) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        for (kind, id) in listeners.drain(..) {
            self.bus.remove_listener(kind, id);
        }
    }

    fn transition(&self, to: ServiceState) {
        let from = {
            let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *current, to)
        };
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .add_value(to.tag());
        info!(from = %from.tag(), to = %to.tag(), "service state changed");
    }

    fn on_event(&self, event: &Event) {
        let current = self.current();
        match event {
            Event::ServiceInitialized { success } => {
                if current == ServiceState::Initialization {
                    self.transition(if *success { ServiceState::Idle } else { ServiceState::Error });
                }
            }
            Event::HarvestStarted { started_at, .. } => {
                self.transition(ServiceState::Harvesting { started_at: *started_at });
            }
            Event::HarvestFinished { success, health, .. } => {
                // While aborting, the terminal event is AbortingFinished.
                if matches!(current, ServiceState::Harvesting { .. }) {
                    let next = if *success || *health != EtlHealth::InitializationFailed {
                        ServiceState::Idle
                    } else {
                        ServiceState::Error
                    };
                    self.transition(next);
                }
            }
            Event::AbortingStarted => {
                self.transition(ServiceState::Aborting { started_at: Utc::now() });
            }
            Event::AbortingFinished => {
                if matches!(current, ServiceState::Aborting { .. }) {
                    self.transition(ServiceState::Idle);
                }
            }
            Event::SubmissionStarted => {
                self.transition(ServiceState::Submitting { started_at: Utc::now() });
            }
            Event::SubmissionFinished { .. } => {
                if matches!(current, ServiceState::Submitting { .. }) {
                    self.transition(ServiceState::Idle);
                }
            }
            Event::SaveStarted => {
                self.transition(ServiceState::Saving { started_at: Utc::now() });
            }
            Event::SaveFinished { .. } => {
                if matches!(current, ServiceState::Saving { .. }) {
                    self.transition(ServiceState::Idle);
                }
            }
            Event::ResetContext => {
                self.transition(ServiceState::Initialization);
            }
            _ => {}
        }
    }

    // ── Readers ───────────────────────────────────────────────────────────────

    pub fn current(&self) -> ServiceState {
        *self.current.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn current_tag(&self) -> StateTag {
        self.current().tag()
    }

    pub fn transition_history(&self) -> Vec<HistoryEntry<StateTag>> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .to_vec()
    }

    /// Progress of the current state's work, when it has any.
    pub fn progress(&self) -> Option<ProgressReport> {
        match self.current() {
            ServiceState::Harvesting { started_at } => {
                let max = match self.manager.total_max_documents() {
                    -1 => None,
                    n => Some(n as u64),
                };
                Some(ProgressReport::new(self.manager.total_harvested(), max, started_at))
            }
            ServiceState::Submitting { started_at } | ServiceState::Saving { started_at } => {
                Some(ProgressReport::new(0, None, started_at))
            }
            _ => None,
        }
    }

    /// `"cur/max"` or `"cur"`; empty outside progressing states.
    pub fn progress_string(&self) -> String {
        self.progress().map(|p| p.fraction()).unwrap_or_default()
    }

    /// Human-readable description of what the service is doing.
    pub fn status_string(&self) -> String {
        match self.current() {
            ServiceState::Initialization => "Initializing the harvester service".to_string(),
            ServiceState::Idle => {
                if self.manager.is_outdated() {
                    "Idle; the source has changed since the last harvest".to_string()
                } else {
                    "Idle; ready to harvest".to_string()
                }
            }
            ServiceState::Harvesting { .. } => {
                let progress = self.progress().map(|p| p.describe()).unwrap_or_default();
                format!("Harvesting {}", progress)
            }
            ServiceState::Submitting { .. } => "Submitting harvested documents".to_string(),
            ServiceState::Saving { .. } => "Saving service state".to_string(),
            ServiceState::Aborting { .. } => "Waiting for the harvest to abort".to_string(),
            ServiceState::Error => "Initialization failed; check the service log".to_string(),
        }
    }

    pub fn is_outdated(&self) -> bool {
        self.manager.is_outdated()
    }

    fn retry_after(&self) -> Option<u64> {
        self.progress().and_then(|p| p.remaining_secs())
    }

    fn busy(&self, command: &str) -> CommandOutcome {
        CommandOutcome::Busy {
            message: format!(
                "cannot {} while the service is {}",
                command,
                self.current_tag()
            ),
            retry_after: self.retry_after(),
        }
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    /// Gate for the start-harvest command; the runtime performs the
    /// preparation and worker spawn after an `Accepted`.
    pub fn start_harvest(&self) -> CommandOutcome {
        match self.current() {
            ServiceState::Idle => CommandOutcome::accepted("harvest started"),
            _ => self.busy("start a harvest"),
        }
    }

    /// Abort a progressing state. Emits `StartAborting`; the manager
    /// listens and flags the pipelines.
    pub fn abort(&self) -> CommandOutcome {
        if self.current().is_progressing() {
            let retry_after = self.retry_after();
            self.bus.send(&Event::StartAborting);
            CommandOutcome::Accepted { message: "aborting".to_string(), retry_after }
        } else {
            self.busy("abort")
        }
    }

    pub fn submit(&self) -> CommandOutcome {
        match self.current() {
            ServiceState::Idle => CommandOutcome::accepted("submission started"),
            _ => self.busy("submit"),
        }
    }

    pub fn save(&self) -> CommandOutcome {
        match self.current() {
            ServiceState::Idle => CommandOutcome::accepted("save started"),
            _ => self.busy("save"),
        }
    }

    /// Reset is allowed while nothing is running; it emits
    /// `ResetContext` and the runtime rebuilds the service context.
    pub fn reset(&self) -> CommandOutcome {
        match self.current() {
            ServiceState::Idle | ServiceState::Error => {
                self.bus.send(&Event::ResetContext);
                CommandOutcome::Ok("service context reset".to_string())
            }
            _ => self.busy("reset"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvd_config::Configuration;
    use harvd_etl::LoaderRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn machine() -> (Arc<StateMachine>, EventBus) {
        let bus = EventBus::new();
        let config = Arc::new(Configuration::new("test", None, bus.clone()));
        let manager = Arc::new(EtlManager::new(
            "test",
            std::env::temp_dir().join("harvd-machine-tests"),
            config,
            bus.clone(),
            Arc::new(LoaderRegistry::new()),
        ));
        let machine = Arc::new(StateMachine::new(manager, bus.clone()));
        Arc::clone(&machine).attach();
        (machine, bus)
    }

    fn idle_machine() -> (Arc<StateMachine>, EventBus) {
        let (machine, bus) = machine();
        bus.send(&Event::ServiceInitialized { success: true });
        assert_eq!(machine.current_tag(), StateTag::Idle);
        (machine, bus)
    }

    #[test]
    fn starts_in_initialization() {
        let (machine, _bus) = machine();
        assert_eq!(machine.current_tag(), StateTag::Initialization);
        assert!(matches!(machine.start_harvest(), CommandOutcome::Busy { .. }));
    }

    #[test]
    fn failed_initialization_enters_error() {
        let (machine, bus) = machine();
        bus.send(&Event::ServiceInitialized { success: false });
        assert_eq!(machine.current_tag(), StateTag::Error);
        assert!(matches!(machine.start_harvest(), CommandOutcome::Busy { .. }));
        // Reset is the way out of Error.
        assert!(matches!(machine.reset(), CommandOutcome::Ok(_)));
        assert_eq!(machine.current_tag(), StateTag::Initialization);
    }

    #[test]
    fn harvest_events_drive_the_full_cycle() {
        let (machine, bus) = idle_machine();

        bus.send(&Event::HarvestStarted {
            started_at: Utc::now(),
            start_index: None,
            end_index: None,
        });
        assert_eq!(machine.current_tag(), StateTag::Harvesting);
        assert!(matches!(machine.start_harvest(), CommandOutcome::Busy { .. }));
        assert!(matches!(machine.submit(), CommandOutcome::Busy { .. }));
        assert!(matches!(machine.reset(), CommandOutcome::Busy { .. }));

        bus.send(&Event::HarvestFinished {
            success: true,
            health: EtlHealth::Ok,
            hash: None,
            finished_at: Utc::now(),
        });
        assert_eq!(machine.current_tag(), StateTag::Idle);
    }

    #[test]
    fn failed_harvest_returns_to_idle_unless_init_failed() {
        let (machine, bus) = idle_machine();

        bus.send(&Event::HarvestStarted {
            started_at: Utc::now(),
            start_index: None,
            end_index: None,
        });
        bus.send(&Event::HarvestFinished {
            success: false,
            health: EtlHealth::LoadingFailed,
            hash: None,
            finished_at: Utc::now(),
        });
        // The service keeps accepting harvest commands after a
        // harvest-stage failure.
        assert_eq!(machine.current_tag(), StateTag::Idle);
        assert!(matches!(machine.start_harvest(), CommandOutcome::Accepted { .. }));

        bus.send(&Event::HarvestStarted {
            started_at: Utc::now(),
            start_index: None,
            end_index: None,
        });
        bus.send(&Event::HarvestFinished {
            success: false,
            health: EtlHealth::InitializationFailed,
            hash: None,
            finished_at: Utc::now(),
        });
        assert_eq!(machine.current_tag(), StateTag::Error);
    }

    #[test]
    fn abort_emits_start_aborting_and_accepts() {
        let (machine, bus) = idle_machine();
        let aborts = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&aborts);
        bus.add_listener(EventKind::StartAborting, move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });

        // Not progressing: 503.
        assert!(matches!(machine.abort(), CommandOutcome::Busy { .. }));
        assert_eq!(aborts.load(Ordering::SeqCst), 0);

        bus.send(&Event::HarvestStarted {
            started_at: Utc::now(),
            start_index: None,
            end_index: None,
        });
        assert!(matches!(machine.abort(), CommandOutcome::Accepted { .. }));
        assert_eq!(aborts.load(Ordering::SeqCst), 1);

        bus.send(&Event::AbortingStarted);
        assert_eq!(machine.current_tag(), StateTag::Aborting);
        bus.send(&Event::AbortingFinished);
        assert_eq!(machine.current_tag(), StateTag::Idle);
    }

    #[test]
    fn harvest_finished_is_ignored_while_aborting() {
        let (machine, bus) = idle_machine();
        bus.send(&Event::HarvestStarted {
            started_at: Utc::now(),
            start_index: None,
            end_index: None,
        });
        bus.send(&Event::AbortingStarted);

        bus.send(&Event::HarvestFinished {
            success: false,
            health: EtlHealth::Ok,
            hash: None,
            finished_at: Utc::now(),
        });
        assert_eq!(machine.current_tag(), StateTag::Aborting);
        bus.send(&Event::AbortingFinished);
        assert_eq!(machine.current_tag(), StateTag::Idle);
    }

    #[test]
    fn submit_and_save_cycles() {
        let (machine, bus) = idle_machine();
        assert!(matches!(machine.submit(), CommandOutcome::Accepted { .. }));
        bus.send(&Event::SubmissionStarted);
        assert_eq!(machine.current_tag(), StateTag::Submitting);
        bus.send(&Event::SubmissionFinished { success: true });
        assert_eq!(machine.current_tag(), StateTag::Idle);

        assert!(matches!(machine.save(), CommandOutcome::Accepted { .. }));
        bus.send(&Event::SaveStarted);
        assert_eq!(machine.current_tag(), StateTag::Saving);
        bus.send(&Event::SaveFinished { success: true });
        assert_eq!(machine.current_tag(), StateTag::Idle);
    }

    #[test]
    fn every_transition_is_recorded() {
        let (machine, bus) = idle_machine();
        bus.send(&Event::HarvestStarted {
            started_at: Utc::now(),
            start_index: None,
            end_index: None,
        });
        bus.send(&Event::HarvestFinished {
            success: true,
            health: EtlHealth::Ok,
            hash: None,
            finished_at: Utc::now(),
        });

        let tags: Vec<StateTag> = machine
            .transition_history()
            .into_iter()
            .map(|e| e.value)
            .collect();
        assert_eq!(
            tags,
            vec![
                StateTag::Initialization,
                StateTag::Idle,
                StateTag::Harvesting,
                StateTag::Idle,
            ]
        );
    }

    #[test]
    fn detach_stops_transitions() {
        let (machine, bus) = idle_machine();
        machine.detach();
        bus.send(&Event::HarvestStarted {
            started_at: Utc::now(),
            start_index: None,
            end_index: None,
        });
        assert_eq!(machine.current_tag(), StateTag::Idle);
    }

    #[test]
    fn progress_string_is_empty_when_idle() {
        let (machine, _bus) = idle_machine();
        assert_eq!(machine.progress_string(), "");
        assert!(machine.progress().is_none());
    }

    #[test]
    fn status_string_follows_the_state() {
        let (machine, bus) = machine();
        assert!(machine.status_string().contains("Initializing"));

        bus.send(&Event::ServiceInitialized { success: true });
        assert!(machine.status_string().starts_with("Idle"));

        bus.send(&Event::HarvestStarted {
            started_at: Utc::now(),
            start_index: None,
            end_index: None,
        });
        assert!(machine.status_string().starts_with("Harvesting"));
    }

    #[test]
    fn busy_answers_name_the_current_state() {
        let (machine, bus) = idle_machine();
        bus.send(&Event::HarvestStarted {
            started_at: Utc::now(),
            start_index: None,
            end_index: None,
        });
        match machine.save() {
            CommandOutcome::Busy { message, .. } => {
                assert!(message.contains("Harvesting"), "{}", message);
            }
            other => panic!("expected busy, got {:?}", other),
        }
    }

    #[test]
    fn abort_is_accepted_from_submitting_too() {
        let (machine, bus) = idle_machine();
        bus.send(&Event::SubmissionStarted);
        assert!(matches!(machine.abort(), CommandOutcome::Accepted { .. }));
    }

    #[test]
    fn outcome_message_accessor() {
        assert_eq!(CommandOutcome::accepted("go").message(), "go");
        assert_eq!(CommandOutcome::Ok("done".into()).message(), "done");
        assert_eq!(
            CommandOutcome::Busy { message: "wait".into(), retry_after: Some(3) }.message(),
            "wait"
        );
    }
}
