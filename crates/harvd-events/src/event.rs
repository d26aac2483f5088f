use chrono::{DateTime, Utc};
use harvd_domain::EtlHealth;
use serde::{Deserialize, Serialize};

/// Everything the service components tell each other.
///
/// Events are fire-and-forget: the bus invokes every registered
/// listener in registration order on the sender's thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Event {
    /// Context assembly finished. `success = false` leaves the state
    /// machine in `Error`.
    ServiceInitialized { success: bool },

    /// Request to kick off a harvest. Sent by the scheduler when a cron
    /// entry fires; the runtime listens and runs the start command.
    StartHarvest,

    /// The harvest worker began running the queue.
    HarvestStarted {
        started_at: DateTime<Utc>,
        start_index: Option<u64>,
        end_index: Option<u64>,
    },

    /// The harvest worker finished the whole queue.
    HarvestFinished {
        success: bool,
        health: EtlHealth,
        hash: Option<String>,
        finished_at: DateTime<Utc>,
    },

    /// One pipeline finished; `count` documents were loaded by it.
    DocumentsHarvested { count: u64 },

    /// Request to abort the running harvest. Emitted by a progressing
    /// state's abort command; the manager listens.
    StartAborting,

    /// The manager began aborting: the running pipeline was flagged and
    /// the queued remainder cancelled.
    AbortingStarted,

    /// Abort completed; the service is idle again.
    AbortingFinished,

    SubmissionStarted,
    SubmissionFinished { success: bool },

    SaveStarted,
    SaveFinished { success: bool },

    /// A configuration parameter changed value.
    ParameterChanged { composite_key: String, value: String },

    /// The whole service context is being torn down and rebuilt.
    ResetContext,
}

/// Discriminant used for listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ServiceInitialized,
    StartHarvest,
    HarvestStarted,
    HarvestFinished,
    DocumentsHarvested,
    StartAborting,
    AbortingStarted,
    AbortingFinished,
    SubmissionStarted,
    SubmissionFinished,
    SaveStarted,
    SaveFinished,
    ParameterChanged,
    ResetContext,
}

impl EventKind {
    /// Every kind, for listeners that observe the whole bus.
    pub const ALL: [EventKind; 14] = [
        EventKind::ServiceInitialized,
        EventKind::StartHarvest,
        EventKind::HarvestStarted,
        EventKind::HarvestFinished,
        EventKind::DocumentsHarvested,
        EventKind::StartAborting,
        EventKind::AbortingStarted,
        EventKind::AbortingFinished,
        EventKind::SubmissionStarted,
        EventKind::SubmissionFinished,
        EventKind::SaveStarted,
        EventKind::SaveFinished,
        EventKind::ParameterChanged,
        EventKind::ResetContext,
    ];
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ServiceInitialized { .. } => EventKind::ServiceInitialized,
            Event::StartHarvest => EventKind::StartHarvest,
            Event::HarvestStarted { .. } => EventKind::HarvestStarted,
            Event::HarvestFinished { .. } => EventKind::HarvestFinished,
            Event::DocumentsHarvested { .. } => EventKind::DocumentsHarvested,
            Event::StartAborting => EventKind::StartAborting,
            Event::AbortingStarted => EventKind::AbortingStarted,
            Event::AbortingFinished => EventKind::AbortingFinished,
            Event::SubmissionStarted => EventKind::SubmissionStarted,
            Event::SubmissionFinished { .. } => EventKind::SubmissionFinished,
            Event::SaveStarted => EventKind::SaveStarted,
            Event::SaveFinished { .. } => EventKind::SaveFinished,
            Event::ParameterChanged { .. } => EventKind::ParameterChanged,
            Event::ResetContext => EventKind::ResetContext,
        }
    }
}
