use serde::{Deserialize, Serialize};

use crate::error::DomainError;

// ── Identifiers ──────────────────────────────────────────────────────────────

/// Name of an ETL pipeline, unique within one service instance.
///
/// Raw names are sanitized on construction: anything that is not
/// alphanumeric splits words, and the words are joined camel-cased
/// (`"oai pmh"` → `"OaiPmh"`). The sanitized form is used as the
/// parameter category and as the snapshot file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EtlName(String);

impl EtlName {
    pub fn new(raw: &str) -> Result<Self, DomainError> {
        let mut out = String::with_capacity(raw.len());
        for word in raw.split(|c: char| !c.is_ascii_alphanumeric()) {
            let mut chars = word.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.extend(chars);
            }
        }
        if out.is_empty() {
            return Err(DomainError::InvalidEtlName(raw.to_string()));
        }
        Ok(EtlName(out))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EtlName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── ETL status ────────────────────────────────────────────────────────────────

/// The lifecycle status of one ETL pipeline.
///
/// Transitions within a harvest are monotone:
///   Initializing → Idle → Queued → Harvesting → Done
///   Queued → Cancelling → Done       (fast path, pipeline never ran)
///   Harvesting → Aborting → Done     (cooperative, pipeline in flight)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EtlStatus {
    Initializing,
    Idle,
    Queued,
    Harvesting,
    Aborting,
    Cancelling,
    Done,
}

impl EtlStatus {
    /// True while the pipeline is part of an active harvest.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            EtlStatus::Queued | EtlStatus::Harvesting | EtlStatus::Aborting | EtlStatus::Cancelling
        )
    }
}

impl std::fmt::Display for EtlStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EtlStatus::Initializing => "initializing",
            EtlStatus::Idle => "idle",
            EtlStatus::Queued => "queued",
            EtlStatus::Harvesting => "harvesting",
            EtlStatus::Aborting => "aborting",
            EtlStatus::Cancelling => "cancelling",
            EtlStatus::Done => "done",
        };
        write!(f, "{}", s)
    }
}

// ── ETL health ────────────────────────────────────────────────────────────────

/// Health of a pipeline, recorded after the most recent operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EtlHealth {
    #[default]
    Ok,
    InitializationFailed,
    ExtractionFailed,
    TransformationFailed,
    LoadingFailed,
    HarvestFailed,
}

impl EtlHealth {
    /// Severity rank used for worst-health aggregation across pipelines.
    /// `InitializationFailed` outranks every harvest-stage failure.
    fn severity(&self) -> u8 {
        match self {
            EtlHealth::Ok => 0,
            EtlHealth::ExtractionFailed
            | EtlHealth::TransformationFailed
            | EtlHealth::LoadingFailed
            | EtlHealth::HarvestFailed => 1,
            EtlHealth::InitializationFailed => 2,
        }
    }

    /// The worse of two health values.
    pub fn worst(self, other: EtlHealth) -> EtlHealth {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, EtlHealth::Ok)
    }
}

impl std::fmt::Display for EtlHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EtlHealth::Ok => "OK",
            EtlHealth::InitializationFailed => "INITIALIZATION_FAILED",
            EtlHealth::ExtractionFailed => "EXTRACTION_FAILED",
            EtlHealth::TransformationFailed => "TRANSFORMATION_FAILED",
            EtlHealth::LoadingFailed => "LOADING_FAILED",
            EtlHealth::HarvestFailed => "HARVEST_FAILED",
        };
        write!(f, "{}", s)
    }
}

// ── Service state tags ────────────────────────────────────────────────────────

/// Tag identifying a service state, without the state's runtime data.
///
/// Used wherever a state must be named but not driven: parameter
/// categories carry the set of tags during which a value may change,
/// and `/status/state` reports the current tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateTag {
    Initialization,
    Idle,
    Harvesting,
    Submitting,
    Saving,
    Aborting,
    Error,
}

impl std::fmt::Display for StateTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StateTag::Initialization => "Initialization",
            StateTag::Idle => "Idle",
            StateTag::Harvesting => "Harvesting",
            StateTag::Submitting => "Submitting",
            StateTag::Saving => "Saving",
            StateTag::Aborting => "Aborting",
            StateTag::Error => "Error",
        };
        write!(f, "{}", s)
    }
}

// ── Deployment type ───────────────────────────────────────────────────────────

/// How this service instance is deployed. Read from the
/// `DEPLOYMENT_TYPE` environment variable; selects cache-root and log
/// destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeploymentType {
    Docker,
    Jetty,
    UnitTest,
    #[default]
    Other,
}

impl DeploymentType {
    pub const ENV_VAR: &'static str = "DEPLOYMENT_TYPE";

    /// Resolve from the environment, defaulting to `Other` for unset or
    /// unrecognized values.
    pub fn from_env() -> Self {
        match std::env::var(Self::ENV_VAR) {
            Ok(v) => Self::parse(&v),
            Err(_) => DeploymentType::Other,
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "DOCKER" => DeploymentType::Docker,
            "JETTY" => DeploymentType::Jetty,
            "UNIT_TEST" => DeploymentType::UnitTest,
            _ => DeploymentType::Other,
        }
    }
}

impl std::fmt::Display for DeploymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeploymentType::Docker => "DOCKER",
            DeploymentType::Jetty => "JETTY",
            DeploymentType::UnitTest => "UNIT_TEST",
            DeploymentType::Other => "OTHER",
        };
        write!(f, "{}", s)
    }
}

// ── Document contract ─────────────────────────────────────────────────────────

/// A transformed record in canonical form, ready for a loader.
///
/// Concrete harvesters define their own document structs; loaders only
/// see this contract.
pub trait Document: Send {
    /// Stable identifier of the document within its source, when the
    /// source provides one. Loaders may use it as the index id.
    fn id(&self) -> Option<&str> {
        None
    }

    /// The canonical JSON body handed to the downstream sink.
    fn to_json(&self) -> serde_json::Value;
}

impl Document for serde_json::Value {
    fn to_json(&self) -> serde_json::Value {
        self.clone()
    }
}
