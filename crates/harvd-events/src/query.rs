use std::path::PathBuf;

/// A synchronous request/response lookup. At most one responder per
/// kind is registered; re-registering replaces the previous responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Names of all registered loader implementations. Answers the
    /// option set of enumerated loader-type parameters.
    LoaderNames,

    /// Total number of documents loaded in the current or most recent
    /// harvest, across all pipelines.
    HarvestedDocumentCount,

    /// Service name and version string.
    VersionInfo,

    /// Path of the main log file, when file logging is active.
    MainLogPath,
}

/// Discriminant used for responder registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    LoaderNames,
    HarvestedDocumentCount,
    VersionInfo,
    MainLogPath,
}

impl Query {
    pub fn kind(&self) -> QueryKind {
        match self {
            Query::LoaderNames => QueryKind::LoaderNames,
            Query::HarvestedDocumentCount => QueryKind::HarvestedDocumentCount,
            Query::VersionInfo => QueryKind::VersionInfo,
            Query::MainLogPath => QueryKind::MainLogPath,
        }
    }
}

/// Responder results, one variant per query kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    LoaderNames(Vec<String>),
    HarvestedDocumentCount(u64),
    VersionInfo(String),
    MainLogPath(Option<PathBuf>),
}

impl Answer {
    pub fn into_loader_names(self) -> Option<Vec<String>> {
        match self {
            Answer::LoaderNames(names) => Some(names),
            _ => None,
        }
    }

    pub fn into_document_count(self) -> Option<u64> {
        match self {
            Answer::HarvestedDocumentCount(count) => Some(count),
            _ => None,
        }
    }

    pub fn into_version_info(self) -> Option<String> {
        match self {
            Answer::VersionInfo(info) => Some(info),
            _ => None,
        }
    }

    pub fn into_log_path(self) -> Option<PathBuf> {
        match self {
            Answer::MainLogPath(path) => path,
            _ => None,
        }
    }
}
