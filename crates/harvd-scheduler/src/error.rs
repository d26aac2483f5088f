use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid cron expression '{expression}': {message}")]
    InvalidCron { expression: String, message: String },

    #[error("cron expression '{0}' is already scheduled")]
    Duplicate(String),

    #[error("cron expression '{0}' is not scheduled")]
    Unknown(String),

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("json error in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
