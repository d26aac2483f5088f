use harvd_domain::StateTag;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error("parameter '{key}' cannot be changed while the service is {state}")]
    MutationForbidden { key: String, state: StateTag },

    #[error("no option set available to validate '{key}'")]
    OptionsUnavailable { key: String },

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
