use std::path::PathBuf;
use std::sync::Arc;

use harvd_domain::DeploymentType;
use tracing_subscriber::EnvFilter;

use crate::paths::ServicePaths;

/// Install the global tracing subscriber.
///
/// Long-lived deployments (Docker, Jetty) log to
/// `<module-dir>/logs/<module>.log`; everything else logs to stdout.
/// Returns the log file path when file logging is active. Installing a
/// second subscriber (tests, context reset) is a no-op.
pub fn init_logging(deployment: DeploymentType, paths: &ServicePaths) -> Option<PathBuf> {
    let to_file = matches!(deployment, DeploymentType::Docker | DeploymentType::Jetty);
    if !to_file {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_target(false)
            .try_init();
        return None;
    }

    let log_file = paths.log_file();
    if std::fs::create_dir_all(paths.log_dir()).is_err() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_target(false)
            .try_init();
        return None;
    }
    match std::fs::OpenOptions::new().create(true).append(true).open(&log_file) {
        Ok(file) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::from_default_env())
                .with_target(false)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .try_init();
            Some(log_file)
        }
        Err(_) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::from_default_env())
                .with_target(false)
                .try_init();
            None
        }
    }
}
