use std::path::{Path, PathBuf};

use harvd_domain::DeploymentType;

/// Environment override for the cache root, regardless of deployment
/// type.
pub const CACHE_ROOT_ENV_VAR: &str = "HARVD_CACHE_ROOT";

/// Resolved filesystem layout of one service instance:
///
/// ```text
/// <cache-root>/<module>/
///   config.json
///   scheduler.json
///   time-keeper.json
///   etl/<etl-name>.json
///   logs/<module>.log
/// ```
#[derive(Debug, Clone)]
pub struct ServicePaths {
    cache_root: PathBuf,
    module: String,
}

impl ServicePaths {
    /// Resolve the cache root for `deployment`, honoring the
    /// `HARVD_CACHE_ROOT` override.
    pub fn resolve(module: &str, deployment: DeploymentType) -> Self {
        let cache_root = match std::env::var(CACHE_ROOT_ENV_VAR) {
            Ok(root) if !root.trim().is_empty() => PathBuf::from(root),
            _ => default_cache_root(deployment),
        };
        Self::at(cache_root, module)
    }

    /// Place the layout under an explicit root. Used by tests and by
    /// embedders that manage their own directories.
    pub fn at(cache_root: impl Into<PathBuf>, module: &str) -> Self {
        Self { cache_root: cache_root.into(), module: module.to_string() }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn module_dir(&self) -> PathBuf {
        self.cache_root.join(&self.module)
    }

    pub fn config_file(&self) -> PathBuf {
        self.module_dir().join("config.json")
    }

    pub fn scheduler_file(&self) -> PathBuf {
        self.module_dir().join("scheduler.json")
    }

    pub fn time_keeper_file(&self) -> PathBuf {
        self.module_dir().join("time-keeper.json")
    }

    pub fn etl_dir(&self) -> PathBuf {
        self.module_dir().join("etl")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.module_dir().join("logs")
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_dir().join(format!("{}.log", self.module))
    }
}

fn default_cache_root(deployment: DeploymentType) -> PathBuf {
    match deployment {
        DeploymentType::Docker => PathBuf::from("/var/lib/harvd"),
        DeploymentType::Jetty | DeploymentType::Other => PathBuf::from("cache"),
        DeploymentType::UnitTest => std::env::temp_dir().join("harvd-tests"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_follows_the_cache_convention() {
        let paths = ServicePaths::at("/tmp/root", "myHarvester");
        assert_eq!(paths.module_dir(), PathBuf::from("/tmp/root/myHarvester"));
        assert_eq!(paths.config_file(), PathBuf::from("/tmp/root/myHarvester/config.json"));
        assert_eq!(
            paths.scheduler_file(),
            PathBuf::from("/tmp/root/myHarvester/scheduler.json")
        );
        assert_eq!(
            paths.time_keeper_file(),
            PathBuf::from("/tmp/root/myHarvester/time-keeper.json")
        );
        assert_eq!(paths.etl_dir(), PathBuf::from("/tmp/root/myHarvester/etl"));
        assert_eq!(
            paths.log_file(),
            PathBuf::from("/tmp/root/myHarvester/logs/myHarvester.log")
        );
    }

    #[test]
    fn unit_test_deployment_uses_the_temp_dir() {
        let root = default_cache_root(DeploymentType::UnitTest);
        assert!(root.starts_with(std::env::temp_dir()));
    }
}
