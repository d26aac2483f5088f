use std::sync::Arc;

use crate::contracts::Loader;

type LoaderFactory = Arc<dyn Fn() -> Box<dyn Loader> + Send + Sync>;

/// Registry of loader implementations, keyed by name.
///
/// Pipelines select their loader per harvest through an enumerated
/// `loaderType` parameter whose option set is this registry's name
/// list. Registration order is preserved; the first entry is the
/// default.
#[derive(Clone, Default)]
pub struct LoaderRegistry {
    entries: Vec<(String, LoaderFactory)>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`. A repeated name replaces the
    /// earlier factory but keeps its position.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Loader> + Send + Sync + 'static,
    {
        let name = name.into();
        let factory: LoaderFactory = Arc::new(factory);
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = factory,
            None => self.entries.push((name, factory)),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn default_name(&self) -> Option<&str> {
        self.entries.first().map(|(n, _)| n.as_str())
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn Loader>> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, factory)| factory())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::CountingLoader;

    #[test]
    fn registration_order_is_kept() {
        let mut registry = LoaderRegistry::new();
        registry.register("elasticsearch", || Box::new(CountingLoader::unbounded()));
        registry.register("disk", || Box::new(CountingLoader::unbounded()));
        assert_eq!(registry.names(), vec!["elasticsearch", "disk"]);
        assert_eq!(registry.default_name(), Some("elasticsearch"));
    }

    #[test]
    fn create_unknown_is_none() {
        let registry = LoaderRegistry::new();
        assert!(registry.create("nope").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn repeated_name_replaces_in_place() {
        let mut registry = LoaderRegistry::new();
        registry.register("disk", || Box::new(CountingLoader::unbounded()));
        registry.register("elasticsearch", || Box::new(CountingLoader::unbounded()));
        registry.register("disk", || Box::new(CountingLoader::failing_after(1)));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["disk", "elasticsearch"]);
    }
}
