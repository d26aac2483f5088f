use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use harvd_events::{Answer, Event, EventBus, Query};
use harvd_domain::StateTag;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::parameter::{Category, Parameter, ParameterValue};

type StateSource = Arc<dyn Fn() -> Option<StateTag> + Send + Sync>;

/// One persisted configuration entry. Only `registered: true` entries
/// are ever written.
#[derive(Debug, Serialize, Deserialize)]
struct ConfigEntry {
    key: String,
    category: String,
    #[serde(flatten)]
    value: ParameterValue,
    registered: bool,
}

/// Process-wide mapping from composite parameter key to [`Parameter`].
///
/// Keys are compared case-insensitively; entries keep their original
/// casing. Mutation goes through [`register_parameter`] and
/// [`set_parameter`] only.
///
/// [`register_parameter`]: Configuration::register_parameter
/// [`set_parameter`]: Configuration::set_parameter
pub struct Configuration {
    module_name: String,
    cache_path: Option<PathBuf>,
    params: RwLock<HashMap<String, Parameter>>,
    bus: EventBus,
    state_source: RwLock<Option<StateSource>>,
}

impl Configuration {
    pub fn new(module_name: impl Into<String>, cache_path: Option<PathBuf>, bus: EventBus) -> Self {
        Self {
            module_name: module_name.into(),
            cache_path,
            params: RwLock::new(HashMap::new()),
            bus,
            state_source: RwLock::new(None),
        }
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn cache_path(&self) -> Option<&Path> {
        self.cache_path.as_deref()
    }

    /// Install the closure that reports the current service state.
    /// Until this is called every mutation is permitted (startup and
    /// configuration load run before the state machine exists).
    pub fn set_state_source<F>(&self, source: F)
    where
        F: Fn() -> Option<StateTag> + Send + Sync + 'static,
    {
        *self.state_source.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(source));
    }

    fn current_state(&self) -> Option<StateTag> {
        let source = self
            .state_source
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        source.and_then(|s| s())
    }

    // ── Registration & mutation ───────────────────────────────────────────────

    /// Register `param`. If the composite key is unknown the definition
    /// is inserted; if it is known the existing entry keeps its value
    /// and adopts the definition's gating. Either way the entry is
    /// marked registered (sticky) and a copy of the stored entry is
    /// returned.
    pub fn register_parameter(&self, param: Parameter) -> Parameter {
        let lower = param.composite_key_lower();
        let mut map = self.params.write().unwrap_or_else(|e| e.into_inner());
        match map.entry(lower) {
            std::collections::hash_map::Entry::Occupied(mut occupied) => {
                let existing = occupied.get_mut();
                existing.adopt_definition(&param);
                existing.mark_registered();
                existing.clone()
            }
            std::collections::hash_map::Entry::Vacant(vacant) => {
                let mut stored = param;
                stored.mark_registered();
                vacant.insert(stored).clone()
            }
        }
    }

    /// Case-insensitive lookup and validated mutation. On an actual
    /// value change a `ParameterChanged` event is emitted.
    /// Returns the previous value.
    pub fn set_parameter(
        &self,
        composite_key: &str,
        raw: &str,
    ) -> Result<ParameterValue, ConfigError> {
        let state = self.current_state();

        // Resolve the option set before taking the map lock; the
        // responder may be arbitrary code.
        let options = {
            let needs_options = {
                let map = self.params.read().unwrap_or_else(|e| e.into_inner());
                map.get(&composite_key.to_lowercase())
                    .map(|p| matches!(p.value(), ParameterValue::Enumerated(_)))
                    .unwrap_or(false)
            };
            if needs_options {
                self.bus
                    .query(&Query::LoaderNames)
                    .and_then(Answer::into_loader_names)
            } else {
                None
            }
        };

        let (old, changed_event) = {
            let mut map = self.params.write().unwrap_or_else(|e| e.into_inner());
            let param = map
                .get_mut(&composite_key.to_lowercase())
                .ok_or_else(|| ConfigError::UnknownParameter(composite_key.to_string()))?;
            let old = param.set_value(raw, state, options.as_deref())?;
            let event = (old != *param.value()).then(|| Event::ParameterChanged {
                composite_key: param.composite_key(),
                value: param.value().to_display_string(),
            });
            (old, event)
        };

        // Lock released; listeners may re-read the configuration.
        if let Some(event) = changed_event {
            self.bus.send(&event);
        }
        Ok(old)
    }

    // ── Lookups ───────────────────────────────────────────────────────────────

    pub fn get_parameter(&self, composite_key: &str) -> Option<Parameter> {
        let map = self.params.read().unwrap_or_else(|e| e.into_inner());
        map.get(&composite_key.to_lowercase()).cloned()
    }

    pub fn get_value(&self, composite_key: &str) -> Option<ParameterValue> {
        self.get_parameter(composite_key).map(|p| p.value().clone())
    }

    pub fn get_string_value(&self, composite_key: &str) -> Option<String> {
        self.get_value(composite_key).map(|v| v.as_raw())
    }

    pub fn get_integer_value(&self, composite_key: &str) -> Option<i64> {
        match self.get_value(composite_key) {
            Some(ParameterValue::Integer(i)) => Some(i),
            _ => None,
        }
    }

    pub fn get_boolean_value(&self, composite_key: &str) -> Option<bool> {
        match self.get_value(composite_key) {
            Some(ParameterValue::Boolean(b)) => Some(b),
            _ => None,
        }
    }

    /// All parameters, sorted by composite key for stable listings.
    pub fn parameters(&self) -> Vec<Parameter> {
        let map = self.params.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<Parameter> = map.values().cloned().collect();
        all.sort_by_key(|p| p.composite_key_lower());
        all
    }

    /// Human listing of registered parameters, passwords masked.
    pub fn as_plain_text(&self) -> String {
        let mut out = format!("Configuration of '{}':\n", self.module_name);
        for param in self.parameters().iter().filter(|p| p.is_registered()) {
            out.push_str(&format!("- {}\n", param));
        }
        out
    }

    // ── Persistence ───────────────────────────────────────────────────────────

    /// Read the cache file if present. Each entry is registered when
    /// unknown, then its value is applied; entries that fail to parse
    /// are skipped with a warning. Returns the number of applied
    /// entries.
    pub fn load_from_disk(&self) -> Result<usize, ConfigError> {
        let Some(path) = &self.cache_path else {
            return Ok(0);
        };
        if !path.exists() {
            debug!(path = %path.display(), "no configuration cache yet");
            return Ok(0);
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let raw_entries: Vec<serde_json::Value> =
            serde_json::from_str(&content).map_err(|e| ConfigError::Json {
                path: path.display().to_string(),
                source: e,
            })?;

        let mut applied = 0;
        for raw in raw_entries {
            let entry: ConfigEntry = match serde_json::from_value(raw.clone()) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, entry = %raw, "skipping unreadable configuration entry");
                    continue;
                }
            };
            let mut map = self.params.write().unwrap_or_else(|e| e.into_inner());
            let lower = format!("{}/{}", entry.category, entry.key).to_lowercase();
            match map.get_mut(&lower) {
                Some(param) => {
                    if let Err(e) = param.apply_typed(entry.value) {
                        warn!(key = %lower, error = %e, "skipping mismatched configuration entry");
                        continue;
                    }
                    if entry.registered {
                        param.mark_registered();
                    }
                }
                None => {
                    let mut param = Parameter::new(
                        Category::idle_only(entry.category),
                        entry.key,
                        entry.value,
                    );
                    if entry.registered {
                        param.mark_registered();
                    }
                    map.insert(lower, param);
                }
            }
            applied += 1;
        }
        debug!(count = applied, "configuration loaded");
        Ok(applied)
    }

    /// Write all registered parameters to the cache file. No-op when no
    /// path is configured.
    pub fn save_to_disk(&self) -> Result<(), ConfigError> {
        let Some(path) = &self.cache_path else {
            return Ok(());
        };
        let entries: Vec<ConfigEntry> = self
            .parameters()
            .into_iter()
            .filter(|p| p.is_registered())
            .map(|p| ConfigEntry {
                key: p.key().to_string(),
                category: p.category().name.clone(),
                value: p.value().clone(),
                registered: true,
            })
            .collect();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        let json = serde_json::to_string_pretty(&entries).map_err(|e| ConfigError::Json {
            path: path.display().to_string(),
            source: e,
        })?;
        std::fs::write(path, json).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })
    }
}
