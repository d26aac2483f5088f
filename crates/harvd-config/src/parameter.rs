use harvd_domain::StateTag;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ── Category ──────────────────────────────────────────────────────────────────

/// Free-form grouping of parameters, plus the set of service states
/// during which a member's value may be mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub name: String,
    pub allowed_states: Vec<StateTag>,
}

impl Category {
    pub fn new(name: impl Into<String>, allowed_states: Vec<StateTag>) -> Self {
        Self { name: name.into(), allowed_states }
    }

    /// A category whose parameters may only change while the service is
    /// idle. The usual case.
    pub fn idle_only(name: impl Into<String>) -> Self {
        Self::new(name, vec![StateTag::Idle])
    }

    pub fn allows(&self, state: StateTag) -> bool {
        self.allowed_states.contains(&state)
    }
}

// ── Value variants ────────────────────────────────────────────────────────────

/// A typed parameter value. Persisted as a discriminated union:
/// `{"type": "integer", "value": 5}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ParameterValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    Password(String),
    Url(String),
    #[serde(rename = "enum")]
    Enumerated(String),
}

impl ParameterValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ParameterValue::String(_) => "string",
            ParameterValue::Integer(_) => "integer",
            ParameterValue::Boolean(_) => "boolean",
            ParameterValue::Password(_) => "password",
            ParameterValue::Url(_) => "url",
            ParameterValue::Enumerated(_) => "enum",
        }
    }

    /// Parse `raw` as a value of the same variant as `self`.
    /// Enumerated values are checked against `options`.
    fn parse_same_kind(
        &self,
        raw: &str,
        options: Option<&[String]>,
    ) -> Result<ParameterValue, String> {
        match self {
            ParameterValue::String(_) => Ok(ParameterValue::String(raw.to_string())),
            ParameterValue::Password(_) => Ok(ParameterValue::Password(raw.to_string())),
            ParameterValue::Integer(_) => raw
                .trim()
                .parse::<i64>()
                .map(ParameterValue::Integer)
                .map_err(|_| format!("'{}' is not an integer", raw)),
            ParameterValue::Boolean(_) => {
                if raw.eq_ignore_ascii_case("true") {
                    Ok(ParameterValue::Boolean(true))
                } else if raw.eq_ignore_ascii_case("false") {
                    Ok(ParameterValue::Boolean(false))
                } else {
                    Err(format!("'{}' is neither 'true' nor 'false'", raw))
                }
            }
            ParameterValue::Url(_) => match url::Url::parse(raw) {
                Ok(parsed) => Ok(ParameterValue::Url(parsed.to_string())),
                Err(e) => Err(format!("'{}' is not an absolute URL: {}", raw, e)),
            },
            ParameterValue::Enumerated(_) => {
                let options = options.ok_or_else(|| "no option set available".to_string())?;
                if options.iter().any(|o| o == raw) {
                    Ok(ParameterValue::Enumerated(raw.to_string()))
                } else {
                    Err(format!("'{}' is not one of [{}]", raw, options.join(", ")))
                }
            }
        }
    }

    /// Raw string form, used when a typed value flows back into logs
    /// and events.
    pub fn as_raw(&self) -> String {
        match self {
            ParameterValue::String(s)
            | ParameterValue::Password(s)
            | ParameterValue::Url(s)
            | ParameterValue::Enumerated(s) => s.clone(),
            ParameterValue::Integer(i) => i.to_string(),
            ParameterValue::Boolean(b) => b.to_string(),
        }
    }

    /// Human-readable form; passwords are masked.
    pub fn to_display_string(&self) -> String {
        match self {
            ParameterValue::Password(_) => "****".to_string(),
            other => other.as_raw(),
        }
    }
}

// ── Parameter ─────────────────────────────────────────────────────────────────

/// A typed configuration knob, identified by `category + "/" + key`.
///
/// Composite keys are compared case-insensitively but retain their
/// original casing for display and persistence. The `registered` flag
/// is sticky: once set during a run it is never cleared, and only
/// registered parameters are persisted and listed.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    key: String,
    category: Category,
    value: ParameterValue,
    default: ParameterValue,
    registered: bool,
}

impl Parameter {
    pub fn new(category: Category, key: impl Into<String>, default: ParameterValue) -> Self {
        Self {
            key: key.into(),
            category,
            value: default.clone(),
            default,
            registered: false,
        }
    }

    pub fn string(category: Category, key: impl Into<String>, default: &str) -> Self {
        Self::new(category, key, ParameterValue::String(default.to_string()))
    }

    pub fn integer(category: Category, key: impl Into<String>, default: i64) -> Self {
        Self::new(category, key, ParameterValue::Integer(default))
    }

    pub fn boolean(category: Category, key: impl Into<String>, default: bool) -> Self {
        Self::new(category, key, ParameterValue::Boolean(default))
    }

    pub fn password(category: Category, key: impl Into<String>, default: &str) -> Self {
        Self::new(category, key, ParameterValue::Password(default.to_string()))
    }

    pub fn url(category: Category, key: impl Into<String>, default: &str) -> Self {
        Self::new(category, key, ParameterValue::Url(default.to_string()))
    }

    pub fn enumerated(category: Category, key: impl Into<String>, default: &str) -> Self {
        Self::new(category, key, ParameterValue::Enumerated(default.to_string()))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn category(&self) -> &Category {
        &self.category
    }

    pub fn value(&self) -> &ParameterValue {
        &self.value
    }

    pub fn default_value(&self) -> &ParameterValue {
        &self.default
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn mark_registered(&mut self) {
        self.registered = true;
    }

    /// `category + "/" + key`, original casing.
    pub fn composite_key(&self) -> String {
        format!("{}/{}", self.category.name, self.key)
    }

    /// The case-insensitive lookup form of the composite key.
    pub fn composite_key_lower(&self) -> String {
        self.composite_key().to_lowercase()
    }

    /// Validate and apply `raw`. Returns the previous value on success.
    ///
    /// `state` is the current service state; `None` means the state
    /// machine is not initialized yet (startup, configuration load), in
    /// which case mutation is always permitted. Enumerated parameters
    /// validate against `options`.
    pub fn set_value(
        &mut self,
        raw: &str,
        state: Option<StateTag>,
        options: Option<&[String]>,
    ) -> Result<ParameterValue, ConfigError> {
        if let Some(state) = state {
            if !self.category.allows(state) {
                return Err(ConfigError::MutationForbidden {
                    key: self.composite_key(),
                    state,
                });
            }
        }
        let parsed = self
            .value
            .parse_same_kind(raw, options)
            .map_err(|message| ConfigError::InvalidValue {
                key: self.composite_key(),
                message,
            })?;
        Ok(std::mem::replace(&mut self.value, parsed))
    }

    /// Take over gating and default from a code-side definition while
    /// keeping the current value. A persisted entry only carries the
    /// value; allowed states always come from the registering code.
    pub fn adopt_definition(&mut self, definition: &Parameter) {
        self.category = definition.category.clone();
        self.default = definition.default.clone();
    }

    /// Replace the value with an already-typed one of the same variant.
    /// Used when loading persisted entries.
    pub fn apply_typed(&mut self, value: ParameterValue) -> Result<(), ConfigError> {
        if std::mem::discriminant(&value) != std::mem::discriminant(&self.value) {
            return Err(ConfigError::InvalidValue {
                key: self.composite_key(),
                message: format!(
                    "persisted type '{}' does not match '{}'",
                    value.type_name(),
                    self.value.type_name()
                ),
            });
        }
        self.value = value;
        Ok(())
    }
}

impl std::fmt::Display for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.composite_key(), self.value.to_display_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle() -> Option<StateTag> {
        Some(StateTag::Idle)
    }

    #[test]
    fn string_accepts_anything() {
        let mut p = Parameter::string(Category::idle_only("A"), "s", "x");
        let old = p.set_value("hello world", idle(), None).unwrap();
        assert_eq!(old, ParameterValue::String("x".into()));
        assert_eq!(p.value().as_raw(), "hello world");
    }

    #[test]
    fn integer_rejects_non_numeric() {
        let mut p = Parameter::integer(Category::idle_only("A"), "n", 1);
        assert!(p.set_value("12", idle(), None).is_ok());
        assert_eq!(p.value(), &ParameterValue::Integer(12));
        let err = p.set_value("twelve", idle(), None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        // Value unchanged after rejection.
        assert_eq!(p.value(), &ParameterValue::Integer(12));
    }

    #[test]
    fn boolean_is_case_insensitive() {
        let mut p = Parameter::boolean(Category::idle_only("A"), "b", false);
        assert!(p.set_value("TRUE", idle(), None).is_ok());
        assert_eq!(p.value(), &ParameterValue::Boolean(true));
        assert!(p.set_value("False", idle(), None).is_ok());
        assert_eq!(p.value(), &ParameterValue::Boolean(false));
        assert!(p.set_value("yes", idle(), None).is_err());
    }

    #[test]
    fn url_requires_absolute() {
        let mut p = Parameter::url(Category::idle_only("A"), "u", "http://localhost/");
        assert!(p.set_value("https://example.org/api", idle(), None).is_ok());
        assert!(p.set_value("not a url", idle(), None).is_err());
        assert!(p.set_value("/relative/only", idle(), None).is_err());
    }

    #[test]
    fn password_masks_display() {
        let p = Parameter::password(Category::idle_only("A"), "pw", "s3cret");
        assert_eq!(p.value().to_display_string(), "****");
        assert_eq!(p.value().as_raw(), "s3cret");
        assert_eq!(p.to_string(), "A/pw: ****");
    }

    #[test]
    fn enumerated_checks_option_set() {
        let mut p = Parameter::enumerated(Category::idle_only("A"), "loaderType", "");
        let options = vec!["elasticsearch".to_string(), "disk".to_string()];
        assert!(p.set_value("disk", idle(), Some(&options)).is_ok());
        assert!(p.set_value("ftp", idle(), Some(&options)).is_err());
        assert!(matches!(
            p.set_value("disk", idle(), None).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn mutation_gated_by_state() {
        let mut p = Parameter::string(Category::idle_only("A"), "s", "x");
        let err = p.set_value("y", Some(StateTag::Harvesting), None).unwrap_err();
        assert!(matches!(err, ConfigError::MutationForbidden { .. }));
        // Uninitialized machine: always allowed.
        assert!(p.set_value("y", None, None).is_ok());
    }

    #[test]
    fn composite_key_keeps_casing() {
        let p = Parameter::string(Category::idle_only("MyEtl"), "rangeFrom", "");
        assert_eq!(p.composite_key(), "MyEtl/rangeFrom");
        assert_eq!(p.composite_key_lower(), "myetl/rangefrom");
    }

    #[test]
    fn integer_accepts_surrounding_whitespace() {
        let mut p = Parameter::integer(Category::idle_only("A"), "n", 0);
        assert!(p.set_value(" 42 ", idle(), None).is_ok());
        assert_eq!(p.value(), &ParameterValue::Integer(42));
    }

    #[test]
    fn raw_forms_match_the_typed_values() {
        assert_eq!(ParameterValue::Integer(-3).as_raw(), "-3");
        assert_eq!(ParameterValue::Boolean(true).as_raw(), "true");
        assert_eq!(ParameterValue::String("x".into()).as_raw(), "x");
        assert_eq!(ParameterValue::Enumerated("disk".into()).as_raw(), "disk");
    }

    #[test]
    fn type_names_match_the_wire_tags() {
        assert_eq!(ParameterValue::String("".into()).type_name(), "string");
        assert_eq!(ParameterValue::Integer(0).type_name(), "integer");
        assert_eq!(ParameterValue::Boolean(false).type_name(), "boolean");
        assert_eq!(ParameterValue::Password("".into()).type_name(), "password");
        assert_eq!(ParameterValue::Url("".into()).type_name(), "url");
        assert_eq!(ParameterValue::Enumerated("".into()).type_name(), "enum");
    }

    #[test]
    fn adopt_definition_keeps_the_value() {
        let mut stored = Parameter::string(Category::idle_only("A"), "s", "old-default");
        stored.set_value("live", None, None).unwrap();

        let definition = Parameter::string(
            Category::new("A", vec![StateTag::Idle, StateTag::Error]),
            "s",
            "new-default",
        );
        stored.adopt_definition(&definition);
        assert_eq!(stored.value().as_raw(), "live");
        assert_eq!(stored.default_value().as_raw(), "new-default");
        assert!(stored.category().allows(StateTag::Error));
    }

    #[test]
    fn apply_typed_rejects_variant_mismatch() {
        let mut p = Parameter::integer(Category::idle_only("A"), "n", 1);
        assert!(p.apply_typed(ParameterValue::Integer(9)).is_ok());
        assert_eq!(p.value(), &ParameterValue::Integer(9));
        assert!(p.apply_typed(ParameterValue::Boolean(true)).is_err());
        assert_eq!(p.value(), &ParameterValue::Integer(9));
    }

    #[test]
    fn set_value_returns_the_previous_value() {
        let mut p = Parameter::integer(Category::idle_only("A"), "n", 1);
        let old = p.set_value("2", idle(), None).unwrap();
        assert_eq!(old, ParameterValue::Integer(1));
        let old = p.set_value("3", idle(), None).unwrap();
        assert_eq!(old, ParameterValue::Integer(2));
    }

    #[test]
    fn value_serde_is_discriminated() {
        let v = ParameterValue::Integer(5);
        assert_eq!(
            serde_json::to_value(&v).unwrap(),
            serde_json::json!({"type": "integer", "value": 5})
        );
        let e = ParameterValue::Enumerated("disk".into());
        assert_eq!(
            serde_json::to_value(&e).unwrap(),
            serde_json::json!({"type": "enum", "value": "disk"})
        );
        let back: ParameterValue =
            serde_json::from_value(serde_json::json!({"type": "boolean", "value": true})).unwrap();
        assert_eq!(back, ParameterValue::Boolean(true));
    }
}
