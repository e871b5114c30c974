//! # Environment
//!
//! An ordered stack of named property sources (first match wins), plus active
//! and default profiles. Values may reference other properties with
//! `${key}` or `${key:default}`; references are resolved at lookup time.
//!
//! ```rust
//! use liftoff::environment::{Environment, EnvironmentKind, PropertySource};
//!
//! let mut env = Environment::new(EnvironmentKind::Standard);
//! env.property_sources_mut().add_last(PropertySource::from_pairs(
//!     "app",
//!     [("host", "localhost"), ("url", "http://${host}:${port:8080}")],
//! ));
//! assert_eq!(env.get_property("url").as_deref(), Some("http://localhost:8080"));
//! ```

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::debug;

use crate::context::ApplicationKind;

pub const SYSTEM_ENVIRONMENT: &str = "systemEnvironment";
pub const COMMAND_LINE_ARGS: &str = "commandLineArgs";
pub const DEFAULT_PROPERTIES: &str = "defaultProperties";

/// Property holding the comma-separated active profiles.
pub const ACTIVE_PROFILES_PROPERTY: &str = "liftoff.profiles.active";

/// `${key}` or `${key:default}`.
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}:]+)(?::([^}]*))?\}").unwrap());

const MAX_RESOLVE_DEPTH: usize = 8;

/// Concrete environment flavour, one per [`ApplicationKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentKind {
    Standard,
    Servlet,
    Reactive,
}

impl EnvironmentKind {
    pub fn for_application(kind: ApplicationKind) -> Self {
        match kind {
            ApplicationKind::Standalone => EnvironmentKind::Standard,
            ApplicationKind::Servlet => EnvironmentKind::Servlet,
            ApplicationKind::Reactive => EnvironmentKind::Reactive,
        }
    }
}

/// A named set of string properties.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySource {
    name: String,
    properties: BTreeMap<String, String>,
    relaxed: bool,
}

impl PropertySource {
    pub fn new(name: impl Into<String>, properties: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            properties,
            relaxed: false,
        }
    }

    pub fn from_pairs<K, V>(name: impl Into<String>, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(
            name,
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Also matches `a.b-c` against `A_B_C`, the way process variables are named.
    pub fn with_relaxed_names(mut self) -> Self {
        self.relaxed = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        if let Some(value) = self.properties.get(key) {
            return Some(value);
        }
        if self.relaxed {
            let upper: String = key
                .chars()
                .map(|c| match c {
                    '.' | '-' => '_',
                    c => c.to_ascii_uppercase(),
                })
                .collect();
            return self.properties.get(&upper).map(String::as_str);
        }
        None
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// Ordered property sources. Earlier sources take precedence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertySources {
    sources: Vec<PropertySource>,
}

impl PropertySources {
    /// Adds `source` with the highest precedence, replacing any source with the same name.
    pub fn add_first(&mut self, source: PropertySource) {
        self.remove(source.name());
        self.sources.insert(0, source);
    }

    /// Adds `source` with the lowest precedence, replacing any source with the same name.
    pub fn add_last(&mut self, source: PropertySource) {
        self.remove(source.name());
        self.sources.push(source);
    }

    /// Replaces the source named `name` in place. Returns false if absent.
    pub fn replace(&mut self, name: &str, source: PropertySource) -> bool {
        match self.sources.iter_mut().find(|s| s.name == name) {
            Some(slot) => {
                *slot = source;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<PropertySource> {
        let index = self.sources.iter().position(|s| s.name == name)?;
        Some(self.sources.remove(index))
    }

    pub fn get(&self, name: &str) -> Option<&PropertySource> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PropertySource> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Property sources plus profiles.
#[derive(Debug, Clone, PartialEq)]
pub struct Environment {
    kind: EnvironmentKind,
    sources: PropertySources,
    active_profiles: Vec<String>,
    default_profiles: Vec<String>,
}

impl Environment {
    /// An environment with no property sources.
    pub fn new(kind: EnvironmentKind) -> Self {
        Self {
            kind,
            sources: PropertySources::default(),
            active_profiles: Vec::new(),
            default_profiles: vec!["default".to_string()],
        }
    }

    /// An environment holding the process variables as its `systemEnvironment`
    /// source. With a prefix, only `PREFIX_*` variables are exposed, without
    /// the prefix.
    pub fn standard(kind: EnvironmentKind, prefix: Option<&str>) -> Self {
        Self::with_system_environment(kind, prefix, std::env::vars())
    }

    pub fn with_system_environment(
        kind: EnvironmentKind,
        prefix: Option<&str>,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        let prefix = prefix
            .filter(|p| !p.is_empty())
            .map(|p| format!("{}_", p.trim_end_matches('_').to_ascii_uppercase()));
        let properties = vars
            .into_iter()
            .filter_map(|(key, value)| match &prefix {
                Some(prefix) => key.strip_prefix(prefix.as_str()).map(|k| (k.to_string(), value)),
                None => Some((key, value)),
            })
            .collect();
        let mut environment = Self::new(kind);
        environment
            .sources
            .add_last(PropertySource::new(SYSTEM_ENVIRONMENT, properties).with_relaxed_names());
        environment
    }

    pub fn kind(&self) -> EnvironmentKind {
        self.kind
    }

    pub fn property_sources(&self) -> &PropertySources {
        &self.sources
    }

    pub fn property_sources_mut(&mut self) -> &mut PropertySources {
        &mut self.sources
    }

    /// The raw value, without placeholder resolution.
    pub fn get_raw(&self, key: &str) -> Option<&str> {
        self.sources.iter().find_map(|source| source.get(key))
    }

    /// The value with placeholders resolved.
    pub fn get_property(&self, key: &str) -> Option<String> {
        self.get_raw(key).map(|raw| self.resolve_placeholders(raw))
    }

    pub fn get_property_or(&self, key: &str, default: &str) -> String {
        self.get_property(key).unwrap_or_else(|| default.to_string())
    }

    pub fn contains_property(&self, key: &str) -> bool {
        self.get_raw(key).is_some()
    }

    /// Replaces `${key}` and `${key:default}` references. Unresolvable
    /// references without a default are left untouched.
    pub fn resolve_placeholders(&self, text: &str) -> String {
        let mut current = text.to_string();
        for _ in 0..MAX_RESOLVE_DEPTH {
            if !PLACEHOLDER.is_match(&current) {
                break;
            }
            let next = PLACEHOLDER
                .replace_all(&current, |caps: &Captures| {
                    let key = caps[1].trim();
                    match (self.get_raw(key), caps.get(2)) {
                        (Some(value), _) => value.to_string(),
                        (None, Some(default)) => default.as_str().to_string(),
                        (None, None) => caps[0].to_string(),
                    }
                })
                .into_owned();
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    /// Explicitly set profiles, or those named by `liftoff.profiles.active`.
    pub fn active_profiles(&self) -> Vec<String> {
        if !self.active_profiles.is_empty() {
            return self.active_profiles.clone();
        }
        self.get_property(ACTIVE_PROFILES_PROPERTY)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_active_profiles<I, S>(&mut self, profiles: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.active_profiles = profiles.into_iter().map(Into::into).collect();
    }

    pub fn add_active_profile(&mut self, profile: impl Into<String>) {
        let profile = profile.into();
        let mut profiles = self.active_profiles();
        if !profiles.contains(&profile) {
            profiles.push(profile);
        }
        self.active_profiles = profiles;
    }

    pub fn default_profiles(&self) -> &[String] {
        &self.default_profiles
    }

    /// Converts to another kind, keeping sources, their order and profiles.
    pub fn convert(self, kind: EnvironmentKind) -> Environment {
        if self.kind == kind {
            return self;
        }
        debug!(from = ?self.kind, to = ?kind, "Converting environment");
        Environment { kind, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn first_source_wins() {
        let mut env = Environment::new(EnvironmentKind::Standard);
        env.property_sources_mut()
            .add_last(PropertySource::from_pairs("low", [("name", "low")]));
        env.property_sources_mut()
            .add_first(PropertySource::from_pairs("high", [("name", "high")]));
        assert_eq!(env.get_property("name").as_deref(), Some("high"));
        assert_eq!(env.property_sources().names(), vec!["high", "low"]);
    }

    #[test]
    fn placeholders_resolve_nested_and_defaults() {
        let mut env = Environment::new(EnvironmentKind::Standard);
        env.property_sources_mut().add_last(PropertySource::from_pairs(
            "app",
            [
                ("a", "${b}"),
                ("b", "${c:fallback}"),
                ("loop", "${loop}"),
                ("missing", "${nope}"),
            ],
        ));
        assert_eq!(env.get_property("a").as_deref(), Some("fallback"));
        assert_eq!(env.get_property("loop").as_deref(), Some("${loop}"));
        assert_eq!(env.get_property("missing").as_deref(), Some("${nope}"));
    }

    #[test]
    fn system_environment_honours_prefix_and_relaxed_names() {
        let env = Environment::with_system_environment(
            EnvironmentKind::Standard,
            Some("myapp"),
            vars(&[("MYAPP_SERVER_PORT", "9000"), ("SERVER_HOST", "ignored")]),
        );
        assert_eq!(env.get_property("server.port").as_deref(), Some("9000"));
        assert_eq!(env.get_property("server.host"), None);

        let env = Environment::with_system_environment(
            EnvironmentKind::Standard,
            None,
            vars(&[("LIFTOFF_MAIN_BANNER_MODE", "off")]),
        );
        assert_eq!(env.get_property("liftoff.main.banner-mode").as_deref(), Some("off"));
    }

    #[test]
    fn profiles_come_from_property_unless_set() {
        let mut env = Environment::new(EnvironmentKind::Standard);
        env.property_sources_mut().add_last(PropertySource::from_pairs(
            "app",
            [(ACTIVE_PROFILES_PROPERTY, "dev, cloud")],
        ));
        assert_eq!(env.active_profiles(), vec!["dev", "cloud"]);
        env.add_active_profile("extra");
        assert_eq!(env.active_profiles(), vec!["dev", "cloud", "extra"]);
    }

    #[test]
    fn convert_preserves_sources_and_order() {
        let mut env = Environment::new(EnvironmentKind::Standard);
        env.property_sources_mut()
            .add_last(PropertySource::from_pairs("one", [("k", "1")]));
        env.property_sources_mut()
            .add_last(PropertySource::from_pairs("two", [("k", "2")]));
        env.set_active_profiles(["p"]);

        let converted = env.clone().convert(EnvironmentKind::Servlet);
        assert_eq!(converted.kind(), EnvironmentKind::Servlet);
        assert_eq!(converted.property_sources(), env.property_sources());
        assert_eq!(converted.active_profiles(), vec!["p"]);
    }
}
