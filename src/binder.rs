//! Binding of `liftoff.main.*` properties onto the application's settings.
//!
//! Property values are strings; the [`PropertyBinder`] converts the known keys
//! into a JSON object and lets `serde` do the typed conversion, so a malformed
//! value fails the same way a malformed config file would.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::banner::BannerMode;
use crate::context::ApplicationKind;
use crate::environment::Environment;
use crate::error::BoxError;

/// Prefix of the properties bound onto [`Settings`].
pub const MAIN_PREFIX: &str = "liftoff.main";

/// The environment-bindable fields of an application.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub banner_mode: BannerMode,
    /// `None` deduces the kind from capability markers.
    pub web_application_type: Option<ApplicationKind>,
    pub headless: bool,
    pub log_startup_info: bool,
    pub register_shutdown_hook: bool,
    pub add_command_line_properties: bool,
    pub allow_bean_definition_overriding: bool,
    pub lazy_initialization: bool,
    /// Extra textual sources, added to the primary ones.
    pub sources: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            banner_mode: BannerMode::Console,
            web_application_type: None,
            headless: true,
            log_startup_info: true,
            register_shutdown_hook: true,
            add_command_line_properties: true,
            allow_bean_definition_overriding: false,
            lazy_initialization: false,
            sources: Vec::new(),
        }
    }
}

/// Binds environment properties under a prefix onto [`Settings`].
pub trait Binder: Send + Sync {
    fn bind(&self, environment: &Environment, prefix: &str, settings: &mut Settings)
        -> Result<(), BoxError>;
}

#[derive(Debug, Clone, Copy)]
enum Shape {
    Flag,
    Text,
    Lowercase,
    List,
}

const KEYS: [(&str, Shape); 9] = [
    ("banner-mode", Shape::Lowercase),
    ("web-application-type", Shape::Text),
    ("headless", Shape::Flag),
    ("log-startup-info", Shape::Flag),
    ("register-shutdown-hook", Shape::Flag),
    ("add-command-line-properties", Shape::Flag),
    ("allow-bean-definition-overriding", Shape::Flag),
    ("lazy-initialization", Shape::Flag),
    ("sources", Shape::List),
];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SettingsPatch {
    banner_mode: Option<BannerMode>,
    web_application_type: Option<ApplicationKind>,
    headless: Option<bool>,
    log_startup_info: Option<bool>,
    register_shutdown_hook: Option<bool>,
    add_command_line_properties: Option<bool>,
    allow_bean_definition_overriding: Option<bool>,
    lazy_initialization: Option<bool>,
    sources: Option<Vec<String>>,
}

/// Default [`Binder`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PropertyBinder;

impl PropertyBinder {
    fn convert(key: &str, shape: Shape, raw: String) -> Result<Value, BoxError> {
        Ok(match shape {
            Shape::Flag => match raw.trim().to_ascii_lowercase().as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                other => return Err(format!("Invalid boolean '{other}' for {key}").into()),
            },
            Shape::Text => Value::String(raw.trim().to_string()),
            Shape::Lowercase => Value::String(raw.trim().to_ascii_lowercase()),
            Shape::List => Value::Array(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| Value::String(s.to_string()))
                    .collect(),
            ),
        })
    }
}

impl Binder for PropertyBinder {
    fn bind(
        &self,
        environment: &Environment,
        prefix: &str,
        settings: &mut Settings,
    ) -> Result<(), BoxError> {
        let mut object = Map::new();
        for (key, shape) in KEYS {
            let name = format!("{prefix}.{key}");
            if let Some(raw) = environment.get_property(&name) {
                object.insert(key.to_string(), Self::convert(&name, shape, raw)?);
            }
        }
        if object.is_empty() {
            return Ok(());
        }
        debug!(prefix, keys = object.len(), "Binding settings");

        let patch: SettingsPatch = serde_json::from_value(Value::Object(object))?;
        if let Some(v) = patch.banner_mode {
            settings.banner_mode = v;
        }
        if let Some(v) = patch.web_application_type {
            settings.web_application_type = Some(v);
        }
        if let Some(v) = patch.headless {
            settings.headless = v;
        }
        if let Some(v) = patch.log_startup_info {
            settings.log_startup_info = v;
        }
        if let Some(v) = patch.register_shutdown_hook {
            settings.register_shutdown_hook = v;
        }
        if let Some(v) = patch.add_command_line_properties {
            settings.add_command_line_properties = v;
        }
        if let Some(v) = patch.allow_bean_definition_overriding {
            settings.allow_bean_definition_overriding = v;
        }
        if let Some(v) = patch.lazy_initialization {
            settings.lazy_initialization = v;
        }
        if let Some(v) = patch.sources {
            settings.sources = v;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{EnvironmentKind, PropertySource};

    fn env(pairs: &[(&str, &str)]) -> Environment {
        let mut env = Environment::new(EnvironmentKind::Standard);
        env.property_sources_mut()
            .add_last(PropertySource::from_pairs("test", pairs.iter().copied()));
        env
    }

    #[test]
    fn binds_known_keys_and_leaves_the_rest() {
        let env = env(&[
            ("liftoff.main.banner-mode", "OFF"),
            ("liftoff.main.web-application-type", "reactive"),
            ("liftoff.main.lazy-initialization", "true"),
            ("liftoff.main.sources", "app.web, app.data"),
        ]);
        let mut settings = Settings::default();
        PropertyBinder.bind(&env, MAIN_PREFIX, &mut settings).unwrap();

        assert_eq!(settings.banner_mode, BannerMode::Off);
        assert_eq!(settings.web_application_type, Some(ApplicationKind::Reactive));
        assert!(settings.lazy_initialization);
        assert_eq!(settings.sources, vec!["app.web", "app.data"]);
        assert!(settings.headless);
        assert!(settings.log_startup_info);
    }

    #[test]
    fn malformed_values_fail() {
        let mut settings = Settings::default();
        let bad_flag = env(&[("liftoff.main.headless", "maybe")]);
        assert!(PropertyBinder.bind(&bad_flag, MAIN_PREFIX, &mut settings).is_err());

        let bad_kind = env(&[("liftoff.main.web-application-type", "grpc")]);
        assert!(PropertyBinder.bind(&bad_kind, MAIN_PREFIX, &mut settings).is_err());
        assert_eq!(settings, Settings::default());
    }
}
