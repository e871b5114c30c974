//! Parsed command-line arguments.
//!
//! Options use the `--name` or `--name=value` form and may repeat. Everything
//! else is a non-option argument. A lone `--` is a syntax error.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::environment::{PropertySource, COMMAND_LINE_ARGS};
use crate::error::ArgumentError;

/// Property holding the non-option arguments, comma-separated.
pub const NON_OPTION_ARGS_PROPERTY: &str = "nonOptionArgs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationArguments {
    source: Arc<[String]>,
    options: BTreeMap<String, Vec<String>>,
    non_options: Vec<String>,
}

impl ApplicationArguments {
    pub fn parse<I, S>(args: I) -> Result<Self, ArgumentError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let source: Arc<[String]> = args.into_iter().map(Into::into).collect();
        let mut options: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut non_options = Vec::new();

        for arg in source.iter() {
            let Some(option) = arg.strip_prefix("--") else {
                non_options.push(arg.clone());
                continue;
            };
            let (name, value) = match option.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (option, None),
            };
            if name.is_empty() {
                return Err(ArgumentError::InvalidSyntax(arg.clone()));
            }
            let values = options.entry(name.to_string()).or_default();
            if let Some(value) = value {
                values.push(value.to_string());
            }
        }

        Ok(Self {
            source,
            options,
            non_options,
        })
    }

    /// The raw arguments as given.
    pub fn source_args(&self) -> &[String] {
        &self.source
    }

    pub fn option_names(&self) -> impl Iterator<Item = &str> {
        self.options.keys().map(String::as_str)
    }

    pub fn contains_option(&self, name: &str) -> bool {
        self.options.contains_key(name)
    }

    /// Values of option `name`: empty for a bare `--name`, `None` if absent.
    pub fn option_values(&self, name: &str) -> Option<&[String]> {
        self.options.get(name).map(Vec::as_slice)
    }

    pub fn non_option_args(&self) -> &[String] {
        &self.non_options
    }

    /// The options as a `commandLineArgs` property source. Repeated values
    /// are comma-joined; non-option arguments appear under `nonOptionArgs`.
    pub fn to_property_source(&self) -> PropertySource {
        let mut properties: BTreeMap<String, String> = self
            .options
            .iter()
            .map(|(name, values)| (name.clone(), values.join(",")))
            .collect();
        if !self.non_options.is_empty() {
            properties.insert(NON_OPTION_ARGS_PROPERTY.to_string(), self.non_options.join(","));
        }
        PropertySource::new(COMMAND_LINE_ARGS, properties)
    }
}
