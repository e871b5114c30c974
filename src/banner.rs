//! Startup banner.
//!
//! The banner is chosen in this order: the text file named by
//! `liftoff.banner.location`, the custom banner set on the application, the
//! built-in banner. Text banners may reference environment properties with
//! `${...}` placeholders.

use std::fmt;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::environment::Environment;

pub const BANNER_LOCATION_PROPERTY: &str = "liftoff.banner.location";

/// Where the banner goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BannerMode {
    Off,
    #[default]
    Console,
    Log,
}

pub trait Banner: Send + Sync {
    fn render(&self, environment: &Environment, main_source: Option<&str>, out: &mut dyn Write)
        -> io::Result<()>;
}

/// Built-in banner.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBanner;

const DEFAULT_LINES: [&str; 4] = [
    r"  _ _  __ _         __  __ ",
    r" | (_)/ _| |_ ___  / _|/ _|",
    r" | | |  _|  _/ _ \|  _|  _|",
    r" |_|_|_|  \__\___/|_| |_|  ",
];

impl Banner for DefaultBanner {
    fn render(&self, _: &Environment, _: Option<&str>, out: &mut dyn Write) -> io::Result<()> {
        for line in DEFAULT_LINES {
            writeln!(out, "{line}")?;
        }
        writeln!(out, " :: liftoff ::  (v{})", env!("CARGO_PKG_VERSION"))?;
        writeln!(out)
    }
}

/// Banner read from text, with placeholders resolved against the environment.
#[derive(Debug, Clone)]
pub struct TextBanner {
    text: String,
}

impl TextBanner {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> io::Result<Self> {
        std::fs::read_to_string(path.into()).map(Self::new)
    }
}

impl Banner for TextBanner {
    fn render(&self, environment: &Environment, _: Option<&str>, out: &mut dyn Write) -> io::Result<()> {
        let text = environment.resolve_placeholders(&self.text);
        out.write_all(text.as_bytes())?;
        if !text.ends_with('\n') {
            writeln!(out)?;
        }
        Ok(())
    }
}

/// The banner as printed, registered in the container as `applicationBanner`.
#[derive(Clone)]
pub struct PrintedBanner {
    banner: Arc<dyn Banner>,
    main_source: Option<String>,
}

impl PrintedBanner {
    pub fn render(&self, environment: &Environment, out: &mut dyn Write) -> io::Result<()> {
        self.banner.render(environment, self.main_source.as_deref(), out)
    }
}

impl fmt::Debug for PrintedBanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrintedBanner")
            .field("main_source", &self.main_source)
            .finish_non_exhaustive()
    }
}

/// Selects and prints the banner. Returns `None` when the mode is `Off`.
pub(crate) fn print_banner(
    mode: BannerMode,
    environment: &Environment,
    custom: Option<&Arc<dyn Banner>>,
    main_source: Option<&str>,
) -> io::Result<Option<PrintedBanner>> {
    if mode == BannerMode::Off {
        return Ok(None);
    }
    let banner: Arc<dyn Banner> = match environment.get_property(BANNER_LOCATION_PROPERTY) {
        Some(location) => Arc::new(TextBanner::from_file(location)?),
        None => custom.cloned().unwrap_or_else(|| Arc::new(DefaultBanner)),
    };

    let mut rendered = Vec::new();
    banner.render(environment, main_source, &mut rendered)?;
    match mode {
        BannerMode::Log => info!("{}", String::from_utf8_lossy(&rendered).trim_end()),
        _ => io::stdout().write_all(&rendered)?,
    }

    Ok(Some(PrintedBanner {
        banner,
        main_source: main_source.map(String::from),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{EnvironmentKind, PropertySource};

    #[test]
    fn text_banner_resolves_placeholders() {
        let mut env = Environment::new(EnvironmentKind::Standard);
        env.property_sources_mut()
            .add_last(PropertySource::from_pairs("app", [("app.name", "demo")]));

        let mut out = Vec::new();
        TextBanner::new("== ${app.name} ${app.version:dev} ==")
            .render(&env, None, &mut out)
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "== demo dev ==\n");
    }

    #[test]
    fn off_mode_prints_nothing() {
        let env = Environment::new(EnvironmentKind::Standard);
        assert!(print_banner(BannerMode::Off, &env, None, None).unwrap().is_none());
    }

    #[test]
    fn missing_banner_file_is_an_error() {
        let mut env = Environment::new(EnvironmentKind::Standard);
        env.property_sources_mut().add_last(PropertySource::from_pairs(
            "app",
            [(BANNER_LOCATION_PROPERTY, "/definitely/not/here.txt")],
        ));
        assert!(print_banner(BannerMode::Log, &env, None, None).is_err());
    }

    #[test]
    fn mode_parses_from_lowercase() {
        let mode: BannerMode = serde_json::from_str("\"log\"").unwrap();
        assert_eq!(mode, BannerMode::Log);
    }
}
