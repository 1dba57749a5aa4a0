use std::env;
use std::fmt;
use std::io::IsTerminal;
use std::sync::OnceLock;

use serde::Deserialize;
use tracing_subscriber::{EnvFilter, fmt as subscriber_fmt};

pub const FORMAT_ENV: &str = "WEAVER_LOG_FORMAT";
pub const LEVEL_ENV: &str = "WEAVER_LOG_LEVEL";

/// Output format for engine log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Auto,
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(spec: &str) -> Option<Self> {
        match spec.to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "text" | "plain" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LogFormat::Auto => "auto",
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        };
        f.write_str(text)
    }
}

/// Logging verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn parse(spec: &str) -> Option<Self> {
        match spec.to_ascii_lowercase().as_str() {
            "error" | "err" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" | "verbose" => Some(Self::Trace),
            _ => None,
        }
    }

    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };
        f.write_str(text)
    }
}

/// Effective log configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    pub format: LogFormat,
    pub level: LogLevel,
}

impl LogOptions {
    /// Weaving output goes to stdout, so only warnings reach stderr by default.
    pub const DEFAULT: Self = Self {
        format: LogFormat::Auto,
        level: LogLevel::Warn,
    };

    #[must_use]
    pub fn with_overrides(base: Self, overrides: LogSettings) -> Self {
        Self {
            format: overrides.format.unwrap_or(base.format),
            level: overrides.level.unwrap_or(base.level),
        }
    }

    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_over(Self::DEFAULT)
    }

    /// Apply `WEAVER_LOG_FORMAT` / `WEAVER_LOG_LEVEL` on top of `base`.
    #[must_use]
    pub fn from_env_over(base: Self) -> Self {
        let format = env::var_os(FORMAT_ENV).map(|value| value.to_string_lossy().to_string());
        let level = env::var_os(LEVEL_ENV).map(|value| value.to_string_lossy().to_string());
        apply_env_overrides(base, format.as_deref(), level.as_deref())
    }

    /// Defaults, then the configuration file, then the environment, then the command line.
    #[must_use]
    pub fn layered(config: LogSettings, cli: LogSettings) -> Self {
        let base = Self::with_overrides(Self::DEFAULT, config);
        Self::with_overrides(Self::from_env_over(base), cli)
    }

    #[must_use]
    pub fn resolved(self) -> Self {
        let format = match self.format {
            LogFormat::Auto => LogFormat::Text,
            other => other,
        };
        Self { format, ..self }
    }
}

impl Default for LogOptions {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Partial log configuration from a config file or command-line flags.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSettings {
    pub format: Option<LogFormat>,
    pub level: Option<LogLevel>,
}

impl LogSettings {
    pub fn is_empty(&self) -> bool {
        self.format.is_none() && self.level.is_none()
    }

    #[must_use]
    pub fn merged_with_env(self) -> LogOptions {
        let env = LogOptions::from_env();
        LogOptions::with_overrides(env, self)
    }

    /// `other` wins where it is set.
    #[must_use]
    pub fn or(self, other: LogSettings) -> LogSettings {
        LogSettings {
            format: other.format.or(self.format),
            level: other.level.or(self.level),
        }
    }

    pub fn apply_format(&mut self, value: LogFormat) {
        self.format = Some(value);
    }

    pub fn apply_level(&mut self, value: LogLevel) {
        self.level = Some(value);
    }
}

fn apply_env_overrides(
    mut options: LogOptions,
    format: Option<&str>,
    level: Option<&str>,
) -> LogOptions {
    if let Some(spec) = format.and_then(LogFormat::parse) {
        options.format = spec;
    }
    if let Some(spec) = level.and_then(LogLevel::parse) {
        options.level = spec;
    }
    options
}

/// Install the process-wide subscriber. Later calls are ignored.
///
/// `RUST_LOG` takes precedence over `options.level` when set.
pub fn init_logging(options: LogOptions) {
    static INITIALISED: OnceLock<()> = OnceLock::new();

    let options = options.resolved();
    let _ = INITIALISED.get_or_init(|| {
        let use_ansi = env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
        let make_filter = || {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(options.level.to_string()))
        };
        let builder = subscriber_fmt::fmt()
            .with_env_filter(make_filter())
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_thread_names(true);
        match options.format {
            LogFormat::Json => {
                let subscriber = builder.with_ansi(false).json().finish();
                let _ = tracing::subscriber::set_global_default(subscriber);
            }
            LogFormat::Auto | LogFormat::Text => {
                let subscriber = builder.with_ansi(use_ansi).compact().finish();
                let _ = tracing::subscriber::set_global_default(subscriber);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_and_level_parse_expected_values() {
        assert_eq!(LogFormat::parse("text"), Some(LogFormat::Text));
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("auto"), Some(LogFormat::Auto));
        assert_eq!(LogFormat::parse("invalid"), None);

        assert_eq!(LogLevel::parse("error"), Some(LogLevel::Error));
        assert_eq!(LogLevel::parse("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("INFO"), Some(LogLevel::Info));
        assert_eq!(LogLevel::parse("verbose"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::parse("noop"), None);
    }

    #[test]
    fn env_overrides_apply_on_top_of_base() {
        let opts = apply_env_overrides(LogOptions::DEFAULT, Some("json"), Some("debug"));
        assert_eq!(opts.format, LogFormat::Json);
        assert_eq!(opts.level, LogLevel::Debug);

        let untouched = apply_env_overrides(LogOptions::DEFAULT, Some("yaml"), None);
        assert_eq!(untouched, LogOptions::DEFAULT);
    }

    #[test]
    fn cli_settings_override_config_settings() {
        let config = LogSettings {
            format: Some(LogFormat::Json),
            level: Some(LogLevel::Info),
        };
        let cli = LogSettings {
            format: None,
            level: Some(LogLevel::Trace),
        };
        let merged = config.or(cli);
        assert_eq!(merged.format, Some(LogFormat::Json));
        assert_eq!(merged.level, Some(LogLevel::Trace));

        let options = LogOptions::with_overrides(LogOptions::DEFAULT, merged);
        assert_eq!(options.level, LogLevel::Trace);
    }

    #[test]
    fn settings_deserialize_from_yaml() {
        let settings: LogSettings = serde_yaml::from_str("format: json\nlevel: debug\n").expect("yaml");
        assert_eq!(settings.format, Some(LogFormat::Json));
        assert_eq!(settings.level, Some(LogLevel::Debug));
        assert!(LogSettings::default().is_empty());
    }

    #[test]
    fn resolved_auto_defaults_to_text() {
        let resolved = LogOptions {
            format: LogFormat::Auto,
            level: LogLevel::Info,
        }
        .resolved();
        assert_eq!(resolved.format, LogFormat::Text);
    }
}
