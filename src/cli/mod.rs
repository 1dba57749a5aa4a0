use std::env;
use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

use crate::logging::{LogFormat, LogLevel, LogSettings};

pub mod dispatch;
mod help;

#[cfg(test)]
mod tests;

pub use help::usage;

/// How weaving results are written to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Result<Self, CliError> {
        match value.to_ascii_lowercase().as_str() {
            "text" | "human" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(CliError::new(format!(
                "unsupported output format '{other}'; expected text or json"
            ))),
        }
    }
}

/// Options shared by `run` and `check`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WeaveArgs {
    pub fixture: PathBuf,
    pub config: Option<PathBuf>,
    pub mode: Option<String>,
    pub seed: Option<u64>,
    pub max_workers: Option<usize>,
    pub output: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Weave a fixture and print the resulting transformations.
    Run { args: WeaveArgs, commit: bool },
    /// Weave a fixture and print diagnostics only.
    Check { args: WeaveArgs },
    Help { topic: Option<String> },
    Version,
}

impl Command {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Command::Run { .. } => "run",
            Command::Check { .. } => "check",
            Command::Help { .. } => "help",
            Command::Version => "version",
        }
    }
}

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cli {
    pub command: Command,
    /// Log settings given as flags; they override config files and the environment.
    pub log: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliError {
    message: String,
}

impl CliError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn with_usage(message: impl Into<String>) -> Self {
        let mut owned = message.into();
        owned.push_str("\n\n");
        owned.push_str(&usage(None));
        Self::new(owned)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for CliError {}

impl Cli {
    /// Parse arguments from the environment.
    ///
    /// # Errors
    /// Returns a [`CliError`] when the arguments cannot be interpreted as a supported command.
    pub fn parse() -> Result<Self, CliError> {
        Self::parse_from(env::args().skip(1))
    }

    /// Parse arguments from an iterator (useful for testing).
    ///
    /// # Errors
    /// Returns a [`CliError`] when the provided iterator does not describe a valid invocation.
    pub fn parse_from<I, T>(args: I) -> Result<Self, CliError>
    where
        I: Iterator<Item = T>,
        T: Into<String>,
    {
        let mut iter = args.map(Into::<String>::into).peekable();
        let mut log = LogSettings::default();
        while let Some(flag) = iter.peek().cloned() {
            if !flag.starts_with('-') || is_help_flag(&flag) || is_version_flag(&flag) {
                break;
            }
            iter.next();
            if !consume_log_option(&flag, &mut iter, &mut log)? {
                return Err(CliError::with_usage(format!(
                    "unsupported global option '{flag}'"
                )));
            }
        }

        let Some(raw_command) = iter.next() else {
            return Err(CliError::with_usage("missing command"));
        };

        let command = match raw_command.as_str() {
            "help" | "--help" | "-h" => Command::Help {
                topic: iter
                    .next()
                    .filter(|value| !is_help_flag(value))
                    .map(|value| value.to_ascii_lowercase()),
            },
            "version" | "--version" | "-V" => Command::Version,
            "run" => {
                if wants_help(&mut iter) {
                    Command::Help {
                        topic: Some("run".into()),
                    }
                } else {
                    let mut commit = false;
                    let args = parse_weave_args("run", &mut iter, &mut log, |flag| {
                        if flag == "--commit" {
                            commit = true;
                            true
                        } else {
                            false
                        }
                    })?;
                    Command::Run { args, commit }
                }
            }
            "check" => {
                if wants_help(&mut iter) {
                    Command::Help {
                        topic: Some("check".into()),
                    }
                } else {
                    let args = parse_weave_args("check", &mut iter, &mut log, |_| false)?;
                    Command::Check { args }
                }
            }
            other => {
                return Err(CliError::with_usage(format!("unknown command '{other}'")));
            }
        };
        Ok(Cli { command, log })
    }
}

fn is_help_flag(flag: &str) -> bool {
    matches!(flag, "--help" | "-h")
}

fn is_version_flag(flag: &str) -> bool {
    matches!(flag, "--version" | "-V")
}

fn wants_help<I>(iter: &mut std::iter::Peekable<I>) -> bool
where
    I: Iterator<Item = String>,
{
    iter.peek().is_some_and(|value| is_help_flag(value))
}

fn take_value<I>(flag: &str, iter: &mut I) -> Result<String, CliError>
where
    I: Iterator<Item = String>,
{
    iter.next()
        .filter(|value| !value.starts_with("--"))
        .ok_or_else(|| CliError::new(format!("{flag} requires a value")))
}

fn parse_number<N: std::str::FromStr>(flag: &str, value: &str) -> Result<N, CliError> {
    value
        .parse()
        .map_err(|_| CliError::new(format!("{flag} expects a non-negative integer, found '{value}'")))
}

/// Handle `--log-format` / `--log-level`; returns false when `flag` is something else.
fn consume_log_option<I>(flag: &str, iter: &mut I, log: &mut LogSettings) -> Result<bool, CliError>
where
    I: Iterator<Item = String>,
{
    let (name, inline) = match flag.split_once('=') {
        Some((name, value)) => (name, Some(value.to_string())),
        None => (flag, None),
    };
    match name {
        "--log-format" => {
            let value = match inline {
                Some(value) => value,
                None => take_value(name, iter)?,
            };
            let format = LogFormat::parse(&value).ok_or_else(|| {
                CliError::new(format!(
                    "unsupported log format '{value}'; expected auto, text or json"
                ))
            })?;
            log.apply_format(format);
            Ok(true)
        }
        "--log-level" => {
            let value = match inline {
                Some(value) => value,
                None => take_value(name, iter)?,
            };
            let level = LogLevel::parse(&value).ok_or_else(|| {
                CliError::new(format!(
                    "unsupported log level '{value}'; expected error, warn, info, debug or trace"
                ))
            })?;
            log.apply_level(level);
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn parse_weave_args<I, F>(
    command: &str,
    iter: &mut std::iter::Peekable<I>,
    log: &mut LogSettings,
    mut extra: F,
) -> Result<WeaveArgs, CliError>
where
    I: Iterator<Item = String>,
    F: FnMut(&str) -> bool,
{
    let mut args = WeaveArgs::default();
    let mut fixture = None;
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => args.config = Some(PathBuf::from(take_value(&arg, iter)?)),
            "--mode" | "-m" => args.mode = Some(take_value(&arg, iter)?.to_ascii_lowercase()),
            "--seed" => args.seed = Some(parse_number(&arg, &take_value(&arg, iter)?)?),
            "--max-workers" | "-j" => {
                let workers: usize = parse_number(&arg, &take_value(&arg, iter)?)?;
                if workers == 0 {
                    return Err(CliError::new("--max-workers must be at least 1"));
                }
                args.max_workers = Some(workers);
            }
            "--format" => args.output = OutputFormat::parse(&take_value(&arg, iter)?)?,
            flag if flag.starts_with('-') => {
                if consume_log_option(flag, iter, log)? || extra(flag) {
                    continue;
                }
                return Err(CliError::with_usage(format!(
                    "unsupported option '{flag}' for {command}"
                )));
            }
            path => {
                if fixture.is_some() {
                    return Err(CliError::new(format!(
                        "{command} accepts a single fixture, found extra argument '{path}'"
                    )));
                }
                fixture = Some(PathBuf::from(path));
            }
        }
    }
    args.fixture =
        fixture.ok_or_else(|| CliError::with_usage(format!("{command} requires a fixture path")))?;
    if args.seed.is_some() && args.mode.as_deref().is_some_and(|mode| mode != "randomized") {
        return Err(CliError::new("--seed only applies to --mode randomized"));
    }
    Ok(args)
}
