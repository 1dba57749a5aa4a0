use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;
use std::io;

use crate::advice::AdviceKind;
use crate::cli::CliError;
use crate::diagnostics::Diagnostic;

/// Error-severity diagnostics of an aborted advice.
#[derive(Clone, Debug)]
pub struct AdviceError {
    pub kind: AdviceKind,
    pub aspect: String,
    pub diagnostics: Vec<Diagnostic>,
}

impl AdviceError {
    /// Keep only the error-severity entries of `diagnostics`.
    #[must_use]
    pub fn new(kind: AdviceKind, aspect: impl Into<String>, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            kind,
            aspect: aspect.into(),
            diagnostics: diagnostics.into_iter().filter(Diagnostic::is_error).collect(),
        }
    }
}

impl fmt::Display for AdviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} advice of aspect `{}` failed", self.kind, self.aspect)?;
        for diagnostic in &self.diagnostics {
            write!(f, "\n  {diagnostic}")?;
        }
        Ok(())
    }
}

/// Unified error type for the weaving engine.
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Cli(CliError),
    /// Invalid configuration or fixture content.
    Config { message: String },
    /// Aspect-authoring defect detected before any diagnostic is collected.
    Usage { message: String },
    Advice(AdviceError),
    /// The weaving stage was cancelled before every instance ran.
    Cancelled,
    Internal {
        message: String,
        backtrace: Option<Backtrace>,
    },
}

/// Convenience result alias used across the engine.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Construct a new internal engine error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            backtrace: capture_backtrace(),
        }
    }

    /// Return the captured backtrace, if any.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            Error::Internal { backtrace, .. } => backtrace.as_ref(),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::Internal { .. })
    }

    /// Diagnostics carried by an advice failure; empty for every other variant.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Error::Advice(advice) => &advice.diagnostics,
            _ => &[],
        }
    }
}

fn capture_backtrace() -> Option<Backtrace> {
    if cfg!(debug_assertions) {
        Some(Backtrace::force_capture())
    } else {
        None
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {err}"),
            Error::Cli(err) => write!(f, "{err}"),
            Error::Config { message } => write!(f, "configuration error: {message}"),
            Error::Usage { message } => write!(f, "aspect usage error: {message}"),
            Error::Advice(err) => write!(f, "{err}"),
            Error::Cancelled => f.write_str("weaving was cancelled"),
            Error::Internal { message, .. } => write!(f, "internal error: {message}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Cli(err) => Some(err),
            Error::Config { .. }
            | Error::Usage { .. }
            | Error::Advice(_)
            | Error::Cancelled
            | Error::Internal { .. } => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::Io(error)
    }
}

impl From<CliError> for Error {
    fn from(error: CliError) -> Self {
        Error::Cli(error)
    }
}

impl From<AdviceError> for Error {
    fn from(error: AdviceError) -> Self {
        Error::Advice(error)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(error: serde_yaml::Error) -> Self {
        Error::config(error.to_string())
    }
}
