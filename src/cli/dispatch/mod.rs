use std::io::{self, Write};
use std::sync::Arc;
use std::time::Instant;

use crate::advice::WeavingServices;
use crate::cli::{Cli, CliError, Command, OutputFormat, WeaveArgs, usage};
use crate::config::{self, WeaverConfig};
use crate::contracts::TemplateInvocationExpander;
use crate::diagnostics::{Diagnostic, has_errors};
use crate::error::{Error, Result};
use crate::logging::{LogOptions, init_logging};
use crate::pipeline::{ExecutionMode, WeavingStage};
use crate::script::Fixture;
use crate::transform::TransformationReport;

mod logging;
mod reporting;
#[cfg(test)]
mod tests;

/// Everything one `run` or `check` produced, ready to print.
#[derive(Debug)]
pub struct WeaveSummary {
    pub mode: ExecutionMode,
    pub instances: usize,
    pub advices: usize,
    pub failures: Vec<FailureSummary>,
    pub diagnostics: Vec<Diagnostic>,
    /// Present for `run`.
    pub report: Option<TransformationReport>,
    pub rendered: Option<String>,
    pub committed: Option<CommitSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FailureSummary {
    pub instance: usize,
    pub aspect: String,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CommitSummary {
    pub version: u32,
    pub declarations: usize,
}

impl WeaveSummary {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !has_errors(&self.diagnostics)
    }
}

/// Execute a parsed command line.
///
/// # Errors
/// Returns an error when configuration or the fixture cannot be loaded, or
/// when any aspect instance failed.
pub fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Command::Help { topic } => {
            init_logging(LogOptions::layered(Default::default(), cli.log));
            write_stdout(&usage(topic.as_deref()))
        }
        Command::Version => {
            init_logging(LogOptions::layered(Default::default(), cli.log));
            write_stdout(&format!("weaver {}", env!("CARGO_PKG_VERSION")))
        }
        Command::Run { args, commit } => weave_command(&cli, args, *commit, true),
        Command::Check { args } => weave_command(&cli, args, false, false),
    }
}

fn weave_command(cli: &Cli, args: &WeaveArgs, commit: bool, transform: bool) -> Result<()> {
    let config = config::discover_with_override(&args.fixture, args.config.as_deref())?;
    let log_options = LogOptions::layered(config.logging, cli.log).resolved();
    init_logging(log_options);
    let start = Instant::now();
    logging::log_run_start(&cli.command, &log_options, &config);
    let result = weave(args, &config, commit, transform).and_then(|summary| {
        let mut stdout = io::stdout().lock();
        match args.output {
            OutputFormat::Text => reporting::write_text(&summary, &mut stdout)?,
            OutputFormat::Json => reporting::write_json(cli.command.name(), &summary, &mut stdout)?,
        }
        stdout.flush()?;
        outcome_status(&summary)
    });
    logging::log_run_complete(&cli.command, start.elapsed(), &result);
    result
}

/// Load the fixture, weave it, and summarise the outcome.
pub fn weave(
    args: &WeaveArgs,
    config: &WeaverConfig,
    commit: bool,
    transform: bool,
) -> Result<WeaveSummary> {
    let mode = resolve_mode(args, config.execution)?;
    let fixture = Fixture::load(&args.fixture)?.build()?;
    let instances = fixture.instances.len();
    let services = WeavingServices::new(fixture.snapshot, Arc::new(fixture.registry), config.advice);
    let outcome = WeavingStage::new(&services, mode).run(&fixture.instances);

    let mut diagnostics = outcome.diagnostics.clone();
    let (mut report, mut rendered, mut committed) = (None, None, None);
    if transform {
        let (set, lowering) = outcome.transformations(&services, &TemplateInvocationExpander)?;
        diagnostics.extend(lowering);
        report = Some(set.report(&services.snapshot));
        rendered = Some(set.render(&services.snapshot));
        if commit {
            let next = set.commit(&services.snapshot)?;
            committed = Some(CommitSummary {
                version: next.version(),
                declarations: next.len(),
            });
        }
    }

    Ok(WeaveSummary {
        mode,
        instances,
        advices: outcome.advice_count(),
        failures: outcome
            .failures
            .iter()
            .map(|failure| FailureSummary {
                instance: failure.instance,
                aspect: failure.aspect.clone(),
                error: failure.error.to_string(),
            })
            .collect(),
        diagnostics,
        report,
        rendered,
        committed,
    })
}

/// The command line wins over configuration; `--seed` alone selects randomized order.
pub(crate) fn resolve_mode(args: &WeaveArgs, configured: ExecutionMode) -> Result<ExecutionMode> {
    if let Some(name) = &args.mode {
        return ExecutionMode::parse(name, args.seed, args.max_workers);
    }
    Ok(match (configured, args.seed) {
        (_, Some(seed)) => ExecutionMode::Randomized { seed },
        (ExecutionMode::Parallel { max_workers }, None) => ExecutionMode::Parallel {
            max_workers: args.max_workers.unwrap_or(max_workers),
        },
        (other, None) => other,
    })
}

fn outcome_status(summary: &WeaveSummary) -> Result<()> {
    if !summary.failures.is_empty() {
        return Err(Error::Cli(CliError::new(format!(
            "{} of {} aspect instance(s) failed",
            summary.failures.len(),
            summary.instances
        ))));
    }
    if has_errors(&summary.diagnostics) {
        return Err(Error::Cli(CliError::new("weaving reported errors")));
    }
    Ok(())
}

fn write_stdout(text: &str) -> Result<()> {
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{text}")?;
    Ok(())
}

pub fn report_error(err: &Error) {
    reporting::report_error(err);
}
