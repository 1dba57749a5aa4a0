use std::time::Duration;

use crate::cli::Command;
use crate::config::WeaverConfig;
use crate::logging::LogOptions;

fn fixture_of(command: &Command) -> Option<String> {
    match command {
        Command::Run { args, .. } | Command::Check { args } => {
            Some(args.fixture.display().to_string())
        }
        Command::Help { .. } | Command::Version => None,
    }
}

pub(super) fn log_run_start(command: &Command, options: &LogOptions, config: &WeaverConfig) {
    let sources = config
        .sources
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(",");
    tracing::info!(
        target: "pipeline",
        stage = "cli.run.start",
        command = command.name(),
        log_level = %options.level,
        log_format = %options.format,
        fixture = %fixture_of(command).unwrap_or_default(),
        execution = %config.execution,
        config_sources = %sources,
    );
}

pub(super) fn log_run_complete(
    command: &Command,
    elapsed: Duration,
    result: &crate::error::Result<()>,
) {
    let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    match result {
        Ok(()) => tracing::info!(
            target: "pipeline",
            stage = "cli.run.complete",
            command = command.name(),
            status = "ok",
            elapsed_ms
        ),
        Err(err) => tracing::error!(
            target: "pipeline",
            stage = "cli.run.complete",
            command = command.name(),
            status = "error",
            error = %err,
            elapsed_ms
        ),
    }
}
