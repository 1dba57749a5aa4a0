use std::io::{self, Write};

use serde::Serialize;

use super::{CommitSummary, FailureSummary, WeaveSummary};
use crate::diagnostics::{DiagnosticFormat, format_diagnostics, json_value};
use crate::error::Error;
use crate::transform::TransformationReport;

pub(super) fn report_error(err: &Error) {
    let mut out = io::stderr();
    if let Err(io_err) = report_error_to(err, &mut out) {
        let _ = writeln!(io::stderr(), "failed to report error: {io_err}");
    }
}

pub(super) fn report_error_to(err: &Error, out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "error: {err}")?;
    if cfg!(debug_assertions)
        && let Some(backtrace) = err.backtrace()
    {
        writeln!(out, "stack trace:")?;
        writeln!(out, "{backtrace}")?;
    }
    Ok(())
}

pub(super) fn write_text(summary: &WeaveSummary, out: &mut dyn Write) -> io::Result<()> {
    if let Some(rendered) = summary.rendered.as_deref()
        && !rendered.is_empty()
    {
        write!(out, "{rendered}")?;
    }
    if !summary.diagnostics.is_empty() {
        writeln!(
            out,
            "{}",
            format_diagnostics(&summary.diagnostics, DiagnosticFormat::Human)
        )?;
    }
    for failure in &summary.failures {
        writeln!(
            out,
            "failed: instance {} ({}): {}",
            failure.instance, failure.aspect, failure.error
        )?;
    }
    if let Some(committed) = summary.committed {
        writeln!(
            out,
            "committed snapshot v{} ({} declarations)",
            committed.version, committed.declarations
        )?;
    }
    writeln!(
        out,
        "{} advice(s) from {} aspect instance(s) in {} mode, {} failed",
        summary.advices,
        summary.instances,
        summary.mode.as_str(),
        summary.failures.len()
    )
}

#[derive(Serialize)]
struct JsonSummary<'a> {
    command: &'a str,
    mode: String,
    instances: usize,
    advices: usize,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    transformations: Option<&'a TransformationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    committed: Option<CommitSummary>,
    failures: &'a [FailureSummary],
    diagnostics: Vec<serde_json::Value>,
}

pub(super) fn write_json(command: &str, summary: &WeaveSummary, out: &mut dyn Write) -> io::Result<()> {
    let payload = JsonSummary {
        command,
        mode: summary.mode.to_string(),
        instances: summary.instances,
        advices: summary.advices,
        success: summary.is_success(),
        transformations: summary.report.as_ref(),
        committed: summary.committed,
        failures: &summary.failures,
        diagnostics: summary.diagnostics.iter().map(json_value).collect(),
    };
    serde_json::to_writer_pretty(&mut *out, &payload).map_err(io::Error::other)?;
    writeln!(out)
}
