use serde::Serialize;

use super::{Diagnostic, DiagnosticCode};

pub const JSON_SCHEMA_VERSION: &str = "1.0.0";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DiagnosticFormat {
    #[default]
    Human,
    Short,
    Json,
}

/// Render a collection of diagnostics to a single string.
#[must_use]
pub fn format_diagnostics(diagnostics: &[Diagnostic], format: DiagnosticFormat) -> String {
    let mut rendered = String::new();
    for (index, diagnostic) in diagnostics.iter().enumerate() {
        if index > 0 {
            rendered.push('\n');
        }
        let chunk = match format {
            DiagnosticFormat::Human => render_human(diagnostic),
            DiagnosticFormat::Short => diagnostic.to_string(),
            DiagnosticFormat::Json => render_json(diagnostic),
        };
        rendered.push_str(&chunk);
    }
    rendered
}

fn render_human(diagnostic: &Diagnostic) -> String {
    let mut out = diagnostic.to_string();
    if let Some(target) = &diagnostic.target {
        out.push_str(&format!("\n  --> {}", target.display));
    }
    for note in &diagnostic.notes {
        out.push_str(&format!("\n   = note: {note}"));
    }
    out
}

#[derive(Serialize)]
struct JsonDiagnostic<'a> {
    version: &'static str,
    severity: &'static str,
    code: Option<&'a DiagnosticCode>,
    message: &'a str,
    target: Option<&'a str>,
    notes: &'a [String],
}

fn payload(diagnostic: &Diagnostic) -> JsonDiagnostic<'_> {
    JsonDiagnostic {
        version: JSON_SCHEMA_VERSION,
        severity: diagnostic.severity.as_str(),
        code: diagnostic.code.as_ref(),
        message: &diagnostic.message,
        target: diagnostic.target.as_ref().map(|target| target.display.as_str()),
        notes: &diagnostic.notes,
    }
}

fn render_json(diagnostic: &Diagnostic) -> String {
    serde_json::to_string(&payload(diagnostic)).unwrap_or_else(|_| "{}".into())
}

/// The JSON form of one diagnostic, for embedding in larger documents.
#[must_use]
pub fn json_value(diagnostic: &Diagnostic) -> serde_json::Value {
    serde_json::to_value(payload(diagnostic)).unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use expect_test::expect;
    use serde_json::Value;

    use super::*;
    use crate::diagnostics::codes;
    use crate::model::SnapshotBuilder;

    fn sample() -> Diagnostic {
        let mut builder = SnapshotBuilder::new();
        let widget = builder.class("Widget").finish();
        let snapshot = builder.build();
        codes::error(codes::MEMBER_CONFLICT, "member `Widget.Run()` already exists")
            .with_target(snapshot.reference(widget), "Widget")
            .with_note("introduced by aspect `Logging`")
    }

    #[test]
    fn human_format_includes_target_and_notes() {
        let rendered = format_diagnostics(&[sample()], DiagnosticFormat::Human);
        expect![[r#"
            error[ADV201]: [ADV201] member `Widget.Run()` already exists
              --> Widget
               = note: introduced by aspect `Logging`"#]]
        .assert_eq(&rendered);
    }

    #[test]
    fn json_format_emits_one_object_per_line() {
        let rendered = format_diagnostics(&[sample(), sample()], DiagnosticFormat::Json);
        let lines: Vec<_> = rendered.lines().collect();
        assert_eq!(lines.len(), 2);
        let value: Value = serde_json::from_str(lines[0]).expect("valid json");
        assert_eq!(value["version"], JSON_SCHEMA_VERSION);
        assert_eq!(value["severity"], "error");
        assert_eq!(value["code"]["code"], "ADV201");
        assert_eq!(value["target"], "Widget");
    }
}
