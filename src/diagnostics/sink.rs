use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use blake3::Hasher;

use super::{Diagnostic, DiagnosticCode, Severity};

/// Position of an aspect instance in the stage's declaration order.
pub type InstanceIndex = usize;

#[derive(Debug)]
struct Entry {
    instance: InstanceIndex,
    sequence: u64,
    diagnostic: Diagnostic,
}

/// Append-only diagnostics buffer shared by concurrently running aspect instances.
///
/// Reporting never blocks on ordering; [`DiagnosticSink::drain`] sorts by
/// instance order, then by arrival, and drops exact duplicates.
#[derive(Debug)]
pub struct DiagnosticSink {
    entries: Mutex<Vec<Entry>>,
    sequence: AtomicU64,
    namespace: String,
}

impl DiagnosticSink {
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
            namespace: namespace.into(),
        }
    }

    pub fn report(&self, instance: InstanceIndex, mut diagnostic: Diagnostic) {
        if diagnostic.code.is_none() {
            diagnostic.code = Some(self.auto_code(&diagnostic));
        }
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Entry {
                instance,
                sequence,
                diagnostic,
            });
    }

    pub fn report_all(&self, instance: InstanceIndex, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        for diagnostic in diagnostics {
            self.report(instance, diagnostic);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|entry| entry.diagnostic.severity == severity)
            .count()
    }

    /// Take every reported diagnostic in deterministic order.
    #[must_use]
    pub fn drain(&self) -> Vec<Diagnostic> {
        let mut entries = std::mem::take(
            &mut *self
                .entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        entries.sort_by_key(|entry| (entry.instance, entry.sequence));
        let mut seen = HashSet::new();
        entries
            .into_iter()
            .filter(|entry| seen.insert(entry.diagnostic.clone()))
            .map(|entry| entry.diagnostic)
            .collect()
    }

    fn auto_code(&self, diagnostic: &Diagnostic) -> DiagnosticCode {
        let mut hasher = Hasher::new();
        hasher.update(self.namespace.as_bytes());
        hasher.update(diagnostic.message.as_bytes());
        if let Some(target) = &diagnostic.target {
            hasher.update(&target.reference.id().raw().to_le_bytes());
        }
        let hash = hasher.finalize();
        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&hash.as_bytes()[..4]);
        let suffix = u32::from_le_bytes(prefix) % 100_000;
        let code = format!("{}{:05}", self.namespace.to_ascii_uppercase(), suffix);
        DiagnosticCode::new(code, Some(self.namespace.clone()))
    }
}

impl Default for DiagnosticSink {
    fn default() -> Self {
        Self::new("ADV")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::diagnostics::codes;

    #[test]
    fn drain_orders_by_instance_then_arrival_and_dedupes() {
        let sink = DiagnosticSink::default();
        sink.report(2, codes::warning(codes::INTERFACE_SKIPPED, "late"));
        sink.report(0, codes::error(codes::MEMBER_CONFLICT, "first"));
        sink.report(0, codes::error(codes::MEMBER_CONFLICT, "first"));
        sink.report(1, codes::note("middle"));

        let drained = sink.drain();
        let messages: Vec<_> = drained.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, ["[ADV201] first", "middle", "[ADV211] late"]);
        assert!(sink.is_empty());
    }

    #[test]
    fn uncoded_diagnostics_receive_stable_namespace_code() {
        let sink = DiagnosticSink::new("adv");
        sink.report(0, Diagnostic::note("same text"));
        sink.report(1, Diagnostic::note("same text"));
        let drained = sink.drain();
        assert_eq!(drained.len(), 1);
        let code = drained[0].code_str();
        assert!(code.starts_with("ADV"), "{code}");
        assert_eq!(code.len(), 8);
    }

    #[test]
    fn concurrent_reports_are_all_kept() {
        let sink = Arc::new(DiagnosticSink::default());
        let handles: Vec<_> = (0..4)
            .map(|instance| {
                let sink = Arc::clone(&sink);
                thread::spawn(move || {
                    for index in 0..25 {
                        sink.report(instance, codes::note(format!("{instance}-{index}")));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("reporter thread");
        }
        assert_eq!(sink.len(), 100);
        let drained = sink.drain();
        assert_eq!(drained.first().map(|d| d.message.as_str()), Some("0-0"));
        assert_eq!(drained.last().map(|d| d.message.as_str()), Some("3-24"));
    }
}
