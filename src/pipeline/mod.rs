//! Weaving stage: runs aspect instances against one snapshot and collects their advice.

mod mode;

#[cfg(test)]
mod tests;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use tracing::{debug, info, warn};

pub use mode::{CancellationToken, ExecutionMode};

use crate::advice::{AdviceList, WeavingServices};
use crate::aspect::AspectInstance;
use crate::contracts::ContractExpander;
use crate::diagnostics::{Diagnostic, InstanceIndex};
use crate::error::{Error, Result};
use crate::transform::TransformationSet;

/// Aspect instance that contributed no advice.
#[derive(Debug)]
pub struct InstanceFailure {
    pub instance: InstanceIndex,
    pub aspect: String,
    pub error: Error,
}

/// Everything a stage run produced.
#[derive(Debug, Default)]
pub struct StageOutcome {
    /// Advice lists of the successful instances, in instance order.
    pub lists: Vec<AdviceList>,
    pub failures: Vec<InstanceFailure>,
    /// Drained sink content, sorted by instance then arrival.
    pub diagnostics: Vec<Diagnostic>,
    pub cancelled: bool,
}

impl StageOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    #[must_use]
    pub fn advice_count(&self) -> usize {
        self.lists.iter().map(AdviceList::len).sum()
    }

    /// Lower the collected advice into per-target transformations.
    pub fn transformations<E: ContractExpander>(
        &self,
        services: &WeavingServices,
        expander: &E,
    ) -> Result<(TransformationSet, Vec<Diagnostic>)> {
        TransformationSet::build(&services.snapshot, &self.lists, expander)
    }
}

/// Runs aspect instances over shared, read-only weaving services.
pub struct WeavingStage<'s> {
    services: &'s WeavingServices,
    mode: ExecutionMode,
    cancellation: CancellationToken,
}

impl<'s> WeavingStage<'s> {
    #[must_use]
    pub fn new(services: &'s WeavingServices, mode: ExecutionMode) -> Self {
        Self {
            services,
            mode,
            cancellation: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Run every instance once. Instances that fail contribute no advice;
    /// instances never started because of cancellation fail with
    /// [`Error::Cancelled`].
    pub fn run(&self, instances: &[AspectInstance]) -> StageOutcome {
        let started = Instant::now();
        let order = self.mode.schedule(instances.len());
        let workers = self.mode.workers(instances.len());
        info!(
            target: "pipeline",
            stage = "weave.start",
            mode = %self.mode,
            instances = instances.len(),
            workers,
            snapshot = %self.services.snapshot.id(),
        );

        let mut results: Vec<Option<Result<AdviceList>>> = Vec::new();
        results.resize_with(instances.len(), || None);
        if workers <= 1 {
            for index in order {
                if self.cancellation.is_cancelled() {
                    break;
                }
                results[index] = Some(self.run_instance(index, &instances[index]));
            }
        } else {
            self.run_parallel(instances, &order, workers, &mut results);
        }

        let outcome = self.collect(instances, results);
        info!(
            target: "pipeline",
            stage = "weave.complete",
            status = if outcome.is_success() { "ok" } else { "error" },
            advices = outcome.advice_count(),
            failures = outcome.failures.len(),
            diagnostics = outcome.diagnostics.len(),
            cancelled = outcome.cancelled,
            elapsed_ms = started.elapsed().as_millis() as u64,
        );
        outcome
    }

    fn run_parallel(
        &self,
        instances: &[AspectInstance],
        order: &[usize],
        workers: usize,
        results: &mut [Option<Result<AdviceList>>],
    ) {
        let cursor = AtomicUsize::new(0);
        let (sender, receiver) = mpsc::channel();
        thread::scope(|scope| {
            for worker in 0..workers {
                let sender = sender.clone();
                let cursor = &cursor;
                let spawned = thread::Builder::new()
                    .name(format!("weaver-worker-{worker}"))
                    .spawn_scoped(scope, move || {
                        loop {
                            if self.cancellation.is_cancelled() {
                                break;
                            }
                            let slot = cursor.fetch_add(1, Ordering::Relaxed);
                            let Some(&index) = order.get(slot) else {
                                break;
                            };
                            let result = self.run_instance(index, &instances[index]);
                            if sender.send((index, result)).is_err() {
                                break;
                            }
                        }
                    });
                if let Err(err) = spawned {
                    warn!(
                        target: "pipeline",
                        stage = "weave.worker",
                        worker,
                        error = %err,
                        "failed to spawn worker thread"
                    );
                }
            }
            drop(sender);
            for (index, result) in receiver {
                results[index] = Some(result);
            }
        });
        // Instances stranded by failed spawns run here.
        for &index in order {
            if results[index].is_none() && !self.cancellation.is_cancelled() {
                results[index] = Some(self.run_instance(index, &instances[index]));
            }
        }
    }

    fn run_instance(&self, index: InstanceIndex, instance: &AspectInstance) -> Result<AdviceList> {
        let started = Instant::now();
        let aspect = instance.aspect();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut factory = self.services.factory(aspect.name(), index);
            aspect.apply(&mut factory)?;
            factory.finish()
        }))
        .unwrap_or_else(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|text| (*text).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(Error::internal(format!("aspect `{}` panicked: {message}", instance.label())))
        });
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(list) => debug!(
                target: "pipeline",
                stage = "weave.instance",
                instance = index,
                aspect = instance.label(),
                status = "ok",
                advices = list.len(),
                elapsed_ms,
            ),
            Err(err) => debug!(
                target: "pipeline",
                stage = "weave.instance",
                instance = index,
                aspect = instance.label(),
                status = "error",
                error = %err,
                elapsed_ms,
            ),
        }
        result
    }

    fn collect(
        &self,
        instances: &[AspectInstance],
        results: Vec<Option<Result<AdviceList>>>,
    ) -> StageOutcome {
        let mut outcome = StageOutcome::default();
        for (index, result) in results.into_iter().enumerate() {
            let aspect = instances[index].label().to_string();
            match result {
                Some(Ok(list)) => outcome.lists.push(list),
                Some(Err(error)) => {
                    self.services
                        .sink
                        .report_all(index, error.diagnostics().iter().cloned());
                    warn!(
                        target: "pipeline",
                        stage = "weave.instance",
                        instance = index,
                        aspect = %aspect,
                        error = %error,
                        "aspect instance failed"
                    );
                    outcome.failures.push(InstanceFailure {
                        instance: index,
                        aspect,
                        error,
                    });
                }
                None => {
                    outcome.cancelled = true;
                    outcome.failures.push(InstanceFailure {
                        instance: index,
                        aspect,
                        error: Error::Cancelled,
                    });
                }
            }
        }
        outcome.diagnostics = self.services.sink.drain();
        outcome
    }
}
