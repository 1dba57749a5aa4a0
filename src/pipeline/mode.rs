use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use serde::Deserialize;

use crate::error::{Error, Result};

/// How a weaving stage schedules its aspect instances.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Scoped worker threads pulling instances from a shared cursor.
    Parallel {
        #[serde(rename = "max-workers", default = "default_workers")]
        max_workers: usize,
    },
    /// Declaration order on the calling thread.
    Sequential,
    /// A seed-keyed permutation of the instances on the calling thread.
    Randomized { seed: u64 },
}

impl ExecutionMode {
    #[must_use]
    pub fn parallel() -> Self {
        ExecutionMode::Parallel {
            max_workers: default_workers(),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Parallel { .. } => "parallel",
            ExecutionMode::Sequential => "sequential",
            ExecutionMode::Randomized { .. } => "randomized",
        }
    }

    /// Build a mode from its command-line spelling.
    pub fn parse(name: &str, seed: Option<u64>, max_workers: Option<usize>) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "parallel" => Ok(ExecutionMode::Parallel {
                max_workers: max_workers.unwrap_or_else(default_workers),
            }),
            "sequential" => Ok(ExecutionMode::Sequential),
            "randomized" | "random" => Ok(ExecutionMode::Randomized {
                seed: seed.unwrap_or_default(),
            }),
            other => Err(Error::config(format!(
                "unknown execution mode `{other}` (expected parallel, sequential or randomized)"
            ))),
        }
    }

    /// Order in which `count` instances are started.
    #[must_use]
    pub fn schedule(self, count: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..count).collect();
        if let ExecutionMode::Randomized { seed } = self {
            let key = blake3::derive_key("weaver randomized execution order", &seed.to_le_bytes());
            order.sort_by_cached_key(|index| {
                *blake3::keyed_hash(&key, &(*index as u64).to_le_bytes()).as_bytes()
            });
        }
        order
    }

    /// Number of threads the stage may use for `count` instances.
    #[must_use]
    pub fn workers(self, count: usize) -> usize {
        match self {
            ExecutionMode::Parallel { max_workers } => max_workers.clamp(1, count.max(1)),
            ExecutionMode::Sequential | ExecutionMode::Randomized { .. } => 1,
        }
    }
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::parallel()
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Parallel { max_workers } => write!(f, "parallel({max_workers})"),
            ExecutionMode::Sequential => f.write_str("sequential"),
            ExecutionMode::Randomized { seed } => write!(f, "randomized({seed})"),
        }
    }
}

fn default_workers() -> usize {
    thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

/// Cooperative cancellation flag checked between aspect instances.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
