//! Counters describing how much of a block was served by speculation.

use metrics::{counter, describe_counter, Counter};
use std::fmt;

const CONFIRMED_PARALLELIZED: &str = "parallel_tx.confirmed_parallelized";
const CONFLICTING_BUT_CACHED: &str = "parallel_tx.conflicting_but_cached";

/// Handles to the reconciliation counters.
#[derive(Clone)]
pub struct ParallelizationMetrics {
    /// Speculative results merged without re-execution.
    pub confirmed_parallelized: Counter,
    /// Speculative results discarded, with their reads kept as cache.
    pub conflicting_but_cached: Counter,
}

impl ParallelizationMetrics {
    /// Registers the counters with the installed recorder.
    pub fn new() -> Self {
        describe_counter!(
            CONFIRMED_PARALLELIZED,
            "Transactions whose speculative result was merged into the block"
        );
        describe_counter!(
            CONFLICTING_BUT_CACHED,
            "Transactions replayed after a collision or failed speculation"
        );
        Self {
            confirmed_parallelized: counter!(CONFIRMED_PARALLELIZED),
            conflicting_but_cached: counter!(CONFLICTING_BUT_CACHED),
        }
    }

    pub fn noop() -> Self {
        Self {
            confirmed_parallelized: Counter::noop(),
            conflicting_but_cached: Counter::noop(),
        }
    }
}

impl Default for ParallelizationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ParallelizationMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelizationMetrics").finish_non_exhaustive()
    }
}
