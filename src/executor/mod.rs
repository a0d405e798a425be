//! Block processing strategies.
//!
//! This module provides the [`Executor`] trait and implementations for
//! processing a block strictly sequentially or with speculative parallel
//! execution. Both produce identical results; they differ only in how much
//! of the block is served from speculation.

mod block_processor;
mod parallel;
mod sequential;

pub use block_processor::{
    BlockProcessingError, BlockProcessingOutcome, BlockProcessor, ParallelOptions,
};
pub use parallel::ParallelExecutor;
pub use sequential::SequentialExecutor;

use crate::Block;
use parallel_tx_executor::InMemoryWorldStateArchive;
use std::sync::Arc;

/// Counts describing how a block was processed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Number of successfully executed transactions.
    pub successful: usize,
    /// Number of executed transactions that reverted or ran out of gas.
    pub failed: usize,
    /// Transactions whose speculative result was merged.
    pub parallelized: usize,
    /// Transactions executed synchronously by the block processor.
    pub replayed: usize,
}

impl ExecutionResult {
    /// Total number of transactions processed.
    pub fn total(&self) -> usize {
        self.successful + self.failed
    }

    /// Share of transactions served by speculation.
    pub fn parallel_hit_rate(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        self.parallelized as f64 / self.total() as f64
    }
}

/// Trait for different block processing strategies.
///
/// # Implementing a New Executor
///
/// ```ignore
/// use block_processing::executor::{BlockProcessingError, BlockProcessingOutcome, Executor};
/// use block_processing::Block;
/// use parallel_tx_executor::InMemoryWorldStateArchive;
/// use std::sync::Arc;
///
/// pub struct PrefetchingExecutor;
///
/// impl Executor for PrefetchingExecutor {
///     fn execute(
///         &self,
///         archive: &Arc<InMemoryWorldStateArchive>,
///         block: &Block,
///     ) -> Result<BlockProcessingOutcome, BlockProcessingError> {
///         // Your implementation here
///         todo!()
///     }
/// }
/// ```
pub trait Executor {
    /// Processes `block` on top of its parent state in `archive`.
    ///
    /// The archive is not modified; persisting the resulting state is up to
    /// the caller.
    fn execute(
        &self,
        archive: &Arc<InMemoryWorldStateArchive>,
        block: &Block,
    ) -> Result<BlockProcessingOutcome, BlockProcessingError>;

    /// Returns a human-readable name for this executor.
    fn name(&self) -> &'static str {
        "unknown"
    }
}
