//! In-order block processing on top of the speculative orchestrator.

use super::ExecutionResult;
use crate::Block;
use alloy_consensus::{Eip658Value, Receipt};
use alloy_primitives::B256;
use parallel_tx_executor::{
    ExecutionError, InMemoryWorldState, InMemoryWorldStateArchive, NoopTracer,
    ParallelTransactionOrchestrator, ParallelizationMetrics, StateChanges, StateError,
    TransactionProcessor, TxnIndex, ValidationParams, WorldStateAccumulator, WorldView,
};
use rayon::ThreadPool;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Failure to process a block.
#[derive(Debug, Error)]
pub enum BlockProcessingError {
    #[error("state of parent block {0} is unavailable")]
    MissingParentState(B256),
    #[error("transaction {index} is invalid: {reason}")]
    InvalidTransaction { index: TxnIndex, reason: String },
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Everything a processed block produced.
#[derive(Debug, Clone)]
pub struct BlockProcessingOutcome {
    /// Hash of the processed block's header.
    pub block_hash: B256,
    /// World state after the block.
    pub state: InMemoryWorldState,
    /// Net changes against the parent state.
    pub changes: StateChanges,
    pub receipts: Vec<Receipt>,
    pub gas_used: u64,
    pub result: ExecutionResult,
}

/// Speculative execution settings for one block.
#[derive(Debug, Clone, Copy)]
pub struct ParallelOptions<'a> {
    pub pool: &'a ThreadPool,
    /// Wait for every speculative execution before reconciling. Makes the
    /// number of parallelized transactions deterministic.
    pub wait_for_speculation: bool,
}

/// Applies a block's transactions in order, preferring reconciled
/// speculative results over synchronous execution.
#[derive(Debug)]
pub struct BlockProcessor<P> {
    processor: Arc<P>,
    metrics: ParallelizationMetrics,
}

impl<P> BlockProcessor<P>
where
    P: TransactionProcessor + 'static,
{
    pub fn new(processor: P) -> Self {
        Self {
            processor: Arc::new(processor),
            metrics: ParallelizationMetrics::new(),
        }
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// Processes `block` on top of its parent state.
    ///
    /// Without `parallel` every transaction is executed synchronously.
    pub fn process_block(
        &self,
        archive: &Arc<InMemoryWorldStateArchive>,
        block: &Block,
        parallel: Option<ParallelOptions<'_>>,
    ) -> Result<BlockProcessingOutcome, BlockProcessingError> {
        let header = &block.header;
        let beneficiary = header.beneficiary;
        let blob_gas_price = block.blob_gas_price();
        let parent = archive
            .state(&header.parent_hash)
            .ok_or(BlockProcessingError::MissingParentState(header.parent_hash))?;

        let orchestrator = ParallelTransactionOrchestrator::new(self.processor.clone());
        if let Some(options) = parallel {
            orchestrator.run_async(
                archive.clone(),
                header,
                &block.transactions,
                beneficiary,
                archive.clone(),
                blob_gas_price,
                options.pool,
            );
            if options.wait_for_speculation {
                orchestrator.wait_for_speculative_tasks();
            }
        }

        let base: Arc<dyn WorldView> = parent.clone();
        let mut world = WorldStateAccumulator::new(base);
        let mut receipts = Vec::with_capacity(block.transactions.len());
        let mut result = ExecutionResult::default();
        let mut cumulative_gas_used = 0u64;

        for (index, transaction) in block.transactions.iter().enumerate() {
            let available_gas = header.gas_limit - cumulative_gas_used;
            if transaction.gas_limit() > available_gas {
                orchestrator.cancel_remaining();
                return Err(BlockProcessingError::InvalidTransaction {
                    index,
                    reason: format!(
                        "gas limit {} exceeds available block gas {}",
                        transaction.gas_limit(),
                        available_gas
                    ),
                });
            }

            let outcome = match orchestrator.apply_result(
                &mut world,
                beneficiary,
                transaction,
                index,
                &self.metrics,
            )? {
                Some(outcome) => {
                    result.parallelized += 1;
                    outcome
                }
                None => {
                    result.replayed += 1;
                    self.processor.process_transaction(
                        &mut world,
                        header,
                        transaction,
                        beneficiary,
                        &mut NoopTracer,
                        archive.as_ref(),
                        ValidationParams::processing_block(),
                        blob_gas_price,
                    )?
                }
            };

            if let Some(reason) = outcome.invalid_reason() {
                orchestrator.cancel_remaining();
                return Err(BlockProcessingError::InvalidTransaction {
                    index,
                    reason: reason.to_string(),
                });
            }
            world.commit();

            if outcome.is_successful() {
                result.successful += 1;
            } else {
                result.failed += 1;
            }
            cumulative_gas_used += outcome.gas_used;
            trace!(
                index,
                gas_used = outcome.gas_used,
                parallel = outcome.processed_in_parallel,
                "processed transaction"
            );
            receipts.push(Receipt {
                status: Eip658Value::Eip658(outcome.is_successful()),
                cumulative_gas_used,
                logs: outcome.logs,
            });
        }

        let changes = world.state_changes();
        let state = parent.apply_changes(&changes);
        let block_hash = block.hash();
        debug!(
            block = header.number,
            hash = %block_hash,
            transactions = block.transactions.len(),
            gas_used = cumulative_gas_used,
            parallelized = result.parallelized,
            replayed = result.replayed,
            "processed block"
        );

        Ok(BlockProcessingOutcome {
            block_hash,
            state,
            changes,
            receipts,
            gas_used: cumulative_gas_used,
            result,
        })
    }
}
