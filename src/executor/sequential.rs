//! Sequential block executor.
//!
//! This module provides the baseline executor that processes transactions
//! one at a time, in block order, without speculation.

use super::{BlockProcessingError, BlockProcessingOutcome, BlockProcessor, Executor};
use crate::Block;
use parallel_tx_executor::{
    InMemoryWorldStateArchive, ProcessorConfig, SimpleTransactionProcessor, TransactionProcessor,
};
use std::sync::Arc;

/// Sequential executor that processes transactions one at a time.
///
/// # Example
///
/// ```
/// use block_processing::{Executor, SequentialExecutor, Workload, WorkloadConfig};
///
/// let workload = Workload::generate(WorkloadConfig::default());
/// let archive = workload.archive();
///
/// let executor = SequentialExecutor::with_verification(true);
/// let outcome = executor.execute(&archive, &workload.block()).unwrap();
///
/// println!("Successful: {}, Failed: {}", outcome.result.successful, outcome.result.failed);
/// ```
#[derive(Debug)]
pub struct SequentialExecutor<P = SimpleTransactionProcessor> {
    processor: BlockProcessor<P>,
}

impl SequentialExecutor {
    /// Creates a new sequential executor.
    pub fn new(config: ProcessorConfig) -> Self {
        Self {
            processor: BlockProcessor::new(SimpleTransactionProcessor::new(config)),
        }
    }

    /// Creates a sequential executor for chain 1.
    ///
    /// # Arguments
    /// * `verify_signatures` - If true, recovers and verifies the signer address
    ///   from each transaction's signature before execution.
    pub fn with_verification(verify_signatures: bool) -> Self {
        Self::new(ProcessorConfig {
            verify_signatures,
            ..Default::default()
        })
    }
}

impl<P> SequentialExecutor<P>
where
    P: TransactionProcessor + 'static,
{
    /// Creates a sequential executor running transactions through `processor`.
    pub fn with_processor(processor: P) -> Self {
        Self {
            processor: BlockProcessor::new(processor),
        }
    }
}

impl Default for SequentialExecutor {
    fn default() -> Self {
        Self::new(ProcessorConfig::default())
    }
}

impl<P> Executor for SequentialExecutor<P>
where
    P: TransactionProcessor + 'static,
{
    fn execute(
        &self,
        archive: &Arc<InMemoryWorldStateArchive>,
        block: &Block,
    ) -> Result<BlockProcessingOutcome, BlockProcessingError> {
        self.processor.process_block(archive, block, None)
    }

    fn name(&self) -> &'static str {
        "sequential"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Workload, WorkloadConfig};
    use alloy_primitives::U256;
    use parallel_tx_executor::EvmTransactionProcessor;

    fn config() -> WorkloadConfig {
        WorkloadConfig {
            num_accounts: 10,
            num_transactions: 5,
            conflict_factor: 0.0,
            seed: 42,
            ..Default::default()
        }
    }

    #[test]
    fn test_sequential_executor_with_verification() {
        let workload = Workload::generate(config());
        let archive = workload.archive();

        let executor = SequentialExecutor::with_verification(true);
        let outcome = executor.execute(&archive, &workload.block()).unwrap();

        assert_eq!(outcome.result.successful, 5);
        assert_eq!(outcome.result.failed, 0);
        assert_eq!(outcome.gas_used, 5 * 21_000);
    }

    #[test]
    fn test_sequential_executor_without_verification() {
        let workload = Workload::generate(config());
        let archive = workload.archive();

        let executor = SequentialExecutor::with_verification(false);
        let outcome = executor.execute(&archive, &workload.block()).unwrap();

        assert_eq!(outcome.result.successful, 5);
        assert_eq!(outcome.result.failed, 0);
    }

    #[test]
    fn test_counter_calls_update_storage() {
        let workload = Workload::generate(WorkloadConfig {
            num_accounts: 10,
            num_transactions: 6,
            conflict_factor: 1.0,
            contract_call_factor: 1.0,
            seed: 3,
            ..Default::default()
        });
        let archive = workload.archive();

        let outcome = SequentialExecutor::default()
            .execute(&archive, &workload.block())
            .unwrap();

        // All hot calls increment slot 0.
        assert_eq!(outcome.result.successful, 6);
        assert_eq!(
            outcome
                .state
                .storage_value(&workload.contract, &alloy_primitives::U256::ZERO),
            alloy_primitives::U256::from(6)
        );
        assert!(outcome.receipts.iter().all(|receipt| receipt.logs.len() == 1));
    }

    #[test]
    fn test_evm_counter_and_failures() {
        let workload = Workload::generate(WorkloadConfig {
            num_accounts: 10,
            num_transactions: 12,
            conflict_factor: 1.0,
            contract_call_factor: 0.5,
            failure_factor: 0.5,
            seed: 9,
            ..Default::default()
        });
        let archive = workload.archive();

        let outcome = SequentialExecutor::with_processor(EvmTransactionProcessor::default())
            .execute(&archive, &workload.block())
            .unwrap();

        let failing = workload
            .transactions
            .iter()
            .filter(|tx| {
                tx.to() == Some(workload.reverter) || tx.gas_limit() == crate::OUT_OF_GAS_LIMIT
            })
            .count();
        assert_eq!(outcome.result.total(), 12);
        assert_eq!(outcome.result.failed, failing);
        // Hot increments that did not fail all land in slot 0.
        let increments = workload
            .transactions
            .iter()
            .zip(&outcome.receipts)
            .filter(|(tx, receipt)| {
                tx.to() == Some(workload.contract) && receipt.status.coerce_status()
            })
            .count();
        assert_eq!(
            outcome.state.storage_value(&workload.contract, &U256::ZERO),
            U256::from(increments)
        );
    }
}
