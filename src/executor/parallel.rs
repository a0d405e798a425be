//! Parallel-assisted block executor.
//!
//! Transactions are executed speculatively on a rayon pool while the block
//! processor walks the block in order, merging speculative results that did
//! not collide with earlier transactions and replaying the rest.

use super::{BlockProcessingError, BlockProcessingOutcome, BlockProcessor, Executor, ParallelOptions};
use crate::Block;
use parallel_tx_executor::{
    InMemoryWorldStateArchive, ProcessorConfig, SimpleTransactionProcessor, TransactionProcessor,
};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;

/// Executor that speculates on a dedicated thread pool.
#[derive(Debug)]
pub struct ParallelExecutor<P = SimpleTransactionProcessor> {
    processor: BlockProcessor<P>,
    pool: ThreadPool,
    wait_for_speculation: bool,
}

impl ParallelExecutor {
    /// Creates an executor with `num_threads` speculation workers.
    pub fn new(num_threads: usize, config: ProcessorConfig) -> Result<Self, BlockProcessingError> {
        Self::with_processor(num_threads, SimpleTransactionProcessor::new(config))
    }
}

impl<P> ParallelExecutor<P>
where
    P: TransactionProcessor + 'static,
{
    /// Creates an executor running transactions through `processor`.
    pub fn with_processor(num_threads: usize, processor: P) -> Result<Self, BlockProcessingError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("speculative-{i}"))
            .build()?;
        Ok(Self {
            processor: BlockProcessor::new(processor),
            pool,
            wait_for_speculation: false,
        })
    }

    /// Waits for all speculative executions before reconciling.
    pub fn with_wait_for_speculation(mut self, wait: bool) -> Self {
        self.wait_for_speculation = wait;
        self
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl<P> Executor for ParallelExecutor<P>
where
    P: TransactionProcessor + 'static,
{
    fn execute(
        &self,
        archive: &Arc<InMemoryWorldStateArchive>,
        block: &Block,
    ) -> Result<BlockProcessingOutcome, BlockProcessingError> {
        self.processor.process_block(
            archive,
            block,
            Some(ParallelOptions {
                pool: &self.pool,
                wait_for_speculation: self.wait_for_speculation,
            }),
        )
    }

    fn name(&self) -> &'static str {
        "parallel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SequentialExecutor;
    use crate::{Workload, WorkloadConfig, BASE_FEE};
    use alloy_primitives::{B256, U256};
    use parallel_tx_executor::EvmTransactionProcessor;
    use proptest::prelude::*;

    fn workload(conflict_factor: f64, contract_call_factor: f64, seed: u64) -> Workload {
        Workload::generate(WorkloadConfig {
            num_accounts: 50,
            num_transactions: 40,
            conflict_factor,
            contract_call_factor,
            seed,
            ..Default::default()
        })
    }

    fn failing_workload(conflict_factor: f64, failure_factor: f64, seed: u64) -> Workload {
        Workload::generate(WorkloadConfig {
            num_accounts: 30,
            num_transactions: 40,
            conflict_factor,
            contract_call_factor: 0.4,
            failure_factor,
            seed,
            ..Default::default()
        })
    }

    fn parallel(wait: bool) -> ParallelExecutor {
        ParallelExecutor::new(4, ProcessorConfig::default())
            .unwrap()
            .with_wait_for_speculation(wait)
    }

    fn assert_equivalent(workload: &Workload, executor: &ParallelExecutor) -> BlockProcessingOutcome {
        assert_equivalent_to(workload, executor, &SequentialExecutor::default())
    }

    fn assert_equivalent_to(
        workload: &Workload,
        executor: &dyn Executor,
        baseline: &dyn Executor,
    ) -> BlockProcessingOutcome {
        let block = workload.block();
        let sequential = baseline.execute(&workload.archive(), &block).unwrap();
        let parallel = executor.execute(&workload.archive(), &block).unwrap();

        assert_eq!(parallel.changes, sequential.changes);
        assert_eq!(parallel.state, sequential.state);
        assert_eq!(parallel.receipts, sequential.receipts);
        assert_eq!(parallel.gas_used, sequential.gas_used);
        assert_eq!(parallel.result.total(), sequential.result.total());
        parallel
    }

    #[test]
    fn test_equivalence_across_conflict_levels() {
        let executor = parallel(true);
        for conflict_factor in [0.0, 0.5, 1.0] {
            for call_factor in [0.0, 0.5] {
                let workload = workload(conflict_factor, call_factor, 42);
                assert_equivalent(&workload, &executor);
            }
        }
    }

    #[test]
    fn test_equivalence_without_waiting() {
        let executor = parallel(false);
        for seed in 0..4 {
            assert_equivalent(&workload(0.5, 0.5, seed), &executor);
        }
    }

    #[test]
    fn test_independent_transfers_are_parallelized() {
        let workload = Workload::generate(WorkloadConfig {
            num_accounts: 1000,
            num_transactions: 20,
            seed: 11,
            ..Default::default()
        });
        let outcome = assert_equivalent(&workload, &parallel(true));
        assert!(outcome.result.parallelized > 0);
        assert_eq!(
            outcome.result.parallelized + outcome.result.replayed,
            workload.transactions.len()
        );
    }

    #[test]
    fn test_hot_counter_is_replayed() {
        // Every call increments slot 0 of the same contract.
        let workload = workload(1.0, 1.0, 5);
        let outcome = assert_equivalent(&workload, &parallel(true));
        assert_eq!(outcome.result.parallelized, 1);
        assert_eq!(
            outcome.state.storage_value(&workload.contract, &U256::ZERO),
            U256::from(40)
        );
    }

    #[test]
    fn test_beneficiary_rewarded_once_per_transaction() {
        let workload = workload(0.0, 0.5, 8);
        let outcome = assert_equivalent(&workload, &parallel(true));

        // Every transaction pays a 1 gwei tip per unit of gas.
        let tip = U256::from(BASE_FEE);
        let expected = U256::from(outcome.gas_used) * tip;
        assert_eq!(outcome.state.balance(&workload.beneficiary), expected);
        assert!(outcome.result.parallelized > 1);
    }

    #[test]
    fn test_stale_chain_head_falls_back_to_sequential() {
        let workload = workload(0.0, 0.0, 13);
        let block = workload.block();
        let archive = workload.archive();
        archive.set_chain_head(B256::repeat_byte(0x42));

        let outcome = parallel(true).execute(&archive, &block).unwrap();
        assert_eq!(outcome.result.parallelized, 0);
        assert_eq!(outcome.result.replayed, block.transactions.len());

        let sequential = SequentialExecutor::default()
            .execute(&workload.archive(), &block)
            .unwrap();
        assert_eq!(outcome.state, sequential.state);
    }

    #[test]
    fn test_failed_transactions_are_equivalent() {
        let executor = parallel(true);
        for conflict_factor in [0.0, 0.5, 1.0] {
            let workload = failing_workload(conflict_factor, 0.4, 21);
            let outcome = assert_equivalent(&workload, &executor);
            assert!(outcome.result.failed > 0);
        }
    }

    #[test]
    fn test_evm_equivalence_across_conflict_levels() {
        let sequential = SequentialExecutor::with_processor(EvmTransactionProcessor::default());
        let executor = ParallelExecutor::with_processor(4, EvmTransactionProcessor::default())
            .unwrap()
            .with_wait_for_speculation(true);
        for conflict_factor in [0.0, 0.5, 1.0] {
            let workload = failing_workload(conflict_factor, 0.3, 17);
            assert_equivalent_to(&workload, &executor, &sequential);
        }
    }

    #[test]
    fn test_evm_independent_transfers_are_parallelized() {
        let workload = Workload::generate(WorkloadConfig {
            num_accounts: 1000,
            num_transactions: 20,
            seed: 11,
            ..Default::default()
        });
        let sequential = SequentialExecutor::with_processor(EvmTransactionProcessor::default());
        let executor = ParallelExecutor::with_processor(4, EvmTransactionProcessor::default())
            .unwrap()
            .with_wait_for_speculation(true);
        let outcome = assert_equivalent_to(&workload, &executor, &sequential);
        assert!(outcome.result.parallelized > 0);
        // Fee credits to the shared beneficiary do not count as collisions.
        let tip = U256::from(BASE_FEE);
        assert_eq!(
            outcome.state.balance(&workload.beneficiary),
            U256::from(outcome.gas_used) * tip
        );
    }

    #[test]
    fn test_thread_pool_size() {
        assert_eq!(parallel(false).num_threads(), 4);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_parallel_matches_sequential(
            conflict_factor in 0.0f64..=1.0,
            contract_call_factor in 0.0f64..=1.0,
            failure_factor in 0.0f64..=0.5,
            seed in any::<u64>(),
            wait in any::<bool>(),
            evm in any::<bool>(),
        ) {
            let workload = Workload::generate(WorkloadConfig {
                num_accounts: 12,
                num_transactions: 16,
                conflict_factor,
                contract_call_factor,
                failure_factor,
                seed,
                ..Default::default()
            });
            let block = workload.block();
            let (sequential, parallel) = if evm {
                let processor = EvmTransactionProcessor::default();
                let executor = ParallelExecutor::with_processor(4, processor.clone())
                    .unwrap()
                    .with_wait_for_speculation(wait);
                (
                    SequentialExecutor::with_processor(processor)
                        .execute(&workload.archive(), &block)
                        .unwrap(),
                    executor.execute(&workload.archive(), &block).unwrap(),
                )
            } else {
                (
                    SequentialExecutor::default()
                        .execute(&workload.archive(), &block)
                        .unwrap(),
                    parallel(wait).execute(&workload.archive(), &block).unwrap(),
                )
            };

            prop_assert_eq!(parallel.changes, sequential.changes);
            prop_assert_eq!(parallel.receipts, sequential.receipts);
        }
    }
}
