//! Speculative parallel execution with in-order reconciliation.
//!
//! [`ParallelTransactionOrchestrator::run_async`] executes every transaction
//! of a block on the thread pool, each on its own accumulator over the
//! pre-block state. The block processor then walks the block in order and
//! calls [`ParallelTransactionOrchestrator::apply_result`] for each index,
//! which either merges the speculative result into the block accumulator or
//! asks for a synchronous replay.
//!
//! # Cancellation
//!
//! Every index has a claim flag. `apply_result` claims the index before it
//! looks for a context; a task checks the flag before executing and again
//! after publishing its context, removing the context itself if the index was
//! claimed in between. Contexts for already-processed indices therefore never
//! stay in the map.

use crate::collision::TransactionCollisionDetector;
use crate::context::TransactionContext;
use crate::error::StateError;
use crate::metrics::ParallelizationMetrics;
use crate::processor::TransactionProcessor;
use crate::state::{BlockHashLookup, WorldStateAccumulator, WorldStateProvider};
use crate::tracker::BeneficiaryTouchTracer;
use crate::types::{BlockHeader, ProcessingResult, Transaction, TxnIndex, ValidationParams};
use alloy_primitives::{Address, U256};
use crossbeam::sync::WaitGroup;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rayon::ThreadPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Everything a speculative execution needs besides the transaction.
struct BlockEnv {
    provider: Arc<dyn WorldStateProvider>,
    header: BlockHeader,
    beneficiary: Address,
    block_hashes: Arc<dyn BlockHashLookup>,
    blob_gas_price: U256,
}

/// Per-run bookkeeping shared with the background tasks.
struct RunState {
    claimed: Box<[AtomicBool]>,
    wait_group: Mutex<Option<WaitGroup>>,
}

impl RunState {
    fn is_claimed(&self, index: TxnIndex) -> bool {
        self.claimed
            .get(index)
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn claim(&self, index: TxnIndex) {
        if let Some(flag) = self.claimed.get(index) {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

/// Runs a block's transactions speculatively and reconciles the results.
///
/// One orchestrator serves one block.
pub struct ParallelTransactionOrchestrator<P> {
    processor: Arc<P>,
    collision_detector: TransactionCollisionDetector,
    contexts: Arc<DashMap<TxnIndex, TransactionContext>>,
    run: RwLock<Option<Arc<RunState>>>,
}

impl<P> ParallelTransactionOrchestrator<P>
where
    P: TransactionProcessor + 'static,
{
    pub fn new(processor: Arc<P>) -> Self {
        Self::with_collision_detector(processor, TransactionCollisionDetector)
    }

    pub fn with_collision_detector(
        processor: Arc<P>,
        collision_detector: TransactionCollisionDetector,
    ) -> Self {
        Self {
            processor,
            collision_detector,
            contexts: Arc::new(DashMap::new()),
            run: RwLock::new(None),
        }
    }

    /// Starts speculative execution of `transactions` on `pool`.
    ///
    /// Returns immediately. Nothing is scheduled when the chain head is not
    /// the parent of `header`, since the pre-block state would be wrong.
    #[allow(clippy::too_many_arguments)]
    pub fn run_async(
        &self,
        provider: Arc<dyn WorldStateProvider>,
        header: &BlockHeader,
        transactions: &[Transaction],
        beneficiary: Address,
        block_hashes: Arc<dyn BlockHashLookup>,
        blob_gas_price: U256,
        pool: &ThreadPool,
    ) {
        let mut run = self.run.write();
        if run.is_some() {
            warn!(block = header.number, "speculative run already started");
            return;
        }
        let chain_head = provider.chain_head();
        if chain_head != header.parent_hash {
            debug!(
                block = header.number,
                %chain_head,
                parent = %header.parent_hash,
                "chain head is not the parent block, skipping speculation"
            );
            return;
        }

        let wait_group = WaitGroup::new();
        let state = Arc::new(RunState {
            claimed: transactions.iter().map(|_| AtomicBool::new(false)).collect(),
            wait_group: Mutex::new(Some(wait_group.clone())),
        });
        *run = Some(state.clone());
        drop(run);

        let env = Arc::new(BlockEnv {
            provider,
            header: header.clone(),
            beneficiary,
            block_hashes,
            blob_gas_price,
        });
        debug!(
            block = header.number,
            transactions = transactions.len(),
            "starting speculative execution"
        );
        for (index, transaction) in transactions.iter().enumerate() {
            let task = SpeculativeTask {
                index,
                transaction: transaction.clone(),
                processor: self.processor.clone(),
                collision_detector: self.collision_detector,
                env: env.clone(),
                contexts: self.contexts.clone(),
                state: state.clone(),
                _wait_group: wait_group.clone(),
            };
            pool.spawn(move || task.run());
        }
    }

    /// Speculatively executes one transaction on the calling thread and stores
    /// its context.
    #[allow(clippy::too_many_arguments)]
    pub fn run_transaction(
        &self,
        provider: Arc<dyn WorldStateProvider>,
        header: &BlockHeader,
        index: TxnIndex,
        transaction: &Transaction,
        beneficiary: Address,
        block_hashes: Arc<dyn BlockHashLookup>,
        blob_gas_price: U256,
    ) {
        let env = BlockEnv {
            provider,
            header: header.clone(),
            beneficiary,
            block_hashes,
            blob_gas_price,
        };
        if let Some(context) = speculate(
            self.processor.as_ref(),
            self.collision_detector,
            &env,
            index,
            transaction,
        ) {
            self.contexts.insert(index, context);
        }
    }

    /// Reconciles the speculative result for `index` with `block`.
    ///
    /// Must be called in increasing index order, once per index, with `block`
    /// holding the effects of every earlier transaction. Returns the result
    /// when the speculative execution was merged, `None` when the caller must
    /// execute the transaction itself.
    pub fn apply_result(
        &self,
        block: &mut WorldStateAccumulator,
        beneficiary: Address,
        transaction: &Transaction,
        index: TxnIndex,
        metrics: &ParallelizationMetrics,
    ) -> Result<Option<ProcessingResult>, StateError> {
        if let Some(run) = self.run.read().as_ref() {
            run.claim(index);
        }
        let Some((_, context)) = self.contexts.remove(&index) else {
            trace!(index, "no speculative result");
            return Ok(None);
        };

        let collision =
            self.collision_detector
                .detect_collision(transaction, beneficiary, &context, block);
        if collision.is_none() && context.result().is_successful() {
            let reward = context.miner_reward();
            if !reward.is_zero() || !self.processor.clear_empty_accounts() {
                block.increment_balance(beneficiary, reward)?;
            }
            let (accumulator, mut result) = context.into_parts();
            block.import_state_changes_from_source(&accumulator);
            metrics.confirmed_parallelized.increment(1);
            result.processed_in_parallel = true;
            trace!(index, "merged speculative result");
            return Ok(Some(result));
        }

        match collision {
            Some(collision) => debug!(index, %collision, "speculative result collides"),
            None => trace!(index, status = ?context.result().status, "speculative execution did not succeed"),
        }
        block.import_prior_state_from_source(context.accumulator());
        metrics.conflicting_but_cached.increment(1);
        Ok(None)
    }

    /// Claims every index and drops all pending contexts.
    pub fn cancel_remaining(&self) {
        if let Some(run) = self.run.read().as_ref() {
            for flag in run.claimed.iter() {
                flag.store(true, Ordering::SeqCst);
            }
        }
        self.contexts.clear();
    }

    /// Blocks until every task of the current run has finished.
    ///
    /// Block processing never needs this; it makes speculation deterministic
    /// for tests and benchmarks.
    pub fn wait_for_speculative_tasks(&self) {
        let wait_group = self
            .run
            .read()
            .as_ref()
            .and_then(|run| run.wait_group.lock().take());
        if let Some(wait_group) = wait_group {
            wait_group.wait();
        }
    }

    /// Number of speculative results not yet reconciled.
    pub fn pending_contexts(&self) -> usize {
        self.contexts.len()
    }
}

impl<P> Drop for ParallelTransactionOrchestrator<P> {
    fn drop(&mut self) {
        if let Some(run) = self.run.get_mut().as_ref() {
            for flag in run.claimed.iter() {
                flag.store(true, Ordering::SeqCst);
            }
        }
        self.contexts.clear();
    }
}

struct SpeculativeTask<P> {
    index: TxnIndex,
    transaction: Transaction,
    processor: Arc<P>,
    collision_detector: TransactionCollisionDetector,
    env: Arc<BlockEnv>,
    contexts: Arc<DashMap<TxnIndex, TransactionContext>>,
    state: Arc<RunState>,
    _wait_group: WaitGroup,
}

impl<P: TransactionProcessor> SpeculativeTask<P> {
    fn run(self) {
        if self.state.is_claimed(self.index) {
            trace!(index = self.index, "index already claimed, skipping");
            return;
        }
        let Some(context) = speculate(
            self.processor.as_ref(),
            self.collision_detector,
            &self.env,
            self.index,
            &self.transaction,
        ) else {
            return;
        };
        self.contexts.insert(self.index, context);
        if self.state.is_claimed(self.index) {
            self.contexts.remove(&self.index);
            trace!(index = self.index, "result arrived after its index was claimed");
        }
    }
}

fn speculate<P: TransactionProcessor + ?Sized>(
    processor: &P,
    collision_detector: TransactionCollisionDetector,
    env: &BlockEnv,
    index: TxnIndex,
    transaction: &Transaction,
) -> Option<TransactionContext> {
    let parent = env.header.parent_hash;
    if env.provider.chain_head() != parent {
        trace!(index, "chain head moved, dropping speculative execution");
        return None;
    }
    let view = match env.provider.world_state(parent) {
        Ok(view) => view,
        Err(err) => {
            debug!(index, %err, "cannot open pre-block state");
            return None;
        }
    };

    let mut accumulator = WorldStateAccumulator::new(view);
    let mut tracer = BeneficiaryTouchTracer::new(env.beneficiary, collision_detector);
    let result = match processor.process_transaction(
        &mut accumulator,
        &env.header,
        transaction,
        env.beneficiary,
        &mut tracer,
        env.block_hashes.as_ref(),
        ValidationParams::processing_block(),
        env.blob_gas_price,
    ) {
        Ok(result) => result,
        Err(err) => {
            debug!(index, %err, "speculative execution failed");
            return None;
        }
    };
    accumulator.commit();

    let touched_pre_reward = tracer.beneficiary_touched_pre_reward();
    if !touched_pre_reward {
        // The reward is merged separately at reconciliation.
        accumulator.remove_account_update(&env.beneficiary);
    }
    Some(TransactionContext::new(
        index,
        accumulator,
        result,
        tracer.reward(),
        touched_pre_reward,
    ))
}
