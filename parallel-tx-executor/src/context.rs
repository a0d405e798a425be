//! The outcome of one speculative execution, waiting to be reconciled.

use crate::state::WorldStateAccumulator;
use crate::types::{ProcessingResult, TxnIndex};
use alloy_primitives::U256;

/// Result of speculatively executing the transaction at `index` on its own
/// copy of the pre-block state.
#[derive(Debug)]
pub struct TransactionContext {
    index: TxnIndex,
    accumulator: WorldStateAccumulator,
    result: ProcessingResult,
    miner_reward: U256,
    beneficiary_touched_pre_reward: bool,
}

impl TransactionContext {
    pub fn new(
        index: TxnIndex,
        accumulator: WorldStateAccumulator,
        result: ProcessingResult,
        miner_reward: U256,
        beneficiary_touched_pre_reward: bool,
    ) -> Self {
        Self {
            index,
            accumulator,
            result,
            miner_reward,
            beneficiary_touched_pre_reward,
        }
    }

    pub fn index(&self) -> TxnIndex {
        self.index
    }

    /// Reads and writes of the execution, relative to the pre-block state.
    pub fn accumulator(&self) -> &WorldStateAccumulator {
        &self.accumulator
    }

    pub fn result(&self) -> &ProcessingResult {
        &self.result
    }

    /// Amount credited to the beneficiary by this transaction.
    pub fn miner_reward(&self) -> U256 {
        self.miner_reward
    }

    /// Whether the transaction read or wrote the beneficiary before the reward
    /// was applied.
    pub fn beneficiary_touched_pre_reward(&self) -> bool {
        self.beneficiary_touched_pre_reward
    }

    pub fn into_parts(self) -> (WorldStateAccumulator, ProcessingResult) {
        (self.accumulator, self.result)
    }
}
