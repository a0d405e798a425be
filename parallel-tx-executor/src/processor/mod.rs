//! The transaction execution seam.
//!
//! The orchestrator never interprets transactions itself. It hands each one to
//! a [`TransactionProcessor`] together with an accumulator to execute against.

mod evm;
mod simple;

pub use evm::EvmTransactionProcessor;
pub use simple::SimpleTransactionProcessor;

use crate::error::ExecutionError;
use crate::state::{BlockHashLookup, WorldStateAccumulator};
use crate::tracker::RewardTracer;
use crate::types::{BlockHeader, ProcessingResult, Transaction, ValidationParams};
use alloy_primitives::{Address, U256};

/// Configuration shared by the transaction processors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    pub chain_id: u64,
    /// Verify signatures when the validation parameters ask for it.
    pub verify_signatures: bool,
    /// Delete touched empty accounts (EIP-161).
    pub clear_empty_accounts: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            verify_signatures: true,
            clear_empty_accounts: true,
        }
    }
}

/// Executes a single transaction against a world-state accumulator.
pub trait TransactionProcessor: Send + Sync {
    /// Runs `transaction` on `world`, crediting the reward to `beneficiary`.
    ///
    /// `tracer` is called exactly once, right before the reward is applied.
    /// Validation failures are returned as an invalid [`ProcessingResult`];
    /// `Err` is reserved for state access and EVM failures. The accumulator is left
    /// uncommitted.
    #[allow(clippy::too_many_arguments)]
    fn process_transaction(
        &self,
        world: &mut WorldStateAccumulator,
        header: &BlockHeader,
        transaction: &Transaction,
        beneficiary: Address,
        tracer: &mut dyn RewardTracer,
        block_hashes: &dyn BlockHashLookup,
        validation: ValidationParams,
        blob_gas_price: U256,
    ) -> Result<ProcessingResult, ExecutionError>;

    /// Whether touched empty accounts are deleted (EIP-161).
    fn clear_empty_accounts(&self) -> bool;
}
