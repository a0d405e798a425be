//! Block processing with speculative parallel transaction execution.
//!
//! This crate drives [`parallel_tx_executor`] the way an execution client
//! does: a block processor walks a block's transactions in order and, for
//! each one, either takes the reconciled speculative result or executes the
//! transaction synchronously. It also generates signed workloads to compare
//! sequential and parallel-assisted processing.
//!
//! # Architecture
//!
//! - **Workload**: pre-generated accounts, a counter contract, signed
//!   transactions and the genesis state they run against
//! - **Block**: a header plus its transactions
//! - **Executor**: a block processing strategy (sequential or parallel-assisted)
//!
//! # Quick Start
//!
//! ```
//! use block_processing::{Executor, SequentialExecutor, Workload, WorkloadConfig};
//!
//! let config = WorkloadConfig {
//!     num_accounts: 100,
//!     num_transactions: 50,
//!     ..Default::default()
//! };
//!
//! // Generate workload (signs all transactions upfront)
//! let workload = Workload::generate(config);
//! let archive = workload.archive();
//!
//! let executor = SequentialExecutor::default();
//! let outcome = executor.execute(&archive, &workload.block()).unwrap();
//!
//! println!("Successful: {}", outcome.result.successful);
//! ```

pub mod block;
pub mod executor;

pub use block::Block;
pub use executor::{
    BlockProcessingError, BlockProcessingOutcome, BlockProcessor, ExecutionResult, Executor,
    ParallelExecutor, SequentialExecutor,
};

pub use parallel_tx_executor::Account;

use alloy_primitives::{keccak256, Address, Bytes, U256};
use parallel_tx_executor::{
    AccountState, BlockHeader, InMemoryWorldState, InMemoryWorldStateArchive, Transaction,
    TransactionRequest,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// Workload Configuration & Generation
// ============================================================================

/// Base fee of generated blocks (1 gwei).
pub const BASE_FEE: u64 = 1_000_000_000;

/// Gas limit of generated contract calls.
const CALL_GAS_LIMIT: u64 = 100_000;

/// Covers the intrinsic gas of a counter call, but not the storage access.
const OUT_OF_GAS_LIMIT: u64 = 21_000 + 33 * 16 + 100;

/// Shared counter contract: increments the storage slot named by call input
/// bytes `1..33`. The leading `0x01` makes the same input an increment for
/// the simple processor too.
pub const COUNTER_CODE: &[u8] = &[0x60, 0x01, 0x35, 0x80, 0x54, 0x60, 0x01, 0x01, 0x90, 0x55, 0x00];

/// Contract that always reverts with empty data.
pub const REVERT_CODE: &[u8] = &[0x60, 0x00, 0x60, 0x00, 0xfd];

/// Configuration for workload generation.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Total number of accounts in the system.
    pub num_accounts: usize,
    /// Number of transactions to generate.
    pub num_transactions: usize,
    /// Conflict factor: 0.0 = no conflicts, 1.0 = all transactions touch same accounts.
    pub conflict_factor: f64,
    /// Share of transactions that call the counter contract instead of transferring ETH.
    pub contract_call_factor: f64,
    /// Share of transactions that fail: half revert, half run out of gas.
    pub failure_factor: f64,
    /// Random seed for reproducibility.
    pub seed: u64,
    /// Chain ID for transaction signing.
    pub chain_id: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            num_accounts: 1000,
            num_transactions: 100,
            conflict_factor: 0.0,
            contract_call_factor: 0.0,
            failure_factor: 0.0,
            seed: 42,
            chain_id: 1,
        }
    }
}

/// A complete benchmark workload with pre-generated accounts and signed transactions.
#[derive(Debug, Clone)]
pub struct Workload {
    /// The accounts (with signing keys) participating in this workload.
    pub accounts: Vec<Account>,
    /// The pre-signed transactions to execute.
    pub transactions: Vec<Transaction>,
    /// The shared counter contract.
    pub contract: Address,
    /// Contract whose calls always revert.
    pub reverter: Address,
    /// Fee recipient of the generated block.
    pub beneficiary: Address,
    /// Header of the block the workload builds on.
    pub genesis: BlockHeader,
    /// The configuration used to generate this workload.
    pub config: WorkloadConfig,
}

impl Workload {
    /// Generates a new workload from the given configuration.
    /// All transactions are pre-signed during generation.
    ///
    /// Without accounts there is no sender, so no transactions are generated.
    /// With a single account every transaction is a contract call.
    pub fn generate(config: WorkloadConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);

        // Generate accounts with deterministic keys.
        let accounts: Vec<Account> = (0..config.num_accounts)
            .map(|i| Account::from_seed(config.seed.wrapping_add(i as u64)))
            .collect();
        let contract = Address::from_slice(&keccak256(b"counter")[12..]);
        let reverter = Address::from_slice(&keccak256(b"reverter")[12..]);
        let beneficiary = Address::from_slice(&keccak256(b"beneficiary")[12..]);

        // Track nonces per account for proper transaction sequencing.
        let mut nonces: HashMap<usize, u64> = HashMap::new();

        // Calculate "hot" account range for conflict simulation.
        let hot_account_count = if config.conflict_factor > 0.0 {
            (2.0 + (1.0 - config.conflict_factor) * (config.num_accounts as f64 - 2.0))
                .max(2.0) as usize
        } else {
            config.num_accounts
        }
        .min(config.num_accounts);

        let num_transactions = if accounts.is_empty() {
            0
        } else {
            config.num_transactions
        };

        // Generate and sign transactions.
        let transactions: Vec<Transaction> = (0..num_transactions)
            .map(|_| {
                let use_hot = rng.gen::<f64>() < config.conflict_factor;
                let pool = if use_hot {
                    hot_account_count
                } else {
                    config.num_accounts
                };

                let from_idx = rng.gen_range(0..pool);
                let nonce = nonces.entry(from_idx).or_insert(0);
                let mut request = TransactionRequest {
                    chain_id: config.chain_id,
                    nonce: *nonce,
                    sender: accounts[from_idx].address,
                    max_fee_per_gas: 2 * BASE_FEE as u128,
                    max_priority_fee_per_gas: BASE_FEE as u128,
                    ..Default::default()
                };
                *nonce += 1;

                let roll = rng.gen::<f64>();
                if roll < config.failure_factor {
                    if rng.gen_bool(0.5) {
                        request.to = Some(reverter);
                        request.gas_limit = CALL_GAS_LIMIT;
                        request.input = Bytes::from_static(&[0xfd]);
                    } else {
                        request.to = Some(contract);
                        request.gas_limit = OUT_OF_GAS_LIMIT;
                        request.input =
                            increment_input(counter_slot(&mut rng, use_hot, config.num_accounts));
                    }
                } else if roll < config.failure_factor + config.contract_call_factor || pool < 2 {
                    request.to = Some(contract);
                    request.gas_limit = CALL_GAS_LIMIT;
                    request.input =
                        increment_input(counter_slot(&mut rng, use_hot, config.num_accounts));
                } else {
                    // Draw from the pool minus the sender, then skip over it.
                    let mut to_idx = rng.gen_range(0..pool - 1);
                    if to_idx >= from_idx {
                        to_idx += 1;
                    }
                    request.to = Some(accounts[to_idx].address);
                    request.gas_limit = 21_000;
                    request.value = U256::from(1_000_000_000_000_000u64); // 0.001 ETH
                }
                accounts[from_idx].sign(request)
            })
            .collect();

        let genesis = BlockHeader {
            number: 0,
            beneficiary,
            base_fee_per_gas: Some(BASE_FEE),
            gas_limit: 30_000_000,
            excess_blob_gas: Some(0),
            ..Default::default()
        };

        Self {
            accounts,
            transactions,
            contract,
            reverter,
            beneficiary,
            genesis,
            config,
        }
    }

    /// World state with every account funded and both contracts deployed.
    pub fn genesis_state(&self) -> InMemoryWorldState {
        let mut state = InMemoryWorldState::new();
        let initial_balance = U256::from(1_000_000_000_000_000_000_000u128); // 1000 ETH

        for account in &self.accounts {
            state.insert_account(account.address, AccountState::new(0, initial_balance));
        }
        state.insert_account(
            self.contract,
            AccountState::with_code(Bytes::from_static(COUNTER_CODE)),
        );
        state.insert_account(
            self.reverter,
            AccountState::with_code(Bytes::from_static(REVERT_CODE)),
        );
        state
    }

    /// An archive whose chain head is the genesis block.
    pub fn archive(&self) -> Arc<InMemoryWorldStateArchive> {
        Arc::new(InMemoryWorldStateArchive::new(
            &self.genesis,
            self.genesis_state(),
        ))
    }

    /// The block carrying every workload transaction on top of genesis.
    pub fn block(&self) -> Block {
        let gas: u64 = self.transactions.iter().map(Transaction::gas_limit).sum();
        let header = BlockHeader {
            number: 1,
            parent_hash: self.genesis.hash_slow(),
            beneficiary: self.beneficiary,
            base_fee_per_gas: Some(BASE_FEE),
            gas_limit: gas.max(self.genesis.gas_limit),
            excess_blob_gas: Some(0),
            timestamp: 12,
            ..Default::default()
        };
        Block::new(header, self.transactions.clone())
    }
}

/// Hot calls share one slot, cold calls spread over many.
fn counter_slot(rng: &mut StdRng, hot: bool, spread: usize) -> U256 {
    if hot {
        U256::ZERO
    } else {
        U256::from(rng.gen_range(0..spread))
    }
}

/// Counter call input incrementing `slot`.
pub fn increment_input(slot: U256) -> Bytes {
    let mut input = vec![0x01];
    input.extend_from_slice(&slot.to_be_bytes::<32>());
    Bytes::from(input)
}

// ============================================================================
// Tests
// ============================================================================
