//! A small deterministic transaction executor.
//!
//! It implements the parts of Ethereum execution that matter for scheduling:
//! fee charging and refunds, nonces, value transfers, contract creation, the
//! beneficiary reward and EIP-161 account clearing. Calls into contracts run a
//! tiny storage instruction stream carried in the transaction input:
//!
//! | opcode | operand   | effect                                        |
//! |--------|-----------|-----------------------------------------------|
//! | `0x01` | 32-byte slot | increment the slot, emit a log             |
//! | `0x02` | 32-byte slot | read the slot                              |
//! | `0x40` | 32-byte slot | store the parent block hash in the slot    |
//! | `0xfd` | revert data  | revert with the remaining bytes            |
//!
//! Any other opcode consumes all gas.

use super::{ProcessorConfig, TransactionProcessor};
use crate::error::ExecutionError;
use crate::state::{AccountState, BlockHashLookup, WorldStateAccumulator};
use crate::tracker::RewardTracer;
use crate::types::{
    BlockHeader, FailureReason, ProcessingResult, Transaction, ValidationParams,
};
use alloy_primitives::{Address, Bytes, Log, B256, U256};
use tracing::trace;

const TX_BASE_GAS: u64 = 21_000;
const TX_CREATE_GAS: u64 = 32_000;
const TX_DATA_BYTE_GAS: u64 = 16;
const ACCESS_LIST_ADDRESS_GAS: u64 = 2_400;
const ACCESS_LIST_STORAGE_KEY_GAS: u64 = 1_900;
const SLOAD_GAS: u64 = 2_100;
const SSTORE_GAS: u64 = 20_000;
const LOG_GAS: u64 = 375;
const BLOCKHASH_GAS: u64 = 20;

/// Blob gas consumed by one blob (EIP-4844).
pub const GAS_PER_BLOB: u64 = 131_072;

const OP_INCREMENT: u8 = 0x01;
const OP_READ: u8 = 0x02;
const OP_BLOCKHASH: u8 = 0x40;
const OP_REVERT: u8 = 0xfd;

/// Reference [`TransactionProcessor`].
#[derive(Debug, Clone, Default)]
pub struct SimpleTransactionProcessor {
    config: ProcessorConfig,
}

/// How the body of a transaction ended.
struct BodyOutcome {
    gas_used: u64,
    result: Result<Vec<Log>, (FailureReason, Option<Bytes>)>,
}

impl SimpleTransactionProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Gas charged before any execution.
    pub fn intrinsic_gas(transaction: &Transaction) -> u64 {
        let mut gas = TX_BASE_GAS;
        if transaction.to().is_none() {
            gas += TX_CREATE_GAS;
        }
        gas += transaction.input().len() as u64 * TX_DATA_BYTE_GAS;
        for item in transaction.access_list() {
            gas += ACCESS_LIST_ADDRESS_GAS;
            gas += item.storage_keys.len() as u64 * ACCESS_LIST_STORAGE_KEY_GAS;
        }
        gas
    }

    /// Checks that need only the transaction and the block.
    fn validate_static(
        &self,
        header: &BlockHeader,
        transaction: &Transaction,
        validation: ValidationParams,
    ) -> Option<String> {
        let request = &transaction.request;
        let base_fee = u128::from(header.base_fee_per_gas.unwrap_or_default());
        if validation.verify_signature
            && self.config.verify_signatures
            && !transaction.verify_signature()
        {
            return Some("invalid signature".to_string());
        }
        if request.chain_id != self.config.chain_id {
            return Some(format!(
                "wrong chain id: expected {}, got {}",
                self.config.chain_id, request.chain_id
            ));
        }
        if request.max_fee_per_gas < base_fee {
            return Some(format!(
                "max fee per gas {} below base fee {}",
                request.max_fee_per_gas, base_fee
            ));
        }
        if request.max_priority_fee_per_gas > request.max_fee_per_gas {
            return Some("max priority fee per gas above max fee per gas".to_string());
        }
        if !request.blob_versioned_hashes.is_empty() && request.to.is_none() {
            return Some("blob transaction cannot create a contract".to_string());
        }
        let intrinsic = Self::intrinsic_gas(transaction);
        if intrinsic > request.gas_limit {
            return Some(format!(
                "intrinsic gas {} exceeds gas limit {}",
                intrinsic, request.gas_limit
            ));
        }
        None
    }

    fn execute_body(
        &self,
        world: &mut WorldStateAccumulator,
        header: &BlockHeader,
        transaction: &Transaction,
        sender_nonce: u64,
        block_hashes: &dyn BlockHashLookup,
    ) -> Result<BodyOutcome, ExecutionError> {
        let mut gas_used = Self::intrinsic_gas(transaction);
        let sender = transaction.sender();
        let value = transaction.value();

        let Some(to) = transaction.to() else {
            let created = sender.create(sender_nonce);
            if world
                .account(created)?
                .is_some_and(|account| account.nonce != 0 || account.has_code())
            {
                return Ok(BodyOutcome {
                    gas_used: transaction.gas_limit(),
                    result: Err((FailureReason::CreateCollision, None)),
                });
            }
            let code = transaction.input().clone();
            world.update_account(sender, |account| {
                account.balance = account.balance.saturating_sub(value)
            })?;
            world.update_account(created, |account| {
                let balance = account.balance.saturating_add(value);
                *account = AccountState::with_code(code);
                account.balance = balance;
            })?;
            return Ok(BodyOutcome {
                gas_used,
                result: Ok(Vec::new()),
            });
        };

        world.update_account(sender, |account| {
            account.balance = account.balance.saturating_sub(value)
        })?;
        world.increment_balance(to, value)?;

        let has_code = world.account(to)?.is_some_and(|account| account.has_code());
        if !has_code {
            return Ok(BodyOutcome {
                gas_used,
                result: Ok(Vec::new()),
            });
        }

        let gas_limit = transaction.gas_limit();
        let input = transaction.input();
        let mut logs = Vec::new();
        let mut pc = 0;
        while pc < input.len() {
            let opcode = input[pc];
            if opcode == OP_REVERT {
                let data = Bytes::copy_from_slice(&input[pc + 1..]);
                return Ok(BodyOutcome {
                    gas_used,
                    result: Err((FailureReason::Revert, Some(data))),
                });
            }
            let cost = match opcode {
                OP_INCREMENT => SLOAD_GAS + SSTORE_GAS + LOG_GAS,
                OP_READ => SLOAD_GAS,
                OP_BLOCKHASH => BLOCKHASH_GAS + SSTORE_GAS,
                _ => {
                    return Ok(BodyOutcome {
                        gas_used: gas_limit,
                        result: Err((FailureReason::InvalidInstruction, None)),
                    })
                }
            };
            let Some(operand) = input.get(pc + 1..pc + 33) else {
                return Ok(BodyOutcome {
                    gas_used: gas_limit,
                    result: Err((FailureReason::InvalidInstruction, None)),
                });
            };
            gas_used += cost;
            if gas_used > gas_limit {
                return Ok(BodyOutcome {
                    gas_used: gas_limit,
                    result: Err((FailureReason::OutOfGas, None)),
                });
            }
            let slot = U256::from_be_slice(operand);
            match opcode {
                OP_INCREMENT => {
                    let value = world.storage(to, slot)?.wrapping_add(U256::from(1));
                    world.set_storage(to, slot, value)?;
                    logs.push(Log::new_unchecked(
                        to,
                        vec![B256::from(slot.to_be_bytes::<32>())],
                        Bytes::copy_from_slice(&value.to_be_bytes::<32>()),
                    ));
                }
                OP_READ => {
                    world.storage(to, slot)?;
                }
                _ => {
                    let parent_hash = header
                        .number
                        .checked_sub(1)
                        .and_then(|number| block_hashes.block_hash(number))
                        .unwrap_or_default();
                    world.set_storage(to, slot, U256::from_be_bytes(parent_hash.0))?;
                }
            }
            pc += 33;
        }

        Ok(BodyOutcome {
            gas_used,
            result: Ok(logs),
        })
    }
}

impl TransactionProcessor for SimpleTransactionProcessor {
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
    ) -> Result<ProcessingResult, ExecutionError> {
        if let Some(reason) = self.validate_static(header, transaction, validation) {
            trace!(hash = %transaction.hash, %reason, "invalid transaction");
            return Ok(ProcessingResult::invalid(reason));
        }

        let sender = transaction.sender();
        let sender_account = world.account(sender)?.unwrap_or_default();
        if validation.check_nonce && sender_account.nonce != transaction.nonce() {
            return Ok(ProcessingResult::invalid(format!(
                "nonce mismatch: expected {}, got {}",
                sender_account.nonce,
                transaction.nonce()
            )));
        }
        if sender_account.has_code() {
            return Ok(ProcessingResult::invalid("sender is not an externally owned account"));
        }

        let base_fee = u128::from(header.base_fee_per_gas.unwrap_or_default());
        let gas_limit = transaction.gas_limit();
        let blob_count = transaction.request.blob_versioned_hashes.len() as u64;
        let blob_fee = blob_gas_price.saturating_mul(U256::from(GAS_PER_BLOB * blob_count));
        let max_cost = (U256::from(gas_limit) * U256::from(transaction.request.max_fee_per_gas))
            .saturating_add(transaction.value())
            .saturating_add(blob_fee);
        if sender_account.balance < max_cost {
            return Ok(ProcessingResult::invalid(format!(
                "insufficient balance: have {}, need {}",
                sender_account.balance, max_cost
            )));
        }

        let price = transaction.effective_gas_price(base_fee);
        let upfront = U256::from(gas_limit) * U256::from(price) + blob_fee;
        world.update_account(sender, |account| {
            account.balance = account.balance.saturating_sub(upfront);
            account.nonce += 1;
        })?;

        let checkpoint = world.checkpoint();
        let outcome =
            self.execute_body(world, header, transaction, sender_account.nonce, block_hashes)?;
        let result = match outcome.result {
            Ok(logs) => {
                if self.config.clear_empty_accounts {
                    let target = transaction
                        .to()
                        .unwrap_or_else(|| sender.create(sender_account.nonce));
                    world.delete_if_empty(target)?;
                }
                ProcessingResult::successful(outcome.gas_used, logs)
            }
            Err((reason, revert_reason)) => {
                world.revert_to(checkpoint);
                trace!(hash = %transaction.hash, %reason, "transaction failed");
                ProcessingResult::failed(reason, outcome.gas_used, revert_reason)
            }
        };

        let refund = U256::from(gas_limit - outcome.gas_used) * U256::from(price);
        world.increment_balance(sender, refund)?;

        let reward = U256::from(outcome.gas_used) * U256::from(price - base_fee);
        tracer.trace_before_reward(world, transaction, reward);
        if !reward.is_zero() || !self.config.clear_empty_accounts {
            world.increment_balance(beneficiary, reward)?;
        }

        Ok(result)
    }

    fn clear_empty_accounts(&self) -> bool {
        self.config.clear_empty_accounts
    }
}
