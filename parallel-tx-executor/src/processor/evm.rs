//! A [`TransactionProcessor`] backed by revm.
//!
//! revm runs against a database adapter that forwards every read to the
//! accumulator, so the touch tracker sees exactly what the EVM loaded. The
//! resulting state diff is written back through the accumulator afterwards.
//!
//! revm credits the beneficiary itself, after the last frame returns. That
//! credit is taken back out of the diff and re-applied through
//! [`WorldStateAccumulator::increment_balance`] once the tracer has run, so a
//! speculative result can still tell a fee credit from a real touch.

use super::{ProcessorConfig, TransactionProcessor};
use crate::error::{ExecutionError, StateError};
use crate::state::{BlockHashLookup, WorldStateAccumulator};
use crate::tracker::RewardTracer;
use crate::types::{
    BlockHeader, FailureReason, ProcessingResult, Transaction, ValidationParams,
};
use alloy_primitives::{Address, B256, U256};
use revm::{
    bytecode::Bytecode,
    context::{
        result::{EVMError, ExecResultAndState, ExecutionResult, HaltReason},
        BlockEnv, ContextTr, TxEnv,
    },
    context_interface::{
        block::BlobExcessGasAndPrice,
        transaction::{AccessList, AccessListItem},
    },
    inspector::JournalExt,
    interpreter::{CallInputs, CallOutcome, CreateInputs, CreateOutcome},
    primitives::{hardfork::SpecId, TxKind},
    state::{AccountInfo, EvmState},
    Context, Database, InspectEvm, Inspector, MainBuilder, MainContext,
};
use tracing::trace;

/// revm view of an accumulator.
struct EvmDatabase<'a> {
    world: &'a mut WorldStateAccumulator,
    block_hashes: &'a dyn BlockHashLookup,
}

impl<'a> EvmDatabase<'a> {
    fn new(world: &'a mut WorldStateAccumulator, block_hashes: &'a dyn BlockHashLookup) -> Self {
        Self {
            world,
            block_hashes,
        }
    }
}

impl Database for EvmDatabase<'_> {
    type Error = StateError;

    fn basic(&mut self, address: Address) -> Result<Option<AccountInfo>, Self::Error> {
        Ok(self
            .world
            .account(address)?
            .map(|account| account.to_account_info()))
    }

    fn code_by_hash(&mut self, code_hash: B256) -> Result<Bytecode, Self::Error> {
        Ok(Bytecode::new_raw(self.world.code_by_hash(code_hash)?))
    }

    fn storage(&mut self, address: Address, index: U256) -> Result<U256, Self::Error> {
        self.world.storage(address, index)
    }

    fn block_hash(&mut self, number: u64) -> Result<B256, Self::Error> {
        self.block_hashes
            .block_hash(number)
            .ok_or(StateError::BlockHashUnavailable(number))
    }
}

/// Records whether the beneficiary was loaded by the time the outermost frame
/// returned, which is before revm pays the reward.
#[derive(Debug)]
struct PreRewardObserver {
    beneficiary: Address,
    depth: usize,
    touched_pre_reward: bool,
}

impl PreRewardObserver {
    fn new(beneficiary: Address) -> Self {
        Self {
            beneficiary,
            depth: 0,
            touched_pre_reward: false,
        }
    }

    fn frame_end<CTX>(&mut self, context: &CTX)
    where
        CTX: ContextTr,
        CTX::Journal: JournalExt,
    {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            self.touched_pre_reward = context
                .journal_ref()
                .evm_state()
                .contains_key(&self.beneficiary);
        }
    }
}

impl<CTX> Inspector<CTX> for PreRewardObserver
where
    CTX: ContextTr,
    CTX::Journal: JournalExt,
{
    fn call(&mut self, _context: &mut CTX, _inputs: &mut CallInputs) -> Option<CallOutcome> {
        self.depth += 1;
        None
    }

    fn call_end(&mut self, context: &mut CTX, _inputs: &CallInputs, _outcome: &mut CallOutcome) {
        self.frame_end(context);
    }

    fn create(&mut self, _context: &mut CTX, _inputs: &mut CreateInputs) -> Option<CreateOutcome> {
        self.depth += 1;
        None
    }

    fn create_end(
        &mut self,
        context: &mut CTX,
        _inputs: &CreateInputs,
        _outcome: &mut CreateOutcome,
    ) {
        self.frame_end(context);
    }
}

/// [`TransactionProcessor`] running the Cancun EVM.
#[derive(Debug, Clone, Default)]
pub struct EvmTransactionProcessor {
    config: ProcessorConfig,
}

impl EvmTransactionProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    fn block_env(header: &BlockHeader, beneficiary: Address, blob_gas_price: U256) -> BlockEnv {
        BlockEnv {
            number: U256::from(header.number),
            beneficiary,
            timestamp: U256::from(header.timestamp),
            gas_limit: header.gas_limit,
            basefee: header.base_fee_per_gas.unwrap_or_default(),
            difficulty: header.difficulty,
            prevrandao: Some(header.mix_hash),
            blob_excess_gas_and_price: Some(BlobExcessGasAndPrice {
                excess_blob_gas: header.excess_blob_gas.unwrap_or_default(),
                blob_gasprice: blob_gas_price.saturating_to(),
            }),
        }
    }

    fn tx_env(transaction: &Transaction, blob_gas_price: U256) -> TxEnv {
        let request = &transaction.request;
        let access_list = request
            .access_list
            .iter()
            .map(|item| AccessListItem {
                address: item.address,
                storage_keys: item.storage_keys.clone(),
            })
            .collect();
        TxEnv {
            tx_type: if request.blob_versioned_hashes.is_empty() { 2 } else { 3 },
            caller: request.sender,
            gas_limit: request.gas_limit,
            gas_price: request.max_fee_per_gas,
            gas_priority_fee: Some(request.max_priority_fee_per_gas),
            kind: request.to.map_or(TxKind::Create, TxKind::Call),
            value: request.value,
            data: request.input.clone(),
            nonce: request.nonce,
            chain_id: Some(request.chain_id),
            access_list: AccessList(access_list),
            blob_hashes: request.blob_versioned_hashes.clone(),
            max_fee_per_blob_gas: blob_gas_price.saturating_to(),
            ..Default::default()
        }
    }

    /// Writes revm's state diff into `world`, minus the fee credit revm paid
    /// to the beneficiary.
    fn apply_state(
        &self,
        world: &mut WorldStateAccumulator,
        state: EvmState,
        beneficiary: Address,
        touched_pre_reward: bool,
        reward: U256,
    ) -> Result<(), StateError> {
        for (address, account) in state {
            if !account.is_touched() {
                continue;
            }
            if address == beneficiary && !touched_pre_reward {
                continue;
            }
            if account.is_selfdestructed() {
                world.delete_account(address)?;
                continue;
            }
            let info = &account.info;
            let balance = if address == beneficiary {
                info.balance.saturating_sub(reward)
            } else {
                info.balance
            };
            world.update_account(address, |current| {
                current.nonce = info.nonce;
                current.balance = balance;
                if current.code_hash != info.code_hash {
                    current.code_hash = info.code_hash;
                    current.code = info
                        .code
                        .as_ref()
                        .map(Bytecode::original_bytes)
                        .unwrap_or_default();
                }
            })?;
            for (slot, value) in account.changed_storage_slots() {
                world.set_storage(address, *slot, value.present_value)?;
            }
            if self.config.clear_empty_accounts {
                world.delete_if_empty(address)?;
            }
        }
        Ok(())
    }
}

impl TransactionProcessor for EvmTransactionProcessor {
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
        if validation.verify_signature
            && self.config.verify_signatures
            && !transaction.verify_signature()
        {
            trace!(hash = %transaction.hash, "invalid signature");
            return Ok(ProcessingResult::invalid("invalid signature"));
        }

        // Loaded by an earlier transaction, or imported from a merged result.
        let beneficiary_known = world.account_update(&beneficiary).is_some()
            || world.tracker().was_touched(&beneficiary);
        let block = Self::block_env(header, beneficiary, blob_gas_price);
        let tx = Self::tx_env(transaction, blob_gas_price);
        let chain_id = self.config.chain_id;
        let check_nonce = validation.check_nonce;

        let (output, touched_pre_reward) = {
            let mut evm = Context::mainnet()
                .with_db(EvmDatabase::new(world, block_hashes))
                .with_block(block)
                .modify_cfg_chained(|cfg| {
                    cfg.chain_id = chain_id;
                    cfg.spec = SpecId::CANCUN;
                    cfg.disable_nonce_check = !check_nonce;
                })
                .build_mainnet_with_inspector(PreRewardObserver::new(beneficiary));
            let output = evm.inspect_tx(tx);
            (output, evm.inspector.touched_pre_reward)
        };

        let ExecResultAndState { result, state } = match output {
            Ok(output) => output,
            Err(EVMError::Transaction(err)) => {
                trace!(hash = %transaction.hash, %err, "invalid transaction");
                return Ok(ProcessingResult::invalid(err.to_string()));
            }
            Err(EVMError::Header(err)) => {
                return Ok(ProcessingResult::invalid(err.to_string()));
            }
            Err(EVMError::Database(err)) => return Err(err.into()),
            Err(EVMError::Custom(err)) => return Err(ExecutionError::Evm(err)),
        };

        let base_fee = u128::from(header.base_fee_per_gas.unwrap_or_default());
        let tip = transaction.effective_gas_price(base_fee).saturating_sub(base_fee);
        let reward = U256::from(result.gas_used()) * U256::from(tip);

        self.apply_state(world, state, beneficiary, touched_pre_reward, reward)?;
        if !touched_pre_reward && !beneficiary_known {
            // Only revm's reward loaded it; forget that read.
            world.remove_account_update(&beneficiary);
        }

        tracer.trace_before_reward(world, transaction, reward);
        if !reward.is_zero() || !self.config.clear_empty_accounts {
            world.increment_balance(beneficiary, reward)?;
        }

        Ok(match result {
            ExecutionResult::Success { gas_used, logs, .. } => {
                ProcessingResult::successful(gas_used, logs)
            }
            ExecutionResult::Revert { gas_used, output } => {
                ProcessingResult::failed(FailureReason::Revert, gas_used, Some(output))
            }
            ExecutionResult::Halt { reason, gas_used } => {
                let reason = match reason {
                    HaltReason::OutOfGas(_) => FailureReason::OutOfGas,
                    HaltReason::CreateCollision => FailureReason::CreateCollision,
                    HaltReason::OutOfFunds => FailureReason::InsufficientBalance,
                    _ => FailureReason::InvalidInstruction,
                };
                trace!(hash = %transaction.hash, %reason, "transaction halted");
                ProcessingResult::failed(reason, gas_used, None)
            }
        })
    }

    fn clear_empty_accounts(&self) -> bool {
        self.config.clear_empty_accounts
    }
}
