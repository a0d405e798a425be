//! Core types shared by the orchestrator, the collision detector and executors.

use alloy_primitives::{keccak256, Address, Bytes, Log, Signature, B256, U256};
use std::fmt;

/// Transaction index in the block (0-based).
pub type TxnIndex = usize;

/// Header of the block being processed.
pub type BlockHeader = alloy_consensus::Header;

/// An EIP-2930 access list entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccessListItem {
    pub address: Address,
    pub storage_keys: Vec<B256>,
}

/// The signed part of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransactionRequest {
    pub chain_id: u64,
    pub nonce: u64,
    /// Claimed sender; checked against the recovered signer when signatures are verified.
    pub sender: Address,
    /// Recipient, `None` for contract creation.
    pub to: Option<Address>,
    pub value: U256,
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
    pub input: Bytes,
    pub access_list: Vec<AccessListItem>,
    pub blob_versioned_hashes: Vec<B256>,
}

impl TransactionRequest {
    /// Computes the hash that is signed.
    pub fn signing_hash(&self) -> B256 {
        let mut data = Vec::with_capacity(256 + self.input.len());
        data.extend_from_slice(&self.chain_id.to_be_bytes());
        data.extend_from_slice(&self.nonce.to_be_bytes());
        data.extend_from_slice(self.sender.as_slice());
        match self.to {
            Some(to) => {
                data.push(1);
                data.extend_from_slice(to.as_slice());
            }
            None => data.push(0),
        }
        data.extend_from_slice(&self.value.to_be_bytes::<32>());
        data.extend_from_slice(&self.gas_limit.to_be_bytes());
        data.extend_from_slice(&self.max_fee_per_gas.to_be_bytes());
        data.extend_from_slice(&self.max_priority_fee_per_gas.to_be_bytes());
        data.extend_from_slice(&(self.input.len() as u64).to_be_bytes());
        data.extend_from_slice(&self.input);
        for item in &self.access_list {
            data.extend_from_slice(item.address.as_slice());
            for key in &item.storage_keys {
                data.extend_from_slice(key.as_slice());
            }
        }
        for hash in &self.blob_versioned_hashes {
            data.extend_from_slice(hash.as_slice());
        }
        keccak256(&data)
    }

    /// Attaches a signature over [`Self::signing_hash`].
    pub fn into_signed(self, signature: Signature) -> Transaction {
        let hash = self.signing_hash();
        Transaction {
            request: self,
            signature,
            hash,
        }
    }
}

/// A signed transaction ready for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub request: TransactionRequest,
    pub signature: Signature,
    /// The hash of the transaction data that was signed.
    pub hash: B256,
}

impl Transaction {
    pub fn sender(&self) -> Address {
        self.request.sender
    }

    pub fn to(&self) -> Option<Address> {
        self.request.to
    }

    pub fn nonce(&self) -> u64 {
        self.request.nonce
    }

    pub fn value(&self) -> U256 {
        self.request.value
    }

    pub fn gas_limit(&self) -> u64 {
        self.request.gas_limit
    }

    pub fn input(&self) -> &Bytes {
        &self.request.input
    }

    pub fn access_list(&self) -> &[AccessListItem] {
        &self.request.access_list
    }

    /// Recovers the signer address from the signature.
    pub fn recover_signer(&self) -> Option<Address> {
        self.signature.recover_address_from_prehash(&self.hash).ok()
    }

    /// Verifies the signature matches the claimed sender.
    pub fn verify_signature(&self) -> bool {
        self.recover_signer()
            .map(|addr| addr == self.request.sender)
            .unwrap_or(false)
    }

    /// Gas price actually paid per unit of gas under the given base fee.
    pub fn effective_gas_price(&self, base_fee: u128) -> u128 {
        self.request
            .max_fee_per_gas
            .min(base_fee.saturating_add(self.request.max_priority_fee_per_gas))
    }
}

/// Why a transaction did not run to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Executed and all effects kept.
    Successful,
    /// Executed but the body was reverted; fees and nonce still apply.
    Failed { reason: FailureReason },
    /// Rejected by validation; no state was touched.
    Invalid { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Revert,
    OutOfGas,
    InsufficientBalance,
    CreateCollision,
    InvalidInstruction,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Revert => write!(f, "execution reverted"),
            FailureReason::OutOfGas => write!(f, "out of gas"),
            FailureReason::InsufficientBalance => write!(f, "insufficient balance for transfer"),
            FailureReason::CreateCollision => write!(f, "contract address collision"),
            FailureReason::InvalidInstruction => write!(f, "invalid instruction"),
        }
    }
}

/// Outcome of processing one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingResult {
    pub status: TransactionStatus,
    pub gas_used: u64,
    pub logs: Vec<Log>,
    pub revert_reason: Option<Bytes>,
    /// Set when the result was taken from a speculative execution.
    pub processed_in_parallel: bool,
}

impl ProcessingResult {
    pub fn successful(gas_used: u64, logs: Vec<Log>) -> Self {
        Self {
            status: TransactionStatus::Successful,
            gas_used,
            logs,
            revert_reason: None,
            processed_in_parallel: false,
        }
    }

    pub fn failed(reason: FailureReason, gas_used: u64, revert_reason: Option<Bytes>) -> Self {
        Self {
            status: TransactionStatus::Failed { reason },
            gas_used,
            logs: Vec::new(),
            revert_reason,
            processed_in_parallel: false,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            status: TransactionStatus::Invalid {
                reason: reason.into(),
            },
            gas_used: 0,
            logs: Vec::new(),
            revert_reason: None,
            processed_in_parallel: false,
        }
    }

    pub fn is_successful(&self) -> bool {
        matches!(self.status, TransactionStatus::Successful)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self.status, TransactionStatus::Invalid { .. })
    }

    /// The validation error, if the transaction was rejected.
    pub fn invalid_reason(&self) -> Option<&str> {
        match &self.status {
            TransactionStatus::Invalid { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Which checks the executor applies before running a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationParams {
    pub verify_signature: bool,
    pub check_nonce: bool,
}

impl ValidationParams {
    /// Full validation, as required for transactions included in a block.
    pub fn processing_block() -> Self {
        Self {
            verify_signature: true,
            check_nonce: true,
        }
    }
}

impl Default for ValidationParams {
    fn default() -> Self {
        Self::processing_block()
    }
}
