//! Blocks as consumed by the block processor.

use alloy_eips::eip7840::BlobParams;
use alloy_primitives::{B256, U256};
use parallel_tx_executor::{BlockHeader, Transaction};

/// A block header with its ordered transactions.
#[derive(Debug, Clone)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    pub fn hash(&self) -> B256 {
        self.header.hash_slow()
    }

    /// Price of one unit of blob gas in this block, under the Cancun schedule.
    pub fn blob_gas_price(&self) -> U256 {
        U256::from(self.header.blob_fee(BlobParams::cancun()).unwrap_or(1))
    }
}
