//! World state: account model, read-only views, the copy-on-write accumulator
//! and the archive that hands out per-block snapshots.

mod accumulator;
mod archive;
mod view;

pub use accumulator::{AccountUpdate, Checkpoint, SlotUpdate, WorldStateAccumulator};
pub use archive::{BlockHashLookup, InMemoryWorldStateArchive, WorldStateProvider};
pub use view::{InMemoryWorldState, StateChanges, WorldView};

use alloy_primitives::{keccak256, Bytes, B256, U256};
use revm::{bytecode::Bytecode, primitives::KECCAK_EMPTY, state::AccountInfo};

/// Account state in the world state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountState {
    pub nonce: u64,
    pub balance: U256,
    pub code_hash: B256,
    pub code: Bytes,
}

impl AccountState {
    pub fn new(nonce: u64, balance: U256) -> Self {
        Self {
            nonce,
            balance,
            ..Default::default()
        }
    }

    /// A contract account holding `code`.
    pub fn with_code(code: Bytes) -> Self {
        Self {
            nonce: 1,
            balance: U256::ZERO,
            code_hash: keccak256(&code),
            code,
        }
    }

    pub fn has_code(&self) -> bool {
        self.code_hash != KECCAK_EMPTY
    }

    /// Empty in the EIP-161 sense: no nonce, no balance, no code.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && !self.has_code()
    }

    /// Converts to the account representation used by revm.
    pub fn to_account_info(&self) -> AccountInfo {
        AccountInfo::new(
            self.balance,
            self.nonce,
            self.code_hash,
            Bytecode::new_raw(self.code.clone()),
        )
    }
}

impl Default for AccountState {
    fn default() -> Self {
        Self {
            nonce: 0,
            balance: U256::ZERO,
            code_hash: KECCAK_EMPTY,
            code: Bytes::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_account() {
        assert!(AccountState::default().is_empty());
        assert!(!AccountState::new(1, U256::ZERO).is_empty());
        assert!(!AccountState::new(0, U256::from(1)).is_empty());

        let contract = AccountState::with_code(Bytes::from_static(&[0x00]));
        assert!(contract.has_code());
        assert!(!contract.is_empty());
    }

    #[test]
    fn test_to_account_info() {
        let account = AccountState::new(3, U256::from(77));
        let info = account.to_account_info();
        assert_eq!(info.nonce, 3);
        assert_eq!(info.balance, U256::from(77));
        assert_eq!(info.code_hash, KECCAK_EMPTY);
    }
}
