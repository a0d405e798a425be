//! Read-only world-state views.

use super::AccountState;
use crate::error::StateError;
use alloy_primitives::{Address, Bytes, B256, U256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Immutable view of the world state at some block.
///
/// Views are shared between the block processor and every speculative
/// execution of the block, so implementations must be safe to read from many
/// threads at once.
pub trait WorldView: Send + Sync + fmt::Debug {
    /// Returns the account at `address`, `None` if it does not exist.
    fn account(&self, address: &Address) -> Result<Option<AccountState>, StateError>;

    /// Returns the value of a storage slot, zero if unset.
    fn storage(&self, address: &Address, slot: &U256) -> Result<U256, StateError>;

    /// Returns the code with hash `code_hash`, `None` if no account holds it.
    fn code_by_hash(&self, code_hash: &B256) -> Result<Option<Bytes>, StateError>;
}

/// Net effect of a block (or a transaction) on the world state.
///
/// Ordered maps keep the representation canonical, so two change sets compare
/// equal exactly when they describe the same transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateChanges {
    /// `None` marks a deleted account.
    pub accounts: BTreeMap<Address, Option<AccountState>>,
    pub storage: BTreeMap<Address, BTreeMap<U256, U256>>,
}

impl StateChanges {
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.storage.is_empty()
    }
}

/// Hash-map backed world state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InMemoryWorldState {
    accounts: HashMap<Address, AccountState>,
    storage: HashMap<Address, HashMap<U256, U256>>,
    contracts: HashMap<B256, Bytes>,
}

impl InMemoryWorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_account(&mut self, address: Address, account: AccountState) {
        if account.has_code() {
            self.contracts
                .insert(account.code_hash, account.code.clone());
        }
        self.accounts.insert(address, account);
    }

    pub fn set_storage(&mut self, address: Address, slot: U256, value: U256) {
        let slots = self.storage.entry(address).or_default();
        if value.is_zero() {
            slots.remove(&slot);
            if slots.is_empty() {
                self.storage.remove(&address);
            }
        } else {
            slots.insert(slot, value);
        }
    }

    pub fn account_state(&self, address: &Address) -> Option<&AccountState> {
        self.accounts.get(address)
    }

    pub fn storage_value(&self, address: &Address, slot: &U256) -> U256 {
        self.storage
            .get(address)
            .and_then(|slots| slots.get(slot))
            .copied()
            .unwrap_or_default()
    }

    pub fn balance(&self, address: &Address) -> U256 {
        self.accounts
            .get(address)
            .map(|account| account.balance)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Returns a new state with `changes` applied on top of this one.
    pub fn apply_changes(&self, changes: &StateChanges) -> Self {
        let mut next = self.clone();
        for (address, account) in &changes.accounts {
            match account {
                Some(account) => next.insert_account(*address, account.clone()),
                None => {
                    next.accounts.remove(address);
                    next.storage.remove(address);
                }
            }
        }
        for (address, slots) in &changes.storage {
            if matches!(changes.accounts.get(address), Some(None)) {
                continue;
            }
            for (slot, value) in slots {
                next.set_storage(*address, *slot, *value);
            }
        }
        next
    }
}

impl WorldView for InMemoryWorldState {
    fn account(&self, address: &Address) -> Result<Option<AccountState>, StateError> {
        Ok(self.accounts.get(address).cloned())
    }

    fn storage(&self, address: &Address, slot: &U256) -> Result<U256, StateError> {
        Ok(self.storage_value(address, slot))
    }

    fn code_by_hash(&self, code_hash: &B256) -> Result<Option<Bytes>, StateError> {
        Ok(self.contracts.get(code_hash).cloned())
    }
}
