//! Copy-on-write accumulator of state changes over a [`WorldView`].
//!
//! Every account or slot the accumulator touches is loaded once from the base
//! view and kept as a `(prior, updated)` pair. `prior` is the value in the base
//! view, `updated` the current value. This gives two things at once:
//!
//! - the read set of an execution (every entry, modified or not), used for
//!   collision detection;
//! - the write set (entries where `prior != updated`), used to merge a
//!   speculative execution into the block accumulator.
//!
//! Writes are journaled so an executor can revert a transaction body without
//! losing the fee charged before it. [`WorldStateAccumulator::commit`] drops the
//! journal.

use super::{AccountState, StateChanges, WorldView};
use crate::error::StateError;
use crate::tracker::{Access, AddressTouchTracker};
use alloy_primitives::{Address, Bytes, B256, U256};
use revm::primitives::KECCAK_EMPTY;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

/// Prior and current value of an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountUpdate {
    prior: Option<AccountState>,
    updated: Option<AccountState>,
}

impl AccountUpdate {
    fn unchanged(prior: Option<AccountState>) -> Self {
        Self {
            updated: prior.clone(),
            prior,
        }
    }

    pub fn prior(&self) -> Option<&AccountState> {
        self.prior.as_ref()
    }

    pub fn updated(&self) -> Option<&AccountState> {
        self.updated.as_ref()
    }

    /// Whether the account differs from the base view.
    pub fn is_modified(&self) -> bool {
        self.prior != self.updated
    }
}

/// Prior and current value of a storage slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotUpdate {
    prior: U256,
    updated: U256,
}

impl SlotUpdate {
    fn unchanged(prior: U256) -> Self {
        Self {
            prior,
            updated: prior,
        }
    }

    pub fn prior(&self) -> U256 {
        self.prior
    }

    pub fn updated(&self) -> U256 {
        self.updated
    }

    pub fn is_modified(&self) -> bool {
        self.prior != self.updated
    }
}

#[derive(Debug, Clone)]
enum JournalEntry {
    Account {
        address: Address,
        previous: Option<AccountState>,
    },
    Slot {
        address: Address,
        slot: U256,
        previous: U256,
    },
}

impl JournalEntry {
    fn address(&self) -> &Address {
        match self {
            JournalEntry::Account { address, .. } | JournalEntry::Slot { address, .. } => address,
        }
    }
}

/// Position in the journal to revert to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

/// Copy-on-write overlay of account and storage changes.
#[derive(Debug)]
pub struct WorldStateAccumulator {
    base: Arc<dyn WorldView>,
    accounts: HashMap<Address, AccountUpdate>,
    storage: HashMap<Address, HashMap<U256, SlotUpdate>>,
    tracker: AddressTouchTracker,
    journal: Vec<JournalEntry>,
}

impl WorldStateAccumulator {
    pub fn new(base: Arc<dyn WorldView>) -> Self {
        Self {
            base,
            accounts: HashMap::new(),
            storage: HashMap::new(),
            tracker: AddressTouchTracker::default(),
            journal: Vec::new(),
        }
    }

    /// The view this accumulator was opened on.
    pub fn base(&self) -> &Arc<dyn WorldView> {
        &self.base
    }

    /// Addresses and slots touched through this accumulator.
    pub fn tracker(&self) -> &AddressTouchTracker {
        &self.tracker
    }

    fn load_account(&mut self, address: Address) -> Result<&mut AccountUpdate, StateError> {
        match self.accounts.entry(address) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let prior = self.base.account(&address)?;
                Ok(entry.insert(AccountUpdate::unchanged(prior)))
            }
        }
    }

    fn load_slot(&mut self, address: Address, slot: U256) -> Result<&mut SlotUpdate, StateError> {
        match self.storage.entry(address).or_default().entry(slot) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let prior = self.base.storage(&address, &slot)?;
                Ok(entry.insert(SlotUpdate::unchanged(prior)))
            }
        }
    }

    /// Reads an account, `None` if it does not exist.
    pub fn account(&mut self, address: Address) -> Result<Option<AccountState>, StateError> {
        let account = self.load_account(address)?.updated.clone();
        self.tracker.record_account(address, Access::Read);
        Ok(account)
    }

    /// Reads a storage slot.
    pub fn storage(&mut self, address: Address, slot: U256) -> Result<U256, StateError> {
        let value = self.load_slot(address, slot)?.updated;
        self.tracker.record_slot(address, slot, Access::Read);
        Ok(value)
    }

    /// Applies `f` to the account at `address`, creating an empty account first
    /// if it does not exist.
    pub fn update_account(
        &mut self,
        address: Address,
        f: impl FnOnce(&mut AccountState),
    ) -> Result<(), StateError> {
        let entry = self.load_account(address)?;
        let previous = entry.updated.clone();
        let mut account = previous.clone().unwrap_or_default();
        f(&mut account);
        entry.updated = Some(account);
        self.journal.push(JournalEntry::Account { address, previous });
        self.tracker.record_account(address, Access::Write);
        Ok(())
    }

    pub fn increment_balance(&mut self, address: Address, amount: U256) -> Result<(), StateError> {
        self.update_account(address, |account| {
            account.balance = account.balance.saturating_add(amount)
        })
    }

    pub fn set_storage(&mut self, address: Address, slot: U256, value: U256) -> Result<(), StateError> {
        let entry = self.load_slot(address, slot)?;
        let previous = entry.updated;
        entry.updated = value;
        self.journal.push(JournalEntry::Slot {
            address,
            slot,
            previous,
        });
        self.tracker.record_slot(address, slot, Access::Write);
        Ok(())
    }

    pub fn delete_account(&mut self, address: Address) -> Result<(), StateError> {
        let entry = self.load_account(address)?;
        let previous = entry.updated.take();
        self.journal.push(JournalEntry::Account { address, previous });
        self.tracker.record_account(address, Access::Write);
        Ok(())
    }

    /// Deletes the account if it exists and is empty (EIP-161 touch semantics).
    pub fn delete_if_empty(&mut self, address: Address) -> Result<(), StateError> {
        if self.account(address)?.is_some_and(|account| account.is_empty()) {
            self.delete_account(address)?;
        }
        Ok(())
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.journal.len())
    }

    /// Undoes every write made after `checkpoint`. Reads stay recorded.
    pub fn revert_to(&mut self, checkpoint: Checkpoint) {
        while self.journal.len() > checkpoint.0 {
            let Some(entry) = self.journal.pop() else {
                break;
            };
            match entry {
                JournalEntry::Account { address, previous } => {
                    if let Some(update) = self.accounts.get_mut(&address) {
                        update.updated = previous;
                    }
                }
                JournalEntry::Slot {
                    address,
                    slot,
                    previous,
                } => {
                    if let Some(update) = self.storage.get_mut(&address).and_then(|slots| slots.get_mut(&slot)) {
                        update.updated = previous;
                    }
                }
            }
        }
    }

    /// Makes all journaled writes final.
    pub fn commit(&mut self) {
        self.journal.clear();
    }

    /// Forgets everything known about `address`, as if it was never touched.
    pub fn remove_account_update(&mut self, address: &Address) {
        self.accounts.remove(address);
        self.storage.remove(address);
        self.tracker.forget(address);
        self.journal.retain(|entry| entry.address() != address);
    }

    /// Looks up code by hash, first among loaded accounts, then in the base view.
    pub fn code_by_hash(&self, code_hash: B256) -> Result<Bytes, StateError> {
        if code_hash == KECCAK_EMPTY {
            return Ok(Bytes::new());
        }
        if let Some(account) = self
            .accounts
            .values()
            .filter_map(AccountUpdate::updated)
            .find(|account| account.code_hash == code_hash)
        {
            return Ok(account.code.clone());
        }
        self.base
            .code_by_hash(&code_hash)?
            .ok_or(StateError::CodeUnavailable(code_hash))
    }

    pub fn account_update(&self, address: &Address) -> Option<&AccountUpdate> {
        self.accounts.get(address)
    }

    pub fn slot_update(&self, address: &Address, slot: &U256) -> Option<&SlotUpdate> {
        self.storage.get(address).and_then(|slots| slots.get(slot))
    }

    /// Merges the changes of `source`, an accumulator opened on the same base
    /// view, into this one.
    ///
    /// Modified entries overwrite the current value. Unmodified entries are
    /// only added when this accumulator has not loaded them yet, which keeps
    /// them available as cached reads. Imports are not journaled.
    pub fn import_state_changes_from_source(&mut self, source: &WorldStateAccumulator) {
        for (address, update) in &source.accounts {
            match self.accounts.entry(*address) {
                Entry::Occupied(mut entry) => {
                    if update.is_modified() {
                        entry.get_mut().updated = update.updated.clone();
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(update.clone());
                }
            }
            let access = if update.is_modified() {
                Access::Write
            } else {
                Access::Read
            };
            self.tracker.record_account(*address, access);
        }
        for (address, slots) in &source.storage {
            let target = self.storage.entry(*address).or_default();
            for (slot, update) in slots {
                match target.entry(*slot) {
                    Entry::Occupied(mut entry) => {
                        if update.is_modified() {
                            entry.get_mut().updated = update.updated;
                        }
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(*update);
                    }
                }
                let access = if update.is_modified() {
                    Access::Write
                } else {
                    Access::Read
                };
                self.tracker.record_slot(*address, *slot, access);
            }
        }
    }

    /// Copies the prior values `source` loaded for entries this accumulator has
    /// not loaded yet, without any of its writes.
    pub fn import_prior_state_from_source(&mut self, source: &WorldStateAccumulator) {
        for (address, update) in &source.accounts {
            self.accounts
                .entry(*address)
                .or_insert_with(|| AccountUpdate::unchanged(update.prior.clone()));
        }
        for (address, slots) in &source.storage {
            let target = self.storage.entry(*address).or_default();
            for (slot, update) in slots {
                target
                    .entry(*slot)
                    .or_insert_with(|| SlotUpdate::unchanged(update.prior));
            }
        }
    }

    /// Net changes against the base view.
    pub fn state_changes(&self) -> StateChanges {
        let mut changes = StateChanges::default();
        for (address, update) in &self.accounts {
            if update.is_modified() {
                changes.accounts.insert(*address, update.updated.clone());
            }
        }
        for (address, slots) in &self.storage {
            for (slot, update) in slots {
                if update.is_modified() {
                    changes
                        .storage
                        .entry(*address)
                        .or_default()
                        .insert(*slot, update.updated);
                }
            }
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InMemoryWorldState;

    fn alice() -> Address {
        Address::repeat_byte(0xa1)
    }

    fn bob() -> Address {
        Address::repeat_byte(0xb0)
    }

    fn base() -> Arc<dyn WorldView> {
        let mut state = InMemoryWorldState::new();
        state.insert_account(alice(), AccountState::new(0, U256::from(1_000)));
        state.set_storage(bob(), U256::from(1), U256::from(10));
        Arc::new(state)
    }

    #[test]
    fn test_reads_record_prior_values() {
        let mut acc = WorldStateAccumulator::new(base());
        assert_eq!(acc.account(alice()).unwrap().unwrap().balance, U256::from(1_000));
        assert_eq!(acc.storage(bob(), U256::from(1)).unwrap(), U256::from(10));
        assert!(acc.account(bob()).unwrap().is_none());

        let update = acc.account_update(&alice()).unwrap();
        assert!(!update.is_modified());
        assert!(acc.slot_update(&bob(), &U256::from(1)).is_some());
        assert!(acc.state_changes().is_empty());
        assert!(acc.tracker().was_read(&alice()));
        assert!(!acc.tracker().was_written(&alice()));
    }

    #[test]
    fn test_update_creates_missing_account() {
        let mut acc = WorldStateAccumulator::new(base());
        acc.increment_balance(bob(), U256::from(5)).unwrap();

        let update = acc.account_update(&bob()).unwrap();
        assert!(update.prior().is_none());
        assert_eq!(update.updated().unwrap().balance, U256::from(5));
        assert!(acc.tracker().was_written(&bob()));
    }

    #[test]
    fn test_revert_to_checkpoint() {
        let mut acc = WorldStateAccumulator::new(base());
        acc.update_account(alice(), |a| a.nonce += 1).unwrap();
        let checkpoint = acc.checkpoint();
        acc.increment_balance(alice(), U256::from(1)).unwrap();
        acc.set_storage(bob(), U256::from(1), U256::from(11)).unwrap();

        acc.revert_to(checkpoint);

        let alice_state = acc.account(alice()).unwrap().unwrap();
        assert_eq!(alice_state.nonce, 1);
        assert_eq!(alice_state.balance, U256::from(1_000));
        assert_eq!(acc.storage(bob(), U256::from(1)).unwrap(), U256::from(10));
        // The slot stays in the read set.
        assert!(acc.slot_update(&bob(), &U256::from(1)).is_some());
    }

    #[test]
    fn test_delete_if_empty() {
        let mut acc = WorldStateAccumulator::new(base());
        acc.increment_balance(bob(), U256::ZERO).unwrap();
        acc.delete_if_empty(bob()).unwrap();
        // Created and deleted within the same accumulator: no net change.
        assert!(!acc.account_update(&bob()).unwrap().is_modified());

        acc.delete_if_empty(alice()).unwrap();
        assert!(acc.account(alice()).unwrap().is_some());
    }

    #[test]
    fn test_import_state_changes() {
        let base = base();
        let mut block = WorldStateAccumulator::new(base.clone());
        let mut tx = WorldStateAccumulator::new(base);
        tx.update_account(alice(), |a| {
            a.nonce = 1;
            a.balance -= U256::from(100);
        })
        .unwrap();
        tx.storage(bob(), U256::from(1)).unwrap();
        tx.set_storage(bob(), U256::from(2), U256::from(3)).unwrap();
        tx.commit();

        block.import_state_changes_from_source(&tx);

        let changes = block.state_changes();
        assert_eq!(changes, tx.state_changes());
        assert_eq!(changes.accounts[&alice()].as_ref().unwrap().nonce, 1);
        // Read-only slot is cached, not changed.
        assert!(!block.slot_update(&bob(), &U256::from(1)).unwrap().is_modified());
    }

    #[test]
    fn test_import_prior_state_drops_writes() {
        let base = base();
        let mut block = WorldStateAccumulator::new(base.clone());
        block.increment_balance(alice(), U256::from(1)).unwrap();

        let mut tx = WorldStateAccumulator::new(base);
        tx.increment_balance(alice(), U256::from(50)).unwrap();
        tx.set_storage(bob(), U256::from(1), U256::from(99)).unwrap();

        block.import_prior_state_from_source(&tx);

        // Existing entries win, new entries only carry the prior value.
        assert_eq!(
            block.account(alice()).unwrap().unwrap().balance,
            U256::from(1_001)
        );
        assert_eq!(block.storage(bob(), U256::from(1)).unwrap(), U256::from(10));
        assert_eq!(block.state_changes().accounts.len(), 1);
    }

    #[test]
    fn test_remove_account_update() {
        let mut acc = WorldStateAccumulator::new(base());
        acc.increment_balance(bob(), U256::from(7)).unwrap();
        acc.remove_account_update(&bob());

        assert!(acc.account_update(&bob()).is_none());
        assert!(!acc.tracker().was_touched(&bob()));
        assert!(acc.state_changes().is_empty());
    }

    #[test]
    fn test_code_by_hash() {
        let contract = Address::repeat_byte(0xcc);
        let deployed = AccountState::with_code(Bytes::from_static(&[0x60, 0x00]));
        let mut state = InMemoryWorldState::new();
        state.insert_account(contract, deployed.clone());
        let mut acc = WorldStateAccumulator::new(Arc::new(state));

        // Served from the base view without loading the account.
        assert_eq!(acc.code_by_hash(deployed.code_hash).unwrap(), deployed.code);
        assert!(acc.account_update(&contract).is_none());

        let created = AccountState::with_code(Bytes::from_static(&[0x60, 0x01]));
        acc.update_account(alice(), |account| *account = created.clone())
            .unwrap();
        assert_eq!(acc.code_by_hash(created.code_hash).unwrap(), created.code);
        assert_eq!(acc.code_by_hash(KECCAK_EMPTY).unwrap(), Bytes::new());
        assert_eq!(
            acc.code_by_hash(B256::repeat_byte(0x42)),
            Err(StateError::CodeUnavailable(B256::repeat_byte(0x42)))
        );
    }
}
