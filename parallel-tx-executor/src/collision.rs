//! Read/write conflict detection between a speculative execution and the
//! block accumulator.

use crate::context::TransactionContext;
use crate::state::WorldStateAccumulator;
use crate::types::Transaction;
use alloy_primitives::{Address, U256};
use std::collections::BTreeSet;
use std::fmt;

/// A value a speculative execution depended on that changed before its commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collision {
    Account(Address),
    Slot { address: Address, slot: U256 },
}

impl fmt::Display for Collision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Collision::Account(address) => write!(f, "account {address}"),
            Collision::Slot { address, slot } => write!(f, "slot {slot} of {address}"),
        }
    }
}

/// Decides whether a speculative result is still valid at commit time.
///
/// Both the speculative accumulator and the block accumulator are opened on
/// the same pre-block snapshot, so "changed by an earlier transaction" is
/// simply "modified in the block accumulator".
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionCollisionDetector;

impl TransactionCollisionDetector {
    /// Addresses a transaction may depend on: sender, recipient, access list
    /// entries and, when an accumulator is given, every account it accessed.
    pub fn addresses_touched_by_transaction(
        &self,
        transaction: &Transaction,
        accumulator: Option<&WorldStateAccumulator>,
    ) -> BTreeSet<Address> {
        let mut addresses = BTreeSet::new();
        addresses.insert(transaction.sender());
        if let Some(to) = transaction.to() {
            addresses.insert(to);
        }
        addresses.extend(transaction.access_list().iter().map(|item| item.address));
        if let Some(accumulator) = accumulator {
            addresses.extend(accumulator.tracker().touched_addresses());
        }
        addresses
    }

    /// Returns the first value touched by the speculative execution in
    /// `context` that `block` has modified.
    ///
    /// The beneficiary is skipped when only the reward touched it; its entry
    /// was dropped from the speculative accumulator and the reward is merged
    /// separately.
    pub fn detect_collision(
        &self,
        transaction: &Transaction,
        beneficiary: Address,
        context: &TransactionContext,
        block: &WorldStateAccumulator,
    ) -> Option<Collision> {
        let speculative = context.accumulator();
        for address in self.addresses_touched_by_transaction(transaction, Some(speculative)) {
            if address == beneficiary && !context.beneficiary_touched_pre_reward() {
                continue;
            }
            if block
                .account_update(&address)
                .is_some_and(|update| update.is_modified())
            {
                return Some(Collision::Account(address));
            }
            for slot in speculative.tracker().touched_slots(&address) {
                if block
                    .slot_update(&address, slot)
                    .is_some_and(|update| update.is_modified())
                {
                    return Some(Collision::Slot {
                        address,
                        slot: *slot,
                    });
                }
            }
        }
        None
    }

    pub fn has_collision(
        &self,
        transaction: &Transaction,
        beneficiary: Address,
        context: &TransactionContext,
        block: &WorldStateAccumulator,
    ) -> bool {
        self.detect_collision(transaction, beneficiary, context, block)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AccountState, InMemoryWorldState, WorldView};
    use crate::types::{AccessListItem, ProcessingResult, TransactionRequest};
    use alloy_primitives::Signature;
    use std::sync::Arc;

    const SENDER: Address = Address::repeat_byte(0x01);
    const RECIPIENT: Address = Address::repeat_byte(0x02);
    const OTHER: Address = Address::repeat_byte(0x03);
    const BENEFICIARY: Address = Address::repeat_byte(0xbe);

    fn base() -> Arc<dyn WorldView> {
        let mut state = InMemoryWorldState::new();
        state.insert_account(SENDER, AccountState::new(0, U256::from(1_000)));
        state.insert_account(OTHER, AccountState::new(0, U256::from(1_000)));
        state.insert_account(BENEFICIARY, AccountState::new(0, U256::from(1)));
        Arc::new(state)
    }

    fn transaction(to: Address, access_list: Vec<AccessListItem>) -> Transaction {
        TransactionRequest {
            sender: SENDER,
            to: Some(to),
            access_list,
            ..Default::default()
        }
        .into_signed(Signature::new(U256::from(1), U256::from(1), false))
    }

    fn context(accumulator: WorldStateAccumulator, touched_pre_reward: bool) -> TransactionContext {
        TransactionContext::new(
            0,
            accumulator,
            ProcessingResult::successful(21_000, vec![]),
            U256::from(10),
            touched_pre_reward,
        )
    }

    #[test]
    fn test_touched_addresses() {
        let tx = transaction(
            RECIPIENT,
            vec![AccessListItem {
                address: OTHER,
                storage_keys: vec![],
            }],
        );
        let detector = TransactionCollisionDetector;
        assert_eq!(
            detector.addresses_touched_by_transaction(&tx, None),
            BTreeSet::from([SENDER, RECIPIENT, OTHER])
        );

        let mut acc = WorldStateAccumulator::new(base());
        acc.storage(BENEFICIARY, U256::from(1)).unwrap();
        assert!(detector
            .addresses_touched_by_transaction(&tx, Some(&acc))
            .contains(&BENEFICIARY));
    }

    #[test]
    fn test_read_after_write_collides() {
        let base = base();
        let mut speculative = WorldStateAccumulator::new(base.clone());
        speculative.account(OTHER).unwrap();
        let ctx = context(speculative, false);

        let mut block = WorldStateAccumulator::new(base);
        let tx = transaction(RECIPIENT, vec![]);
        let detector = TransactionCollisionDetector;
        assert!(!detector.has_collision(&tx, BENEFICIARY, &ctx, &block));

        block.increment_balance(OTHER, U256::from(1)).unwrap();
        assert_eq!(
            detector.detect_collision(&tx, BENEFICIARY, &ctx, &block),
            Some(Collision::Account(OTHER))
        );
    }

    #[test]
    fn test_cached_reads_do_not_collide() {
        let base = base();
        let mut block = WorldStateAccumulator::new(base.clone());
        // A value loaded but left unchanged by an earlier transaction.
        block.account(SENDER).unwrap();

        let ctx = context(WorldStateAccumulator::new(base), false);
        let tx = transaction(RECIPIENT, vec![]);
        assert!(!TransactionCollisionDetector.has_collision(&tx, BENEFICIARY, &ctx, &block));
    }

    #[test]
    fn test_slot_collision() {
        let base = base();
        let slot = U256::from(7);
        let mut speculative = WorldStateAccumulator::new(base.clone());
        speculative.storage(OTHER, slot).unwrap();
        let ctx = context(speculative, false);

        let mut block = WorldStateAccumulator::new(base);
        block.set_storage(OTHER, U256::from(8), U256::from(1)).unwrap();
        let tx = transaction(RECIPIENT, vec![]);
        let detector = TransactionCollisionDetector;
        assert!(!detector.has_collision(&tx, BENEFICIARY, &ctx, &block));

        block.set_storage(OTHER, slot, U256::from(1)).unwrap();
        assert_eq!(
            detector.detect_collision(&tx, BENEFICIARY, &ctx, &block),
            Some(Collision::Slot {
                address: OTHER,
                slot
            })
        );
    }

    #[test]
    fn test_beneficiary_exemption() {
        let base = base();
        let mut block = WorldStateAccumulator::new(base.clone());
        block.increment_balance(BENEFICIARY, U256::from(5)).unwrap();
        let tx = transaction(RECIPIENT, vec![]);
        let detector = TransactionCollisionDetector;

        let reward_only = context(WorldStateAccumulator::new(base.clone()), false);
        assert!(!detector.has_collision(&tx, BENEFICIARY, &reward_only, &block));

        let mut speculative = WorldStateAccumulator::new(base);
        speculative.account(BENEFICIARY).unwrap();
        let read_before_reward = context(speculative, true);
        assert!(detector.has_collision(&tx, BENEFICIARY, &read_before_reward, &block));
    }
}
