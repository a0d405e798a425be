//! Address and slot touch tracking, and the tracer hook invoked before the
//! beneficiary reward.

use crate::collision::TransactionCollisionDetector;
use crate::state::WorldStateAccumulator;
use crate::types::Transaction;
use alloy_primitives::{Address, U256};
use std::collections::{BTreeSet, HashMap};

/// Kind of access to an account or slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Accumulated accesses to one account or slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Touch {
    read: bool,
    written: bool,
}

impl Touch {
    fn record(&mut self, access: Access) {
        match access {
            Access::Read => self.read = true,
            Access::Write => self.written = true,
        }
    }

    pub fn is_read(&self) -> bool {
        self.read
    }

    pub fn is_written(&self) -> bool {
        self.written
    }
}

/// Records which accounts and slots an execution read or wrote.
#[derive(Debug, Clone, Default)]
pub struct AddressTouchTracker {
    accounts: HashMap<Address, Touch>,
    slots: HashMap<Address, HashMap<U256, Touch>>,
}

impl AddressTouchTracker {
    pub fn record_account(&mut self, address: Address, access: Access) {
        self.accounts.entry(address).or_default().record(access);
    }

    pub fn record_slot(&mut self, address: Address, slot: U256, access: Access) {
        self.slots
            .entry(address)
            .or_default()
            .entry(slot)
            .or_default()
            .record(access);
    }

    /// Whether the account or any of its slots was accessed.
    pub fn was_touched(&self, address: &Address) -> bool {
        self.accounts.contains_key(address) || self.slots.contains_key(address)
    }

    pub fn was_read(&self, address: &Address) -> bool {
        self.accounts.get(address).is_some_and(Touch::is_read)
    }

    pub fn was_written(&self, address: &Address) -> bool {
        self.accounts.get(address).is_some_and(Touch::is_written)
    }

    pub fn account_touch(&self, address: &Address) -> Option<Touch> {
        self.accounts.get(address).copied()
    }

    /// Every account accessed, directly or through its storage.
    pub fn touched_addresses(&self) -> BTreeSet<Address> {
        self.accounts
            .keys()
            .chain(self.slots.keys())
            .copied()
            .collect()
    }

    pub fn touched_slots<'a>(&'a self, address: &Address) -> impl Iterator<Item = &'a U256> + 'a {
        self.slots.get(address).into_iter().flat_map(HashMap::keys)
    }

    /// Drops every record for `address`.
    pub fn forget(&mut self, address: &Address) {
        self.accounts.remove(address);
        self.slots.remove(address);
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.slots.is_empty()
    }
}

/// Hook called by a transaction executor right before it credits the
/// beneficiary.
pub trait RewardTracer {
    fn trace_before_reward(
        &mut self,
        world: &WorldStateAccumulator,
        transaction: &Transaction,
        reward: U256,
    );
}

/// Tracer that observes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl RewardTracer for NoopTracer {
    fn trace_before_reward(&mut self, _: &WorldStateAccumulator, _: &Transaction, _: U256) {}
}

/// Captures the miner reward and whether the transaction itself touched the
/// beneficiary before the reward was applied.
#[derive(Debug, Clone)]
pub struct BeneficiaryTouchTracer {
    beneficiary: Address,
    detector: TransactionCollisionDetector,
    reward: U256,
    touched_pre_reward: bool,
}

impl BeneficiaryTouchTracer {
    pub fn new(beneficiary: Address, detector: TransactionCollisionDetector) -> Self {
        Self {
            beneficiary,
            detector,
            reward: U256::ZERO,
            touched_pre_reward: false,
        }
    }

    pub fn reward(&self) -> U256 {
        self.reward
    }

    pub fn beneficiary_touched_pre_reward(&self) -> bool {
        self.touched_pre_reward
    }
}

impl RewardTracer for BeneficiaryTouchTracer {
    fn trace_before_reward(
        &mut self,
        world: &WorldStateAccumulator,
        transaction: &Transaction,
        reward: U256,
    ) {
        self.reward = reward;
        self.touched_pre_reward = self
            .detector
            .addresses_touched_by_transaction(transaction, Some(world))
            .contains(&self.beneficiary);
    }
}
