//! Speculative parallel transaction execution for block processing.
//!
//! This crate runs the transactions of a block optimistically and
//! concurrently, each against its own copy-on-write view of the pre-block
//! state, and then lets the block processor reconcile the results strictly
//! in block order. A speculative result is only merged when nothing it
//! depended on was changed by an earlier transaction; otherwise the block
//! processor re-executes the transaction. The outcome is always identical to
//! sequential execution.
//!
//! # Core Components
//!
//! - **ParallelTransactionOrchestrator**: schedules speculative execution and
//!   reconciles results
//! - **TransactionCollisionDetector**: checks a speculative result against the
//!   block accumulator
//! - **AddressTouchTracker**: records the accounts and slots an execution used
//! - **WorldStateAccumulator**: copy-on-write overlay with import operations
//! - **TransactionProcessor**: the execution seam, with
//!   `SimpleTransactionProcessor` as a deterministic implementation and
//!   `EvmTransactionProcessor` running revm
//!
//! # Example
//!
//! ```rust,ignore
//! use parallel_tx_executor::{ParallelTransactionOrchestrator, ParallelizationMetrics};
//!
//! let orchestrator = ParallelTransactionOrchestrator::new(processor.clone());
//! orchestrator.run_async(archive.clone(), &header, &transactions, beneficiary,
//!     archive.clone(), blob_gas_price, &pool);
//!
//! for (index, tx) in transactions.iter().enumerate() {
//!     match orchestrator.apply_result(&mut block, beneficiary, tx, index, &metrics)? {
//!         Some(result) => { /* merged */ }
//!         None => { /* execute synchronously against `block` */ }
//!     }
//!     block.commit();
//! }
//! ```

pub mod collision;
pub mod context;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod processor;
pub mod signer;
pub mod state;
pub mod tracker;
pub mod types;

pub use collision::{Collision, TransactionCollisionDetector};
pub use context::TransactionContext;
pub use error::{ExecutionError, StateError};
pub use self::metrics::ParallelizationMetrics;
pub use orchestrator::ParallelTransactionOrchestrator;
pub use processor::{
    EvmTransactionProcessor, ProcessorConfig, SimpleTransactionProcessor, TransactionProcessor,
};
pub use signer::Account;
pub use state::{
    AccountState, BlockHashLookup, InMemoryWorldState, InMemoryWorldStateArchive, StateChanges,
    WorldStateAccumulator, WorldStateProvider, WorldView,
};
pub use tracker::{AddressTouchTracker, BeneficiaryTouchTracer, NoopTracer, RewardTracer};
pub use types::{
    BlockHeader, FailureReason, ProcessingResult, Transaction, TransactionRequest,
    TransactionStatus, TxnIndex, ValidationParams,
};
