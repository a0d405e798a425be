//! Error types.
//!
//! Collisions, stale runs and invalid speculative results are not errors; they
//! show up as `None` from reconciliation. Only failures of the state backend or
//! the executor itself are represented here.

use alloy_primitives::B256;
use revm::database_interface::DBErrorMarker;
use thiserror::Error;

/// Failure to read world state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("world state for block {0} is unavailable")]
    Unavailable(B256),
    #[error("block hash for block {0} is unavailable")]
    BlockHashUnavailable(u64),
    #[error("code for hash {0} is unavailable")]
    CodeUnavailable(B256),
}

impl DBErrorMarker for StateError {}

/// Failure of a transaction executor that is not a validation outcome.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error("evm error: {0}")]
    Evm(String),
}
