//! Error kinds: a per-component `thiserror` enum for each subsystem plus a
//! crate-level aggregator.
//!
//! A rate-limited or no-op rotation is informational, not a failure, and is
//! modelled as `Ok(None)`/`bool` returns in [`crate::epoch::EpochManager`],
//! never as `Err` — they do not appear in [`QuasarError`].

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum EpochError {
	#[error("invalid validator set: {reason}")]
	InvalidValidatorSet { reason: String },
	#[error("epoch {0} not found (pruned or never existed)")]
	EpochNotFound(u64),
	#[error("epoch manager has not been initialized")]
	Uninitialized,
	#[error("epoch manager is already initialized")]
	AlreadyInitialized,
}

#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum SessionError {
	#[error("insufficient shares: need >= {needed}, got {got}")]
	InsufficientShares { needed: usize, got: usize },
	#[error("insufficient signers: need >= {needed}, got {got}")]
	InsufficientSigners { needed: usize, got: usize },
	#[error("session ({epoch}, {session_id}) reused an already-started round 1")]
	SessionReuse { epoch: u64, session_id: u64 },
	#[error("share from signer {0} failed schema validation")]
	InvalidShare(u64),
	#[error("malformed round-1 payload from signer {0}")]
	BadRound1Payload(u64),
	#[error("malformed round-2 payload from signer {0}")]
	BadRound2Payload(u64),
	#[error("session ({epoch}, {session_id}) timed out")]
	Timeout { epoch: u64, session_id: u64 },
	#[error("underlying crypto primitive failed during {operation}: {source}")]
	CryptoFailure { operation: &'static str, source: String },
}

#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum BundleError {
	#[error(transparent)]
	Session(#[from] SessionError),
	#[error(transparent)]
	Epoch(#[from] EpochError),
}

/// Aggregated error type for callers that want a single `Result` across
/// components, atop the per-component `thiserror` leaves above.
#[derive(Error, Debug, Clone)]
pub enum QuasarError {
	#[error(transparent)]
	Epoch(#[from] EpochError),
	#[error(transparent)]
	Session(#[from] SessionError),
	#[error(transparent)]
	Bundle(#[from] BundleError),
}
