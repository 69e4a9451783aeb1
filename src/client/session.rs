//! The in-memory session registry, keyed by `(epoch, session_id)` rather
//! than a bare ceremony id, since a session id alone is only unique within
//! one epoch.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::client::common::SessionState;
use crate::error::SessionError;

struct SessionEntry {
	state: SessionState,
	round1_senders: BTreeSet<u64>,
	round2_senders: BTreeSet<u64>,
	created_at: Instant,
}

/// Tracks session lifecycle for re-entrancy/timeout enforcement. Does not
/// store round payloads itself — callers collect and pass peer data
/// explicitly — no transport is modelled here.
#[derive(Default)]
pub struct SessionTable {
	sessions: Mutex<BTreeMap<(u64, u64), SessionEntry>>,
}

impl SessionTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Record this signer's round-1 send. Returns [`SessionError::SessionReuse`]
	/// if this exact signer already sent round 1 for `(epoch, session_id)`.
	pub fn record_round1(
		&self,
		epoch: u64,
		session_id: u64,
		signer_index: u64,
	) -> Result<(), SessionError> {
		let mut table = self.sessions.lock().expect("session table mutex poisoned");
		let entry = table.entry((epoch, session_id)).or_insert_with(|| SessionEntry {
			state: SessionState::Init,
			round1_senders: BTreeSet::new(),
			round2_senders: BTreeSet::new(),
			created_at: Instant::now(),
		});

		if entry.state == SessionState::Aborted {
			return Err(SessionError::SessionReuse { epoch, session_id })
		}
		if !entry.round1_senders.insert(signer_index) {
			return Err(SessionError::SessionReuse { epoch, session_id })
		}
		entry.state = SessionState::Round1Done;
		Ok(())
	}

	/// Record this signer's round-2 send, requiring the session has already
	/// seen at least `needed` round-1 senders (the `ROUND1_DONE ->
	/// READY_ROUND2` transition).
	pub fn record_round2(
		&self,
		epoch: u64,
		session_id: u64,
		signer_index: u64,
		needed: usize,
	) -> Result<(), SessionError> {
		let mut table = self.sessions.lock().expect("session table mutex poisoned");
		let entry = table
			.get_mut(&(epoch, session_id))
			.ok_or(SessionError::BadRound2Payload(signer_index))?;

		if entry.round1_senders.len() < needed {
			return Err(SessionError::InsufficientShares { needed, got: entry.round1_senders.len() })
		}
		entry.round2_senders.insert(signer_index);
		entry.state = SessionState::Round2Done;
		Ok(())
	}

	pub fn mark_complete(&self, epoch: u64, session_id: u64) {
		let mut table = self.sessions.lock().expect("session table mutex poisoned");
		if let Some(entry) = table.get_mut(&(epoch, session_id)) {
			entry.state = SessionState::Complete;
		}
	}

	pub fn abort(&self, epoch: u64, session_id: u64) {
		let mut table = self.sessions.lock().expect("session table mutex poisoned");
		if let Some(entry) = table.get_mut(&(epoch, session_id)) {
			entry.state = SessionState::Aborted;
		}
	}

	pub fn is_timed_out(&self, epoch: u64, session_id: u64, timeout: Duration) -> bool {
		let table = self.sessions.lock().expect("session table mutex poisoned");
		table
			.get(&(epoch, session_id))
			.map(|entry| entry.created_at.elapsed() >= timeout)
			.unwrap_or(false)
	}

	pub fn state(&self, epoch: u64, session_id: u64) -> Option<SessionState> {
		let table = self.sessions.lock().expect("session table mutex poisoned");
		table.get(&(epoch, session_id)).map(|e| e.state)
	}

	/// Drop sessions older than `timeout` that never completed, freeing their
	/// state instead of leaking it forever.
	pub fn sweep_expired(&self, timeout: Duration) {
		let mut table = self.sessions.lock().expect("session table mutex poisoned");
		table.retain(|_, entry| {
			entry.state == SessionState::Complete || entry.created_at.elapsed() < timeout
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn reentrant_round1_is_rejected() {
		let table = SessionTable::new();
		table.record_round1(0, 1, 1).unwrap();
		let err = table.record_round1(0, 1, 1).unwrap_err();
		assert_eq!(err, SessionError::SessionReuse { epoch: 0, session_id: 1 });
	}

	#[test]
	fn distinct_signers_may_each_send_round1() {
		let table = SessionTable::new();
		table.record_round1(0, 1, 1).unwrap();
		table.record_round1(0, 1, 2).unwrap();
		assert_eq!(table.state(0, 1), Some(SessionState::Round1Done));
	}

	#[test]
	fn round2_before_threshold_round1_is_rejected() {
		let table = SessionTable::new();
		table.record_round1(0, 1, 1).unwrap();
		let err = table.record_round2(0, 1, 1, 2).unwrap_err();
		assert_eq!(err, SessionError::InsufficientShares { needed: 2, got: 1 });
	}
}
