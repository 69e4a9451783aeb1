//! Dual-Signature Threshold Engine.
//!
//! Transport-agnostic: no p2p layer is modelled here, so every operation
//! takes already-collected peer data as an argument. [`SessionTable`] only
//! tracks session lifecycle (re-entrancy, timeouts), not message payloads.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::instrument;

use crate::client::session::SessionTable;
use crate::crypto::{bls, lattice, BlsScheme, LatticeScheme};
use crate::epoch::EpochKeys;
use crate::error::SessionError;
use crate::registry::SchemeRegistry;

use super::common::DualSignature;

pub struct DualSigEngine {
	registry: SchemeRegistry,
	sessions: SessionTable,
	session_timeout: Duration,
}

impl Default for DualSigEngine {
	fn default() -> Self {
		Self::new(Duration::from_secs(10))
	}
}

impl DualSigEngine {
	pub fn new(session_timeout: Duration) -> Self {
		Self { registry: SchemeRegistry::new(), sessions: SessionTable::new(), session_timeout }
	}

	/// Drops any session older than the configured timeout that never
	/// reached `Complete`, freeing its state in [`SessionTable`].
	pub fn sweep_expired_sessions(&self) {
		self.sessions.sweep_expired(self.session_timeout);
	}

	fn signer_index(epoch_keys: &EpochKeys, validator_id: &str) -> Option<u64> {
		epoch_keys.validator_set.iter().position(|v| v == validator_id).map(|i| i as u64 + 1)
	}

	/// BLS share signing and lattice round 1, run in parallel on the blocking
	/// pool — both are synchronous, CPU-bound curve math with no `.await`
	/// inside, so driving them through `tokio::join!` over bare `async`
	/// blocks would just run them back to back on this task. Both must
	/// succeed. Re-entrant calls for the same `(epoch, session_id)` by the
	/// same validator fail with [`SessionError::SessionReuse`].
	#[instrument(skip(self, epoch_keys, msg, prf_key), fields(epoch = epoch_keys.epoch, session_id))]
	pub async fn dual_sign_round1(
		&self,
		epoch_keys: &EpochKeys,
		validator_id: &str,
		msg: &[u8],
		session_id: u64,
		prf_key: &[u8],
	) -> Result<(bls::ShareSignature, lattice::Round1Output), SessionError> {
		let idx = Self::signer_index(epoch_keys, validator_id)
			.ok_or(SessionError::InvalidShare(0))?;
		let bls_share =
			epoch_keys.bls_share(validator_id).ok_or(SessionError::InvalidShare(idx))?.clone();
		let pq_share =
			epoch_keys.pq_share(validator_id).ok_or(SessionError::InvalidShare(idx))?.clone();

		self.sessions.record_round1(epoch_keys.epoch, session_id, idx)?;

		let epoch = epoch_keys.epoch;
		let session_id_bytes = session_id.to_le_bytes();
		let registry = self.registry;
		let msg_bls = msg.to_vec();
		let prf_key = prf_key.to_vec();

		let bls_task =
			tokio::task::spawn_blocking(move || registry.bls().share_sign(&bls_share, &msg_bls, epoch));
		let pq_task = tokio::task::spawn_blocking(move || {
			registry.lattice().round1(&pq_share, &session_id_bytes, &prf_key)
		});

		let bls_sig = bls_task.await.expect("bls share_sign task panicked");
		let pq_round1 = pq_task.await.expect("lattice round1 task panicked");

		Ok((bls_sig, pq_round1))
	}

	/// Lattice round 2 only — BLS has already produced its share in round 1.
	/// Signers whose round-1 contribution is missing from `all_round1` are
	/// excluded from the committee; if fewer than `t+1` remain, the session
	/// aborts. A session idle longer than the configured timeout also aborts
	/// here rather than being allowed to complete late.
	#[instrument(skip_all, fields(epoch = epoch_keys.epoch, session_id))]
	pub fn dual_sign_round2(
		&self,
		epoch_keys: &EpochKeys,
		validator_id: &str,
		session_id: u64,
		prf_key: &[u8],
		msg: &[u8],
		all_round1: &BTreeMap<u64, lattice::Round1Output>,
	) -> Result<lattice::Round2Output, SessionError> {
		let idx = Self::signer_index(epoch_keys, validator_id)
			.ok_or(SessionError::InvalidShare(0))?;
		let pq_share = epoch_keys.pq_share(validator_id).ok_or(SessionError::InvalidShare(idx))?;
		let needed = epoch_keys.threshold as usize + 1;

		if self.sessions.is_timed_out(epoch_keys.epoch, session_id, self.session_timeout) {
			self.sessions.abort(epoch_keys.epoch, session_id);
			return Err(SessionError::Timeout { epoch: epoch_keys.epoch, session_id })
		}

		if all_round1.len() < needed {
			self.sessions.abort(epoch_keys.epoch, session_id);
			return Err(SessionError::InsufficientShares { needed, got: all_round1.len() })
		}

		self.sessions.record_round2(epoch_keys.epoch, session_id, idx, needed)?;

		let session_id_bytes = session_id.to_le_bytes();
		Ok(self.registry.lattice().round2(
			pq_share,
			&epoch_keys.pq_group_key,
			&session_id_bytes,
			prf_key,
			msg,
			all_round1,
		))
	}

	/// Aggregate `>= t+1` distinct BLS shares, all of which must be tagged
	/// with `epoch_keys.epoch` — a share signed under a stale or different
	/// epoch's key is rejected rather than silently combined in. Duplicate
	/// signer indices keep only the first occurrence (an ascending-index
	/// tie-break).
	pub fn aggregate_bls(
		&self,
		epoch_keys: &EpochKeys,
		msg: &[u8],
		shares: &[bls::ShareSignature],
	) -> Result<bls::Signature, SessionError> {
		self.registry
			.bls()
			.aggregate(msg, shares, epoch_keys.threshold, epoch_keys.epoch)
			.map_err(|e| match e {
				bls::BlsError::InsufficientShares { needed, got } =>
					SessionError::InsufficientShares { needed, got },
				other => SessionError::CryptoFailure {
					operation: "aggregate_bls",
					source: other.to_string(),
				},
			})
	}

	/// Any participant may finalize, given a complete `all_round2` map for
	/// this session.
	pub fn finalize_pq(
		&self,
		epoch_keys: &EpochKeys,
		session_id: u64,
		msg: &[u8],
		all_round1: &BTreeMap<u64, lattice::Round1Output>,
		all_round2: &[lattice::Round2Output],
	) -> Result<lattice::Signature, SessionError> {
		let sig = self
			.registry
			.lattice()
			.finalize(msg, all_round1, all_round2, epoch_keys.threshold)
			.map_err(|e| match e {
				lattice::LatticeError::InsufficientSigners { needed, got } =>
					SessionError::InsufficientSigners { needed, got },
				other =>
					SessionError::CryptoFailure { operation: "finalize_pq", source: other.to_string() },
			})?;
		self.sessions.mark_complete(epoch_keys.epoch, session_id);
		Ok(sig)
	}

	/// Verifies the BLS aggregate against the epoch's BLS group key and the
	/// lattice signature against the epoch's lattice group key; true iff
	/// both verify.
	pub fn verify_dual(&self, epoch_keys: &EpochKeys, msg: &[u8], sig: &DualSignature) -> bool {
		if sig.epoch != epoch_keys.epoch {
			return false
		}
		let bls_ok = self.registry.bls().verify(&epoch_keys.bls_group_key, &sig.bls_aggregate, msg);
		let pq_ok = self.registry.lattice().verify(&epoch_keys.pq_group_key, msg, &sig.pq_signature);
		bls_ok && pq_ok
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::epoch::{EpochManager, DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_EPOCH_DURATION, DEFAULT_MIN_EPOCH_DURATION};

	async fn three_validator_epoch() -> (EpochManager, std::sync::Arc<EpochKeys>) {
		let mgr = EpochManager::new(2, DEFAULT_MIN_EPOCH_DURATION, DEFAULT_MAX_EPOCH_DURATION, DEFAULT_HISTORY_LIMIT);
		let keys = mgr
			.initialize(vec!["v0".into(), "v1".into(), "v2".into()])
			.await
			.unwrap();
		(mgr, keys)
	}

	#[tokio::test]
	async fn full_dual_sign_round_trip() {
		let (_mgr, keys) = three_validator_epoch().await;
		let engine = DualSigEngine::default();
		let msg = b"quantum-bundle";
		let session_id = 1;
		let prf_key = [0xA5u8; 32];

		let mut bls_shares = Vec::new();
		let mut round1s = BTreeMap::new();
		for v in &keys.validator_set {
			let (bls_sig, pq_r1) =
				engine.dual_sign_round1(&keys, v, msg, session_id, &prf_key).await.unwrap();
			bls_shares.push(bls_sig);
			round1s.insert(pq_r1.index, pq_r1);
		}

		let mut round2s = Vec::new();
		for v in &keys.validator_set {
			let r2 = engine
				.dual_sign_round2(&keys, v, session_id, &prf_key, msg, &round1s)
				.unwrap();
			round2s.push(r2);
		}

		let bls_agg = engine.aggregate_bls(&keys, msg, &bls_shares).unwrap();
		let pq_sig = engine.finalize_pq(&keys, session_id, msg, &round1s, &round2s).unwrap();

		let dual = DualSignature {
			bls_aggregate: bls_agg,
			pq_signature: pq_sig,
			signer_count: 3,
			epoch: keys.epoch,
		};
		assert!(engine.verify_dual(&keys, msg, &dual));
	}

	#[tokio::test]
	async fn reentrant_round1_rejected() {
		let (_mgr, keys) = three_validator_epoch().await;
		let engine = DualSigEngine::default();
		let msg = b"m";
		engine.dual_sign_round1(&keys, "v0", msg, 7, &[0u8; 32]).await.unwrap();
		let err = engine.dual_sign_round1(&keys, "v0", msg, 7, &[0u8; 32]).await.unwrap_err();
		assert_eq!(err, SessionError::SessionReuse { epoch: keys.epoch, session_id: 7 });
	}

	#[tokio::test]
	async fn round2_after_session_timeout_is_rejected() {
		let (_mgr, keys) = three_validator_epoch().await;
		let engine = DualSigEngine::new(Duration::from_millis(0));
		let msg = b"m";
		let prf_key = [0u8; 32];

		engine.dual_sign_round1(&keys, "v0", msg, 9, &prf_key).await.unwrap();
		let err = engine
			.dual_sign_round2(&keys, "v0", 9, &prf_key, msg, &BTreeMap::new())
			.unwrap_err();
		assert_eq!(err, SessionError::Timeout { epoch: keys.epoch, session_id: 9 });
	}
}
