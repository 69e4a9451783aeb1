//! Epoch Manager.
//!
//! Owns the current [`EpochKeys`] and a bounded history of prior epochs,
//! gates rotations behind `MIN_EPOCH_DURATION`, and serves cross-epoch
//! verification. The store is a `BTreeMap<u64, Arc<EpochKeys>>` capped at
//! `HISTORY_LIMIT + 1` entries behind a `tokio::sync::RwLock`, so handing a
//! signing session "the current epoch's signers" is a cheap `Arc` clone
//! rather than a long-lived guard into this map.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::RwLock;

use crate::client::DualSignature;
use crate::crypto::{bls, lattice, BlsScheme, LatticeScheme};
use crate::error::EpochError;
use crate::registry::SchemeRegistry;

pub type ValidatorId = String;

pub const DEFAULT_MIN_EPOCH_DURATION: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_MAX_EPOCH_DURATION: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_HISTORY_LIMIT: usize = 6;

#[derive(Clone)]
pub struct EpochKeys {
	pub epoch: u64,
	pub threshold: u64,
	pub total_parties: u64,
	pub validator_set: Vec<ValidatorId>,
	pub bls_group_key: bls::PublicKey,
	pub bls_shares: BTreeMap<ValidatorId, bls::KeyShare>,
	pub pq_group_key: lattice::PublicKey,
	pub pq_shares: BTreeMap<ValidatorId, lattice::KeyShare>,
	pub created_at: Instant,
}

impl EpochKeys {
	pub fn bls_share(&self, validator: &str) -> Option<&bls::KeyShare> {
		self.bls_shares.get(validator)
	}

	pub fn pq_share(&self, validator: &str) -> Option<&lattice::KeyShare> {
		self.pq_shares.get(validator)
	}
}

fn validate_set(validator_ids: &[ValidatorId], threshold_t: u64) -> Result<(), EpochError> {
	let n = validator_ids.len() as u64;
	let unique: BTreeSet<&ValidatorId> = validator_ids.iter().collect();
	if unique.len() != validator_ids.len() {
		return Err(EpochError::InvalidValidatorSet { reason: "duplicate validator id".into() })
	}
	if n < 2 {
		return Err(EpochError::InvalidValidatorSet { reason: format!("n={n} < 2") })
	}
	if threshold_t >= n {
		return Err(EpochError::InvalidValidatorSet { reason: format!("t={threshold_t} >= n={n}") })
	}
	Ok(())
}

fn generate_epoch_keys(
	epoch: u64,
	validator_ids: &[ValidatorId],
	threshold_t: u64,
	registry: &SchemeRegistry,
	rng: &mut StdRng,
) -> EpochKeys {
	let n = validator_ids.len() as u64;

	let (bls_key_shares, bls_group_key) =
		registry.bls().trusted_dealer(threshold_t, n, rng).expect("validated parameters");
	let (pq_key_shares, pq_group_key) =
		registry.lattice().trusted_dealer(threshold_t, n, rng).expect("validated parameters");

	let bls_shares = validator_ids
		.iter()
		.cloned()
		.zip(bls_key_shares)
		.collect::<BTreeMap<_, _>>();
	let pq_shares = validator_ids
		.iter()
		.cloned()
		.zip(pq_key_shares)
		.collect::<BTreeMap<_, _>>();

	EpochKeys {
		epoch,
		threshold: threshold_t,
		total_parties: n,
		validator_set: validator_ids.to_vec(),
		bls_group_key,
		bls_shares,
		pq_group_key,
		pq_shares,
		created_at: Instant::now(),
	}
}

struct State {
	epochs: BTreeMap<u64, Arc<EpochKeys>>,
	current_epoch: u64,
	last_rotation: Instant,
	rng: StdRng,
}

/// Owns epoch lifecycle. One instance per running [`crate::Engine`].
pub struct EpochManager {
	registry: SchemeRegistry,
	threshold_t: u64,
	min_epoch_duration: Duration,
	max_epoch_duration: Duration,
	history_limit: usize,
	state: RwLock<Option<State>>,
}

impl EpochManager {
	pub fn new(
		threshold_t: u64,
		min_epoch_duration: Duration,
		max_epoch_duration: Duration,
		history_limit: usize,
	) -> Self {
		Self {
			registry: SchemeRegistry::new(),
			threshold_t,
			min_epoch_duration,
			max_epoch_duration,
			history_limit,
			state: RwLock::new(None),
		}
	}

	pub async fn initialize(
		&self,
		validator_ids: Vec<ValidatorId>,
	) -> Result<Arc<EpochKeys>, EpochError> {
		let mut guard = self.state.write().await;
		if guard.is_some() {
			return Err(EpochError::AlreadyInitialized)
		}
		validate_set(&validator_ids, self.threshold_t)?;

		let mut rng = StdRng::from_entropy();
		let keys = Arc::new(generate_epoch_keys(
			0,
			&validator_ids,
			self.threshold_t,
			&self.registry,
			&mut rng,
		));

		let mut epochs = BTreeMap::new();
		epochs.insert(0, keys.clone());

		*guard = Some(State { epochs, current_epoch: 0, last_rotation: Instant::now(), rng });

		Ok(keys)
	}

	/// `Ok(Some(keys))` on a real rotation; `Ok(None)` for the informational
	/// "no rotation happened" outcomes (rate-limited, or an unchanged
	/// validator set) that callers must not treat as failure.
	pub async fn rotate(
		&self,
		validator_ids: Vec<ValidatorId>,
		force: bool,
	) -> Result<Option<Arc<EpochKeys>>, EpochError> {
		let mut guard = self.state.write().await;
		let state = guard.as_mut().ok_or(EpochError::Uninitialized)?;

		if !force && state.last_rotation.elapsed() < self.min_epoch_duration {
			return Ok(None)
		}

		let current = state.epochs.get(&state.current_epoch).expect("current epoch always present");
		let same_set = {
			let mut a: Vec<_> = current.validator_set.clone();
			let mut b: Vec<_> = validator_ids.clone();
			a.sort();
			b.sort();
			a == b
		};
		if !force && same_set {
			return Ok(None)
		}

		validate_set(&validator_ids, self.threshold_t)?;

		let next_epoch = state.current_epoch + 1;
		let keys = Arc::new(generate_epoch_keys(
			next_epoch,
			&validator_ids,
			self.threshold_t,
			&self.registry,
			&mut state.rng,
		));

		state.epochs.insert(next_epoch, keys.clone());
		state.current_epoch = next_epoch;
		state.last_rotation = Instant::now();

		while state.epochs.len() > self.history_limit + 1 {
			let oldest = *state.epochs.keys().next().expect("non-empty");
			state.epochs.remove(&oldest);
		}

		Ok(Some(keys))
	}

	pub async fn force_rotate_if_expired(&self) -> Result<Option<Arc<EpochKeys>>, EpochError> {
		let current_validators = {
			let guard = self.state.read().await;
			let state = guard.as_ref().ok_or(EpochError::Uninitialized)?;
			if state.last_rotation.elapsed() < self.max_epoch_duration {
				return Ok(None)
			}
			let current = state.epochs.get(&state.current_epoch).expect("current epoch always present");
			current.validator_set.clone()
		};
		self.rotate(current_validators, true).await
	}

	pub async fn current(&self) -> Result<Arc<EpochKeys>, EpochError> {
		let guard = self.state.read().await;
		let state = guard.as_ref().ok_or(EpochError::Uninitialized)?;
		Ok(state.epochs.get(&state.current_epoch).expect("current epoch always present").clone())
	}

	pub async fn get(&self, epoch: u64) -> Result<Arc<EpochKeys>, EpochError> {
		let guard = self.state.read().await;
		let state = guard.as_ref().ok_or(EpochError::Uninitialized)?;
		state.epochs.get(&epoch).cloned().ok_or(EpochError::EpochNotFound(epoch))
	}

	/// Verifies `signature` against `epoch`'s group keys specifically —
	/// `false` if `signature.epoch` doesn't match `epoch` at all, which makes
	/// a signature produced under one epoch unverifiable against any other.
	pub async fn verify_for_epoch(
		&self,
		msg: &[u8],
		signature: &DualSignature,
		epoch: u64,
	) -> Result<bool, EpochError> {
		if signature.epoch != epoch {
			return Ok(false)
		}
		let keys = self.get(epoch).await?;
		let registry = SchemeRegistry::new();
		let bls_ok = registry.bls().verify(&keys.bls_group_key, &signature.bls_aggregate, msg);
		let pq_ok = registry.lattice().verify(&keys.pq_group_key, msg, &signature.pq_signature);
		Ok(bls_ok && pq_ok)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn validators(names: &[&str]) -> Vec<ValidatorId> {
		names.iter().map(|s| s.to_string()).collect()
	}

	#[tokio::test]
	async fn initialize_rejects_small_validator_set() {
		let mgr = EpochManager::new(
			1,
			DEFAULT_MIN_EPOCH_DURATION,
			DEFAULT_MAX_EPOCH_DURATION,
			DEFAULT_HISTORY_LIMIT,
		);
		let err = mgr.initialize(validators(&["v0"])).await.unwrap_err();
		assert!(matches!(err, EpochError::InvalidValidatorSet { .. }));
	}

	#[tokio::test]
	async fn rotate_without_force_is_rate_limited() {
		let mgr = EpochManager::new(
			1,
			DEFAULT_MIN_EPOCH_DURATION,
			DEFAULT_MAX_EPOCH_DURATION,
			DEFAULT_HISTORY_LIMIT,
		);
		mgr.initialize(validators(&["v0", "v1", "v2"])).await.unwrap();

		let result = mgr.rotate(validators(&["v0", "v1", "v3"]), false).await.unwrap();
		assert!(result.is_none());
		assert_eq!(mgr.current().await.unwrap().epoch, 0);
	}

	#[tokio::test]
	async fn rotate_same_set_without_force_is_noop() {
		let mgr = EpochManager::new(1, Duration::ZERO, DEFAULT_MAX_EPOCH_DURATION, DEFAULT_HISTORY_LIMIT);
		mgr.initialize(validators(&["v0", "v1", "v2"])).await.unwrap();

		let result = mgr.rotate(validators(&["v2", "v0", "v1"]), false).await.unwrap();
		assert!(result.is_none());
	}

	#[tokio::test]
	async fn forced_rotation_increments_epoch_and_prunes_history() {
		let mgr = EpochManager::new(1, Duration::ZERO, DEFAULT_MAX_EPOCH_DURATION, 1);
		mgr.initialize(validators(&["v0", "v1", "v2"])).await.unwrap();

		mgr.rotate(validators(&["v0", "v1", "v3"]), true).await.unwrap().unwrap();
		mgr.rotate(validators(&["v0", "v1", "v4"]), true).await.unwrap().unwrap();

		assert_eq!(mgr.current().await.unwrap().epoch, 2);
		// history_limit=1 means epochs {1,2} retained, epoch 0 pruned.
		assert!(matches!(mgr.get(0).await.unwrap_err(), EpochError::EpochNotFound(0)));
		assert!(mgr.get(1).await.is_ok());
		assert!(mgr.get(2).await.is_ok());
	}
}
