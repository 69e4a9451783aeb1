//! Bundle Builder & Async Signer.
//!
//! Batches block hashes arriving from [`crate::dispatcher::Dispatcher`] into
//! Merkle-rooted, chained bundles on a fixed cadence, and drives the
//! dual-signature engine to attach a signature to each one before handing it
//! off on an output channel.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::RngCore;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::client::{DualSigEngine, DualSignature};
use crate::epoch::EpochManager;
use crate::error::{BundleError, SessionError};

/// A batch of finalized block hashes, chained to its predecessor and signed
/// under both threshold schemes.
#[derive(Clone, Debug)]
pub struct QuantumBundle {
	pub epoch: u64,
	pub sequence: u64,
	pub start_height: u64,
	pub end_height: u64,
	pub block_count: u32,
	pub block_hashes: Vec<[u8; 32]>,
	pub merkle_root: [u8; 32],
	pub previous_hash: [u8; 32],
	pub timestamp: i64,
	pub signature: Option<DualSignature>,
}

impl QuantumBundle {
	pub fn bundle_hash(&self) -> [u8; 32] {
		crate::crypto::hash::sha256_concat(&[
			&self.epoch.to_le_bytes(),
			&self.sequence.to_le_bytes(),
			&self.start_height.to_le_bytes(),
			&self.end_height.to_le_bytes(),
			&self.block_count.to_le_bytes(),
			&self.merkle_root,
			&self.previous_hash,
			&self.timestamp.to_le_bytes(),
		])
	}

	/// The bytes actually fed to the dual-signature engine: a fixed prefix
	/// over the hex-encoded bundle hash, not the raw hash, so a signature can
	/// never be replayed as if it were over some other domain's digest.
	pub fn signable_message(&self) -> Vec<u8> {
		format!("QUASAR-QB-v1:{}", hex::encode(self.bundle_hash())).into_bytes()
	}
}

#[derive(Clone, Copy)]
struct ChainTip {
	sequence: u64,
	hash: [u8; 32],
}

/// Accumulates block hashes and turns them into signed [`QuantumBundle`]s.
/// `pending` and `committed` are independent locks: building a bundle only
/// needs the former, attaching a signature only needs the latter, and
/// neither lock is ever held across an `.await`.
pub struct BundleBuilder {
	epoch_manager: Arc<EpochManager>,
	engine: Arc<DualSigEngine>,
	pending: Mutex<Vec<(u64, [u8; 32])>>,
	committed: Mutex<Option<ChainTip>>,
	next_session_id: AtomicU64,
}

impl BundleBuilder {
	pub fn new(epoch_manager: Arc<EpochManager>, engine: Arc<DualSigEngine>) -> Self {
		Self {
			epoch_manager,
			engine,
			pending: Mutex::new(Vec::new()),
			committed: Mutex::new(None),
			next_session_id: AtomicU64::new(1),
		}
	}

	pub fn add_block(&self, height: u64, hash: [u8; 32]) {
		self.pending.lock().expect("pending mutex poisoned").push((height, hash));
	}

	fn drain_pending(&self) -> Vec<(u64, [u8; 32])> {
		std::mem::take(&mut *self.pending.lock().expect("pending mutex poisoned"))
	}

	fn requeue_front(&self, mut items: Vec<(u64, [u8; 32])>) {
		let mut pending = self.pending.lock().expect("pending mutex poisoned");
		items.append(&mut pending);
		*pending = items;
	}

	/// Builds a bundle from everything currently pending, chained off the
	/// last *signed* bundle rather than the last attempted one. `None` if
	/// nothing is pending.
	pub async fn create_bundle(&self) -> Result<Option<QuantumBundle>, BundleError> {
		Ok(self.create_bundle_with_source().await?.map(|(qb, _)| qb))
	}

	async fn create_bundle_with_source(
		&self,
	) -> Result<Option<(QuantumBundle, Vec<(u64, [u8; 32])>)>, BundleError> {
		let source = self.drain_pending();
		if source.is_empty() {
			return Ok(None)
		}

		let epoch_keys = self.epoch_manager.current().await?;
		let (previous_hash, sequence) =
			match *self.committed.lock().expect("committed mutex poisoned") {
				Some(tip) => (tip.hash, tip.sequence + 1),
				None => ([0u8; 32], 0),
			};

		let start_height = source.first().expect("checked non-empty").0;
		let end_height = source.last().expect("checked non-empty").0;
		let block_hashes: Vec<[u8; 32]> = source.iter().map(|(_, h)| *h).collect();
		let merkle_root = crate::crypto::hash::merkle_root(&block_hashes);
		let timestamp = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.expect("system clock before 1970")
			.as_secs() as i64;

		let qb = QuantumBundle {
			epoch: epoch_keys.epoch,
			sequence,
			start_height,
			end_height,
			block_count: block_hashes.len() as u32,
			block_hashes,
			merkle_root,
			previous_hash,
			timestamp,
			signature: None,
		};
		Ok(Some((qb, source)))
	}

	/// Runs the dual-signature engine's two rounds across `signer_ids`
	/// sequentially and attaches the result. `signer_ids` must number at
	/// least `t+1` for the bundle's epoch or this fails without mutating
	/// `qb`.
	#[instrument(skip_all, fields(epoch = qb.epoch, sequence = qb.sequence))]
	pub async fn sign_bundle(
		&self,
		qb: &mut QuantumBundle,
		session_id: u64,
		prf_key: &[u8],
		signer_ids: &[String],
	) -> Result<(), BundleError> {
		let epoch_keys = self.epoch_manager.get(qb.epoch).await?;
		let needed = epoch_keys.threshold as usize + 1;
		if signer_ids.len() < needed {
			return Err(SessionError::InsufficientSigners { needed, got: signer_ids.len() }.into())
		}

		let msg = qb.signable_message();

		let mut bls_shares = Vec::with_capacity(signer_ids.len());
		let mut round1s = BTreeMap::new();
		for signer in signer_ids {
			let (bls_sig, pq_r1) =
				self.engine.dual_sign_round1(&epoch_keys, signer, &msg, session_id, prf_key).await?;
			bls_shares.push(bls_sig);
			round1s.insert(pq_r1.index, pq_r1);
		}

		let mut round2s = Vec::with_capacity(signer_ids.len());
		for signer in signer_ids {
			let r2 = self.engine.dual_sign_round2(
				&epoch_keys,
				signer,
				session_id,
				prf_key,
				&msg,
				&round1s,
			)?;
			round2s.push(r2);
		}

		let bls_aggregate = self.engine.aggregate_bls(&epoch_keys, &msg, &bls_shares)?;
		let pq_signature =
			self.engine.finalize_pq(&epoch_keys, session_id, &msg, &round1s, &round2s)?;

		qb.signature = Some(DualSignature {
			bls_aggregate,
			pq_signature,
			signer_count: signer_ids.len() as u32,
			epoch: qb.epoch,
		});

		*self.committed.lock().expect("committed mutex poisoned") =
			Some(ChainTip { sequence: qb.sequence, hash: qb.bundle_hash() });

		Ok(())
	}

	/// Signs `qb` on a spawned task and returns immediately; the signed
	/// bundle (or the failure) is delivered on the returned channel once the
	/// two dual-signature rounds complete, for callers that want on-demand
	/// signing outside the cadence-driven `run`/`tick` loop.
	pub fn sign_bundle_async(
		self: &Arc<Self>,
		mut qb: QuantumBundle,
		session_id: u64,
		prf_key: Vec<u8>,
		signer_ids: Vec<String>,
	) -> oneshot::Receiver<Result<QuantumBundle, BundleError>> {
		let (tx, rx) = oneshot::channel();
		let this = self.clone();
		tokio::spawn(async move {
			let result = this.sign_bundle(&mut qb, session_id, &prf_key, &signer_ids).await;
			let _ = tx.send(result.map(|()| qb));
		});
		rx
	}

	/// Drops any in-flight signing session older than the configured
	/// timeout that never completed.
	pub fn sweep_expired_sessions(&self) {
		self.engine.sweep_expired_sessions();
	}

	/// Recomputes the Merkle root from `block_hashes` and, if present,
	/// checks the signature against the bundle's own epoch specifically —
	/// not whatever epoch happens to be current.
	pub async fn verify_bundle(&self, qb: &QuantumBundle) -> Result<bool, BundleError> {
		if crate::crypto::hash::merkle_root(&qb.block_hashes) != qb.merkle_root {
			return Ok(false)
		}
		let Some(sig) = &qb.signature else { return Ok(false) };
		let msg = qb.signable_message();
		Ok(self.epoch_manager.verify_for_epoch(&msg, sig, qb.epoch).await?)
	}

	fn fresh_session_id(&self) -> u64 {
		self.next_session_id.fetch_add(1, Ordering::Relaxed)
	}

	/// Drives `create_bundle`/`sign_bundle` on a fixed cadence against
	/// whatever the current validator set happens to be, emitting each
	/// successfully signed bundle on `out`. A bundle that fails to sign
	/// (timeout or too few live validators) is discarded, but the block
	/// hashes it was built from go back to the front of `pending` so the
	/// next tick retries them alongside any newer arrivals.
	pub async fn run(
		self: Arc<Self>,
		out: mpsc::UnboundedSender<QuantumBundle>,
		interval: Duration,
		token: CancellationToken,
	) {
		let mut ticker = tokio::time::interval(interval);
		loop {
			tokio::select! {
				_ = token.cancelled() => break,
				_ = ticker.tick() => {
					if let Err(e) = self.tick(&out).await {
						warn!(error = %e, "bundle tick failed");
					}
				}
			}
		}
	}

	async fn tick(&self, out: &mpsc::UnboundedSender<QuantumBundle>) -> Result<(), BundleError> {
		let Some((mut qb, source)) = self.create_bundle_with_source().await? else { return Ok(()) };

		let signer_ids = self.epoch_manager.current().await?.validator_set.clone();
		let session_id = self.fresh_session_id();
		let mut prf_key = [0u8; 32];
		rand::thread_rng().fill_bytes(&mut prf_key);

		match self.sign_bundle(&mut qb, session_id, &prf_key, &signer_ids).await {
			Ok(()) => {
				info!(epoch = qb.epoch, sequence = qb.sequence, "bundle signed");
				let _ = out.send(qb);
			}
			Err(e) => {
				warn!(error = %e, "bundle failed to sign, requeuing its source hashes");
				self.requeue_front(source);
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::epoch::{DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_EPOCH_DURATION, DEFAULT_MIN_EPOCH_DURATION};

	async fn harness() -> (Arc<EpochManager>, Arc<DualSigEngine>, Vec<String>) {
		let mgr = Arc::new(EpochManager::new(
			2,
			DEFAULT_MIN_EPOCH_DURATION,
			DEFAULT_MAX_EPOCH_DURATION,
			DEFAULT_HISTORY_LIMIT,
		));
		mgr.initialize(vec!["v0".into(), "v1".into(), "v2".into()]).await.unwrap();
		let engine = Arc::new(DualSigEngine::default());
		(mgr, engine, vec!["v0".into(), "v1".into(), "v2".into()])
	}

	#[tokio::test]
	async fn bundle_signs_and_verifies() {
		let (mgr, engine, validators) = harness().await;
		let builder = BundleBuilder::new(mgr, engine);
		builder.add_block(1, [1u8; 32]);
		builder.add_block(2, [2u8; 32]);

		let mut qb = builder.create_bundle().await.unwrap().unwrap();
		assert_eq!(qb.previous_hash, [0u8; 32]);
		assert_eq!(qb.sequence, 0);

		builder.sign_bundle(&mut qb, 1, &[0xAAu8; 32], &validators).await.unwrap();
		assert!(qb.signature.is_some());
		assert!(builder.verify_bundle(&qb).await.unwrap());
	}

	#[tokio::test]
	async fn chain_links_to_previous_signed_bundle() {
		let (mgr, engine, validators) = harness().await;
		let builder = BundleBuilder::new(mgr, engine);

		builder.add_block(1, [1u8; 32]);
		let mut first = builder.create_bundle().await.unwrap().unwrap();
		builder.sign_bundle(&mut first, 1, &[0x01u8; 32], &validators).await.unwrap();
		let first_hash = first.bundle_hash();

		builder.add_block(2, [2u8; 32]);
		let second = builder.create_bundle().await.unwrap().unwrap();
		assert_eq!(second.sequence, 1);
		assert_eq!(second.previous_hash, first_hash);
	}

	#[tokio::test]
	async fn insufficient_signers_is_rejected_and_leaves_bundle_unsigned() {
		let (mgr, engine, validators) = harness().await;
		let builder = BundleBuilder::new(mgr, engine);
		builder.add_block(1, [7u8; 32]);

		let mut qb = builder.create_bundle().await.unwrap().unwrap();
		let err = builder
			.sign_bundle(&mut qb, 1, &[0u8; 32], &validators[..1])
			.await
			.unwrap_err();
		assert!(matches!(err, BundleError::Session(SessionError::InsufficientSigners { needed: 3, got: 1 })));
		assert!(qb.signature.is_none());
	}

	#[tokio::test]
	async fn sign_bundle_async_delivers_the_signed_bundle_on_its_channel() {
		let (mgr, engine, validators) = harness().await;
		let builder = Arc::new(BundleBuilder::new(mgr, engine));
		builder.add_block(1, [3u8; 32]);
		let qb = builder.create_bundle().await.unwrap().unwrap();

		let rx = builder.sign_bundle_async(qb, 1, vec![0xBBu8; 32], validators);
		let signed = rx.await.unwrap().unwrap();
		assert!(signed.signature.is_some());
		assert!(builder.verify_bundle(&signed).await.unwrap());
	}
}
