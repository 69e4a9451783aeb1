//! Quasar: a post-quantum finality layer combining a classical BLS threshold
//! signature with a structurally-emulated Ring-LWE threshold signature over
//! cadence-batched, Merkle-chained bundles of block hashes from multiple
//! source chains.
//!
//! [`Engine`] is the single entry point a host process drives: submit
//! blocks, read back finalized bundles, and mutate the validator set. Every
//! other module is reachable but none of them needs to be touched directly
//! for the common case.

pub mod bundle;
pub mod client;
pub mod config;
pub mod crypto;
pub mod dispatcher;
pub mod epoch;
pub mod error;
pub mod registry;
pub mod types;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

pub use bundle::QuantumBundle;
pub use client::DualSignature;
pub use config::QuasarConfig;
pub use error::QuasarError;
pub use types::Block;

use bundle::BundleBuilder;
use client::DualSigEngine;
use dispatcher::Dispatcher;
use epoch::{EpochManager, ValidatorId};

/// Point-in-time counters a host process can poll or export.
#[derive(Clone, Copy, Debug, Default)]
pub struct Stats {
	pub blocks_submitted: u64,
	pub bundles_finalized: u64,
	pub current_epoch: u64,
}

/// Everything needed to run Quasar: the chain-agnostic dispatcher, the
/// cadence-driven bundle builder, the epoch manager behind both, and the
/// background tasks tying them together. Not `Clone` — wrap in `Arc` and
/// clone that instead.
pub struct Engine {
	config: QuasarConfig,
	epoch_manager: Arc<EpochManager>,
	dispatcher: Arc<Dispatcher>,
	bundle_builder: Arc<BundleBuilder>,
	finalized_tx: mpsc::UnboundedSender<QuantumBundle>,
	finalized_rx: Mutex<Option<mpsc::UnboundedReceiver<QuantumBundle>>>,
	finalized_hashes: Mutex<HashSet<[u8; 32]>>,
	token: CancellationToken,
	blocks_submitted: AtomicU64,
	bundles_finalized: AtomicU64,
	running_chains: Mutex<HashSet<String>>,
}

impl Engine {
	pub fn new(config: QuasarConfig) -> Arc<Self> {
		let epoch_manager = Arc::new(EpochManager::new(
			config.threshold_t,
			config.min_epoch_duration(),
			config.max_epoch_duration(),
			config.history_limit,
		));
		let dual_sig_engine = Arc::new(DualSigEngine::new(config.session_timeout()));
		let dispatcher = Arc::new(Dispatcher::new(config.chain_queue_capacity));
		let bundle_builder =
			Arc::new(BundleBuilder::new(epoch_manager.clone(), dual_sig_engine.clone()));
		let (finalized_tx, finalized_rx) = mpsc::unbounded_channel();

		Arc::new(Self {
			config,
			epoch_manager,
			dispatcher,
			bundle_builder,
			finalized_tx,
			finalized_rx: Mutex::new(Some(finalized_rx)),
			finalized_hashes: Mutex::new(HashSet::new()),
			token: CancellationToken::new(),
			blocks_submitted: AtomicU64::new(0),
			bundles_finalized: AtomicU64::new(0),
			running_chains: Mutex::new(HashSet::new()),
		})
	}

	/// First-time validator set setup; must run before [`Engine::start`].
	pub async fn init_validators(
		&self,
		validator_ids: Vec<ValidatorId>,
	) -> Result<(), error::EpochError> {
		self.epoch_manager.initialize(validator_ids).await?;
		Ok(())
	}

	/// Spawns the bundle cadence loop, one dispatcher processor per chain
	/// already registered, and a periodic sweep of timed-out signing
	/// sessions. Safe to call once per `Engine`; a second call is a no-op
	/// beyond spawning new processors for chains registered since.
	pub fn start(self: &Arc<Self>) {
		let (internal_tx, mut internal_rx) = mpsc::unbounded_channel();
		let builder = self.bundle_builder.clone();
		let token = self.token.clone();
		let interval = self.config.bundle_interval();
		tokio::spawn(async move {
			builder.run(internal_tx, interval, token).await;
		});

		let this = self.clone();
		tokio::spawn(async move {
			while let Some(qb) = internal_rx.recv().await {
				this.bundles_finalized.fetch_add(1, Ordering::Relaxed);
				this.finalized_hashes.lock().await.insert(qb.bundle_hash());
				info!(epoch = qb.epoch, sequence = qb.sequence, "bundle finalized");
				if this.finalized_tx.send(qb).is_err() {
					break
				}
			}
		});

		let sweep_builder = self.bundle_builder.clone();
		let sweep_token = self.token.clone();
		let sweep_interval = self.config.session_timeout();
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(sweep_interval);
			loop {
				tokio::select! {
					_ = sweep_token.cancelled() => break,
					_ = ticker.tick() => sweep_builder.sweep_expired_sessions(),
				}
			}
		});
	}

	pub fn stop(&self) {
		self.token.cancel();
	}

	/// Enqueues a block for its chain, auto-registering the chain and
	/// spawning its processor on first sight. The processor, not `submit`
	/// itself, is what feeds the block's hash into the bundle builder —
	/// `submit` only ever touches the dispatcher.
	#[instrument(skip(self, block), fields(chain = %block.chain_name, height = block.height))]
	pub async fn submit(self: &Arc<Self>, block: Block) {
		let chain_name = block.chain_name.clone();
		self.dispatcher.register(&chain_name).await;
		self.ensure_processor(&chain_name).await;

		self.dispatcher.submit(block).await;
		self.blocks_submitted.fetch_add(1, Ordering::Relaxed);
	}

	async fn ensure_processor(self: &Arc<Self>, chain_name: &str) {
		let mut running = self.running_chains.lock().await;
		if running.contains(chain_name) {
			return
		}
		running.insert(chain_name.to_string());

		let this = self.clone();
		let token = self.token.clone();
		let chain_name = chain_name.to_string();
		tokio::spawn(async move {
			let builder = this.bundle_builder.clone();
			this.dispatcher
				.processor(&chain_name, token, move |block| {
					builder.add_block(block.height, block.hash());
				})
				.await;
		});
	}

	/// Takes ownership of the finalized-bundle stream. Only the first caller
	/// after construction (or after a prior receiver was dropped) gets
	/// `Some`; later calls see `None`.
	pub async fn finalized_stream(&self) -> Option<mpsc::UnboundedReceiver<QuantumBundle>> {
		self.finalized_rx.lock().await.take()
	}

	pub async fn verify_bundle(&self, qb: &QuantumBundle) -> Result<bool, error::BundleError> {
		self.bundle_builder.verify_bundle(qb).await
	}

	/// `true` once a bundle whose `bundle_hash()` is `bundle_hash` has been
	/// observed on the finalized-bundle stream.
	pub async fn is_finalized(&self, bundle_hash: &[u8; 32]) -> bool {
		self.finalized_hashes.lock().await.contains(bundle_hash)
	}

	/// Attempts a rotation; `Ok(true)` iff the validator set actually
	/// changed and a new epoch now exists.
	pub async fn update_validator_set(
		&self,
		validator_ids: Vec<ValidatorId>,
		force: bool,
	) -> Result<bool, error::EpochError> {
		Ok(self.epoch_manager.rotate(validator_ids, force).await?.is_some())
	}

	/// Adds `validator_id` to the current validator set and rotates to a new
	/// epoch. A no-op (`Ok(false)`) if the validator is already present.
	pub async fn add_validator(&self, validator_id: ValidatorId) -> Result<bool, error::EpochError> {
		let mut validator_set = self.epoch_manager.current().await?.validator_set.clone();
		if validator_set.contains(&validator_id) {
			return Ok(false)
		}
		validator_set.push(validator_id);
		Ok(self.epoch_manager.rotate(validator_set, false).await?.is_some())
	}

	/// Removes `validator_id` from the current validator set and rotates to
	/// a new epoch. A no-op (`Ok(false)`) if the validator isn't present.
	pub async fn remove_validator(&self, validator_id: &str) -> Result<bool, error::EpochError> {
		let mut validator_set = self.epoch_manager.current().await?.validator_set.clone();
		let before = validator_set.len();
		validator_set.retain(|v| v != validator_id);
		if validator_set.len() == before {
			return Ok(false)
		}
		Ok(self.epoch_manager.rotate(validator_set, false).await?.is_some())
	}

	pub async fn stats(&self) -> Stats {
		let current_epoch = self.epoch_manager.current().await.map(|k| k.epoch).unwrap_or(0);
		Stats {
			blocks_submitted: self.blocks_submitted.load(Ordering::Relaxed),
			bundles_finalized: self.bundles_finalized.load(Ordering::Relaxed),
			current_epoch,
		}
	}
}
