//! Multi-Chain Dispatcher.
//!
//! One bounded, drop-oldest queue per chain, each independently lockable so
//! a slow consumer on one chain never blocks submissions to another.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::types::Block;

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// A bounded FIFO of blocks for one chain. Pushing past `capacity` drops the
/// oldest entry rather than rejecting the new one or growing unbounded.
pub struct ChainQueue {
	capacity: usize,
	blocks: Mutex<VecDeque<Block>>,
}

impl ChainQueue {
	pub fn new(capacity: usize) -> Self {
		Self { capacity, blocks: Mutex::new(VecDeque::with_capacity(capacity)) }
	}

	/// Returns `true` if an older block was dropped to make room.
	pub fn push(&self, block: Block) -> bool {
		let mut blocks = self.blocks.lock().expect("chain queue mutex poisoned");
		let dropped = if blocks.len() >= self.capacity {
			blocks.pop_front();
			true
		} else {
			false
		};
		blocks.push_back(block);
		dropped
	}

	pub fn pop(&self) -> Option<Block> {
		self.blocks.lock().expect("chain queue mutex poisoned").pop_front()
	}

	pub fn len(&self) -> usize {
		self.blocks.lock().expect("chain queue mutex poisoned").len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Routes incoming blocks to per-chain queues and runs one processing loop
/// per chain. The chain map sits behind a single `RwLock` since chains are
/// registered far less often than blocks are submitted; each chain's queue
/// then has its own independent `Mutex` for the actual push/pop traffic.
pub struct Dispatcher {
	capacity: usize,
	chains: RwLock<HashMap<String, Arc<ChainQueue>>>,
}

impl Dispatcher {
	pub fn new(capacity: usize) -> Self {
		Self { capacity, chains: RwLock::new(HashMap::new()) }
	}

	pub async fn register(&self, chain_name: &str) {
		let mut chains = self.chains.write().await;
		chains.entry(chain_name.to_string()).or_insert_with(|| Arc::new(ChainQueue::new(self.capacity)));
	}

	pub async fn registered(&self) -> Vec<String> {
		self.chains.read().await.keys().cloned().collect()
	}

	async fn queue_for(&self, chain_name: &str) -> Arc<ChainQueue> {
		if let Some(q) = self.chains.read().await.get(chain_name) {
			return q.clone()
		}
		self.chains
			.write()
			.await
			.entry(chain_name.to_string())
			.or_insert_with(|| Arc::new(ChainQueue::new(self.capacity)))
			.clone()
	}

	/// Enqueues `block`, auto-registering its chain if this is the first
	/// block seen for it. Drop-oldest applies silently on overflow; callers
	/// that care can inspect queue depth via [`Dispatcher::queue_len`].
	pub async fn submit(&self, block: Block) {
		let chain_name = block.chain_name.clone();
		let queue = self.queue_for(&chain_name).await;
		if queue.push(block) {
			warn!(chain = %chain_name, "chain queue at capacity, dropped oldest block");
		}
	}

	pub async fn queue_len(&self, chain_name: &str) -> Option<usize> {
		self.chains.read().await.get(chain_name).map(|q| q.len())
	}

	/// A long-lived task draining one chain's queue and handing each block
	/// to `on_block` in arrival order. Exits when `token` is cancelled.
	pub async fn processor<F>(&self, chain_name: &str, token: CancellationToken, mut on_block: F)
	where
		F: FnMut(Block),
	{
		let queue = self.queue_for(chain_name).await;
		let mut idle = tokio::time::interval(Duration::from_millis(10));
		loop {
			tokio::select! {
				_ = token.cancelled() => {
					info!(chain = %chain_name, "processor shutting down");
					break
				}
				_ = idle.tick() => {
					while let Some(block) = queue.pop() {
						on_block(block);
					}
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Instant;

	fn block(chain: &str, height: u64) -> Block {
		Block {
			id: [height as u8; 32],
			chain_id: [0u8; 32],
			chain_name: chain.to_string(),
			height,
			timestamp: Instant::now(),
			data: vec![],
			cert: None,
		}
	}

	#[tokio::test]
	async fn submit_auto_registers_unknown_chains() {
		let dispatcher = Dispatcher::new(DEFAULT_QUEUE_CAPACITY);
		dispatcher.submit(block("eth", 1)).await;
		assert_eq!(dispatcher.registered().await, vec!["eth".to_string()]);
		assert_eq!(dispatcher.queue_len("eth").await, Some(1));
	}

	#[tokio::test]
	async fn overflow_drops_oldest_block() {
		let dispatcher = Dispatcher::new(4);
		for h in 0..6 {
			dispatcher.submit(block("eth", h)).await;
		}
		assert_eq!(dispatcher.queue_len("eth").await, Some(4));

		let queue = dispatcher.queue_for("eth").await;
		let first = queue.pop().unwrap();
		assert_eq!(first.height, 2, "oldest two blocks should have been dropped");
	}

	#[tokio::test]
	async fn independent_chains_do_not_share_capacity() {
		let dispatcher = Dispatcher::new(2);
		dispatcher.submit(block("eth", 1)).await;
		dispatcher.submit(block("btc", 1)).await;
		dispatcher.submit(block("btc", 2)).await;
		assert_eq!(dispatcher.queue_len("eth").await, Some(1));
		assert_eq!(dispatcher.queue_len("btc").await, Some(2));
	}
}
