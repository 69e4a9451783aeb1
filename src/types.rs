//! Input data model: the raw block type flowing in from chain clients.

use std::time::Instant;

/// A block submitted by an external chain producer. Immutable after enqueue.
#[derive(Clone, Debug)]
pub struct Block {
	pub id: [u8; 32],
	pub chain_id: [u8; 32],
	pub chain_name: String,
	pub height: u64,
	pub timestamp: Instant,
	pub data: Vec<u8>,
	pub cert: Option<Vec<u8>>,
}

impl Block {
	/// The hash fed into the bundle's Merkle tree. Not specified by name in
	/// a bundle's Merkle leaves are derived from block contents rather than
	/// the finalizer treating block hashing as someone else's job; a plain
	/// streaming SHA-256 over the block's identifying fields is the natural
	/// choice given `crate::crypto::hash::Hasher` is already exposed for it.
	pub fn hash(&self) -> [u8; 32] {
		crate::crypto::hash::sha256_concat(&[
			&self.id,
			&self.chain_id,
			self.chain_name.as_bytes(),
			&self.height.to_le_bytes(),
			&self.data,
		])
	}
}
