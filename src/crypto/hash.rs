//! Streaming SHA-256 and the Merkle construction used by bundle hashing.
//!
//! Used by the bundle builder to hash and root batches of block hashes.

use sha2::{Digest, Sha256};

pub const HASH_LEN: usize = 32;

/// A streaming SHA-256 hasher, mirroring the `update`/`finalize` shape the
/// crypto adapter is required to expose.
#[derive(Default, Clone)]
pub struct Hasher(Sha256);

impl Hasher {
	pub fn new() -> Self {
		Self(Sha256::new())
	}

	pub fn update(&mut self, data: impl AsRef<[u8]>) {
		self.0.update(data);
	}

	pub fn finalize(self) -> [u8; HASH_LEN] {
		self.0.finalize().into()
	}
}

/// One-shot SHA-256 over the concatenation of all slices.
pub fn sha256_concat(parts: &[&[u8]]) -> [u8; HASH_LEN] {
	let mut hasher = Hasher::new();
	for part in parts {
		hasher.update(part);
	}
	hasher.finalize()
}

/// Merkle root over `leaves` in insertion order.
///
/// Internal node = `sha256(left || right)`. An odd-length level duplicates
/// its last element before pairing. Empty input yields the all-zero root;
/// a single leaf is its own root.
pub fn merkle_root(leaves: &[[u8; HASH_LEN]]) -> [u8; HASH_LEN] {
	if leaves.is_empty() {
		return [0u8; HASH_LEN]
	}

	let mut level: Vec<[u8; HASH_LEN]> = leaves.to_vec();
	while level.len() > 1 {
		let mut next = Vec::with_capacity(level.len().div_ceil(2));
		let mut iter = level.chunks(2);
		while let Some(pair) = iter.next() {
			let (left, right) = if pair.len() == 2 { (&pair[0], &pair[1]) } else { (&pair[0], &pair[0]) };
			next.push(sha256_concat(&[left, right]));
		}
		level = next;
	}
	level[0]
}
