//! Shared types for the Dual-Signature Threshold Engine.

use crate::crypto::{bls, lattice};

/// The per-session state machine, advanced by message arrival rather than
/// blocking coroutines so a slow peer can never stall the engine thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
	Init,
	Round1Done,
	ReadyRound2,
	Round2Done,
	Finalizable,
	Complete,
	Aborted,
}

/// The output of the dual-signature engine, attached to a [`crate::bundle::QuantumBundle`]
/// exactly once. Wire format: `{u32 len(bls)} || bls_bytes ||
/// {u32 len(pq)} || pq_bytes || u32 signer_count || u64 epoch`, all integers
/// little-endian.
#[derive(Clone, Debug)]
pub struct DualSignature {
	pub bls_aggregate: bls::Signature,
	pub pq_signature: lattice::Signature,
	pub signer_count: u32,
	pub epoch: u64,
}

impl DualSignature {
	pub fn to_bytes(&self) -> Vec<u8> {
		let bls_bytes = self.bls_aggregate.as_bytes();
		let pq_bytes = self.pq_signature.to_bytes();

		let mut out = Vec::with_capacity(4 + bls_bytes.len() + 4 + pq_bytes.len() + 4 + 8);
		out.extend_from_slice(&(bls_bytes.len() as u32).to_le_bytes());
		out.extend_from_slice(&bls_bytes);
		out.extend_from_slice(&(pq_bytes.len() as u32).to_le_bytes());
		out.extend_from_slice(&pq_bytes);
		out.extend_from_slice(&self.signer_count.to_le_bytes());
		out.extend_from_slice(&self.epoch.to_le_bytes());
		out
	}
}
