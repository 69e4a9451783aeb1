//! Threshold Scheme Registry.
//!
//! An enum is a reasonable alternative to a dynamic scheme map when the
//! scheme set is closed; Quasar's is (BLS classical, Ring-LWE threshold), so
//! [`SchemeRegistry`] is built once at [`crate::Engine`] construction and
//! never mutated afterwards.

use crate::crypto::{BlsScheme, LatticeScheme, SoftwareBls, SoftwareLattice};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SchemeId {
	BlsClassical,
	LatticeRingLwe,
}

impl SchemeId {
	pub const ALL: [SchemeId; 2] = [SchemeId::BlsClassical, SchemeId::LatticeRingLwe];
}

impl std::fmt::Display for SchemeId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			SchemeId::BlsClassical => write!(f, "bls-classical"),
			SchemeId::LatticeRingLwe => write!(f, "lattice-ring-lwe"),
		}
	}
}

/// The fixed pair of threshold schemes a dual-signature session draws on.
#[derive(Clone, Copy, Default)]
pub struct SchemeRegistry {
	bls: SoftwareBls,
	lattice: SoftwareLattice,
}

impl SchemeRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn bls(&self) -> &impl BlsScheme {
		&self.bls
	}

	pub fn lattice(&self) -> &impl LatticeScheme {
		&self.lattice
	}
}
