//! Crypto Primitives Adapter.
//!
//! Two narrow capability traits, [`BlsScheme`] and [`LatticeScheme`], each
//! backed by a single in-process software implementation. Concrete curve
//! math lives in the `bls` and `lattice` submodules; this module only wires
//! the trait seam a future hardware-accelerated backend would implement.

pub mod bls;
pub mod hash;
pub mod lattice;

use rand::RngCore;
use std::collections::BTreeMap;

/// Classical and threshold BLS signing, backed by `bls12_381`.
pub trait BlsScheme {
	type SecretKey;
	type PublicKey: Clone;
	type Signature: Clone;
	type KeyShare: Clone;
	type ShareSignature: Clone;
	type Error: std::error::Error + Send + Sync + 'static;

	fn keygen(&self, rng: &mut dyn RngCore) -> (Self::SecretKey, Self::PublicKey);
	fn sign(&self, sk: &Self::SecretKey, msg: &[u8]) -> Self::Signature;
	fn verify(&self, pk: &Self::PublicKey, sig: &Self::Signature, msg: &[u8]) -> bool;
	fn aggregate_sigs(&self, sigs: &[Self::Signature]) -> Self::Signature;
	fn aggregate_pks(&self, pks: &[Self::PublicKey]) -> Self::PublicKey;

	fn trusted_dealer(
		&self,
		t: u64,
		n: u64,
		rng: &mut dyn RngCore,
	) -> Result<(Vec<Self::KeyShare>, Self::PublicKey), Self::Error>;
	fn share_sign(&self, share: &Self::KeyShare, msg: &[u8], epoch: u64) -> Self::ShareSignature;
	fn aggregate(
		&self,
		msg: &[u8],
		shares: &[Self::ShareSignature],
		threshold_t: u64,
		epoch: u64,
	) -> Result<Self::Signature, Self::Error>;
}

/// The post-quantum (Ring-LWE, structurally emulated) threshold signing
/// capability. Two rounds: [`LatticeScheme::round1`] publishes nonce
/// commitments, [`LatticeScheme::round2`] publishes response shares, and
/// [`LatticeScheme::finalize`] combines `t+1` of them.
pub trait LatticeScheme {
	type KeyShare: Clone;
	type PublicKey: Clone;
	type Round1: Clone;
	type Round2: Clone;
	type Signature: Clone;
	type Error: std::error::Error + Send + Sync + 'static;

	fn trusted_dealer(
		&self,
		t: u64,
		n: u64,
		rng: &mut dyn RngCore,
	) -> Result<(Vec<Self::KeyShare>, Self::PublicKey), Self::Error>;

	fn round1(&self, share: &Self::KeyShare, session_id: &[u8], external_prf_key: &[u8]) -> Self::Round1;

	fn round2(
		&self,
		share: &Self::KeyShare,
		group_pk: &Self::PublicKey,
		session_id: &[u8],
		external_prf_key: &[u8],
		msg: &[u8],
		commitments: &BTreeMap<u64, Self::Round1>,
	) -> Self::Round2;

	fn finalize(
		&self,
		msg: &[u8],
		commitments: &BTreeMap<u64, Self::Round1>,
		responses: &[Self::Round2],
		threshold_t: u64,
	) -> Result<Self::Signature, Self::Error>;

	fn verify(&self, pk: &Self::PublicKey, msg: &[u8], sig: &Self::Signature) -> bool;
}

/// The single in-process implementation of [`BlsScheme`].
#[derive(Default, Clone, Copy)]
pub struct SoftwareBls;

impl BlsScheme for SoftwareBls {
	type SecretKey = bls::SecretKey;
	type PublicKey = bls::PublicKey;
	type Signature = bls::Signature;
	type KeyShare = bls::KeyShare;
	type ShareSignature = bls::ShareSignature;
	type Error = bls::BlsError;

	fn keygen(&self, rng: &mut dyn RngCore) -> (Self::SecretKey, Self::PublicKey) {
		bls::keygen(rng)
	}

	fn sign(&self, sk: &Self::SecretKey, msg: &[u8]) -> Self::Signature {
		bls::sign(sk, msg)
	}

	fn verify(&self, pk: &Self::PublicKey, sig: &Self::Signature, msg: &[u8]) -> bool {
		bls::verify(pk, sig, msg)
	}

	fn aggregate_sigs(&self, sigs: &[Self::Signature]) -> Self::Signature {
		bls::aggregate_sigs(sigs)
	}

	fn aggregate_pks(&self, pks: &[Self::PublicKey]) -> Self::PublicKey {
		bls::aggregate_pks(pks)
	}

	fn trusted_dealer(
		&self,
		t: u64,
		n: u64,
		rng: &mut dyn RngCore,
	) -> Result<(Vec<Self::KeyShare>, Self::PublicKey), Self::Error> {
		bls::trusted_dealer(t, n, rng)
	}

	fn share_sign(&self, share: &Self::KeyShare, msg: &[u8], epoch: u64) -> Self::ShareSignature {
		share.sign(msg, epoch)
	}

	fn aggregate(
		&self,
		msg: &[u8],
		shares: &[Self::ShareSignature],
		threshold_t: u64,
		epoch: u64,
	) -> Result<Self::Signature, Self::Error> {
		bls::aggregate(msg, shares, threshold_t, epoch)
	}
}

/// The single in-process implementation of [`LatticeScheme`].
#[derive(Default, Clone, Copy)]
pub struct SoftwareLattice;

impl LatticeScheme for SoftwareLattice {
	type KeyShare = lattice::KeyShare;
	type PublicKey = lattice::PublicKey;
	type Round1 = lattice::Round1Output;
	type Round2 = lattice::Round2Output;
	type Signature = lattice::Signature;
	type Error = lattice::LatticeError;

	fn trusted_dealer(
		&self,
		t: u64,
		n: u64,
		rng: &mut dyn RngCore,
	) -> Result<(Vec<Self::KeyShare>, Self::PublicKey), Self::Error> {
		lattice::trusted_dealer(t, n, rng)
	}

	fn round1(&self, share: &Self::KeyShare, session_id: &[u8], external_prf_key: &[u8]) -> Self::Round1 {
		lattice::round1(share, session_id, external_prf_key)
	}

	fn round2(
		&self,
		share: &Self::KeyShare,
		group_pk: &Self::PublicKey,
		session_id: &[u8],
		external_prf_key: &[u8],
		msg: &[u8],
		commitments: &BTreeMap<u64, Self::Round1>,
	) -> Self::Round2 {
		lattice::round2(share, group_pk, session_id, external_prf_key, msg, commitments)
	}

	fn finalize(
		&self,
		msg: &[u8],
		commitments: &BTreeMap<u64, Self::Round1>,
		responses: &[Self::Round2],
		threshold_t: u64,
	) -> Result<Self::Signature, Self::Error> {
		lattice::finalize(msg, commitments, responses, threshold_t)
	}

	fn verify(&self, pk: &Self::PublicKey, msg: &[u8], sig: &Self::Signature) -> bool {
		lattice::verify(pk, msg, sig)
	}
}
