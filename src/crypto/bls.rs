//! BLS classical and BLS threshold capabilities.
//!
//! The classical API aggregates independent signatures/public keys produced
//! by single-party `keygen`/`sign`. The threshold API is a Shamir-shared BLS
//! key: `t+1` of `n` parties combine their partial signatures via Lagrange
//! interpolation at the origin, which (by construction) equals the signature
//! the holder of the reconstructed secret would have produced directly.
//!
//! Built on `bls12_381`, the pairing crate reached for by the wider
//! threshold-signature corpus (aptos-core's `bls12381_sigs`, the
//! `celo-org/threshold-bls-rs` `Poly`/`Share`/`aggregate` shape this module
//! mirrors) for exactly this construction.

use std::collections::BTreeMap;

use bls12_381::hash_to_curve::{ExpandMsgXmd, HashToCurve};
use bls12_381::{G1Affine, G1Projective, G2Affine, G2Projective, Scalar};
use ff::Field;
use group::{Curve, Group};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const SIG_DST: &[u8] = b"QUASAR-BLS-SIG-BLS12381G2_XMD:SHA-256_SSWU_RO_";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlsError {
	#[error("threshold scheme requires t < n and t >= 1, got t={t}, n={n}")]
	InvalidParameters { t: u64, n: u64 },
	#[error("insufficient shares: need >= {needed}, got {got} distinct signer indices")]
	InsufficientShares { needed: usize, got: usize },
	#[error("duplicate signer index {0} in share set")]
	DuplicateSignerIndex(u64),
	#[error("share from signer {index} targets epoch {got}, expected {expected}")]
	EpochMismatch { index: u64, expected: u64, got: u64 },
}

fn hash_to_g2(msg: &[u8]) -> G2Projective {
	<G2Projective as HashToCurve<ExpandMsgXmd<sha2::Sha256>>>::hash_to_curve(msg, SIG_DST)
}

/// A BLS secret/public key pair for the non-threshold ("classical") API.
#[derive(Clone)]
pub struct SecretKey(Scalar);

#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Debug)]
pub struct PublicKey(#[serde(with = "g1_bytes")] G1Affine);

#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Debug)]
pub struct Signature(#[serde(with = "g2_bytes")] G2Affine);

mod g1_bytes {
	use bls12_381::G1Affine;
	use group::GroupEncoding;
	use serde::{Deserialize, Deserializer, Serialize, Serializer};

	pub fn serialize<S: Serializer>(p: &G1Affine, s: S) -> Result<S::Ok, S::Error> {
		p.to_bytes().as_ref().to_vec().serialize(s)
	}
	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<G1Affine, D::Error> {
		let bytes = Vec::<u8>::deserialize(d)?;
		let mut repr = <G1Affine as GroupEncoding>::Repr::default();
		repr.as_mut().copy_from_slice(&bytes);
		Option::from(G1Affine::from_bytes(&repr))
			.ok_or_else(|| serde::de::Error::custom("invalid G1 point"))
	}
}

mod g2_bytes {
	use bls12_381::G2Affine;
	use group::GroupEncoding;
	use serde::{Deserialize, Deserializer, Serialize, Serializer};

	pub fn serialize<S: Serializer>(p: &G2Affine, s: S) -> Result<S::Ok, S::Error> {
		p.to_bytes().as_ref().to_vec().serialize(s)
	}
	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<G2Affine, D::Error> {
		let bytes = Vec::<u8>::deserialize(d)?;
		let mut repr = <G2Affine as GroupEncoding>::Repr::default();
		repr.as_mut().copy_from_slice(&bytes);
		Option::from(G2Affine::from_bytes(&repr))
			.ok_or_else(|| serde::de::Error::custom("invalid G2 point"))
	}
}

impl PublicKey {
	pub fn as_bytes(&self) -> Vec<u8> {
		use group::GroupEncoding;
		self.0.to_bytes().as_ref().to_vec()
	}
}

impl Signature {
	pub fn as_bytes(&self) -> Vec<u8> {
		use group::GroupEncoding;
		self.0.to_bytes().as_ref().to_vec()
	}
}

/// Single-party BLS keygen/sign/verify and classical (non-threshold)
/// aggregation of independent signatures/public keys.
pub fn keygen(rng: &mut impl RngCore) -> (SecretKey, PublicKey) {
	let sk = Scalar::random(rng);
	let pk = (G1Projective::generator() * sk).to_affine();
	(SecretKey(sk), PublicKey(pk))
}

pub fn sign(sk: &SecretKey, msg: &[u8]) -> Signature {
	Signature((hash_to_g2(msg) * sk.0).to_affine())
}

pub fn verify(pk: &PublicKey, sig: &Signature, msg: &[u8]) -> bool {
	let h = hash_to_g2(msg).to_affine();
	bls12_381::pairing(&pk.0, &h) == bls12_381::pairing(&G1Affine::generator(), &sig.0)
}

pub fn aggregate_sigs(sigs: &[Signature]) -> Signature {
	let sum = sigs.iter().fold(G2Projective::identity(), |acc, s| acc + G2Projective::from(s.0));
	Signature(sum.to_affine())
}

pub fn aggregate_pks(pks: &[PublicKey]) -> PublicKey {
	let sum = pks.iter().fold(G1Projective::identity(), |acc, p| acc + G1Projective::from(p.0));
	PublicKey(sum.to_affine())
}

/// One party's slice of a `(t, n)`-threshold BLS key. Useless on its own.
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyShare {
	pub index: u64,
	#[serde(with = "scalar_bytes")]
	secret: Scalar,
}

mod scalar_bytes {
	use bls12_381::Scalar;
	use serde::{Deserialize, Deserializer, Serialize, Serializer};

	pub fn serialize<S: Serializer>(s: &Scalar, ser: S) -> Result<S::Ok, S::Error> {
		s.to_bytes().to_vec().serialize(ser)
	}
	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Scalar, D::Error> {
		let bytes = Vec::<u8>::deserialize(d)?;
		let arr: [u8; 32] =
			bytes.try_into().map_err(|_| serde::de::Error::custom("expected 32 bytes"))?;
		Option::from(Scalar::from_bytes(&arr))
			.ok_or_else(|| serde::de::Error::custom("invalid scalar"))
	}
}

/// A partial signature produced by one threshold share, tagged with the
/// epoch its key share belongs to so aggregation can reject a share signed
/// under a stale or different epoch's key instead of silently combining it.
#[derive(Clone, Serialize, Deserialize)]
pub struct ShareSignature {
	pub index: u64,
	pub epoch: u64,
	#[serde(with = "g2_bytes")]
	sig: G2Affine,
}

fn poly_eval(coeffs: &[Scalar], x: Scalar) -> Scalar {
	coeffs.iter().rev().fold(Scalar::ZERO, |acc, c| acc * x + c)
}

fn lagrange_coeff_at_zero(index: u64, all_indices: &[u64]) -> Scalar {
	let xi = Scalar::from(index);
	let mut num = Scalar::ONE;
	let mut den = Scalar::ONE;
	for &j in all_indices {
		if j == index {
			continue
		}
		let xj = Scalar::from(j);
		num *= xj;
		den *= xj - xi;
	}
	num * den.invert().expect("distinct indices imply nonzero denominator")
}

/// Generate `n` Shamir shares of a fresh random secret, requiring `t+1`
/// distinct shares to reconstruct a valid signature; fewer must fail.
pub fn trusted_dealer(
	t: u64,
	n: u64,
	rng: &mut impl RngCore,
) -> Result<(Vec<KeyShare>, PublicKey), BlsError> {
	if t == 0 || t >= n {
		return Err(BlsError::InvalidParameters { t, n })
	}
	let coeffs: Vec<Scalar> = (0..=t).map(|_| Scalar::random(&mut *rng)).collect();
	let group_pk = (G1Projective::generator() * coeffs[0]).to_affine();
	let shares = (1..=n)
		.map(|i| KeyShare { index: i, secret: poly_eval(&coeffs, Scalar::from(i)) })
		.collect();
	Ok((shares, PublicKey(group_pk)))
}

impl KeyShare {
	/// Produce this party's partial signature over `msg`, tagged with `epoch`
	/// so `aggregate` can check it against the group the other shares claim.
	pub fn sign(&self, msg: &[u8], epoch: u64) -> ShareSignature {
		ShareSignature { index: self.index, epoch, sig: (hash_to_g2(msg) * self.secret).to_affine() }
	}
}

/// Combine `>= t+1` distinct partial signatures into the group signature.
///
/// Deduplicates by signer index (first occurrence wins, an ascending-index
/// tie-break) and uses the lowest `t+1` indices when more are supplied. Every
/// share must be tagged with `epoch`; a share from any other epoch aborts
/// the whole aggregation rather than being silently combined in.
pub fn aggregate(
	msg: &[u8],
	shares: &[ShareSignature],
	threshold_t: u64,
	epoch: u64,
) -> Result<Signature, BlsError> {
	let needed = threshold_t as usize + 1;

	let mut by_index: BTreeMap<u64, &ShareSignature> = BTreeMap::new();
	for s in shares {
		if s.epoch != epoch {
			return Err(BlsError::EpochMismatch { index: s.index, expected: epoch, got: s.epoch })
		}
		by_index.entry(s.index).or_insert(s);
	}

	if by_index.len() < needed {
		return Err(BlsError::InsufficientShares { needed, got: by_index.len() })
	}

	let committee: Vec<u64> = by_index.keys().take(needed).copied().collect();

	let sum = committee
		.iter()
		.fold(G2Projective::identity(), |acc, idx| {
			let lambda = lagrange_coeff_at_zero(*idx, &committee);
			acc + G2Projective::from(by_index[idx].sig) * lambda
		});

	Ok(Signature(sum.to_affine()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	fn rng() -> StdRng {
		StdRng::seed_from_u64(42)
	}

	#[test]
	fn classical_sign_verify_roundtrip() {
		let mut rng = rng();
		let (sk, pk) = keygen(&mut rng);
		let sig = sign(&sk, b"hello");
		assert!(verify(&pk, &sig, b"hello"));
		assert!(!verify(&pk, &sig, b"goodbye"));
	}

	#[test]
	fn classical_aggregate() {
		let mut rng = rng();
		let (sk1, pk1) = keygen(&mut rng);
		let (sk2, pk2) = keygen(&mut rng);
		let msg = b"bundle";
		let agg_sig = aggregate_sigs(&[sign(&sk1, msg), sign(&sk2, msg)]);
		let agg_pk = aggregate_pks(&[pk1, pk2]);
		assert!(verify(&agg_pk, &agg_sig, msg));
	}

	#[test]
	fn threshold_requires_exactly_t_plus_one() {
		let mut rng = rng();
		let (shares, group_pk) = trusted_dealer(2, 3, &mut rng).unwrap();
		let msg = b"quantum-bundle";

		let partials: Vec<_> = shares.iter().map(|s| s.sign(msg, 0)).collect();

		// Two shares (t=2 means need t+1=3) must fail.
		let err = aggregate(msg, &partials[0..2], 2, 0).unwrap_err();
		assert_eq!(err, BlsError::InsufficientShares { needed: 3, got: 2 });

		// Three shares succeed and verify against the group key.
		let sig = aggregate(msg, &partials[0..3], 2, 0).unwrap();
		assert!(verify(&group_pk, &sig, msg));
	}

	#[test]
	fn threshold_rejects_invalid_parameters() {
		let mut rng = rng();
		assert!(trusted_dealer(3, 3, &mut rng).is_err());
		assert!(trusted_dealer(0, 3, &mut rng).is_err());
	}

	#[test]
	fn aggregate_rejects_a_share_from_a_different_epoch() {
		let mut rng = rng();
		let (shares, _group_pk) = trusted_dealer(1, 3, &mut rng).unwrap();
		let msg = b"quantum-bundle";

		let mut partials: Vec<_> = shares.iter().take(2).map(|s| s.sign(msg, 5)).collect();
		partials[1].epoch = 6;

		let err = aggregate(msg, &partials, 1, 5).unwrap_err();
		assert_eq!(err, BlsError::EpochMismatch { index: partials[1].index, expected: 5, got: 6 });
	}
}
