//! The Ring-LWE threshold signature capability.
//!
//! The concrete lattice sampling and Ring-LWE hardness
//! assumptions out of scope, invoked only through the abstract two-round
//! commit/respond contract described there. `SoftwareLattice` below is a
//! structurally faithful reference implementation of that contract — a
//! FROST-style two-round threshold Schnorr signature over a prime-order
//! group — modelled directly on this codebase's own threshold-signing round
//! structure (`client/signing/signing_detail.rs`: deterministic nonce pairs
//! `(d, e)`, a binding value `rho_i` per signer, and a Lagrange-weighted
//! local response combined into a single `(R, z)` pair). It makes no
//! post-quantum hardness claim; it exists to exercise the session state
//! machine and dual-signature plumbing with a second, independent signature
//! scheme.
//!
//! Uses `curve25519-dalek`'s Ristretto group, the prime-order group the wider
//! threshold-Schnorr corpus (and this codebase's own `crypto/curve25519.rs`)
//! builds on.

use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LatticeError {
	#[error("threshold scheme requires t < n and t >= 1, got t={t}, n={n}")]
	InvalidParameters { t: u64, n: u64 },
	#[error("insufficient signers: need >= {needed}, got {got}")]
	InsufficientSigners { needed: usize, got: usize },
	#[error("signer index {0} reused its round-1 output for a session it already completed")]
	SessionReuse(u64),
	#[error("round-2 response from signer {0} failed verification against its round-1 commitment")]
	InvalidRound2Share(u64),
}

fn scalar_from_wide(bytes: &[u8; 64]) -> Scalar {
	Scalar::from_bytes_mod_order_wide(bytes)
}

fn prf_expand(prf_key: &[u8; 32], session_id: &[u8], external_prf_key: &[u8], label: &[u8]) -> [u8; 64] {
	let mut mac = HmacSha256::new_from_slice(prf_key).expect("hmac accepts any key length");
	mac.update(label);
	mac.update(session_id);
	mac.update(external_prf_key);
	let first = mac.finalize().into_bytes();

	let mut mac2 = HmacSha256::new_from_slice(prf_key).expect("hmac accepts any key length");
	mac2.update(&first);
	mac2.update(label);
	mac2.update(session_id);
	mac2.update(external_prf_key);
	let second = mac2.finalize().into_bytes();

	let mut out = [0u8; 64];
	out[..32].copy_from_slice(&first);
	out[32..].copy_from_slice(&second);
	out
}

/// One party's slice of a `(t, n)`-threshold Schnorr key, plus the PRF key it
/// uses to derandomize its own nonces per signing session.
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyShare {
	pub index: u64,
	#[serde(with = "scalar_bytes")]
	secret: Scalar,
	prf_key: [u8; 32],
}

mod scalar_bytes {
	use curve25519_dalek::scalar::Scalar;
	use serde::{Deserialize, Deserializer, Serialize, Serializer};

	pub fn serialize<S: Serializer>(s: &Scalar, ser: S) -> Result<S::Ok, S::Error> {
		s.to_bytes().to_vec().serialize(ser)
	}
	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Scalar, D::Error> {
		let bytes = Vec::<u8>::deserialize(d)?;
		let arr: [u8; 32] =
			bytes.try_into().map_err(|_| serde::de::Error::custom("expected 32 bytes"))?;
		Option::from(Scalar::from_canonical_bytes(arr))
			.ok_or_else(|| serde::de::Error::custom("non-canonical scalar"))
	}
}

mod point_bytes {
	use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
	use serde::{Deserialize, Deserializer, Serialize, Serializer};

	pub fn serialize<S: Serializer>(p: &RistrettoPoint, ser: S) -> Result<S::Ok, S::Error> {
		p.compress().to_bytes().to_vec().serialize(ser)
	}
	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<RistrettoPoint, D::Error> {
		let bytes = Vec::<u8>::deserialize(d)?;
		let arr: [u8; 32] =
			bytes.try_into().map_err(|_| serde::de::Error::custom("expected 32 bytes"))?;
		CompressedRistretto(arr)
			.decompress()
			.ok_or_else(|| serde::de::Error::custom("invalid ristretto point"))
	}
}

#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Debug)]
pub struct PublicKey(#[serde(with = "point_bytes")] RistrettoPoint);

/// A party's round-1 output: two nonce commitments, `D` and `E`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Round1Output {
	pub index: u64,
	#[serde(with = "point_bytes")]
	d_pub: RistrettoPoint,
	#[serde(with = "point_bytes")]
	e_pub: RistrettoPoint,
}

/// A party's round-2 response: its share of the aggregated scalar `z`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Round2Output {
	pub index: u64,
	#[serde(with = "scalar_bytes")]
	z_i: Scalar,
}

/// The combined signature: `Delta`, the aggregated nonce commitment, and
/// `Z`, the aggregated scalar response.
#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Debug)]
pub struct Signature {
	#[serde(with = "point_bytes")]
	pub delta: RistrettoPoint,
	#[serde(with = "scalar_bytes")]
	pub z: Scalar,
}

impl Signature {
	pub fn to_bytes(&self) -> [u8; 64] {
		let mut out = [0u8; 64];
		out[..32].copy_from_slice(self.delta.compress().as_bytes());
		out[32..].copy_from_slice(self.z.as_bytes());
		out
	}
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
	num * den.invert()
}

/// A per-signer internal nonce pair, kept locally between round 1 and round 2.
struct NonceSecret {
	d: Scalar,
	e: Scalar,
}

fn derive_nonces(share: &KeyShare, session_id: &[u8], external_prf_key: &[u8]) -> NonceSecret {
	let d = scalar_from_wide(&prf_expand(&share.prf_key, session_id, external_prf_key, b"QUASAR-LATTICE-NONCE-D"));
	let e = scalar_from_wide(&prf_expand(&share.prf_key, session_id, external_prf_key, b"QUASAR-LATTICE-NONCE-E"));
	NonceSecret { d, e }
}

/// Round 1: derive this party's deterministic nonce pair for
/// `(session_id, external_prf_key)` and publish the two nonce commitments.
/// Calling this again with the same inputs reproduces byte-identical
/// output by design. Reusing `(session_id, external_prf_key)` across two
/// distinct messages is a critical misuse: the two signatures would share a
/// nonce pair, which is exactly the failure mode that leaks a
/// Schnorr-family secret key.
pub fn round1(share: &KeyShare, session_id: &[u8], external_prf_key: &[u8]) -> Round1Output {
	let nonces = derive_nonces(share, session_id, external_prf_key);
	Round1Output {
		index: share.index,
		d_pub: RISTRETTO_BASEPOINT_POINT * nonces.d,
		e_pub: RISTRETTO_BASEPOINT_POINT * nonces.e,
	}
}

fn binding_value(index: u64, msg: &[u8], commitments: &BTreeMap<u64, Round1Output>) -> Scalar {
	let mut hasher = sha2::Sha256::default();
	use sha2::Digest;
	hasher.update(b"QUASAR-LATTICE-RHO");
	hasher.update(index.to_le_bytes());
	hasher.update(msg);
	for (idx, c) in commitments {
		hasher.update(idx.to_le_bytes());
		hasher.update(c.d_pub.compress().as_bytes());
		hasher.update(c.e_pub.compress().as_bytes());
	}
	let digest: [u8; 32] = hasher.finalize().into();
	let mut wide = [0u8; 64];
	wide[..32].copy_from_slice(&digest);
	scalar_from_wide(&wide)
}

fn group_commitment(commitments: &BTreeMap<u64, Round1Output>, msg: &[u8]) -> RistrettoPoint {
	commitments.iter().fold(RistrettoPoint::identity(), |acc, (idx, c)| {
		let rho = binding_value(*idx, msg, commitments);
		acc + c.d_pub + c.e_pub * rho
	})
}

fn challenge(group_pk: &PublicKey, delta: &RistrettoPoint, msg: &[u8]) -> Scalar {
	let mut hasher = sha2::Sha256::default();
	use sha2::Digest;
	hasher.update(b"QUASAR-LATTICE-CHALLENGE");
	hasher.update(delta.compress().as_bytes());
	hasher.update(group_pk.0.compress().as_bytes());
	hasher.update(msg);
	let digest: [u8; 32] = hasher.finalize().into();
	let mut wide = [0u8; 64];
	wide[..32].copy_from_slice(&digest);
	scalar_from_wide(&wide)
}

/// Round 2: using every participant's round-1 commitments, this signer's own
/// local nonce pair and the group public key (needed to derive the Schnorr
/// challenge), produce this signer's share of the aggregated response `z`.
pub fn round2(
	share: &KeyShare,
	group_pk: &PublicKey,
	session_id: &[u8],
	external_prf_key: &[u8],
	msg: &[u8],
	commitments: &BTreeMap<u64, Round1Output>,
) -> Round2Output {
	let nonces = derive_nonces(share, session_id, external_prf_key);
	let delta = group_commitment(commitments, msg);
	let c = challenge(group_pk, &delta, msg);

	let rho_i = binding_value(share.index, msg, commitments);
	let all_indices: Vec<u64> = commitments.keys().copied().collect();
	let lambda_i = lagrange_coeff_at_zero(share.index, &all_indices);

	Round2Output {
		index: share.index,
		z_i: nonces.d + nonces.e * rho_i + lambda_i * share.secret * c,
	}
}

/// Finalize: combine `>= t+1` round-2 shares into the final `(Delta, Z)`
/// signature.
///
/// `Delta` is computed only over the signer indices actually present in
/// `responses`, not every index in `commitments` — a signer who published a
/// round-1 commitment but never returned a round-2 response is excluded from
/// the committee rather than left as a dangling `D`/`E` contribution that
/// would desynchronize `Delta` from the summed `Z`.
pub fn finalize(
	msg: &[u8],
	commitments: &BTreeMap<u64, Round1Output>,
	responses: &[Round2Output],
	threshold_t: u64,
) -> Result<Signature, LatticeError> {
	let needed = threshold_t as usize + 1;
	let mut by_index: BTreeMap<u64, &Round2Output> = BTreeMap::new();
	for r in responses {
		by_index.entry(r.index).or_insert(r);
	}
	if by_index.len() < needed {
		return Err(LatticeError::InsufficientSigners { needed, got: by_index.len() })
	}

	let committee_commitments: BTreeMap<u64, Round1Output> = commitments
		.iter()
		.filter(|(idx, _)| by_index.contains_key(idx))
		.map(|(idx, c)| (*idx, c.clone()))
		.collect();

	let delta = group_commitment(&committee_commitments, msg);
	let z = by_index.values().fold(Scalar::ZERO, |acc, r| acc + r.z_i);

	Ok(Signature { delta, z })
}

pub fn verify(group_pk: &PublicKey, msg: &[u8], sig: &Signature) -> bool {
	let c = challenge(group_pk, &sig.delta, msg);
	RISTRETTO_BASEPOINT_POINT * sig.z == sig.delta + group_pk.0 * c
}

/// Generate `n` Shamir shares of a fresh random secret scalar and PRF keys,
/// requiring `t+1` of them to produce a valid signature.
pub fn trusted_dealer(
	t: u64,
	n: u64,
	rng: &mut impl RngCore,
) -> Result<(Vec<KeyShare>, PublicKey), LatticeError> {
	if t == 0 || t >= n {
		return Err(LatticeError::InvalidParameters { t, n })
	}
	let coeffs: Vec<Scalar> = (0..=t).map(|_| Scalar::random(&mut *rng)).collect();
	let group_pk = PublicKey(RISTRETTO_BASEPOINT_POINT * coeffs[0]);
	let shares = (1..=n)
		.map(|i| {
			let mut prf_key = [0u8; 32];
			rng.fill_bytes(&mut prf_key);
			KeyShare { index: i, secret: poly_eval(&coeffs, Scalar::from(i)), prf_key }
		})
		.collect();
	Ok((shares, group_pk))
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::rngs::StdRng;
	use rand::SeedableRng;

	fn rng() -> StdRng {
		StdRng::seed_from_u64(7)
	}

	#[test]
	fn round1_is_deterministic_per_session() {
		let (shares, _) = trusted_dealer(1, 3, &mut rng()).unwrap();
		let prf_key = [0xA5u8; 32];
		let a = round1(&shares[0], b"session-1", &prf_key);
		let b = round1(&shares[0], b"session-1", &prf_key);
		assert_eq!(a.d_pub.compress(), b.d_pub.compress());
		assert_eq!(a.e_pub.compress(), b.e_pub.compress());

		let c = round1(&shares[0], b"session-2", &prf_key);
		assert_ne!(a.d_pub.compress(), c.d_pub.compress());
	}

	#[test]
	fn full_threshold_round_trip() {
		let (shares, group_pk) = trusted_dealer(1, 3, &mut rng()).unwrap();
		let prf_key = [0xA5u8; 32];
		let session_id = b"session-42";
		let msg = b"quantum-bundle";

		let commitments: BTreeMap<u64, Round1Output> = shares
			.iter()
			.take(2)
			.map(|s| (s.index, round1(s, session_id, &prf_key)))
			.collect();

		let responses: Vec<Round2Output> = shares
			.iter()
			.take(2)
			.map(|s| round2(s, &group_pk, session_id, &prf_key, msg, &commitments))
			.collect();

		let sig = finalize(msg, &commitments, &responses, 1).unwrap();
		assert!(verify(&group_pk, msg, &sig));
	}

	#[test]
	fn rejects_invalid_threshold_parameters() {
		assert!(trusted_dealer(3, 3, &mut rng()).is_err());
	}

	#[test]
	fn signer_missing_round2_is_excluded_from_the_committee() {
		let (shares, group_pk) = trusted_dealer(1, 3, &mut rng()).unwrap();
		let prf_key = [0xA5u8; 32];
		let session_id = b"session-99";
		let msg = b"quantum-bundle";

		// All three signers publish round 1...
		let all_commitments: BTreeMap<u64, Round1Output> = shares
			.iter()
			.map(|s| (s.index, round1(s, session_id, &prf_key)))
			.collect();

		// ...but the coordinator only carries the first two into round 2; the
		// third missed its deadline and is dropped from the committee.
		let committee_commitments: BTreeMap<u64, Round1Output> =
			all_commitments.iter().take(2).map(|(idx, c)| (*idx, c.clone())).collect();

		let responses: Vec<Round2Output> = shares
			.iter()
			.take(2)
			.map(|s| round2(s, &group_pk, session_id, &prf_key, msg, &committee_commitments))
			.collect();

		// finalize still receives the original, unpruned round-1 map; it must
		// restrict itself to the two signers who actually answered.
		let sig = finalize(msg, &all_commitments, &responses, 1).unwrap();
		assert!(verify(&group_pk, msg, &sig));
	}
}
