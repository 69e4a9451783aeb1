//! End-to-end scenarios across the epoch manager, bundle builder, dual
//! signature engine and dispatcher together, without going through
//! `Engine`'s background tasks (so nothing here depends on wall-clock
//! cadence timing).

use std::sync::Arc;
use std::time::{Duration, Instant};

use quasar::bundle::BundleBuilder;
use quasar::client::DualSigEngine;
use quasar::dispatcher::Dispatcher;
use quasar::epoch::{EpochManager, DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_EPOCH_DURATION};
use quasar::error::{BundleError, SessionError};
use quasar::types::Block;

fn validators(names: &[&str]) -> Vec<String> {
	names.iter().map(|s| s.to_string()).collect()
}

async fn three_of_two_epoch() -> (Arc<EpochManager>, Arc<DualSigEngine>, Vec<String>) {
	let mgr = Arc::new(EpochManager::new(
		2,
		Duration::ZERO,
		DEFAULT_MAX_EPOCH_DURATION,
		DEFAULT_HISTORY_LIMIT,
	));
	let vs = validators(&["v0", "v1", "v2"]);
	mgr.initialize(vs.clone()).await.unwrap();
	(mgr, Arc::new(DualSigEngine::default()), vs)
}

#[tokio::test]
async fn happy_path_three_validators_threshold_two() {
	let (mgr, engine, vs) = three_of_two_epoch().await;
	let builder = BundleBuilder::new(mgr, engine);

	builder.add_block(10, [0x11; 32]);
	builder.add_block(11, [0x22; 32]);
	builder.add_block(12, [0x33; 32]);

	let mut qb = builder.create_bundle().await.unwrap().unwrap();
	assert_eq!(qb.block_count, 3);
	assert_eq!(qb.start_height, 10);
	assert_eq!(qb.end_height, 12);

	builder.sign_bundle(&mut qb, 100, &[0x42; 32], &vs).await.unwrap();
	assert!(builder.verify_bundle(&qb).await.unwrap());
}

#[tokio::test]
async fn three_bundles_chain_by_hash() {
	let (mgr, engine, vs) = three_of_two_epoch().await;
	let builder = BundleBuilder::new(mgr, engine);

	let mut previous = [0u8; 32];
	for (i, height) in [1u64, 2, 3].into_iter().enumerate() {
		builder.add_block(height, [height as u8; 32]);
		let mut qb = builder.create_bundle().await.unwrap().unwrap();
		assert_eq!(qb.sequence, i as u64);
		assert_eq!(qb.previous_hash, previous);
		builder.sign_bundle(&mut qb, i as u64 + 1, &[0x07; 32], &vs).await.unwrap();
		previous = qb.bundle_hash();
	}
}

#[tokio::test]
async fn insufficient_signers_leaves_chain_tip_unmoved() {
	let (mgr, engine, vs) = three_of_two_epoch().await;
	let builder = BundleBuilder::new(mgr, engine);

	builder.add_block(1, [1u8; 32]);
	let mut failed = builder.create_bundle().await.unwrap().unwrap();
	let err = builder.sign_bundle(&mut failed, 1, &[0u8; 32], &vs[..2]).await.unwrap_err();
	assert!(matches!(err, BundleError::Session(SessionError::InsufficientSigners { needed: 3, got: 2 })));
	assert!(failed.signature.is_none());

	// A later bundle, signed with enough signers, still starts the chain
	// fresh: the failed attempt never advanced the committed tip.
	builder.add_block(2, [2u8; 32]);
	let mut next = builder.create_bundle().await.unwrap().unwrap();
	assert_eq!(next.sequence, 0);
	assert_eq!(next.previous_hash, [0u8; 32]);
	builder.sign_bundle(&mut next, 2, &[0u8; 32], &vs).await.unwrap();
	assert!(builder.verify_bundle(&next).await.unwrap());
}

#[tokio::test]
async fn epoch_rotation_preserves_verification_of_prior_epoch_bundles() {
	let (mgr, engine, vs) = three_of_two_epoch().await;
	let builder = BundleBuilder::new(mgr.clone(), engine);

	builder.add_block(1, [9u8; 32]);
	let mut qb = builder.create_bundle().await.unwrap().unwrap();
	builder.sign_bundle(&mut qb, 1, &[0u8; 32], &vs).await.unwrap();
	assert_eq!(qb.epoch, 0);

	let rotated = mgr.rotate(validators(&["v0", "v1", "v3"]), true).await.unwrap();
	assert!(rotated.is_some());
	assert_eq!(mgr.current().await.unwrap().epoch, 1);

	// The bundle was signed under epoch 0's keys; it must still verify even
	// though the current epoch has moved on, as long as epoch 0 is still
	// within the retained history window.
	assert!(builder.verify_bundle(&qb).await.unwrap());
}

#[tokio::test]
async fn signature_fails_verification_against_a_different_epoch() {
	let (mgr, engine, vs) = three_of_two_epoch().await;
	let builder = BundleBuilder::new(mgr.clone(), engine);

	builder.add_block(1, [5u8; 32]);
	let mut qb = builder.create_bundle().await.unwrap().unwrap();
	builder.sign_bundle(&mut qb, 1, &[0u8; 32], &vs).await.unwrap();
	assert_eq!(qb.epoch, 0);

	mgr.rotate(validators(&["v0", "v1", "v3"]), true).await.unwrap();
	assert_eq!(mgr.current().await.unwrap().epoch, 1);

	let msg = qb.signable_message();
	let sig = qb.signature.as_ref().unwrap();
	assert!(mgr.verify_for_epoch(&msg, sig, 0).await.unwrap());
	assert!(!mgr.verify_for_epoch(&msg, sig, 1).await.unwrap());
}

#[tokio::test]
async fn rotation_without_force_is_rate_limited_within_min_duration() {
	let mgr = EpochManager::new(
		1,
		Duration::from_secs(600),
		DEFAULT_MAX_EPOCH_DURATION,
		DEFAULT_HISTORY_LIMIT,
	);
	mgr.initialize(validators(&["v0", "v1", "v2"])).await.unwrap();

	let result = mgr.rotate(validators(&["v0", "v1", "v9"]), false).await.unwrap();
	assert!(result.is_none(), "rotation within MIN_EPOCH_DURATION must be a no-op, not an error");
	assert_eq!(mgr.current().await.unwrap().epoch, 0);
}

#[tokio::test]
async fn dispatcher_drops_oldest_under_sustained_overflow() {
	let dispatcher = Dispatcher::new(100);
	for height in 0..150u64 {
		dispatcher
			.submit(Block {
				id: [0u8; 32],
				chain_id: [0u8; 32],
				chain_name: "eth".into(),
				height,
				timestamp: Instant::now(),
				data: vec![],
				cert: None,
			})
			.await;
	}

	assert_eq!(dispatcher.queue_len("eth").await, Some(100));
}
