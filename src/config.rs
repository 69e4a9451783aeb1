//! Process-wide configuration for a running [`crate::Engine`].
//!
//! Durations are stored as seconds so the struct round-trips through plain
//! TOML/JSON via `serde` without a third-party duration codec; callers that
//! want a [`std::time::Duration`] use the accessor methods.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatcher::DEFAULT_QUEUE_CAPACITY;
use crate::epoch::{DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_EPOCH_DURATION, DEFAULT_MIN_EPOCH_DURATION};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QuasarConfig {
	/// Signing threshold `t`; a bundle or dual-signature session needs `t+1`
	/// distinct participants.
	pub threshold_t: u64,
	pub bundle_interval_secs: u64,
	pub chain_queue_capacity: usize,
	pub min_epoch_duration_secs: u64,
	pub max_epoch_duration_secs: u64,
	pub history_limit: usize,
	pub session_timeout_secs: u64,
}

impl Default for QuasarConfig {
	fn default() -> Self {
		Self {
			threshold_t: 1,
			bundle_interval_secs: 3,
			chain_queue_capacity: DEFAULT_QUEUE_CAPACITY,
			min_epoch_duration_secs: DEFAULT_MIN_EPOCH_DURATION.as_secs(),
			max_epoch_duration_secs: DEFAULT_MAX_EPOCH_DURATION.as_secs(),
			history_limit: DEFAULT_HISTORY_LIMIT,
			session_timeout_secs: 10,
		}
	}
}

impl QuasarConfig {
	pub fn bundle_interval(&self) -> Duration {
		Duration::from_secs(self.bundle_interval_secs)
	}

	pub fn min_epoch_duration(&self) -> Duration {
		Duration::from_secs(self.min_epoch_duration_secs)
	}

	pub fn max_epoch_duration(&self) -> Duration {
		Duration::from_secs(self.max_epoch_duration_secs)
	}

	pub fn session_timeout(&self) -> Duration {
		Duration::from_secs(self.session_timeout_secs)
	}
}
