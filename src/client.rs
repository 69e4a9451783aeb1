//! Dual-Signature Threshold Engine module tree.

pub mod common;
pub mod engine;
pub mod session;

pub use common::{DualSignature, SessionState};
pub use engine::DualSigEngine;
