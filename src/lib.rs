//! Unified Cloud Player
//!
//! One logical media player for a cloud streaming account whose audio may be
//! rendered on a generic cloud-controlled speaker or on a speaker with its own
//! local control protocol.
//!
//! This library provides:
//! - Adaptive polling (baseline, post-command burst, near-end-of-track)
//! - Dual-backend state resolution into one normalized snapshot
//! - Device name/id resolution with per-command backend selection
//! - Command routing, including local queue emulation for content playback
//!   and playback transfer
//! - A reentrancy guard keeping the poller out of in-flight commands

pub mod backends;
pub mod bus;
pub mod config;
pub mod devices;
pub mod error;
pub mod guard;
pub mod model;
pub mod player;
pub mod resolver;
pub mod router;
pub mod scheduler;
pub mod state;

pub use error::{BackendError, Degradation, PlayerError};
pub use player::Player;

/// Crate version, injected by the build script.
pub const VERSION: &str = env!("UCP_VERSION");

/// Git commit the crate was built from.
pub const GIT_SHA: &str = env!("UCP_GIT_SHA");
