//! Rendering sessions
//!
//! This module provides:
//! - The engine/session traits the rest of the crate renders through
//! - Randomized identity profiles applied when a session is created
//! - The bounded session pool with exclusive leases
//! - A Chromium engine and an in-memory scripted engine

mod chromium;
mod engine;
mod identity;
mod pool;
pub mod scripted;

pub use chromium::ChromiumEngine;
pub use engine::{Navigation, RenderEngine, RenderSession};
pub use identity::IdentityProfile;
pub use pool::{Lease, LeaseToken, PoolSettings, PoolStats, PoolStatsSnapshot, SessionPool};
