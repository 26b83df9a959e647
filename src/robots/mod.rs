//! Robots.txt handling module
//!
//! This module provides functionality for fetching, parsing, and caching robots.txt files.
//! Only the generic-agent (`*`) rules are honored.

mod cache;
mod parser;

pub use cache::RobotsCache;
pub use parser::{ParsedRobots, GENERIC_AGENT};
