//! Integration tests for Ink-Lantern
//!
//! Pages are served by the scripted rendering engine; robots.txt comes from
//! wiremock servers.

mod common;
mod crawl_tests;
mod output_tests;
mod robots_tests;
