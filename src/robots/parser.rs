//! Robots.txt parser implementation
//!
//! Wraps the robotstxt crate's matcher. Rules are always evaluated for the generic
//! agent (`*`), never for a product-specific group.

use robotstxt::DefaultMatcher;

/// Agent token whose rules apply to every crawler
pub const GENERIC_AGENT: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Rules,
    AllowAll,
    DenyAll,
}

/// Parsed robots.txt data for one origin
#[derive(Debug, Clone)]
pub struct ParsedRobots {
    content: String,
    mode: Mode,
}

impl ParsedRobots {
    /// Creates a new ParsedRobots from raw robots.txt content
    pub fn from_content(content: &str) -> Self {
        Self {
            content: content.to_string(),
            mode: Mode::Rules,
        }
    }

    /// Creates a permissive ParsedRobots that allows everything
    ///
    /// Used when the origin has no robots.txt, and as the fallback when it cannot be
    /// fetched.
    pub fn allow_all() -> Self {
        Self {
            content: String::new(),
            mode: Mode::AllowAll,
        }
    }

    /// Creates a ParsedRobots that refuses every path
    pub fn deny_all() -> Self {
        Self {
            content: String::new(),
            mode: Mode::DenyAll,
        }
    }

    /// Returns true if this instance carries no parsed rules at all
    pub fn is_fallback(&self) -> bool {
        self.mode != Mode::Rules
    }

    /// Checks if a URL is allowed by the generic-agent rules
    ///
    /// # Arguments
    ///
    /// * `url` - The absolute URL to check; only its path and query are matched
    pub fn is_allowed(&self, url: &str) -> bool {
        match self.mode {
            Mode::AllowAll => true,
            Mode::DenyAll => false,
            Mode::Rules if self.content.trim().is_empty() => true,
            Mode::Rules => {
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(&self.content, GENERIC_AGENT, url)
            }
        }
    }
}
