//! Rendering engine abstraction
//!
//! The pool, the challenge handler and the page fetcher only talk to these two traits.
//! `ChromiumEngine` drives a real browser; `ScriptedEngine` serves canned pages.

use crate::session::IdentityProfile;
use crate::SessionError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// Outcome of a top-level navigation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    /// HTTP status of the main document, when the engine reports one
    pub status: Option<u16>,
    /// URL after redirects
    pub final_url: Url,
}

/// Factory for rendering sessions
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Starts one isolated session hardened with the given identity
    async fn launch(&self, identity: &IdentityProfile)
        -> Result<Box<dyn RenderSession>, SessionError>;
}

/// One stateful rendering session (a browser with a single page)
#[async_trait]
pub trait RenderSession: Send + Sync {
    async fn navigate(&self, url: &Url, timeout: Duration) -> Result<Navigation, SessionError>;

    /// Current document markup
    async fn content(&self) -> Result<String, SessionError>;

    /// Address of the current document, which may differ from the last navigation's
    /// once a script has moved the page
    async fn current_url(&self) -> Result<Url, SessionError>;

    async fn title(&self) -> Result<Option<String>, SessionError>;

    async fn cookie_names(&self) -> Result<Vec<String>, SessionError>;

    async fn has_element(&self, selector: &str) -> Result<bool, SessionError>;

    async fn click(&self, selector: &str) -> Result<(), SessionError>;

    /// Scrolls vertically by `dy` pixels; negative values scroll up
    async fn scroll_by(&self, dy: i64) -> Result<(), SessionError>;

    /// Number of resource entries the document has loaded so far
    async fn resource_count(&self) -> Result<u64, SessionError>;

    /// PNG screenshot of the viewport
    async fn screenshot(&self) -> Result<Vec<u8>, SessionError>;

    /// Headers sent with every following request
    async fn set_extra_headers(&self, headers: &BTreeMap<String, String>)
        -> Result<(), SessionError>;

    /// Switches between the session's desktop viewport and a phone-sized one
    async fn emulate_mobile(&self, mobile: bool) -> Result<(), SessionError>;

    /// Clears cookies, storage, extra headers and emulation, then navigates to a blank
    /// page
    async fn reset(&self) -> Result<(), SessionError>;

    async fn is_alive(&self) -> bool;

    async fn close(self: Box<Self>);
}
