//! In-memory rendering engine serving canned pages
//!
//! Used by the test suites. Pages are registered per URL; a page may sit behind a
//! challenge interstitial that clears after a delay, after a click, or never. Faults
//! (launch failures, navigation errors, dead sessions) can be injected at any time.

use crate::session::{IdentityProfile, Navigation, RenderEngine, RenderSession};
use crate::SessionError;
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use url::Url;

const NOT_FOUND: &str = "<html><head><title>Not Found</title></head><body><h1>Not Found</h1></body></html>";

/// A challenge interstitial shown in front of a page
#[derive(Debug, Clone)]
pub struct ScriptedChallenge {
    pub markup: String,
    pub status: Option<u16>,
    pub cookies: Vec<String>,
    /// The interstitial disappears this long after navigation
    pub clears_after: Option<Duration>,
    /// Clicking this selector clears the interstitial
    pub solved_by_click: Option<String>,
    /// Where the page sits once the interstitial clears
    pub lands_on: Option<Url>,
}

/// One canned page
#[derive(Debug, Clone)]
pub struct ScriptedPage {
    pub markup: String,
    pub status: Option<u16>,
    pub cookies: Vec<String>,
    pub challenge: Option<ScriptedChallenge>,
    /// Simulated load time
    pub delay: Duration,
    pub error: Option<SessionError>,
    pub redirect_to: Option<Url>,
}

impl ScriptedPage {
    pub fn html(markup: impl Into<String>) -> Self {
        Self {
            markup: markup.into(),
            status: Some(200),
            cookies: Vec::new(),
            challenge: None,
            delay: Duration::ZERO,
            error: None,
            redirect_to: None,
        }
    }

    /// A page whose body is a list of links
    pub fn with_links<I, S>(title: &str, links: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let anchors: String = links
            .into_iter()
            .map(|href| format!("<li><a href=\"{0}\">{0}</a></li>", href.as_ref()))
            .collect();
        Self::html(format!(
            "<html><head><title>{title}</title></head><body><main><h1>{title}</h1>\
             <p>Scripted page used for crawl runs.</p><ul>{anchors}</ul></main></body></html>"
        ))
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, error: SessionError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn redirect_to(mut self, target: Url) -> Self {
        self.redirect_to = Some(target);
        self
    }

    pub fn behind(mut self, challenge: ScriptedChallenge) -> Self {
        self.challenge = Some(challenge);
        self
    }
}

impl ScriptedChallenge {
    /// A Cloudflare-style "Just a moment..." interstitial
    pub fn cloudflare(clears_after: Option<Duration>) -> Self {
        Self {
            markup: r#"<html><head><title>Just a moment...</title></head><body>
                <div id="challenge-running">Checking your browser before accessing the site.</div>
                <form id="challenge-form"><input type="checkbox"></form>
                <p>Ray ID: 7f00000000000000</p></body></html>"#
                .to_string(),
            status: Some(503),
            cookies: vec!["__cf_bm".to_string()],
            clears_after,
            solved_by_click: None,
            lands_on: None,
        }
    }

    pub fn solved_by_click(mut self, selector: &str) -> Self {
        self.solved_by_click = Some(selector.to_string());
        self
    }

    pub fn lands_on(mut self, target: Url) -> Self {
        self.lands_on = Some(target);
        self
    }
}

#[derive(Default)]
struct EngineState {
    pages: Mutex<HashMap<String, ScriptedPage>>,
    navigations: Mutex<Vec<String>>,
    failing_launches: AtomicUsize,
    launch_attempts: AtomicUsize,
    launches: AtomicUsize,
    closes: AtomicUsize,
    resets: AtomicUsize,
    clicks: AtomicUsize,
    fail_resets: AtomicBool,
    generation: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Engine whose sessions serve registered [`ScriptedPage`]s
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    state: Arc<EngineState>,
}

impl std::fmt::Debug for ScriptedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedEngine")
            .field("launches", &self.launches())
            .field("closes", &self.closes())
            .finish()
    }
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a page; the URL is matched after normalization
    pub fn page(&self, url: &str, page: ScriptedPage) -> &Self {
        let key = crate::url::normalize_url(url)
            .map(String::from)
            .unwrap_or_else(|_| url.to_string());
        lock(&self.state.pages).insert(key, page);
        self
    }

    /// Makes the next `count` launches fail
    pub fn fail_launches(&self, count: usize) {
        self.state.failing_launches.store(count, Ordering::SeqCst);
    }

    pub fn fail_resets(&self, fail: bool) {
        self.state.fail_resets.store(fail, Ordering::SeqCst);
    }

    /// Marks every session launched so far as crashed
    pub fn kill_sessions(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn launch_attempts(&self) -> usize {
        self.state.launch_attempts.load(Ordering::SeqCst)
    }

    pub fn launches(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.state.resets.load(Ordering::SeqCst)
    }

    pub fn clicks(&self) -> usize {
        self.state.clicks.load(Ordering::SeqCst)
    }

    /// Every URL navigated to, in order
    pub fn navigations(&self) -> Vec<String> {
        lock(&self.state.navigations).clone()
    }

    fn lookup(&self, url: &Url) -> Option<ScriptedPage> {
        lock(&self.state.pages).get(url.as_str()).cloned()
    }
}

#[async_trait]
impl RenderEngine for ScriptedEngine {
    async fn launch(
        &self,
        identity: &IdentityProfile,
    ) -> Result<Box<dyn RenderSession>, SessionError> {
        self.state.launch_attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .state
            .failing_launches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(SessionError::Launch("scripted launch failure".to_string()));
        }

        self.state.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            engine: self.clone(),
            generation: self.state.generation.load(Ordering::SeqCst),
            user_agent: identity.user_agent.clone(),
            current: Mutex::new(None),
            headers: Mutex::new(BTreeMap::new()),
            mobile: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }
}

struct Current {
    page: ScriptedPage,
    url: Url,
    navigated_at: Instant,
    clicked: Vec<String>,
    scrolled: i64,
}

impl Current {
    fn challenge(&self) -> Option<&ScriptedChallenge> {
        let challenge = self.page.challenge.as_ref()?;
        if let Some(after) = challenge.clears_after {
            if self.navigated_at.elapsed() >= after {
                return None;
            }
        }
        if let Some(selector) = &challenge.solved_by_click {
            if self.clicked.iter().any(|s| s == selector) {
                return None;
            }
        }
        Some(challenge)
    }

    fn markup(&self) -> &str {
        match self.challenge() {
            Some(challenge) => &challenge.markup,
            None => &self.page.markup,
        }
    }

    fn url(&self) -> &Url {
        match (&self.page.challenge, self.challenge()) {
            (Some(ScriptedChallenge { lands_on: Some(target), .. }), None) => target,
            _ => &self.url,
        }
    }
}

struct ScriptedSession {
    engine: ScriptedEngine,
    generation: usize,
    user_agent: String,
    current: Mutex<Option<Current>>,
    headers: Mutex<BTreeMap<String, String>>,
    mobile: AtomicBool,
    closed: AtomicBool,
}

impl ScriptedSession {
    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst)
            || self.generation != self.engine.state.generation.load(Ordering::SeqCst)
        {
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    fn with_current<T>(&self, f: impl FnOnce(&Current) -> T) -> Result<T, SessionError> {
        self.ensure_open()?;
        let current = lock(&self.current);
        current
            .as_ref()
            .map(f)
            .ok_or_else(|| SessionError::Protocol("no document loaded".to_string()))
    }
}

#[async_trait]
impl RenderSession for ScriptedSession {
    async fn navigate(&self, url: &Url, timeout: Duration) -> Result<Navigation, SessionError> {
        self.ensure_open()?;
        lock(&self.engine.state.navigations).push(url.to_string());

        let page = self
            .engine
            .lookup(url)
            .unwrap_or_else(|| ScriptedPage::html(NOT_FOUND).status(404));

        if page.delay > timeout {
            tokio::time::sleep(timeout).await;
            return Err(SessionError::Timeout {
                operation: "navigation",
                after: timeout,
            });
        }
        if !page.delay.is_zero() {
            tokio::time::sleep(page.delay).await;
        }
        if let Some(error) = page.error.clone() {
            return Err(error);
        }

        let final_url = page.redirect_to.clone().unwrap_or_else(|| url.clone());
        let status = match page.challenge.as_ref() {
            Some(challenge) => challenge.status.or(page.status),
            None => page.status,
        };

        *lock(&self.current) = Some(Current {
            page,
            url: final_url.clone(),
            navigated_at: Instant::now(),
            clicked: Vec::new(),
            scrolled: 0,
        });

        tracing::trace!(
            "scripted session ({}, mobile={}, {} extra headers) loaded {}",
            self.user_agent,
            self.mobile.load(Ordering::SeqCst),
            lock(&self.headers).len(),
            final_url
        );
        Ok(Navigation { status, final_url })
    }

    async fn content(&self) -> Result<String, SessionError> {
        self.with_current(|c| c.markup().to_string())
    }

    async fn current_url(&self) -> Result<Url, SessionError> {
        self.with_current(|c| c.url().clone())
    }

    async fn title(&self) -> Result<Option<String>, SessionError> {
        self.with_current(|c| crate::url::extract_title(c.markup()))
    }

    async fn cookie_names(&self) -> Result<Vec<String>, SessionError> {
        self.with_current(|c| match c.challenge() {
            Some(challenge) => challenge.cookies.clone(),
            None => c.page.cookies.clone(),
        })
    }

    async fn has_element(&self, selector: &str) -> Result<bool, SessionError> {
        let parsed = Selector::parse(selector)
            .map_err(|e| SessionError::Script(format!("invalid selector '{}': {:?}", selector, e)))?;
        self.with_current(|c| Html::parse_document(c.markup()).select(&parsed).next().is_some())
    }

    async fn click(&self, selector: &str) -> Result<(), SessionError> {
        if !self.has_element(selector).await? {
            return Err(SessionError::ElementNotFound(selector.to_string()));
        }
        if let Some(current) = lock(&self.current).as_mut() {
            current.clicked.push(selector.to_string());
        }
        self.engine.state.clicks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn scroll_by(&self, dy: i64) -> Result<(), SessionError> {
        self.ensure_open()?;
        if let Some(current) = lock(&self.current).as_mut() {
            current.scrolled += dy;
            tracing::trace!("scripted session scrolled to y={}", current.scrolled);
        }
        Ok(())
    }

    async fn resource_count(&self) -> Result<u64, SessionError> {
        self.with_current(|c| c.markup().matches("<img").count() as u64)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, SessionError> {
        let markup = self.content().await?;
        let mut png = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
        png.extend_from_slice(&(markup.len() as u32).to_be_bytes());
        Ok(png)
    }

    async fn set_extra_headers(
        &self,
        headers: &BTreeMap<String, String>,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        *lock(&self.headers) = headers.clone();
        Ok(())
    }

    async fn emulate_mobile(&self, mobile: bool) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.mobile.store(mobile, Ordering::SeqCst);
        Ok(())
    }

    async fn reset(&self) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.mobile.store(false, Ordering::SeqCst);
        self.engine.state.resets.fetch_add(1, Ordering::SeqCst);
        if self.engine.state.fail_resets.load(Ordering::SeqCst) {
            return Err(SessionError::Protocol("scripted reset failure".to_string()));
        }
        *lock(&self.current) = None;
        lock(&self.headers).clear();
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        self.ensure_open().is_ok()
    }

    async fn close(self: Box<Self>) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.engine.state.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}
