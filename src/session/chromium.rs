//! Chromium rendering engine
//!
//! Each session is its own browser process with a throwaway profile directory and a
//! single page. Identity hardening (launch flags, user-agent override, device metrics
//! and the init script) is applied once, at launch.

use crate::config::Config;
use crate::session::{IdentityProfile, Navigation, RenderEngine, RenderSession};
use crate::SessionError;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    ClearBrowserCookiesParams, Headers, SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat, CaptureScreenshotParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use url::Url;

const MOBILE_VIEWPORT: (u32, u32) = (390, 844);

fn protocol(e: impl std::fmt::Display) -> SessionError {
    SessionError::Protocol(e.to_string())
}

fn script(e: impl std::fmt::Display) -> SessionError {
    SessionError::Script(e.to_string())
}

/// Launches headless Chromium sessions
#[derive(Debug, Clone)]
pub struct ChromiumEngine {
    headless: bool,
    executable: Option<PathBuf>,
    request_timeout: Duration,
}

impl ChromiumEngine {
    pub fn new(headless: bool, executable: Option<PathBuf>, request_timeout: Duration) -> Self {
        Self {
            headless,
            executable,
            request_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let executable = config
            .pool
            .chrome_executable
            .clone()
            .or_else(|| std::env::var_os("CHROMIUM_PATH").map(PathBuf::from));

        Self::new(
            config.pool.headless,
            executable,
            config.fetch.navigation_timeout(),
        )
    }
}

#[async_trait]
impl RenderEngine for ChromiumEngine {
    async fn launch(
        &self,
        identity: &IdentityProfile,
    ) -> Result<Box<dyn RenderSession>, SessionError> {
        let profile_dir =
            std::env::temp_dir().join(format!("ink_lantern_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&profile_dir).map_err(|e| {
            SessionError::Launch(format!(
                "cannot create profile directory {}: {}",
                profile_dir.display(),
                e
            ))
        })?;

        let (width, height) = identity.viewport;
        let language = identity
            .languages
            .first()
            .cloned()
            .unwrap_or_else(|| "en-US".to_string());

        let mut builder = BrowserConfigBuilder::default()
            .request_timeout(self.request_timeout)
            .window_size(width, height)
            .user_data_dir(profile_dir.clone());

        if let Some(executable) = &self.executable {
            builder = builder.chrome_executable(executable.clone());
        }

        builder = if self.headless {
            builder.headless_mode(HeadlessMode::default())
        } else {
            builder.with_head()
        };

        builder = builder
            .arg(format!("--user-agent={}", identity.user_agent))
            .arg(format!("--lang={}", language))
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-notifications")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--disable-background-networking")
            .arg("--disable-background-timer-throttling")
            .arg("--disable-backgrounding-occluded-windows")
            .arg("--disable-breakpad")
            .arg("--disable-hang-monitor")
            .arg("--disable-ipc-flooding-protection")
            .arg("--disable-prompt-on-repost")
            .arg("--disable-features=TranslateUI")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--no-sandbox")
            .arg("--password-store=basic")
            .arg("--use-mock-keychain")
            .arg("--hide-scrollbars")
            .arg("--mute-audio");

        let browser_config = builder
            .build()
            .map_err(|e| SessionError::Launch(format!("invalid browser config: {e}")))?;

        let (mut browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| SessionError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    let message = e.to_string();
                    // chromiumoxide cannot decode some CDP events; those are noise
                    if message.contains("data did not match any variant of untagged enum Message")
                        || message.contains("Failed to deserialize WS response")
                    {
                        tracing::trace!("Suppressed CDP decode error: {}", message);
                    } else {
                        tracing::error!("Browser handler error: {:?}", e);
                    }
                }
            }
            tracing::debug!("Browser handler task completed");
        });

        let page = match harden(&browser, identity).await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.close().await;
                handler_task.abort();
                let _ = std::fs::remove_dir_all(&profile_dir);
                return Err(e);
            }
        };

        tracing::debug!(
            "Launched browser session ({}x{}, {})",
            width,
            height,
            identity.platform
        );

        Ok(Box::new(ChromiumSession {
            browser,
            page,
            handler: handler_task,
            profile_dir,
            identity: identity.clone(),
        }))
    }
}

/// Opens the session page and applies the identity to it
async fn harden(browser: &Browser, identity: &IdentityProfile) -> Result<Page, SessionError> {
    let page = browser.new_page("about:blank").await.map_err(protocol)?;

    page.execute(AddScriptToEvaluateOnNewDocumentParams {
        source: identity.init_script(),
        include_command_line_api: None,
        world_name: None,
        run_immediately: None,
    })
    .await
    .map_err(protocol)?;

    page.execute(SetUserAgentOverrideParams {
        user_agent: identity.user_agent.clone(),
        accept_language: Some(identity.accept_language.clone()),
        platform: Some(identity.platform.clone()),
        user_agent_metadata: None,
    })
    .await
    .map_err(protocol)?;

    set_viewport(&page, identity.viewport, false).await?;

    Ok(page)
}

async fn set_viewport(
    page: &Page,
    (width, height): (u32, u32),
    mobile: bool,
) -> Result<(), SessionError> {
    let params = SetDeviceMetricsOverrideParams::builder()
        .width(width as i64)
        .height(height as i64)
        .device_scale_factor(if mobile { 3.0 } else { 1.0 })
        .mobile(mobile)
        .build()
        .map_err(protocol)?;

    page.execute(params).await.map_err(protocol)?;
    Ok(())
}

struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    profile_dir: PathBuf,
    identity: IdentityProfile,
}

#[async_trait]
impl RenderSession for ChromiumSession {
    async fn navigate(&self, url: &Url, timeout: Duration) -> Result<Navigation, SessionError> {
        let load = async {
            self.page.goto(url.as_str()).await.map_err(protocol)?;
            let request = self
                .page
                .wait_for_navigation_response()
                .await
                .map_err(protocol)?;

            let status = request
                .as_ref()
                .and_then(|r| r.response.as_ref())
                .map(|r| r.status as u16);

            let final_url = self
                .page
                .url()
                .await
                .map_err(protocol)?
                .and_then(|u| Url::parse(&u).ok())
                .unwrap_or_else(|| url.clone());

            Ok(Navigation { status, final_url })
        };

        tokio::time::timeout(timeout, load)
            .await
            .map_err(|_| SessionError::Timeout {
                operation: "navigation",
                after: timeout,
            })?
    }

    async fn content(&self) -> Result<String, SessionError> {
        self.page.content().await.map_err(protocol)
    }

    async fn current_url(&self) -> Result<Url, SessionError> {
        let current = self
            .page
            .url()
            .await
            .map_err(protocol)?
            .ok_or_else(|| SessionError::Protocol("page has no URL".to_string()))?;
        Url::parse(&current).map_err(protocol)
    }

    async fn title(&self) -> Result<Option<String>, SessionError> {
        self.page.get_title().await.map_err(protocol)
    }

    async fn cookie_names(&self) -> Result<Vec<String>, SessionError> {
        let cookies = self.page.get_cookies().await.map_err(protocol)?;
        Ok(cookies.into_iter().map(|c| c.name).collect())
    }

    async fn has_element(&self, selector: &str) -> Result<bool, SessionError> {
        let literal = serde_json::to_string(selector).map_err(script)?;
        self.page
            .evaluate(format!("document.querySelector({literal}) !== null"))
            .await
            .map_err(script)?
            .into_value::<bool>()
            .map_err(script)
    }

    async fn click(&self, selector: &str) -> Result<(), SessionError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| SessionError::ElementNotFound(selector.to_string()))?;
        element.click().await.map_err(protocol)?;
        Ok(())
    }

    async fn scroll_by(&self, dy: i64) -> Result<(), SessionError> {
        self.page
            .evaluate(format!("window.scrollBy(0, {dy})"))
            .await
            .map_err(script)?;
        Ok(())
    }

    async fn resource_count(&self) -> Result<u64, SessionError> {
        self.page
            .evaluate("performance.getEntriesByType('resource').length")
            .await
            .map_err(script)?
            .into_value::<u64>()
            .map_err(script)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, SessionError> {
        self.page
            .screenshot(CaptureScreenshotParams {
                format: Some(CaptureScreenshotFormat::Png),
                ..Default::default()
            })
            .await
            .map_err(protocol)
    }

    async fn set_extra_headers(
        &self,
        headers: &BTreeMap<String, String>,
    ) -> Result<(), SessionError> {
        let value = serde_json::to_value(headers).map_err(protocol)?;
        self.page
            .execute(SetExtraHttpHeadersParams::new(Headers::new(value)))
            .await
            .map_err(protocol)?;
        Ok(())
    }

    async fn emulate_mobile(&self, mobile: bool) -> Result<(), SessionError> {
        let viewport = if mobile {
            MOBILE_VIEWPORT
        } else {
            self.identity.viewport
        };
        set_viewport(&self.page, viewport, mobile).await
    }

    async fn reset(&self) -> Result<(), SessionError> {
        self.page
            .evaluate("try { localStorage.clear(); sessionStorage.clear(); } catch (e) {}")
            .await
            .map_err(script)?;
        self.page
            .execute(ClearBrowserCookiesParams::default())
            .await
            .map_err(protocol)?;
        self.set_extra_headers(&BTreeMap::new()).await?;
        self.emulate_mobile(false).await?;
        self.page.goto("about:blank").await.map_err(protocol)?;
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        self.browser.version().await.is_ok()
    }

    async fn close(self: Box<Self>) {
        let mut this = self;
        if let Err(e) = this.browser.close().await {
            tracing::warn!("Failed to close browser: {}", e);
        }
        let _ = this.browser.wait().await;
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        self.handler.abort();
        if let Err(e) = std::fs::remove_dir_all(&self.profile_dir) {
            tracing::debug!(
                "Failed to remove profile directory {}: {}",
                self.profile_dir.display(),
                e
            );
        }
    }
}
