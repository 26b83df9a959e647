//! Per-fetch options
//!
//! Field names follow the external scrape request surface (camelCase).

use crate::config::FetchConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Options applied to one page fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FetchOptions {
    /// Output formats requested by the caller (`markdown`, `html`, `rawHtml`, ...)
    pub formats: Vec<String>,
    pub only_main_content: bool,
    pub include_tags: Vec<String>,
    pub exclude_tags: Vec<String>,
    pub headers: BTreeMap<String, String>,
    /// Fixed settle delay after navigation (milliseconds)
    pub wait_for: Option<u64>,
    pub wait_for_selector: Option<String>,
    pub wait_for_network_idle: bool,
    /// Navigation plus wait budget (milliseconds)
    pub timeout: Option<u64>,
    pub include_screenshot: bool,
    pub include_raw_html: bool,
    pub mobile: bool,
    pub actions: Vec<ActionStep>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            formats: vec!["markdown".to_string()],
            only_main_content: true,
            include_tags: Vec::new(),
            exclude_tags: Vec::new(),
            headers: BTreeMap::new(),
            wait_for: None,
            wait_for_selector: None,
            wait_for_network_idle: false,
            timeout: None,
            include_screenshot: false,
            include_raw_html: false,
            mobile: false,
            actions: Vec::new(),
        }
    }
}

impl FetchOptions {
    /// Resolves the wait policy; exactly one applies
    ///
    /// A selector wins over network idle, which wins over an explicit delay. With none
    /// of them set the configured default delay applies.
    pub fn wait_policy(&self, config: &FetchConfig) -> WaitPolicy {
        if let Some(selector) = self.wait_for_selector.as_ref().filter(|s| !s.trim().is_empty()) {
            WaitPolicy::Selector(selector.clone())
        } else if self.wait_for_network_idle {
            WaitPolicy::NetworkIdle(config.network_idle())
        } else {
            WaitPolicy::Delay(
                self.wait_for
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| config.default_delay()),
            )
        }
    }

    pub fn navigation_timeout(&self, config: &FetchConfig) -> Duration {
        self.timeout
            .map(Duration::from_millis)
            .unwrap_or_else(|| config.navigation_timeout())
    }
}

/// How the fetcher decides a page has settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitPolicy {
    Delay(Duration),
    Selector(String),
    /// Resource-entry count unchanged for this long
    NetworkIdle(Duration),
}

/// One scripted action with an optional timeout override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionStep {
    #[serde(flatten)]
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl From<Action> for ActionStep {
    fn from(action: Action) -> Self {
        Self {
            action,
            timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    #[default]
    Down,
}

/// Declarative page interaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Action {
    /// Sleep, or wait for a selector when one is given
    Wait {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        milliseconds: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
    },
    Click {
        selector: String,
    },
    Scroll {
        #[serde(default)]
        direction: ScrollDirection,
        /// Pixels; one viewport height when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount: Option<u32>,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Wait { .. } => "wait",
            Self::Click { .. } => "click",
            Self::Scroll { .. } => "scroll",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts: FetchOptions = serde_json::from_str("{}").unwrap();
        assert!(opts.only_main_content);
        assert_eq!(opts.formats, vec!["markdown"]);
        assert_eq!(
            opts.wait_policy(&FetchConfig::default()),
            WaitPolicy::Delay(Duration::from_millis(500))
        );
    }

    #[test]
    fn test_camel_case_surface() {
        let json = r##"{
            "onlyMainContent": false,
            "waitFor": 1500,
            "includeRawHtml": true,
            "headers": {"X-Test": "1"},
            "actions": [
                {"type": "wait", "milliseconds": 200},
                {"type": "click", "selector": "#more", "timeoutMs": 900},
                {"type": "scroll", "direction": "up"}
            ]
        }"##;
        let opts: FetchOptions = serde_json::from_str(json).unwrap();
        assert!(!opts.only_main_content);
        assert!(opts.include_raw_html);
        assert_eq!(opts.headers.get("X-Test").map(String::as_str), Some("1"));
        assert_eq!(
            opts.wait_policy(&FetchConfig::default()),
            WaitPolicy::Delay(Duration::from_millis(1500))
        );
        assert_eq!(opts.actions.len(), 3);
        assert_eq!(
            opts.actions[1],
            ActionStep {
                action: Action::Click {
                    selector: "#more".to_string()
                },
                timeout_ms: Some(900),
            }
        );
        assert_eq!(
            opts.actions[2].action,
            Action::Scroll {
                direction: ScrollDirection::Up,
                amount: None
            }
        );
    }

    #[test]
    fn test_selector_beats_idle_and_delay() {
        let opts = FetchOptions {
            wait_for: Some(10),
            wait_for_network_idle: true,
            wait_for_selector: Some("#app".to_string()),
            ..Default::default()
        };
        assert_eq!(
            opts.wait_policy(&FetchConfig::default()),
            WaitPolicy::Selector("#app".to_string())
        );

        let opts = FetchOptions {
            wait_for_selector: None,
            ..opts
        };
        assert_eq!(
            opts.wait_policy(&FetchConfig::default()),
            WaitPolicy::NetworkIdle(Duration::from_millis(500))
        );
    }

    #[test]
    fn test_unknown_action_type_is_rejected() {
        let json = r#"{"actions": [{"type": "hover", "selector": "a"}]}"#;
        assert!(serde_json::from_str::<FetchOptions>(json).is_err());
    }
}
