//! Anti-automation challenge classifier
//!
//! Every vendor is described by a table of weighted markers. A page is scored against
//! each signature and the best vendor with a score of at least [`MATCH_THRESHOLD`]
//! wins; ties go to table order.

use crate::session::RenderSession;
use crate::SessionError;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum score for a signature to count as a match
pub const MATCH_THRESHOLD: u32 = 2;

/// Body text length that counts as real content on its own
const CONTENT_TEXT_MIN: usize = 64;

/// Body text length below which a CAPTCHA widget is assumed to be the whole page
const THIN_PAGE_MAX: usize = 400;

const CHALLENGE_STATUSES: &[u16] = &[403, 429, 503];

/// Known challenge providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChallengeVendor {
    Cloudflare,
    Akamai,
    PerimeterX,
    DataDome,
    Imperva,
    Sucuri,
    GenericCaptcha,
}

impl fmt::Display for ChallengeVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cloudflare => "Cloudflare",
            Self::Akamai => "Akamai Bot Manager",
            Self::PerimeterX => "PerimeterX",
            Self::DataDome => "DataDome",
            Self::Imperva => "Imperva",
            Self::Sucuri => "Sucuri",
            Self::GenericCaptcha => "CAPTCHA",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy)]
enum MarkKind {
    /// Substring of the lowercased title
    Title,
    /// CSS selector present in the document
    Selector,
    /// Substring of the lowercased markup
    Text,
    /// Cookie name prefix
    Cookie,
}

#[derive(Debug, Clone, Copy)]
struct Mark {
    kind: MarkKind,
    pattern: &'static str,
    weight: u32,
}

const fn title(pattern: &'static str) -> Mark {
    Mark { kind: MarkKind::Title, pattern, weight: 2 }
}

const fn selector(pattern: &'static str) -> Mark {
    Mark { kind: MarkKind::Selector, pattern, weight: 2 }
}

const fn cookie(pattern: &'static str) -> Mark {
    Mark { kind: MarkKind::Cookie, pattern, weight: 2 }
}

const fn text(pattern: &'static str) -> Mark {
    Mark { kind: MarkKind::Text, pattern, weight: 1 }
}

const fn weak(mark: Mark) -> Mark {
    Mark { weight: 1, ..mark }
}

struct Signature {
    vendor: ChallengeVendor,
    marks: &'static [Mark],
    /// Widgets worth a best-effort click while waiting
    solve_selectors: &'static [&'static str],
}

const SIGNATURES: &[Signature] = &[
    Signature {
        vendor: ChallengeVendor::Cloudflare,
        marks: &[
            title("just a moment"),
            title("attention required"),
            selector("#challenge-form"),
            selector("#challenge-running"),
            selector("div[class*='cf-browser-verification']"),
            selector("#cf-challenge-running"),
            cookie("cf_chl_"),
            text("ray id:"),
            text("please wait while we verify"),
            text("please enable cookies"),
            text("please complete the security check"),
            text("checking your browser"),
            text("cloudflare"),
        ],
        solve_selectors: &["input[type='checkbox']", ".checkbox"],
    },
    Signature {
        vendor: ChallengeVendor::Akamai,
        marks: &[
            selector("#sec-if-container"),
            selector("#sec-cpt-if"),
            text("errors.edgesuite.net"),
            weak(title("access denied")),
            text("reference #"),
            weak(cookie("_abck")),
        ],
        solve_selectors: &[],
    },
    Signature {
        vendor: ChallengeVendor::PerimeterX,
        marks: &[
            selector("#px-captcha"),
            title("access to this page has been denied"),
            text("press & hold"),
            text("perimeterx"),
            weak(cookie("_px")),
        ],
        solve_selectors: &["#px-captcha"],
    },
    Signature {
        vendor: ChallengeVendor::DataDome,
        marks: &[
            selector("iframe[src*='captcha-delivery.com']"),
            text("captcha-delivery.com"),
            text("datadome"),
            weak(cookie("datadome")),
        ],
        solve_selectors: &[],
    },
    Signature {
        vendor: ChallengeVendor::Imperva,
        marks: &[
            selector("iframe[src*='_Incapsula_Resource']"),
            text("incapsula incident id"),
            text("request unsuccessful"),
            weak(cookie("incap_ses_")),
            weak(cookie("visid_incap_")),
        ],
        solve_selectors: &[],
    },
    Signature {
        vendor: ChallengeVendor::Sucuri,
        marks: &[
            title("sucuri website firewall"),
            text("sucuri website firewall"),
            text("cloudproxy"),
            weak(cookie("sucuri_cloudproxy")),
        ],
        solve_selectors: &[],
    },
    Signature {
        vendor: ChallengeVendor::GenericCaptcha,
        marks: &[
            weak(selector(".g-recaptcha")),
            weak(selector("iframe[src*='recaptcha']")),
            weak(selector(".h-captcha")),
            weak(selector("iframe[src*='hcaptcha.com']")),
            weak(selector(".cf-turnstile")),
            text("verify you are human"),
            text("are you a robot"),
            text("not a robot"),
        ],
        solve_selectors: &[".g-recaptcha", ".h-captcha", ".cf-turnstile"],
    },
];

/// What the classifier looks at
#[derive(Debug, Clone, Default)]
pub struct PageSignals {
    pub status: Option<u16>,
    pub title: Option<String>,
    pub markup: String,
    pub cookies: Vec<String>,
}

impl PageSignals {
    /// Reads the current state of a session
    pub async fn capture(
        session: &dyn RenderSession,
        status: Option<u16>,
    ) -> Result<Self, SessionError> {
        let markup = session.content().await?;
        let title = match session.title().await? {
            Some(t) => Some(t),
            None => crate::url::extract_title(&markup),
        };
        // Cookie access is best-effort; some engines refuse it on error pages
        let cookies = session.cookie_names().await.unwrap_or_default();

        Ok(Self {
            status,
            title,
            markup,
            cookies,
        })
    }
}

/// A positive classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeMatch {
    pub vendor: ChallengeVendor,
    pub score: u32,
    pub evidence: Vec<String>,
}

impl ChallengeMatch {
    pub fn evidence_summary(&self) -> String {
        self.evidence.join("; ")
    }
}

/// Classifies a page, returning the best matching challenge vendor
pub fn classify(signals: &PageSignals) -> Option<ChallengeMatch> {
    let document = Html::parse_document(&signals.markup);
    let markup = signals.markup.to_lowercase();
    let title = signals
        .title
        .as_deref()
        .map(str::to_lowercase)
        .unwrap_or_default();
    let thin = body_text_len(&document) < THIN_PAGE_MAX;

    let mut best: Option<ChallengeMatch> = None;

    for signature in SIGNATURES {
        let mut score = 0;
        let mut evidence = Vec::new();

        for mark in signature.marks {
            let hit = match mark.kind {
                MarkKind::Title => !title.is_empty() && title.contains(mark.pattern),
                MarkKind::Text => markup.contains(mark.pattern),
                MarkKind::Cookie => signals.cookies.iter().any(|c| c.starts_with(mark.pattern)),
                MarkKind::Selector => Selector::parse(mark.pattern)
                    .map(|s| document.select(&s).next().is_some())
                    .unwrap_or(false),
            };
            if hit {
                score += mark.weight;
                evidence.push(format!("{:?} '{}'", mark.kind, mark.pattern).to_lowercase());
            }
        }

        if score == 0 {
            continue;
        }

        if let Some(status) = signals.status.filter(|s| CHALLENGE_STATUSES.contains(s)) {
            score += 2;
            evidence.push(format!("status {}", status));
        }

        if signature.vendor == ChallengeVendor::GenericCaptcha && thin {
            score += 1;
            evidence.push("thin page".to_string());
        }

        if score >= MATCH_THRESHOLD && best.as_ref().map_or(true, |b| score > b.score) {
            best = Some(ChallengeMatch {
                vendor: signature.vendor,
                score,
                evidence,
            });
        }
    }

    best
}

/// Selectors worth clicking while a vendor's challenge is showing
pub fn solve_selectors(vendor: ChallengeVendor) -> &'static [&'static str] {
    SIGNATURES
        .iter()
        .find(|s| s.vendor == vendor)
        .map(|s| s.solve_selectors)
        .unwrap_or(&[])
}

/// Checks whether the markup looks like a real page rather than an interstitial
pub fn has_primary_content(markup: &str) -> bool {
    let document = Html::parse_document(markup);

    let structural = ["main", "article", "[role=main]", "h1", "p"]
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .any(|s| document.select(&s).next().is_some());

    structural || body_text_len(&document) >= CONTENT_TEXT_MIN
}

fn body_text_len(document: &Html) -> usize {
    let Ok(body) = Selector::parse("body") else {
        return 0;
    };
    document
        .select(&body)
        .next()
        .map(|b| b.text().map(|t| t.trim().len()).sum())
        .unwrap_or(0)
}
