//! Randomized browser identity
//!
//! Each session draws one profile at creation time. The profile drives the launch
//! arguments, the user-agent override and the init script that patches the
//! navigator surface before any page script runs.

use rand::seq::IndexedRandom;
use rand::Rng;
use serde::Serialize;

#[derive(Debug, Clone, Copy)]
struct Platform {
    ua_os: &'static str,
    navigator: &'static str,
    gpus: &'static [(&'static str, &'static str)],
}

const PLATFORMS: &[Platform] = &[
    Platform {
        ua_os: "Windows NT 10.0; Win64; x64",
        navigator: "Win32",
        gpus: &[
            ("Intel Inc.", "Intel(R) UHD Graphics 630"),
            ("Google Inc. (NVIDIA)", "ANGLE (NVIDIA, NVIDIA GeForce GTX 1660 Direct3D11 vs_5_0 ps_5_0)"),
            ("Google Inc. (AMD)", "ANGLE (AMD, AMD Radeon RX 580 Direct3D11 vs_5_0 ps_5_0)"),
        ],
    },
    Platform {
        ua_os: "Macintosh; Intel Mac OS X 10_15_7",
        navigator: "MacIntel",
        gpus: &[
            ("Apple Inc.", "Apple M1"),
            ("Intel Inc.", "Intel Iris Plus Graphics 655"),
        ],
    },
    Platform {
        ua_os: "X11; Linux x86_64",
        navigator: "Linux x86_64",
        gpus: &[("Intel", "Mesa Intel(R) UHD Graphics 620 (KBL GT2)")],
    },
];

const CHROME_MAJORS: &[u32] = &[124, 125, 126, 127, 128];

const VIEWPORTS: &[(u32, u32)] = &[(1920, 1080), (1536, 864), (1440, 900), (1366, 768)];

const LANGUAGE_SETS: &[&[&str]] = &[&["en-US", "en"], &["en-GB", "en"], &["en-US", "en", "de"]];

/// Identity attributes applied to a session once, when it is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityProfile {
    pub user_agent: String,
    /// `navigator.platform`
    pub platform: String,
    pub accept_language: String,
    pub languages: Vec<String>,
    pub viewport: (u32, u32),
    pub hardware_concurrency: u32,
    pub device_memory: u32,
    pub webgl_vendor: String,
    pub webgl_renderer: String,
    /// Per-session seed, hex encoded
    pub seed: String,
}

impl IdentityProfile {
    /// Draws a profile from the thread-local generator
    pub fn randomized() -> Self {
        Self::randomized_with(&mut rand::rng())
    }

    /// Draws a profile from the given generator
    pub fn randomized_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let platform = PLATFORMS.choose(rng).copied().unwrap_or(PLATFORMS[0]);
        let (webgl_vendor, webgl_renderer) =
            platform.gpus.choose(rng).copied().unwrap_or(platform.gpus[0]);
        let major = CHROME_MAJORS.choose(rng).copied().unwrap_or(126);
        let viewport = VIEWPORTS.choose(rng).copied().unwrap_or(VIEWPORTS[0]);
        let languages: Vec<String> = LANGUAGE_SETS
            .choose(rng)
            .copied()
            .unwrap_or(LANGUAGE_SETS[0])
            .iter()
            .map(|l| l.to_string())
            .collect();

        let seed_bytes: [u8; 16] = rng.random();

        Self {
            user_agent: format!(
                "Mozilla/5.0 ({}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{}.0.0.0 Safari/537.36",
                platform.ua_os, major
            ),
            platform: platform.navigator.to_string(),
            accept_language: accept_language(&languages),
            languages,
            viewport,
            hardware_concurrency: *[4u32, 8, 12, 16].choose(rng).unwrap_or(&8),
            device_memory: *[4u32, 8].choose(rng).unwrap_or(&8),
            webgl_vendor: webgl_vendor.to_string(),
            webgl_renderer: webgl_renderer.to_string(),
            seed: hex::encode(seed_bytes),
        }
    }

    /// Script evaluated on every new document before page scripts run
    pub fn init_script(&self) -> String {
        let languages =
            serde_json::to_string(&self.languages).unwrap_or_else(|_| "[\"en-US\"]".to_string());
        let vendor = serde_json::to_string(&self.webgl_vendor).unwrap_or_default();
        let renderer = serde_json::to_string(&self.webgl_renderer).unwrap_or_default();
        let platform = serde_json::to_string(&self.platform).unwrap_or_default();

        format!(
            r#"(() => {{
    const define = (obj, key, value) =>
        Object.defineProperty(obj, key, {{ get: () => value, configurable: true }});
    define(Navigator.prototype, 'webdriver', undefined);
    define(navigator, 'languages', {languages});
    define(navigator, 'platform', {platform});
    define(navigator, 'hardwareConcurrency', {cores});
    define(navigator, 'deviceMemory', {memory});
    define(navigator, 'plugins', [
        {{ name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer', description: 'Portable Document Format' }},
        {{ name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai', description: '' }},
        {{ name: 'Native Client', filename: 'internal-nacl-plugin', description: '' }}
    ]);
    if (!window.chrome) {{
        window.chrome = {{ runtime: {{}}, app: {{ isInstalled: false }} }};
    }}
    const getParameter = WebGLRenderingContext.prototype.getParameter;
    WebGLRenderingContext.prototype.getParameter = function (p) {{
        if (p === 37445) return {vendor};
        if (p === 37446) return {renderer};
        return getParameter.call(this, p);
    }};
    window.__lanternSeed = '{seed}';
}})();"#,
            languages = languages,
            platform = platform,
            cores = self.hardware_concurrency,
            memory = self.device_memory,
            vendor = vendor,
            renderer = renderer,
            seed = self.seed,
        )
    }
}

fn accept_language(languages: &[String]) -> String {
    languages
        .iter()
        .enumerate()
        .map(|(i, lang)| {
            if i == 0 {
                lang.clone()
            } else {
                format!("{};q=0.{}", lang, 10 - i.min(9))
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}
