//! Config file in, report files out

use crate::common::{offline, run};
use ink_lantern::config::load_config_with_hash;
use ink_lantern::output::{generate_markdown_summary, write_json_report};
use ink_lantern::session::scripted::{ScriptedEngine, ScriptedPage};
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

const CONFIG: &str = r#"
[pool]
capacity = 2
acquire-timeout-ms = 2000
creation-retries = 1
creation-backoff-ms = 1

[fetch]
navigation-timeout-ms = 1000
default-delay-ms = 1
network-idle-ms = 50

[challenge]
timeout-ms = 200
poll-interval-ms = 10

[crawler]
concurrency = 2
idle-poll-ms = 10
"#;

fn site(engine: &ScriptedEngine) {
    engine.page(
        "https://docs.example.com/",
        ScriptedPage::with_links("Docs", ["/install", "/usage"]),
    );
    engine.page(
        "https://docs.example.com/install",
        ScriptedPage::html(
            "<html><head><title>Install</title><meta name=\"description\" content=\"Setup guide\">\
             </head><body><nav>Menu</nav><main><h1>Install</h1><p>Run the installer.</p>\
             <script>track()</script></main></body></html>",
        ),
    );
    engine.page(
        "https://docs.example.com/usage",
        ScriptedPage::with_links("Usage", Vec::<&str>::new()),
    );
}

#[tokio::test]
async fn test_crawl_from_config_file_writes_reports() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    let (config, hash) = load_config_with_hash(file.path()).unwrap();
    assert_eq!(config.pool.capacity, 2);
    assert_eq!(hash.len(), 64);

    let engine = ScriptedEngine::new();
    site(&engine);
    let report = run(&engine, &config, offline("https://docs.example.com/", 1, 10)).await;
    assert_eq!(report.pages.len(), 3);

    let dir = TempDir::new().unwrap();
    let json_path = dir.path().join("report.json");
    let summary_path = dir.path().join("summary.md");
    write_json_report(&report, &json_path).unwrap();
    generate_markdown_summary(&report, Some(&hash), &summary_path).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(json["crawlId"], report.crawl_id.to_string());
    assert_eq!(json["phase"], "COMPLETE");
    assert_eq!(json["pages"].as_array().unwrap().len(), 3);
    assert_eq!(json["pages"][0]["status"]["state"], "success");
    assert_eq!(json["pages"][0]["discoveredAt"], 0);

    let install = json["pages"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["url"] == "https://docs.example.com/install")
        .unwrap();
    let markdown = install["markdown"].as_str().unwrap();
    assert!(markdown.contains("Run the installer."));
    assert!(!markdown.contains("track()"));
    assert_eq!(install["structuredData"]["description"], "Setup guide");
    assert_eq!(install["parent"], "https://docs.example.com/");

    let summary = std::fs::read_to_string(&summary_path).unwrap();
    assert!(summary.contains(&format!("- **Config Hash**: {}", hash)));
    assert!(summary.contains("| Succeeded | 3 |"));
}
