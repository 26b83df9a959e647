//! End-to-end crawl behavior over the scripted engine

use crate::common::{crawler, offline, run, test_config};
use ink_lantern::challenge::ChallengeVendor;
use ink_lantern::crawler::{CrawlSubmission, ErrorKind, PageStatus};
use ink_lantern::session::scripted::{ScriptedChallenge, ScriptedEngine, ScriptedPage};
use ink_lantern::state::CrawlPhase;
use ink_lantern::{LanternError, SessionError};
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn numbered_links(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("/page-{}", i)).collect()
}

fn leaf(title: &str) -> ScriptedPage {
    ScriptedPage::with_links(title, Vec::<&str>::new())
}

fn register_leaves(engine: &ScriptedEngine, count: usize) {
    for i in 1..=count {
        engine.page(
            &format!("https://docs.example.com/page-{}", i),
            ScriptedPage::with_links(&format!("Page {}", i), ["/deeper"]),
        );
    }
}

#[tokio::test]
async fn test_depth_one_crawls_root_and_children() {
    let engine = ScriptedEngine::new();
    engine.page(
        "https://docs.example.com/",
        ScriptedPage::with_links("Docs", numbered_links(5)),
    );
    register_leaves(&engine, 5);

    let report = run(&engine, &test_config(), offline("https://docs.example.com/", 1, 100)).await;

    assert_eq!(report.phase, CrawlPhase::Complete);
    assert_eq!(report.pages.len(), 6);
    assert!(report.pages.iter().all(|p| p.is_success()));
    assert_eq!(report.pages[0].url, "https://docs.example.com/");
    assert_eq!(report.pages[0].discovered_at, 0);
    assert!(report.pages[1..].iter().all(|p| p.discovered_at == 1));

    // /deeper sits at depth 2 and is never fetched
    assert!(report.page("https://docs.example.com/deeper").is_none());
    assert_eq!(report.stats.too_deep, 0);
    assert!(!engine
        .navigations()
        .iter()
        .any(|u| u.ends_with("/deeper")));
}

#[tokio::test]
async fn test_max_pages_caps_results() {
    let engine = ScriptedEngine::new();
    engine.page(
        "https://docs.example.com/",
        ScriptedPage::with_links("Docs", numbered_links(10)),
    );
    register_leaves(&engine, 10);

    let report = run(&engine, &test_config(), offline("https://docs.example.com/", 3, 3)).await;

    assert_eq!(report.phase, CrawlPhase::Complete);
    assert_eq!(report.pages.len(), 3);
    // eight siblings of the admitted pages plus /deeper seen from both children
    assert_eq!(report.stats.budget_exhausted, 10);
    assert_eq!(engine.navigations().len(), 3);
}

#[tokio::test]
async fn test_no_url_fetched_twice() {
    let engine = ScriptedEngine::new();
    engine.page(
        "https://docs.example.com/",
        ScriptedPage::with_links("Docs", ["/a", "/b", "/a#intro", "/a/"]),
    );
    engine.page("https://docs.example.com/a", ScriptedPage::with_links("A", ["/b", "/"]));
    engine.page("https://docs.example.com/b", ScriptedPage::with_links("B", ["/a", "/"]));

    let report = run(&engine, &test_config(), offline("https://docs.example.com/", 3, 100)).await;

    assert_eq!(report.pages.len(), 3);
    let urls: HashSet<_> = report.pages.iter().map(|p| p.url.as_str()).collect();
    assert_eq!(urls.len(), 3);

    let navigations = engine.navigations();
    let unique: HashSet<_> = navigations.iter().collect();
    assert_eq!(navigations.len(), unique.len());
}

#[tokio::test]
async fn test_off_site_links_are_not_followed() {
    let engine = ScriptedEngine::new();
    engine.page(
        "https://docs.example.com/",
        ScriptedPage::with_links(
            "Docs",
            [
                "/guide",
                "https://www.docs.example.com/mirror",
                "https://blog.example.com/post",
                "https://other.org/",
            ],
        ),
    );
    engine.page("https://docs.example.com/guide", leaf("Guide"));
    engine.page("https://www.docs.example.com/mirror", leaf("Mirror"));

    let report = run(&engine, &test_config(), offline("https://docs.example.com/", 2, 100)).await;

    let urls: Vec<_> = report.pages.iter().map(|p| p.url.as_str()).collect();
    assert!(urls.contains(&"https://docs.example.com/guide"));
    assert!(urls.contains(&"https://www.docs.example.com/mirror"));
    assert!(!urls.iter().any(|u| u.contains("blog.example.com") || u.contains("other.org")));
}

#[tokio::test]
async fn test_exclude_beats_include() {
    let engine = ScriptedEngine::new();
    engine.page(
        "https://docs.example.com/",
        ScriptedPage::with_links(
            "Docs",
            ["/blog/one", "/blog/drafts/two", "/about"],
        ),
    );
    engine.page("https://docs.example.com/blog/one", leaf("One"));
    engine.page("https://docs.example.com/blog/drafts/two", leaf("Two"));
    engine.page("https://docs.example.com/about", leaf("About"));

    let submission = CrawlSubmission {
        include_patterns: vec!["/blog/".to_string()],
        exclude_patterns: vec!["/drafts/".to_string()],
        ..offline("https://docs.example.com/", 2, 100)
    };
    let report = run(&engine, &test_config(), submission).await;

    let urls: Vec<_> = report.pages.iter().map(|p| p.url.as_str()).collect();
    assert_eq!(urls, vec!["https://docs.example.com/", "https://docs.example.com/blog/one"]);
    assert_eq!(report.stats.links_filtered, 2);
}

#[tokio::test]
async fn test_resolved_challenge_yields_page() {
    let engine = ScriptedEngine::new();
    engine.page(
        "https://docs.example.com/",
        ScriptedPage::with_links("Docs", ["/guarded"]),
    );
    engine.page(
        "https://docs.example.com/guarded",
        leaf("Guarded")
            .behind(ScriptedChallenge::cloudflare(Some(Duration::from_millis(30)))),
    );

    let report = run(&engine, &test_config(), offline("https://docs.example.com/", 2, 100)).await;

    let guarded = report
        .page("https://docs.example.com/guarded")
        .expect("Guarded page should be in the report");
    assert!(guarded.is_success());
    assert_eq!(guarded.challenge, Some(ChallengeVendor::Cloudflare));
    assert_eq!(guarded.title.as_deref(), Some("Guarded"));
    assert_ne!(guarded.status_code, Some(503));
    assert!(guarded
        .markdown
        .as_deref()
        .is_some_and(|md| md.contains("Guarded")));
    assert_eq!(report.fetch.challenges.resolved, 1);
}

#[tokio::test]
async fn test_unresolved_challenge_does_not_stop_crawl() {
    let engine = ScriptedEngine::new();
    engine.page(
        "https://docs.example.com/",
        ScriptedPage::with_links("Docs", ["/guarded", "/open"]),
    );
    engine.page(
        "https://docs.example.com/guarded",
        leaf("Guarded")
            .behind(ScriptedChallenge::cloudflare(None)),
    );
    engine.page("https://docs.example.com/open", leaf("Open"));

    let report = run(&engine, &test_config(), offline("https://docs.example.com/", 2, 100)).await;

    assert_eq!(report.phase, CrawlPhase::Complete);
    assert_eq!(report.pages.len(), 3);

    let guarded = report.page("https://docs.example.com/guarded").unwrap();
    assert_eq!(
        guarded.error_kind(),
        Some(ErrorKind::BotChallenge {
            vendor: ChallengeVendor::Cloudflare
        })
    );
    assert!(guarded.raw_content.is_none());
    assert!(report.page("https://docs.example.com/open").unwrap().is_success());
    assert_eq!(report.fetch.challenges.failed, 1);
}

#[tokio::test]
async fn test_navigation_failure_is_recorded_per_page() {
    let engine = ScriptedEngine::new();
    engine.page(
        "https://docs.example.com/",
        ScriptedPage::with_links("Docs", ["/broken", "/fine"]),
    );
    engine.page(
        "https://docs.example.com/broken",
        ScriptedPage::html("").failing(SessionError::Protocol(
            "net::ERR_CONNECTION_RESET".to_string(),
        )),
    );
    engine.page("https://docs.example.com/fine", leaf("Fine"));

    let report = run(&engine, &test_config(), offline("https://docs.example.com/", 2, 100)).await;

    assert_eq!(report.phase, CrawlPhase::Complete);
    let broken = report.page("https://docs.example.com/broken").unwrap();
    match &broken.status {
        PageStatus::Failed { kind, message } => {
            assert_eq!(*kind, ErrorKind::Navigation);
            assert!(message.contains("ERR_CONNECTION_RESET"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(report.stats.pages_failed, 1);
    assert_eq!(report.stats.pages_succeeded, 2);
}

#[tokio::test]
async fn test_root_failure_is_an_error() {
    let engine = ScriptedEngine::new();
    engine.page(
        "https://docs.example.com/",
        ScriptedPage::html("").failing(SessionError::Protocol(
            "net::ERR_NAME_NOT_RESOLVED".to_string(),
        )),
    );

    let config = test_config();
    let request = offline("https://docs.example.com/", 2, 10).validate().unwrap();
    let result = crawler(&engine, &config)
        .crawl(request, CancellationToken::new())
        .await;

    match result {
        Err(LanternError::CrawlAborted { url, reason }) => {
            assert_eq!(url, "https://docs.example.com/");
            assert!(reason.contains("ERR_NAME_NOT_RESOLVED"));
        }
        other => panic!("expected CrawlAborted, got {:?}", other.map(|r| r.phase)),
    }
}

#[tokio::test]
async fn test_dead_browser_aborts_with_partial_results() {
    let engine = ScriptedEngine::new();
    engine.page(
        "https://docs.example.com/",
        ScriptedPage::with_links("Docs", numbered_links(4)).delay(Duration::from_millis(50)),
    );
    register_leaves(&engine, 4);

    let mut config = test_config();
    config.pool.capacity = 1;
    config.crawler.concurrency = 1;
    config.pool.max_session_uses = 1;
    let crawler = crawler(&engine, &config);

    // Launches start failing while the root renders; the retired root session
    // cannot be replaced
    let request = offline("https://docs.example.com/", 2, 100).validate().unwrap();
    let watcher = {
        let engine = engine.clone();
        tokio::spawn(async move {
            while engine.launches() < 1 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            engine.fail_launches(usize::MAX);
        })
    };
    let report = crawler.crawl(request, CancellationToken::new()).await.unwrap();
    watcher.await.unwrap();

    assert_eq!(report.phase, CrawlPhase::Aborted);
    assert!(report
        .abort_reason
        .as_deref()
        .is_some_and(|r| r.contains("session pool")));
    assert!(report.page("https://docs.example.com/").unwrap().is_success());
    assert!(report.pages.len() < 5);
}

#[tokio::test]
async fn test_cancellation_keeps_partial_results() {
    let engine = ScriptedEngine::new();
    engine.page(
        "https://docs.example.com/",
        ScriptedPage::with_links("Docs", numbered_links(6)),
    );
    for i in 1..=6 {
        engine.page(
            &format!("https://docs.example.com/page-{}", i),
            leaf("Slow").delay(Duration::from_secs(5)),
        );
    }

    let config = test_config();
    let crawler = crawler(&engine, &config);
    let request = offline("https://docs.example.com/", 2, 100).validate().unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let report = tokio::time::timeout(Duration::from_secs(3), crawler.crawl(request, cancel))
        .await
        .expect("Cancelled crawl should return promptly")
        .unwrap();

    assert_eq!(report.phase, CrawlPhase::Aborted);
    assert_eq!(report.abort_reason.as_deref(), Some("crawl cancelled"));
    assert!(report.page("https://docs.example.com/").unwrap().is_success());
    assert_eq!(report.stats.pages_succeeded, 1);
}

#[tokio::test]
async fn test_invalid_submissions_are_rejected_before_fetching() {
    let engine = ScriptedEngine::new();
    let config = test_config();

    for submission in [
        offline("https://docs.example.com/", 0, 10),
        offline("https://docs.example.com/", 11, 10),
        offline("https://docs.example.com/", 2, 0),
        offline("https://docs.example.com/", 2, 1001),
        offline("mailto:someone@example.com", 2, 10),
        CrawlSubmission {
            include_patterns: vec!["[unclosed".to_string()],
            ..offline("https://docs.example.com/", 2, 10)
        },
    ] {
        assert!(matches!(
            submission.validate(),
            Err(LanternError::Validation(_))
        ));
    }

    // Nothing was rendered
    let _ = crawler(&engine, &config);
    assert_eq!(engine.launch_attempts(), 0);
    assert!(engine.navigations().is_empty());
}
