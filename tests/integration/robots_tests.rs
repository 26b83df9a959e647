//! robots.txt handling against mock servers

use crate::common::{run, test_config};
use ink_lantern::crawler::{CrawlSubmission, PageStatus, SkipReason};
use ink_lantern::session::scripted::{ScriptedEngine, ScriptedPage};
use ink_lantern::state::CrawlPhase;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_robots(server: &MockServer, status: u16, body: &str, expected: u64) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .expect(expected)
        .mount(server)
        .await;
}

/// Registers a root linking to a public and a private page on the mock's origin
fn site(engine: &ScriptedEngine, base: &str) {
    engine.page(
        &format!("{}/", base),
        ScriptedPage::with_links("Home", ["/public", "/private/secret"]),
    );
    engine.page(
        &format!("{}/public", base),
        ScriptedPage::with_links("Public", ["/private/other"]),
    );
    engine.page(
        &format!("{}/private/secret", base),
        ScriptedPage::with_links("Secret", Vec::<&str>::new()),
    );
    engine.page(
        &format!("{}/private/other", base),
        ScriptedPage::with_links("Other", Vec::<&str>::new()),
    );
}

#[tokio::test]
async fn test_disallowed_links_are_skipped() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_robots(&server, 200, "User-agent: *\nDisallow: /private\n", 1).await;

    let engine = ScriptedEngine::new();
    site(&engine, &base);

    let report = run(&engine, &test_config(), CrawlSubmission::new(format!("{}/", base))).await;

    assert_eq!(report.phase, CrawlPhase::Complete);
    let urls: Vec<_> = report.pages.iter().map(|p| p.url.clone()).collect();
    assert_eq!(urls, vec![format!("{}/", base), format!("{}/public", base)]);
    assert_eq!(report.stats.robots_skipped, 2);
    assert!(!engine.navigations().iter().any(|u| u.contains("/private")));
}

#[tokio::test]
async fn test_disallowed_root_is_reported_as_skipped() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_robots(&server, 200, "User-agent: *\nDisallow: /\n", 1).await;

    let engine = ScriptedEngine::new();
    site(&engine, &base);

    let report = run(&engine, &test_config(), CrawlSubmission::new(format!("{}/", base))).await;

    assert_eq!(report.phase, CrawlPhase::Complete);
    assert_eq!(report.pages.len(), 1);
    assert_eq!(
        report.pages[0].status,
        PageStatus::Skipped {
            reason: SkipReason::RobotsDisallowed
        }
    );
    assert!(engine.navigations().is_empty());
}

#[tokio::test]
async fn test_missing_robots_allows_everything() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_robots(&server, 404, "", 1).await;

    let engine = ScriptedEngine::new();
    site(&engine, &base);

    let report = run(&engine, &test_config(), CrawlSubmission::new(format!("{}/", base))).await;

    assert_eq!(report.pages.len(), 4);
    assert!(report.pages.iter().all(|p| p.is_success()));
    assert_eq!(report.stats.robots_skipped, 0);
}

#[tokio::test]
async fn test_ignoring_robots_never_fetches_it() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_robots(&server, 200, "User-agent: *\nDisallow: /\n", 0).await;

    let engine = ScriptedEngine::new();
    site(&engine, &base);

    let submission = CrawlSubmission {
        respect_robots_txt: false,
        ..CrawlSubmission::new(format!("{}/", base))
    };
    let report = run(&engine, &test_config(), submission).await;

    assert_eq!(report.pages.len(), 4);
    assert!(report
        .page(&format!("{}/private/secret", base))
        .is_some_and(|p| p.is_success()));
}
