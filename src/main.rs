//! Ink-Lantern main entry point
//!
//! This is the command-line interface for the Ink-Lantern rendering crawler.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use ink_lantern::config::{load_config_with_hash, validate, Config};
use ink_lantern::convert::{ContentConverter, MarkdownConverter};
use ink_lantern::crawler::{CrawlReport, CrawlSubmission, Crawler, PageStatus};
use ink_lantern::fetcher::{FetchOptions, MemoryCache, PageFetcher, ResultCache};
use ink_lantern::output::{generate_markdown_summary, to_json, write_json_report};
use ink_lantern::session::{ChromiumEngine, SessionPool};
use ink_lantern::url::normalize_url;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Ink-Lantern: a rendering crawler
///
/// Ink-Lantern renders pages in a pool of headless browser sessions, waits out
/// anti-bot interstitials, and crawls a site breadth-first within depth, page,
/// pattern and robots.txt limits.
#[derive(Parser, Debug)]
#[command(name = "ink-lantern")]
#[command(version)]
#[command(about = "A rendering crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file (defaults apply when omitted)
    #[arg(short, long, value_name = "CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl a site starting from URL
    Crawl(CrawlArgs),

    /// Render a single page and print it as markdown
    Scrape(ScrapeArgs),

    /// Validate the configuration and print the effective values
    CheckConfig,
}

#[derive(Args, Debug)]
struct CrawlArgs {
    /// Root URL (optional when --submission is given)
    #[arg(value_name = "URL", required_unless_present = "submission")]
    url: Option<String>,

    /// Maximum link depth from the root (1-10)
    #[arg(long)]
    max_depth: Option<u32>,

    /// Maximum number of pages (1-1000)
    #[arg(long)]
    max_pages: Option<usize>,

    /// Regex of URLs to skip (repeatable)
    #[arg(long = "exclude", value_name = "REGEX")]
    exclude: Vec<String>,

    /// Regex a URL must match to be crawled (repeatable)
    #[arg(long = "include", value_name = "REGEX")]
    include: Vec<String>,

    /// Do not consult robots.txt
    #[arg(long)]
    ignore_robots: bool,

    /// Crawl id to use instead of a generated one
    #[arg(long)]
    crawl_id: Option<Uuid>,

    /// Read the crawl submission from a JSON file; flags override its fields
    #[arg(long, value_name = "FILE")]
    submission: Option<PathBuf>,

    /// Write the full JSON report here
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Write a markdown summary here
    #[arg(long, value_name = "FILE")]
    summary: Option<PathBuf>,

    /// Cancel the crawl after this many seconds
    #[arg(long)]
    deadline_secs: Option<u64>,
}

#[derive(Args, Debug)]
struct ScrapeArgs {
    /// Page to render
    #[arg(value_name = "URL")]
    url: String,

    /// Settle delay after navigation (milliseconds)
    #[arg(long, value_name = "MS")]
    wait_for: Option<u64>,

    /// Wait until this CSS selector matches
    #[arg(long, value_name = "SELECTOR")]
    wait_for_selector: Option<String>,

    /// Wait until network activity settles
    #[arg(long)]
    network_idle: bool,

    /// Emulate a mobile device
    #[arg(long)]
    mobile: bool,

    /// Save a PNG screenshot here
    #[arg(long, value_name = "FILE")]
    screenshot: Option<PathBuf>,

    /// Print the rendered HTML instead of markdown
    #[arg(long)]
    raw: bool,

    /// Write the page result as JSON here
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let (config, config_hash) = load(cli.config.as_deref())?;

    match cli.command {
        Command::CheckConfig => handle_check_config(&config, config_hash.as_deref()),
        Command::Crawl(args) => handle_crawl(config, config_hash, args).await,
        Command::Scrape(args) => handle_scrape(config, args).await,
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("ink_lantern=info,warn"),
            1 => EnvFilter::new("ink_lantern=debug,info"),
            2 => EnvFilter::new("ink_lantern=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load(path: Option<&Path>) -> anyhow::Result<(Config, Option<String>)> {
    match path {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            let (config, hash) = load_config_with_hash(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            Ok((config, Some(hash)))
        }
        None => {
            let config = Config::default();
            validate(&config)?;
            Ok((config, None))
        }
    }
}

/// Cancels the returned token on Ctrl-C
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling (partial results are kept)");
            token.cancel();
        }
    });
    cancel
}

fn build_fetcher(config: &Config) -> PageFetcher {
    let engine = Arc::new(ChromiumEngine::from_config(config));
    let pool = SessionPool::from_config(engine, &config.pool);
    let cache: Arc<dyn ResultCache> = Arc::new(MemoryCache::new(config.fetch.cache_capacity));
    PageFetcher::from_config(pool, config, Some(cache))
}

/// Handles `check-config`: validates config and prints the effective values
fn handle_check_config(config: &Config, hash: Option<&str>) -> anyhow::Result<()> {
    println!("=== Ink-Lantern Configuration ===\n");

    println!("Session Pool:");
    println!("  Capacity: {}", config.pool.capacity);
    println!("  Acquire timeout: {}ms", config.pool.acquire_timeout_ms);
    println!("  Max uses per session: {}", config.pool.max_session_uses);
    println!("  Max failures per session: {}", config.pool.max_session_failures);
    println!("  Max idle: {}s", config.pool.max_idle_secs);
    println!(
        "  Creation retries: {} (backoff {}ms)",
        config.pool.creation_retries, config.pool.creation_backoff_ms
    );
    println!("  Headless: {}", config.pool.headless);
    if let Some(exe) = &config.pool.chrome_executable {
        println!("  Browser: {}", exe.display());
    }

    println!("\nFetch:");
    println!("  Navigation timeout: {}ms", config.fetch.navigation_timeout_ms);
    println!("  Default delay: {}ms", config.fetch.default_delay_ms);
    println!("  Action timeout: {}ms", config.fetch.action_timeout_ms);
    println!("  Network idle window: {}ms", config.fetch.network_idle_ms);
    println!(
        "  Cache: {} entries, {}s TTL",
        config.fetch.cache_capacity, config.fetch.cache_ttl_secs
    );

    println!("\nChallenges:");
    println!("  Timeout: {}ms", config.challenge.timeout_ms);
    println!("  Poll interval: {}ms", config.challenge.poll_interval_ms);
    println!("  Solve attempts: {}", config.challenge.solve_attempts);

    println!("\nCrawler:");
    println!("  Concurrency: {}", config.crawler.concurrency);
    println!(
        "  Exhausted retries: {} (backoff {}ms)",
        config.crawler.exhausted_retries, config.crawler.retry_backoff_ms
    );
    match config.crawler.deadline_secs {
        Some(secs) => println!("  Deadline: {}s", secs),
        None => println!("  Deadline: none"),
    }

    println!("\nRobots:");
    println!("  User agent: {}", config.robots.user_agent);
    println!("  Fetch timeout: {}ms", config.robots.fetch_timeout_ms);
    println!(
        "  On fetch failure: {}",
        if config.robots.strict { "deny all" } else { "allow all" }
    );

    println!("\n✓ Configuration is valid");
    if let Some(hash) = hash {
        println!("  Hash: {}", hash);
    }

    Ok(())
}

fn build_submission(args: &CrawlArgs) -> anyhow::Result<CrawlSubmission> {
    let mut submission = match &args.submission {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str::<CrawlSubmission>(&raw)
                .with_context(|| format!("invalid submission in {}", path.display()))?
        }
        None => match &args.url {
            Some(url) => CrawlSubmission::new(url.clone()),
            None => bail!("a URL or --submission is required"),
        },
    };

    if let (Some(url), Some(_)) = (&args.url, &args.submission) {
        submission.url = url.clone();
    }
    if let Some(depth) = args.max_depth {
        submission.max_depth = depth;
    }
    if let Some(pages) = args.max_pages {
        submission.max_pages = pages;
    }
    submission.exclude_patterns.extend(args.exclude.iter().cloned());
    submission.include_patterns.extend(args.include.iter().cloned());
    if args.ignore_robots {
        submission.respect_robots_txt = false;
    }
    if args.crawl_id.is_some() {
        submission.crawl_id = args.crawl_id;
    }

    Ok(submission)
}

/// Handles `crawl`
async fn handle_crawl(
    mut config: Config,
    config_hash: Option<String>,
    args: CrawlArgs,
) -> anyhow::Result<()> {
    if args.deadline_secs.is_some() {
        config.crawler.deadline_secs = args.deadline_secs;
    }

    let request = build_submission(&args)?.validate()?;
    let fetcher = Arc::new(build_fetcher(&config));
    let pool = fetcher.pool().clone();
    let crawler = Crawler::new(&config, fetcher);
    let cancel = cancel_on_interrupt();

    let result = crawler.crawl(request, cancel).await;
    pool.shutdown().await;

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            return Err(e.into());
        }
    };

    if let Some(path) = &args.output {
        write_json_report(&report, path)?;
    }
    if let Some(path) = &args.summary {
        generate_markdown_summary(&report, config_hash.as_deref(), path)?;
        tracing::info!("Summary written to: {}", path.display());
    }
    if args.output.is_none() {
        println!("{}", to_json(&report)?);
    }

    print_outcome(&report);
    Ok(())
}

fn print_outcome(report: &CrawlReport) {
    let stats = &report.stats;
    eprintln!(
        "{} {}: {} succeeded, {} failed, {} skipped in {:.1}s",
        report.crawl_id,
        report.phase,
        stats.pages_succeeded,
        stats.pages_failed,
        stats.pages_skipped,
        stats.duration_ms as f64 / 1000.0
    );
    if let Some(reason) = &report.abort_reason {
        eprintln!("Aborted: {}", reason);
    }
}

/// Handles `scrape`: fetches a single page
async fn handle_scrape(config: Config, args: ScrapeArgs) -> anyhow::Result<()> {
    let url = normalize_url(&args.url)?;
    let options = FetchOptions {
        wait_for: args.wait_for,
        wait_for_selector: args.wait_for_selector.clone(),
        wait_for_network_idle: args.network_idle,
        include_screenshot: args.screenshot.is_some(),
        include_raw_html: args.raw,
        mobile: args.mobile,
        ..FetchOptions::default()
    };

    let fetcher = build_fetcher(&config);
    let cancel = cancel_on_interrupt();
    let mut page = fetcher.fetch(&url, &options, &cancel).await;
    fetcher.pool().shutdown().await;

    if let PageStatus::Failed { message, .. } = &page.status {
        bail!("{}", message);
    }

    if let Some(markup) = page.raw_content.as_deref() {
        let converted = MarkdownConverter.convert(markup, &url, &options);
        page.apply_conversion(converted);
    }

    if let (Some(path), Some(png)) = (&args.screenshot, &page.screenshot) {
        std::fs::write(path, png)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!("Screenshot saved to: {}", path.display());
    }

    if let Some(path) = &args.output {
        std::fs::write(path, to_json(&page)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    if args.raw {
        println!("{}", page.raw_content.as_deref().unwrap_or_default());
    } else {
        println!("{}", page.markdown.as_deref().unwrap_or_default());
    }

    Ok(())
}
