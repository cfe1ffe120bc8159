use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::StatusCode;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::parser::{self, listing, FieldError};
use crate::record::{review_id, ReviewRecord};
use crate::sink::{Persisted, RecordSink};

pub const DEFAULT_START_URL: &str =
    "https://otzovik.com/reviews/online_fashion_shop_wildberries_ru/";
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/140.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub start_url: String,
    pub dataset_dir: PathBuf,
    /// Minimum spacing between any two requests to the origin.
    pub delay: Duration,
    pub workers: usize,
    pub timeout: Duration,
    pub user_agent: String,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            start_url: DEFAULT_START_URL.to_string(),
            dataset_dir: PathBuf::from("intermediate_dataset"),
            delay: Duration::from_secs(10),
            workers: 2,
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_retries: 2,
            retry_backoff: Duration::from_secs(20),
        }
    }
}

/// Crawl stats returned after completion.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CrawlStats {
    pub listing_pages: usize,
    pub detail_pages: usize,
    pub fetch_errors: usize,
    pub written: usize,
    pub duplicates: usize,
    pub skipped_known: usize,
    pub parse_failures: usize,
    pub write_failures: usize,
}

// ── Pacing ──

/// Hands out request slots at least `delay` apart, shared by all workers.
pub struct Pacer {
    delay: Duration,
    next: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next: Mutex::new(None),
        }
    }

    pub async fn wait(&self) {
        let slot = {
            let mut next = self.next.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(t) if t > now => t,
                _ => now,
            };
            *next = Some(slot + self.delay);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

// ── Fetching ──

struct Fetcher {
    client: reqwest::Client,
    pacer: Pacer,
    max_retries: u32,
    retry_backoff: Duration,
}

impl Fetcher {
    fn new(config: &CrawlConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            pacer: Pacer::new(config.delay),
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff,
        })
    }

    /// GET a page body. Retries only on 429/5xx; every attempt takes a pacing slot.
    async fn get(&self, url: &str) -> Result<String> {
        let mut attempt = 0;
        loop {
            self.pacer.wait().await;
            let response = self
                .client
                .get(url)
                .send()
                .await
                .with_context(|| format!("GET {} failed", url))?;
            let status = response.status();
            if status.is_success() {
                return response
                    .text()
                    .await
                    .with_context(|| format!("Failed to read body of {}", url));
            }

            let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            if !retryable || attempt >= self.max_retries {
                bail!("GET {} returned {}", url, status);
            }
            let backoff = self.retry_backoff * 2u32.pow(attempt);
            warn!(
                "{} on {} (attempt {}/{}), backing off {:.1}s",
                status,
                url,
                attempt + 1,
                self.max_retries,
                backoff.as_secs_f64()
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}

// ── Pipeline ──

enum Event {
    Listing { links: usize },
    FetchFailed,
    Known,
    Detail {
        id: String,
        url: String,
        parsed: Result<ReviewRecord, FieldError>,
    },
}

/// Crawl every listing page, fetch unseen detail pages, persist new reviews.
///
/// Only an undiscoverable page count is fatal; every per-page failure is
/// logged and counted.
pub async fn run(config: CrawlConfig) -> Result<CrawlStats> {
    let mut sink = RecordSink::open(&config.dataset_dir)?;
    info!(
        "Dataset dir {} already holds {} reviews",
        sink.dir().display(),
        sink.ledger().len()
    );
    let known: Arc<HashSet<String>> = Arc::new(sink.ledger().ids().clone());

    let fetcher = Arc::new(Fetcher::new(&config)?);
    let first = fetcher
        .get(&config.start_url)
        .await
        .context("Failed to fetch first listing page")?;
    let total_pages =
        listing::last_page(&first).context("Cannot determine number of listing pages")?;
    info!("Crawling {} listing pages from {}", total_pages, config.start_url);

    let workers = config.workers.max(1);
    let semaphore = Arc::new(Semaphore::new(workers));
    let (tx, mut rx) = mpsc::channel::<Event>(workers * 4);

    // Page 1 is the start page already in hand
    let mut first = Some(first);
    for page in 1..=total_pages {
        let (url, prefetched) = match first.take() {
            Some(html) => (config.start_url.clone(), Some(html)),
            None => (listing::page_url(&config.start_url, page), None),
        };
        tokio::spawn(crawl_listing(
            url,
            prefetched,
            Arc::clone(&fetcher),
            Arc::clone(&semaphore),
            Arc::clone(&known),
            tx.clone(),
        ));
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let mut stats = CrawlStats::default();
    while let Some(event) = rx.recv().await {
        match event {
            Event::Listing { links } => {
                stats.listing_pages += 1;
                pb.inc_length(links as u64);
            }
            Event::FetchFailed => {
                stats.fetch_errors += 1;
                pb.inc(1);
            }
            Event::Known => {
                stats.skipped_known += 1;
                pb.inc(1);
            }
            Event::Detail { id, url, parsed } => {
                stats.detail_pages += 1;
                store(&mut sink, &mut stats, id, &url, parsed);
                pb.inc(1);
            }
        }
    }

    pb.finish_and_clear();
    info!(
        "Crawl finished: {} listing pages, {} detail pages, {} written, {} duplicates, {} known skipped, {} fetch errors, {} parse failures, {} write failures",
        stats.listing_pages,
        stats.detail_pages,
        stats.written,
        stats.duplicates,
        stats.skipped_known,
        stats.fetch_errors,
        stats.parse_failures,
        stats.write_failures
    );
    Ok(stats)
}

async fn crawl_listing(
    url: String,
    prefetched: Option<String>,
    fetcher: Arc<Fetcher>,
    semaphore: Arc<Semaphore>,
    known: Arc<HashSet<String>>,
    tx: mpsc::Sender<Event>,
) {
    let body = match prefetched {
        Some(html) => Ok(html),
        None => {
            let Ok(_permit) = semaphore.acquire().await else {
                return;
            };
            fetcher.get(&url).await
        }
    };
    let html = match body {
        Ok(html) => html,
        Err(e) => {
            warn!("Listing page failed, skipping: {:#}", e);
            let _ = tx.send(Event::FetchFailed).await;
            return;
        }
    };

    let page_url = match Url::parse(&url) {
        Ok(u) => u,
        Err(e) => {
            warn!("Bad listing URL {}: {}", url, e);
            let _ = tx.send(Event::FetchFailed).await;
            return;
        }
    };
    let links = listing::detail_links(&html, &page_url);
    debug!("{} review links on {}", links.len(), url);
    let _ = tx.send(Event::Listing { links: links.len() }).await;

    for link in links {
        tokio::spawn(crawl_detail(
            link,
            Arc::clone(&fetcher),
            Arc::clone(&semaphore),
            Arc::clone(&known),
            tx.clone(),
        ));
    }
}

async fn crawl_detail(
    link: Url,
    fetcher: Arc<Fetcher>,
    semaphore: Arc<Semaphore>,
    known: Arc<HashSet<String>>,
    tx: mpsc::Sender<Event>,
) {
    let url = link.to_string();
    let Some(id) = review_id(&url) else {
        warn!("Cannot derive review id from {}", url);
        let _ = tx.send(Event::FetchFailed).await;
        return;
    };
    if known.contains(&id) {
        let _ = tx.send(Event::Known).await;
        return;
    }

    let body = {
        let Ok(_permit) = semaphore.acquire().await else {
            return;
        };
        fetcher.get(&url).await
    };
    let event = match body {
        Ok(html) => Event::Detail {
            id,
            parsed: parser::extract(&html),
            url,
        },
        Err(e) => {
            warn!("Detail page failed, skipping: {:#}", e);
            Event::FetchFailed
        }
    };
    let _ = tx.send(event).await;
}

/// Single-writer stage: a record is written whole or not at all.
fn store(
    sink: &mut RecordSink,
    stats: &mut CrawlStats,
    id: String,
    url: &str,
    parsed: Result<ReviewRecord, FieldError>,
) {
    let mut record = match parsed {
        Ok(r) => r,
        Err(e) => {
            warn!("Dropping {}: {}", url, e);
            stats.parse_failures += 1;
            return;
        }
    };
    record.id = id;

    match sink.persist(&record) {
        Ok(Persisted::Written) => {
            info!("Saved review {}", record.id);
            stats.written += 1;
        }
        Ok(Persisted::Duplicate) => stats.duplicates += 1,
        Err(e) => {
            warn!("Failed to save {}: {:#}", record.id, e);
            stats.write_failures += 1;
        }
    }
}
