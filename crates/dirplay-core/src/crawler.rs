//! Recursive crawl of HTML directory listings.
//!
//! ```text
//!   crawl("")
//!     ├── claim "/audio/"            (visited set, one lock per directory)
//!     ├── GET listing, no-cache
//!     ├── hrefs → normalize → classify
//!     │     ├── Audio      → collected
//!     │     └── Directory  → crawl(sub) ... all siblings polled together
//!     └── merge children's sets into ours
//! ```

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures_util::future::{try_join_all, BoxFuture, FutureExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL, PRAGMA};
use reqwest::redirect::Policy;
use reqwest::{Client, Url};
use scraper::{Html, Selector};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::config::CrawlConfig;
use crate::error::CrawlError;
use crate::path::{canonical_key, normalize, AudioRoot};

/// Extensions treated as playable, matched case-insensitively.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "m4a", "aac", "flac", "webm"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Directory,
    Audio,
    Ignored,
}

/// Classify a root-relative path by its path portion (query ignored).
pub fn classify(rel: &str) -> LinkKind {
    let path = rel.split('?').next().unwrap_or_default();
    if path.is_empty() || path.ends_with('/') {
        return LinkKind::Directory;
    }

    let lower = path.to_ascii_lowercase();
    let is_audio = lower
        .rsplit_once('.')
        .is_some_and(|(_, ext)| AUDIO_EXTENSIONS.contains(&ext));
    if is_audio {
        LinkKind::Audio
    } else {
        LinkKind::Ignored
    }
}

/// Every anchor `href` in the document, minus listing-control links
/// (empty, query-only and fragment-only references).
pub fn extract_hrefs(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    document
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|h| !h.is_empty() && !h.starts_with('?') && !h.starts_with('#'))
        .map(String::from)
        .collect()
}

/// Redirect hops allowed per listing.
const MAX_REDIRECTS: usize = 10;

/// Client for listing fetches. Redirects are only followed while they stay
/// on the root's origin and under its prefix; otherwise the 3xx response
/// itself is returned and fails the fetch.
pub fn build_client(config: &CrawlConfig, root: &AudioRoot) -> reqwest::Result<Client> {
    let bound = root.clone();
    let policy = Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if bound.contains(attempt.url()) {
            attempt.follow()
        } else {
            debug!("crawl: not following redirect to {}", attempt.url());
            attempt.stop()
        }
    });

    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(config.timeout_secs))
        .redirect(policy)
        .build()
}

/// Counters gathered during one crawl.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlReport {
    /// Listings fetched.
    pub directories: usize,
    /// Links dropped for pointing off-origin or outside the audio root.
    pub rejected: usize,
}

#[derive(Debug, Clone)]
pub struct Crawler {
    client: Client,
    root: AudioRoot,
    max_connections: usize,
}

impl Crawler {
    pub fn new(client: Client, root: AudioRoot) -> Self {
        Self {
            client,
            root,
            max_connections: 8,
        }
    }

    /// Crawler with a root-bounded client and the configured limits.
    pub fn from_config(config: &CrawlConfig, root: AudioRoot) -> reqwest::Result<Self> {
        let client = build_client(config, &root)?;
        Ok(Self::new(client, root).with_max_connections(config.max_connections))
    }

    /// Cap on listings in flight at once. Zero is treated as one.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max.max(1);
        self
    }

    pub fn root(&self) -> &AudioRoot {
        &self.root
    }

    /// All audio files reachable from the root-relative directory `start`.
    pub async fn crawl(&self, start: &str) -> Result<BTreeSet<String>, CrawlError> {
        self.crawl_with_report(start).await.map(|(files, _)| files)
    }

    pub async fn crawl_with_report(
        &self,
        start: &str,
    ) -> Result<(BTreeSet<String>, CrawlReport), CrawlError> {
        let run = CrawlRun {
            crawler: self,
            visited: Mutex::new(HashSet::new()),
            permits: Semaphore::new(self.max_connections),
            directories: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
        };

        let files = run.crawl_dir(start.to_string()).await?;
        let report = CrawlReport {
            directories: run.directories.load(Ordering::Relaxed),
            rejected: run.rejected.load(Ordering::Relaxed),
        };
        info!(
            "crawl finished: {} files in {} directories ({} links outside the root)",
            files.len(),
            report.directories,
            report.rejected
        );
        Ok((files, report))
    }

    /// GET one listing. Returns the URL the body actually came from, which
    /// differs from `url` after an in-root redirect.
    async fn fetch_listing(&self, url: &Url) -> Result<(Url, String), CrawlError> {
        let path = canonical_key(url);
        debug!("crawl: GET {}", url);

        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, "text/html")
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .send()
            .await
            .map_err(|source| CrawlError::Fetch {
                path: path.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CrawlError::Status {
                path,
                status: response.status(),
            });
        }

        let page_url = response.url().clone();
        let html = response
            .text()
            .await
            .map_err(|source| CrawlError::Fetch { path, source })?;
        Ok((page_url, html))
    }
}

/// State shared by every branch of one crawl.
struct CrawlRun<'a> {
    crawler: &'a Crawler,
    visited: Mutex<HashSet<String>>,
    permits: Semaphore,
    directories: AtomicUsize,
    rejected: AtomicUsize,
}

impl<'a> CrawlRun<'a> {
    /// Check-and-insert in one step. Only the first claimant gets `true`.
    fn claim(&self, key: String) -> bool {
        match self.visited.lock() {
            Ok(mut visited) => visited.insert(key),
            Err(poisoned) => poisoned.into_inner().insert(key),
        }
    }

    fn crawl_dir(&'a self, dir: String) -> BoxFuture<'a, Result<BTreeSet<String>, CrawlError>> {
        async move {
            let root = &self.crawler.root;
            let url = root
                .url_for(&dir)
                .map_err(|source| CrawlError::BadPath {
                    path: dir.clone(),
                    source,
                })?;

            if !self.claim(canonical_key(&url)) {
                debug!("crawl: {} already visited", url.path());
                return Ok(BTreeSet::new());
            }
            self.directories.fetch_add(1, Ordering::Relaxed);

            let (page_url, html) = {
                let _permit = self.permits.acquire().await.ok();
                self.crawler.fetch_listing(&url).await?
            };

            // Links resolve against the page we were given, not the one we asked for.
            let here = if page_url == url {
                dir
            } else {
                let Ok(rel) = normalize(page_url.as_str(), &page_url, root) else {
                    return Err(CrawlError::Redirect {
                        path: canonical_key(&url),
                        target: page_url.to_string(),
                    });
                };
                debug!("crawl: {} redirected to {}", url.path(), page_url.path());
                if !self.claim(canonical_key(&page_url)) {
                    return Ok(BTreeSet::new());
                }
                rel
            };

            let mut files = BTreeSet::new();
            let mut subdirs = Vec::new();
            for href in extract_hrefs(&html) {
                let rel = match normalize(&href, &page_url, root) {
                    Ok(rel) => rel,
                    Err(reason) => {
                        if reason.is_boundary() {
                            self.rejected.fetch_add(1, Ordering::Relaxed);
                        }
                        debug!("crawl: skipping {:?} in {}: {}", href, page_url.path(), reason);
                        continue;
                    }
                };
                if rel == here {
                    continue;
                }
                match classify(&rel) {
                    LinkKind::Directory => subdirs.push(rel),
                    LinkKind::Audio => {
                        files.insert(rel);
                    }
                    LinkKind::Ignored => {}
                }
            }

            let children = try_join_all(subdirs.into_iter().map(|sub| self.crawl_dir(sub))).await?;
            for child in children {
                files.extend(child);
            }
            Ok(files)
        }
        .boxed()
    }
}
