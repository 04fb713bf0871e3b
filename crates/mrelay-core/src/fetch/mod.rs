//! Content fetching: one listing page, then its sub-resources, sequentially.
//!
//! The transport ([`PageSource`]) and the locator extraction rule
//! ([`ExtractionPolicy`]) are ports; adapters decide how to talk to an origin
//! and which markup marks a sub-resource. The fetch loop itself (ordering,
//! pacing, skip-on-failure, empty detection) lives here.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::domain::SubResource;

pub mod pace;
pub mod strategy;

pub use pace::Pacer;
pub use strategy::{AssemblyKind, Strategy, StrategyRegistry};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchErrorKind {
    Unreachable,
    ParseFailure,
    EmptyResult,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FetchErrorKind::Unreachable => "unreachable",
            FetchErrorKind::ParseFailure => "parse_failure",
            FetchErrorKind::EmptyResult => "empty_result",
        })
    }
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("fetch failed ({kind}): {detail}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub detail: String,
}

impl FetchError {
    pub fn unreachable(detail: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Unreachable,
            detail: detail.into(),
        }
    }

    pub fn parse_failure(detail: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::ParseFailure,
            detail: detail.into(),
        }
    }

    pub fn empty_result(detail: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::EmptyResult,
            detail: detail.into(),
        }
    }
}

/// Transport to a content origin, carrying the access policy (headers,
/// per-request timeout).
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn get_page(&self, url: &str) -> Result<String, FetchError>;
    async fn get_resource(&self, url: &str) -> Result<SubResource, FetchError>;
}

/// What a policy found on a listing page.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtractedPage {
    pub title: Option<String>,
    /// Cleaned page markup for strategies that deliver the page itself.
    pub body: Option<String>,
    /// Absolute sub-resource URLs, in document order.
    pub locators: Vec<String>,
}

/// Source-specific rule for finding sub-resources in a page.
pub trait ExtractionPolicy: Send + Sync {
    fn name(&self) -> &str;
    fn extract(&self, page_url: &str, html: &str) -> Result<ExtractedPage, FetchError>;
}

/// Everything one fetch produced, ready for assembly.
#[derive(Clone, Debug, Default)]
pub struct FetchedContent {
    pub title: Option<String>,
    pub body: Option<String>,
    pub resources: Vec<SubResource>,
    /// Sub-resources that failed and were skipped.
    pub skipped: usize,
}

pub struct ContentFetcher {
    source: Arc<dyn PageSource>,
    throttle: Duration,
}

impl ContentFetcher {
    pub fn new(source: Arc<dyn PageSource>, throttle: Duration) -> Self {
        Self { source, throttle }
    }

    /// Fetch `url` and, one at a time with `throttle` spacing, every
    /// sub-resource the policy locates on it.
    ///
    /// Individual sub-resource failures are skipped. The result is
    /// `EmptyResult` when nothing deliverable remains: no sub-resources and no
    /// page body.
    pub async fn fetch(
        &self,
        url: &str,
        policy: &dyn ExtractionPolicy,
    ) -> Result<FetchedContent, FetchError> {
        let html = self.source.get_page(url).await?;
        let page = policy.extract(url, &html)?;
        let total = page.locators.len();
        info!(url, policy = policy.name(), sub_resources = total, "listing page parsed");

        let mut pacer = Pacer::new(self.throttle);
        let mut resources = Vec::with_capacity(total);
        let mut skipped = 0;
        for (idx, locator) in page.locators.iter().enumerate() {
            pacer.wait().await;
            debug!(index = idx + 1, total, locator = %locator, "fetching sub-resource");
            match self.source.get_resource(locator).await {
                Ok(res) if !res.content.is_empty() => resources.push(res),
                Ok(_) => {
                    skipped += 1;
                    warn!(locator = %locator, "sub-resource was empty, skipping");
                }
                Err(e) => {
                    skipped += 1;
                    warn!(locator = %locator, error = %e, "sub-resource failed, skipping");
                }
            }
        }

        let has_body = page.body.as_deref().is_some_and(|b| !b.trim().is_empty());
        if resources.is_empty() && !has_body {
            return Err(FetchError::empty_result(if total == 0 {
                format!("no sub-resources found at {url}")
            } else {
                format!("all {total} sub-resources at {url} failed")
            }));
        }

        Ok(FetchedContent {
            title: page.title,
            body: page.body,
            resources,
            skipped,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    /// In-memory origin: page HTML by URL, resources by URL.
    #[derive(Default)]
    pub(crate) struct FakeSource {
        pub pages: HashMap<String, String>,
        pub resources: HashMap<String, Vec<u8>>,
        pub calls: AtomicUsize,
    }

    impl FakeSource {
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PageSource for FakeSource {
        async fn get_page(&self, url: &str) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::unreachable(format!("404 for {url}")))
        }

        async fn get_resource(&self, url: &str) -> Result<SubResource, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.resources
                .get(url)
                .map(|bytes| SubResource {
                    locator: url.to_string(),
                    content: bytes.clone(),
                    media_type: "image/png".to_string(),
                })
                .ok_or_else(|| FetchError::unreachable(format!("404 for {url}")))
        }
    }

    /// Treats every whitespace-separated `img:<url>` token as a locator.
    pub(crate) struct TokenPolicy;

    impl ExtractionPolicy for TokenPolicy {
        fn name(&self) -> &str {
            "token"
        }

        fn extract(&self, _page_url: &str, html: &str) -> Result<ExtractedPage, FetchError> {
            if html.contains("<<garbage>>") {
                return Err(FetchError::parse_failure("unreadable page"));
            }
            Ok(ExtractedPage {
                title: None,
                body: None,
                locators: html
                    .split_whitespace()
                    .filter_map(|t| t.strip_prefix("img:"))
                    .map(str::to_string)
                    .collect(),
            })
        }
    }

    fn source_with(page: &str, resources: &[&str]) -> FakeSource {
        let mut src = FakeSource::default();
        src.pages.insert("https://example.com/x".into(), page.into());
        for r in resources {
            src.resources.insert((*r).to_string(), r.as_bytes().to_vec());
        }
        src
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_order_and_skips_failures() {
        let src = Arc::new(source_with("img:a img:missing img:c", &["a", "c"]));
        let fetcher = ContentFetcher::new(src.clone(), Duration::from_secs(1));
        let start = tokio::time::Instant::now();

        let out = fetcher.fetch("https://example.com/x", &TokenPolicy).await.unwrap();
        let order: Vec<_> = out.resources.iter().map(|r| r.locator.as_str()).collect();
        assert_eq!(order, vec!["a", "c"]);
        assert_eq!(out.skipped, 1);
        assert_eq!(src.calls(), 4);
        // Three sequential sub-resource requests, two throttle gaps.
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn no_locators_is_empty_result() {
        let src = Arc::new(source_with("nothing here", &[]));
        let fetcher = ContentFetcher::new(src, Duration::ZERO);
        let err = fetcher.fetch("https://example.com/x", &TokenPolicy).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::EmptyResult);
    }

    #[tokio::test]
    async fn all_failed_is_empty_result() {
        let src = Arc::new(source_with("img:gone img:also-gone", &[]));
        let fetcher = ContentFetcher::new(src, Duration::ZERO);
        let err = fetcher.fetch("https://example.com/x", &TokenPolicy).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::EmptyResult);
    }

    #[tokio::test]
    async fn unreachable_page_and_parse_failure_propagate() {
        let src = Arc::new(source_with("<<garbage>>", &[]));
        let fetcher = ContentFetcher::new(src, Duration::ZERO);

        let err = fetcher.fetch("https://example.com/other", &TokenPolicy).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Unreachable);

        let err = fetcher.fetch("https://example.com/x", &TokenPolicy).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::ParseFailure);
    }
}
