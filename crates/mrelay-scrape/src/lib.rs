//! Origin adapters: the HTTP transport and the per-site extraction policies.

pub mod http;
pub mod policy;

pub use http::HttpPageSource;
pub use policy::{ChapterImagesPolicy, WebPagePolicy};

use std::sync::Arc;

use mrelay_core::{
    errors::Error,
    fetch::{AssemblyKind, Strategy, StrategyRegistry},
    Result,
};
use regex::Regex;

/// Chapter reader pages on the supported manga site.
pub const CHAPTER_URL_PATTERN: &str = r"^https?://(www\.)?lekmanga\.net/manga/[^/]+/[^/]+/?$";

/// The command prefix for arbitrary page snapshots.
pub const PAGE_PREFIX: &str = "fetch:";

/// Strategies in match order: chapter links first, then `fetch:<url>`.
pub fn default_registry() -> Result<StrategyRegistry> {
    let chapter = Regex::new(CHAPTER_URL_PATTERN)
        .map_err(|e| Error::Config(format!("chapter pattern: {e}")))?;
    let any_http =
        Regex::new(r"^https?://").map_err(|e| Error::Config(format!("page pattern: {e}")))?;

    let mut registry = StrategyRegistry::new();
    registry
        .register(Strategy {
            name: "chapter".to_string(),
            prefix: None,
            pattern: chapter,
            policy: Arc::new(ChapterImagesPolicy::default()),
            assembly: AssemblyKind::PaginatedDocument,
            usage: "a chapter link, e.g. lekmanga.net/manga/<title>/<chapter>/ (sent back as PDF)"
                .to_string(),
        })
        .register(Strategy {
            name: "page".to_string(),
            prefix: Some(PAGE_PREFIX.to_string()),
            pattern: any_http,
            policy: Arc::new(WebPagePolicy),
            assembly: AssemblyKind::ChunkedPayload,
            usage: "fetch:<url> (the page is sent back as JSON chunks)".to_string(),
        });
    Ok(registry)
}
