//! Turning an inbound text into a fetch job.

use std::sync::Arc;

use url::Url;

use crate::{
    domain::FetchJob,
    fetch::{Strategy, StrategyRegistry},
};

#[derive(Clone, Debug)]
pub struct Command {
    pub job: FetchJob,
    pub strategy: Arc<Strategy>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("message does not name a supported content source")]
    Unrecognized,
}

/// Match `text` against the registry, in registration order.
pub fn parse_command(text: &str, registry: &StrategyRegistry) -> Result<Command, CommandError> {
    let text = text.trim();
    for strategy in registry.iter() {
        let candidate = match &strategy.prefix {
            Some(prefix) => match strip_prefix_ignore_case(text, prefix) {
                Some(rest) => rest.trim(),
                None => continue,
            },
            None => text,
        };

        let Some(url) = normalize_url(candidate) else {
            continue;
        };
        if !strategy.pattern.is_match(url.as_str()) {
            continue;
        }

        return Ok(Command {
            job: derive_job(&url),
            strategy: strategy.clone(),
        });
    }
    Err(CommandError::Unrecognized)
}

/// Usage text listing every registered way to ask for content.
pub fn usage_hint(registry: &StrategyRegistry) -> String {
    let mut out = String::from("Sorry, I didn't understand that. Send one of:");
    for s in registry.iter() {
        out.push_str("\n- ");
        out.push_str(&s.usage);
    }
    out
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        text.get(prefix.len()..)
    } else {
        None
    }
}

/// Accept `host/path` as well as full http(s) URLs; `https://` is assumed.
pub fn normalize_url(raw: &str) -> Option<Url> {
    if raw.is_empty() || raw.chars().any(char::is_whitespace) {
        return None;
    }
    let lower = raw.to_ascii_lowercase();
    let with_scheme = if lower.starts_with("http://") || lower.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };

    let url = Url::parse(&with_scheme).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    Some(url)
}

/// Title and identifier from the last two path segments:
/// `/manga/one-piece/chapter-1` gives "One Piece" / "chapter-1".
pub fn derive_job(url: &Url) -> FetchJob {
    let host = url.host_str().unwrap_or("page").to_string();
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    let (title, identifier) = match segments.as_slice() {
        [] => (host.clone(), host),
        [only] => (host, (*only).to_string()),
        [.., parent, last] => (title_case(parent), (*last).to_string()),
    };

    FetchJob {
        source_url: url.to_string(),
        derived_title: title,
        derived_identifier: identifier,
    }
}

fn title_case(slug: &str) -> String {
    slug.split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
