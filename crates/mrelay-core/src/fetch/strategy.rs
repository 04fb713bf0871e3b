use std::sync::Arc;

use regex::Regex;

use crate::fetch::ExtractionPolicy;

/// How a strategy's fetched content becomes deliverable artifacts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssemblyKind {
    /// Sub-resources become pages of one or more PDF documents.
    PaginatedDocument,
    /// Page snapshot serialized and cut into fixed-size chunks.
    ChunkedPayload,
}

/// A content source the relay knows how to fetch.
#[derive(Clone)]
pub struct Strategy {
    pub name: String,
    /// Command prefix (`fetch:`); `None` means the message is the bare URL.
    pub prefix: Option<String>,
    /// Pattern the (normalized) source URL must match.
    pub pattern: Regex,
    pub policy: Arc<dyn ExtractionPolicy>,
    pub assembly: AssemblyKind,
    /// One-line description shown in the usage hint.
    pub usage: String,
}

impl std::fmt::Debug for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategy")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .field("pattern", &self.pattern.as_str())
            .field("policy", &self.policy.name())
            .field("assembly", &self.assembly)
            .finish()
    }
}

/// Ordered lookup of strategies; the first registered match wins.
#[derive(Clone, Debug, Default)]
pub struct StrategyRegistry {
    strategies: Vec<Arc<Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, strategy: Strategy) -> &mut Self {
        self.strategies.push(Arc::new(strategy));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Strategy>> {
        self.strategies.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
