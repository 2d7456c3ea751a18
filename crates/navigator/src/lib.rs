//! Vendor-site navigation: the action vocabulary the search modes are written
//! against, plus an HTTP/DOM session that implements it.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod fetch;
pub mod fixture;
mod page;
mod session;

pub use fetch::{FetchRequest, FetchedPage, Fetcher, FormMethod, ReqwestFetcher};
pub use page::Page;
pub use session::{HttpNavigator, SessionSettings};

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NavigationError {
    #[error("timed out after {after_ms} ms waiting for {what}")]
    Timeout { what: String, after_ms: u64 },
    #[error("not found: {what}")]
    NotFound { what: String },
    #[error("blocked by anti-automation defence at {url}: {reason}")]
    Blocked { url: String, reason: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("invalid selector `{0}`")]
    InvalidSelector(String),
}

impl NavigationError {
    /// Failures worth repeating the same action for after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport(_))
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}

// ── Extracted data ───────────────────────────────────────────────────────────

/// One element (or table cell) lifted out of a page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedCell {
    pub tag: String,
    /// Visible text with whitespace collapsed.
    pub text: String,
    /// Absolute link target of the element itself or its first link.
    pub href: Option<String>,
    pub attrs: BTreeMap<String, String>,
}

impl ExtractedCell {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedRow {
    pub cells: Vec<ExtractedCell>,
}

impl ExtractedRow {
    pub fn first(&self) -> Option<&ExtractedCell> {
        self.cells.first()
    }
}

/// Structured result of [`Navigator::extract`].
///
/// A matched `<table>` contributes its header texts and one row per body
/// `<tr>`.  Any other matched element contributes a single row whose first
/// cell is the element itself, followed by one cell per `<option>` it
/// contains.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extraction {
    pub headers: Vec<String>,
    pub rows: Vec<ExtractedRow>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

// ── Navigator contract ───────────────────────────────────────────────────────

/// The action vocabulary every search mode is expressed in.
///
/// One navigator drives one session with the vendor; calls are issued
/// sequentially by a single orchestrator.
#[async_trait]
pub trait Navigator: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), NavigationError>;
    async fn fill(&self, selector: &str, value: &str) -> Result<(), NavigationError>;
    async fn click(&self, selector: &str) -> Result<(), NavigationError>;
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), NavigationError>;
    async fn extract(&self, selector: &str) -> Result<Extraction, NavigationError>;
    async fn current_url(&self) -> Option<String>;

    /// Switch to a gentler interaction pattern after an anti-bot block.
    /// Returns `false` when no further change is available.
    async fn slow_down(&self) -> bool {
        false
    }
}
