use std::fmt;

use serde::Serialize;

use partfinder_llm::OracleError;
use partfinder_navigator::NavigationError;

use crate::model::{Mode, SearchReport};

/// Where in a run a fatal error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Input,
    Navigation,
    Resolution,
    Oracle,
    Extraction,
    Run,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Input => "input",
            Self::Navigation => "navigation",
            Self::Resolution => "resolution",
            Self::Oracle => "oracle",
            Self::Extraction => "extraction",
            Self::Run => "run",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SearchError {
    #[error("invalid request: {0}")]
    InvalidInput(String),
    #[error("vendor `{vendor}` has no {mode} search")]
    Unsupported { mode: Mode, vendor: String },
    #[error("category {query} could not be resolved against the vendor taxonomy")]
    CategoryUnresolved { query: String },
    #[error("{step}: {source}")]
    Navigation {
        step: String,
        #[source]
        source: NavigationError,
    },
    #[error("{step}: {source}")]
    Oracle {
        step: String,
        #[source]
        source: OracleError,
    },
    #[error("extraction failed: {0}")]
    Extraction(String),
    #[error("run cancelled")]
    Cancelled,
}

impl SearchError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::InvalidInput(_) | Self::Unsupported { .. } => Stage::Input,
            Self::CategoryUnresolved { .. } => Stage::Resolution,
            Self::Navigation { .. } => Stage::Navigation,
            Self::Oracle { .. } => Stage::Oracle,
            Self::Extraction(_) => Stage::Extraction,
            Self::Cancelled => Stage::Run,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidInput(_) => 2,
            Self::Unsupported { .. } => 3,
            Self::CategoryUnresolved { .. } => 4,
            Self::Navigation { .. } => 5,
            Self::Oracle {
                source: OracleError::AuthFailed(_),
                ..
            } => 6,
            Self::Oracle { .. } => 7,
            Self::Extraction(_) => 8,
            Self::Cancelled => 130,
        }
    }
}

/// A failed run together with whatever it gathered before failing.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{error}")]
pub struct SearchFailure {
    pub error: SearchError,
    /// Results accumulated so far, with `metadata.complete == false`.
    pub partial: SearchReport,
}

/// A single listing row that could not be turned into a result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataError {
    #[error("row {row}: no part number")]
    MissingMpn { row: usize },
    #[error("row {row} ({mpn}): no product URL")]
    MissingUrl { row: usize, mpn: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnitError {
    #[error("unknown unit `{0}`")]
    Unknown(String),
    #[error("cannot convert {from} to {to}")]
    Incompatible { from: String, to: String },
    #[error("cannot read a value from `{0}`")]
    Unparsable(String),
}
