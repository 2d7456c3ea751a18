//! Search core: requests and results, category resolution, parameter
//! translation, result normalisation and the per-mode orchestrator.

pub mod batch;
pub mod error;
pub mod model;
pub mod normalizer;
pub mod orchestrator;
pub mod resolver;
pub mod retry;
pub mod taxonomy;
pub mod translator;
pub mod units;

#[cfg(test)]
mod testing;

pub use batch::{BatchItem, parse_batch, run_batch};
pub use error::{DataError, SearchError, SearchFailure, Stage, UnitError};
pub use model::{
    CategoryTaxonomyNode, ComponentResult, Constraint, FieldMapping, Mode, MpnRequest, ParametricRequest,
    RunMetadata, SearchReport, SearchRequest, XrefRequest, constraints_from_json,
};
pub use orchestrator::Orchestrator;
pub use retry::RetryPolicy;
