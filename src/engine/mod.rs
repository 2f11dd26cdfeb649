//! Pipeline stages.
//!
//! Each stage is a small struct over the store (plus the exchange for
//! ingest and settlement) with a single `run` entry point. Stages only
//! mutate their own field group on the runner rows, so they can be
//! re-run in any order without corrupting each other's output.

pub mod ingestor;
pub mod learner;
pub mod promoter;
pub mod scorer;
pub mod settler;

pub use ingestor::{IngestSummary, Ingestor};
pub use learner::Learner;
pub use promoter::{PromoteSummary, Promoter};
pub use scorer::{ScoreSummary, Scorer};
pub use settler::{SettleSummary, Settler};
