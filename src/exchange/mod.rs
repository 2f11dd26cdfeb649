//! Exchange access layer.
//!
//! `ExchangeApi` is the seam the pipeline depends on: the ingestor and
//! settler consume it, the live `BetfairClient` implements it, and the
//! integration tests substitute a scripted mock. Wire-level quirks
//! (JSON-RPC envelopes, session handling, retry) stay behind the trait.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::types::PipelineError;

pub mod betfair;
pub mod secrets;

pub use betfair::BetfairClient;

// ---------------------------------------------------------------------------
// Normalised exchange types
// ---------------------------------------------------------------------------

/// A WIN market for a single race, with runner descriptions attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceMarket {
    pub market_id: String,
    pub course: String,
    pub country_code: String,
    pub race_time: DateTime<Utc>,
    pub runners: Vec<RunnerEntry>,
    /// Official going string when the exchange publishes one.
    pub going: Option<String>,
}

/// A runner as described in the market catalogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerEntry {
    pub selection_id: i64,
    pub runner_name: String,
    /// Trailing form string, most recent run first.
    pub form: Option<String>,
    pub trainer_name: Option<String>,
    pub jockey_name: Option<String>,
}

/// Live prices and statuses for one market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketBook {
    pub market_id: String,
    pub status: MarketStatus,
    pub runners: Vec<RunnerPrice>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketStatus {
    Open,
    Suspended,
    Closed,
    Inactive,
}

/// Price and status for one runner within a market book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerPrice {
    pub selection_id: i64,
    pub status: RunnerStatus,
    pub last_price_traded: Option<f64>,
    /// Best available back price, if any.
    pub best_back: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnerStatus {
    Active,
    Winner,
    Loser,
    Placed,
    RemovedVacant,
    Removed,
    Hidden,
}

impl RunnerPrice {
    /// Decimal odds to record for scoring: last traded price, falling
    /// back to the best available back offer.
    pub fn decimal_odds(&self) -> Option<f64> {
        self.last_price_traded.or(self.best_back)
    }
}

// ---------------------------------------------------------------------------
// The API seam
// ---------------------------------------------------------------------------

/// Everything the pipeline needs from the betting exchange.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// List WIN horse-racing markets starting on `date` in `countries`.
    async fn list_win_markets(
        &self,
        date: NaiveDate,
        countries: &[String],
    ) -> Result<Vec<RaceMarket>, PipelineError>;

    /// Fetch market books (prices, runner statuses) for the given
    /// market IDs.
    async fn list_market_books(
        &self,
        market_ids: &[String],
    ) -> Result<Vec<MarketBook>, PipelineError>;
}
