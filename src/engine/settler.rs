//! Result settlement.
//!
//! Once a market closes, the book's runner statuses become the
//! outcomes of record. Settlement is write-once: the store only
//! applies the update while the row is still PENDING, so a re-run
//! (or a racing second settler) can never rewrite a result.
//!
//! `profit_loss` is per unit WIN stake: a winner returns
//! `decimal_odds - 1`, a non-runner is a void bet (0), anything else
//! loses the stake (-1). A PLACED status is recorded verbatim but is
//! still a losing WIN bet.

use anyhow::Result;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::exchange::{ExchangeApi, MarketBook, MarketStatus, RunnerStatus};
use crate::store::{RaceStore, SettleResult};
use crate::types::Outcome;

pub struct Settler<'a> {
    exchange: &'a dyn ExchangeApi,
    store: &'a RaceStore,
}

#[derive(Debug, Default)]
pub struct SettleSummary {
    pub settled: usize,
    pub already_settled: usize,
    pub left_pending: usize,
    /// Selections absent from a closed book; flagged for manual review.
    pub missing: usize,
}

impl<'a> Settler<'a> {
    pub fn new(exchange: &'a dyn ExchangeApi, store: &'a RaceStore) -> Self {
        Self { exchange, store }
    }

    /// Settle every pending runner whose market has closed.
    ///
    /// Only races the scorer has touched are fetched; an unscored
    /// race has nothing to account for yet.
    pub async fn run(&self, date: NaiveDate, dry_run: bool) -> Result<SettleSummary> {
        let runners = self.store.runners_for_date(date).await?;
        let scored_races: HashSet<&str> = runners
            .iter()
            .filter(|r| r.comprehensive_score.is_some())
            .map(|r| r.race_id.as_str())
            .collect();
        let pending: Vec<_> = runners
            .iter()
            .filter(|r| {
                r.outcome == Outcome::Pending && scored_races.contains(r.race_id.as_str())
            })
            .collect();

        let mut summary = SettleSummary::default();
        if pending.is_empty() {
            info!(date = %date, "No pending runners to settle");
            return Ok(summary);
        }

        let market_ids: Vec<String> = pending
            .iter()
            .map(|r| r.race_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let books = self.exchange.list_market_books(&market_ids).await?;
        let book_index: HashMap<&str, &MarketBook> =
            books.iter().map(|b| (b.market_id.as_str(), b)).collect();

        for runner in pending {
            let Some(book) = book_index.get(runner.race_id.as_str()) else {
                warn!(race_id = %runner.race_id, "No book returned for market, leaving pending");
                summary.left_pending += 1;
                continue;
            };

            if book.status != MarketStatus::Closed {
                debug!(race_id = %runner.race_id, status = ?book.status, "Market not closed yet");
                summary.left_pending += 1;
                continue;
            }

            let Some(price) = book
                .runners
                .iter()
                .find(|p| p.selection_id == runner.selection_id)
            else {
                warn!(
                    record_id = %runner.record_id,
                    "Selection missing from closed book, needs manual review"
                );
                summary.missing += 1;
                continue;
            };

            let Some(outcome) = outcome_for_status(price.status) else {
                summary.left_pending += 1;
                continue;
            };
            let profit_loss = profit_for_outcome(outcome, runner.decimal_odds);

            if dry_run {
                debug!(record_id = %runner.record_id, outcome = %outcome, "Would settle (dry run)");
                summary.settled += 1;
                continue;
            }

            match self
                .store
                .settle(date, &runner.record_id, outcome, profit_loss)
                .await?
            {
                SettleResult::Applied => summary.settled += 1,
                SettleResult::AlreadySettled => summary.already_settled += 1,
                SettleResult::NotFound => {
                    warn!(record_id = %runner.record_id, "Runner row vanished during settlement");
                }
            }
        }

        info!(
            date = %date,
            settled = summary.settled,
            already = summary.already_settled,
            pending = summary.left_pending,
            missing = summary.missing,
            dry_run,
            "Settlement complete"
        );
        Ok(summary)
    }
}

/// Map a closed book's runner status to a settled outcome. Statuses
/// that should not appear in a closed book settle nothing.
fn outcome_for_status(status: RunnerStatus) -> Option<Outcome> {
    match status {
        RunnerStatus::Winner => Some(Outcome::Won),
        RunnerStatus::Placed => Some(Outcome::Placed),
        RunnerStatus::Loser => Some(Outcome::Lost),
        RunnerStatus::Removed | RunnerStatus::RemovedVacant => Some(Outcome::NonRunner),
        RunnerStatus::Active | RunnerStatus::Hidden => None,
    }
}

/// Unit-stake WIN profit for a terminal outcome.
fn profit_for_outcome(outcome: Outcome, decimal_odds: Option<f64>) -> Option<f64> {
    match outcome {
        Outcome::Won => decimal_odds.map(|o| o - 1.0),
        Outcome::NonRunner => Some(0.0),
        Outcome::Placed | Outcome::Lost => Some(-1.0),
        Outcome::Pending => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
