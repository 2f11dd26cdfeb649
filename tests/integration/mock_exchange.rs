//! Mock exchange for integration testing.
//!
//! A deterministic `ExchangeApi` implementation backed by scripted
//! markets and books. Books can be swapped mid-test to move a race
//! from live prices to a closed result.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use surebet::exchange::{
    ExchangeApi, MarketBook, MarketStatus, RaceMarket, RunnerEntry, RunnerPrice, RunnerStatus,
};
use surebet::types::PipelineError;

pub struct MockExchange {
    markets: Vec<RaceMarket>,
    books: Mutex<HashMap<String, MarketBook>>,
}

impl MockExchange {
    pub fn new(markets: Vec<RaceMarket>, books: Vec<MarketBook>) -> Self {
        Self {
            markets,
            books: Mutex::new(books.into_iter().map(|b| (b.market_id.clone(), b)).collect()),
        }
    }

    /// Replace the scripted books, e.g. to close a market after racing.
    pub fn set_books(&self, books: Vec<MarketBook>) {
        *self.books.lock().unwrap() =
            books.into_iter().map(|b| (b.market_id.clone(), b)).collect();
    }
}

#[async_trait]
impl ExchangeApi for MockExchange {
    async fn list_win_markets(
        &self,
        date: NaiveDate,
        _countries: &[String],
    ) -> Result<Vec<RaceMarket>, PipelineError> {
        Ok(self
            .markets
            .iter()
            .filter(|m| m.race_time.date_naive() == date)
            .cloned()
            .collect())
    }

    async fn list_market_books(
        &self,
        market_ids: &[String],
    ) -> Result<Vec<MarketBook>, PipelineError> {
        let books = self.books.lock().unwrap();
        Ok(market_ids.iter().filter_map(|id| books.get(id).cloned()).collect())
    }
}

// ---------------------------------------------------------------------------
// Fixture builders
// ---------------------------------------------------------------------------

pub fn race_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 4, 11).unwrap()
}

pub fn post_time(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 11, hour, minute, 0).unwrap()
}

pub fn market(
    market_id: &str,
    course: &str,
    race_time: DateTime<Utc>,
    runners: Vec<RunnerEntry>,
) -> RaceMarket {
    RaceMarket {
        market_id: market_id.to_string(),
        course: course.to_string(),
        country_code: "GB".to_string(),
        race_time,
        runners,
        going: Some("Good".to_string()),
    }
}

pub fn entry(selection_id: i64, name: &str, form: &str, trainer: &str) -> RunnerEntry {
    RunnerEntry {
        selection_id,
        runner_name: name.to_string(),
        form: (!form.is_empty()).then(|| form.to_string()),
        trainer_name: (!trainer.is_empty()).then(|| trainer.to_string()),
        jockey_name: None,
    }
}

pub fn open_book(market_id: &str, prices: Vec<(i64, f64)>) -> MarketBook {
    MarketBook {
        market_id: market_id.to_string(),
        status: MarketStatus::Open,
        runners: prices
            .into_iter()
            .map(|(selection_id, odds)| RunnerPrice {
                selection_id,
                status: RunnerStatus::Active,
                last_price_traded: None,
                best_back: Some(odds),
            })
            .collect(),
    }
}

pub fn closed_book(market_id: &str, results: Vec<(i64, RunnerStatus)>) -> MarketBook {
    MarketBook {
        market_id: market_id.to_string(),
        status: MarketStatus::Closed,
        runners: results
            .into_iter()
            .map(|(selection_id, status)| RunnerPrice {
                selection_id,
                status,
                last_price_traded: None,
                best_back: None,
            })
            .collect(),
    }
}
