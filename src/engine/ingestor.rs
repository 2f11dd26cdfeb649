//! Race-day ingest.
//!
//! Pulls the day's WIN markets and their books from the exchange and
//! upserts one runner row per (market, selection). Ingest owns the
//! identity, market and conditions fields; everything downstream
//! (scores, flags, outcomes) is left alone so the stage can run
//! repeatedly through the morning as prices move.

use anyhow::Result;
use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::exchange::{ExchangeApi, MarketBook, RunnerStatus};
use crate::store::RaceStore;
use crate::types::{RunnerRecord, Surface};

/// UK/Ireland all-weather tracks; their races get no going factor.
const ALL_WEATHER_COURSES: &[&str] = &[
    "Wolverhampton",
    "Kempton",
    "Newcastle",
    "Southwell",
    "Lingfield",
    "Chelmsford City",
    "Chelmsford",
    "Dundalk",
];

pub struct Ingestor<'a> {
    exchange: &'a dyn ExchangeApi,
    store: &'a RaceStore,
    countries: Vec<String>,
}

#[derive(Debug, Default)]
pub struct IngestSummary {
    pub markets: usize,
    pub runners: usize,
    pub removed: usize,
}

impl<'a> Ingestor<'a> {
    pub fn new(exchange: &'a dyn ExchangeApi, store: &'a RaceStore, countries: Vec<String>) -> Self {
        Self {
            exchange,
            store,
            countries,
        }
    }

    /// Ingest one race day.
    pub async fn run(&self, date: NaiveDate, dry_run: bool) -> Result<IngestSummary> {
        let markets = self.exchange.list_win_markets(date, &self.countries).await?;
        if markets.is_empty() {
            warn!(date = %date, "No WIN markets for date, nothing ingested");
            return Ok(IngestSummary::default());
        }

        let market_ids: Vec<String> = markets.iter().map(|m| m.market_id.clone()).collect();
        let books = self.exchange.list_market_books(&market_ids).await?;
        let book_index: HashMap<&str, &MarketBook> =
            books.iter().map(|b| (b.market_id.as_str(), b)).collect();

        let mut summary = IngestSummary {
            markets: markets.len(),
            ..Default::default()
        };

        for market in &markets {
            let book = book_index.get(market.market_id.as_str());
            if book.is_none() {
                warn!(market_id = %market.market_id, "No market book returned, ingesting without prices");
            }

            let surface = surface_for_course(&market.course);

            for entry in &market.runners {
                let mut record = RunnerRecord::new_unscored(
                    date,
                    &market.market_id,
                    market.race_time,
                    &market.course,
                    &entry.runner_name,
                    entry.selection_id,
                );
                record.form = entry.form.clone().unwrap_or_default();
                record.trainer = entry.trainer_name.clone().unwrap_or_default();
                record.jockey = entry.jockey_name.clone().unwrap_or_default();
                record.going = market.going.clone();
                record.surface = surface;

                if let Some(price) = book.and_then(|b| {
                    b.runners.iter().find(|r| r.selection_id == entry.selection_id)
                }) {
                    record.decimal_odds = price.decimal_odds();
                    record.removed = matches!(
                        price.status,
                        RunnerStatus::Removed | RunnerStatus::RemovedVacant
                    );
                }

                if record.removed {
                    summary.removed += 1;
                }
                if !dry_run {
                    self.store.upsert_runner(&record).await?;
                }
                summary.runners += 1;
            }
        }

        info!(
            date = %date,
            markets = summary.markets,
            runners = summary.runners,
            removed = summary.removed,
            dry_run,
            "Ingest complete"
        );
        Ok(summary)
    }
}

/// Surface from the course name.
pub fn surface_for_course(course: &str) -> Surface {
    if ALL_WEATHER_COURSES
        .iter()
        .any(|aw| course.eq_ignore_ascii_case(aw))
    {
        Surface::AllWeather
    } else {
        Surface::Turf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_for_course() {
        assert_eq!(surface_for_course("Kempton"), Surface::AllWeather);
        assert_eq!(surface_for_course("wolverhampton"), Surface::AllWeather);
        assert_eq!(surface_for_course("Ascot"), Surface::Turf);
        assert_eq!(surface_for_course("Cheltenham"), Surface::Turf);
    }
}
