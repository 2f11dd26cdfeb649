//! Race validation and UI promotion.
//!
//! Coverage gates first: a race only produces a pick when enough of
//! its active runners were actually analysed. Each valid race then
//! contributes at most one candidate — its sole top scorer at or
//! above the UI threshold; a tied top score makes the race ambiguous
//! and it contributes nothing. Candidates are capped per day, and
//! flag writes are diffed so a re-run with unchanged inputs writes
//! nothing.

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::store::RaceStore;
use crate::types::RunnerRecord;

pub struct Promoter<'a> {
    store: &'a RaceStore,
}

#[derive(Debug, Default)]
pub struct PromoteSummary {
    pub races: usize,
    pub valid_races: usize,
    pub ambiguous_races: usize,
    pub candidates: usize,
    pub promoted: usize,
    pub flag_writes: usize,
}

/// A race's sole eligible top scorer.
#[derive(Debug, Clone)]
struct Candidate {
    record_id: String,
    race_id: String,
    score: i64,
    race_time: DateTime<Utc>,
}

impl<'a> Promoter<'a> {
    pub fn new(store: &'a RaceStore) -> Self {
        Self { store }
    }

    /// Validate coverage and promote the day's picks.
    pub async fn run(&self, date: NaiveDate, dry_run: bool) -> Result<PromoteSummary> {
        let runners = self.store.runners_for_date(date).await?;
        if runners.is_empty() {
            info!(date = %date, "No runners for date, nothing to promote");
            return Ok(PromoteSummary::default());
        }

        let weights = self.store.latest_weights().await?.unwrap_or_default();

        let mut races: BTreeMap<String, Vec<&RunnerRecord>> = BTreeMap::new();
        for runner in &runners {
            races.entry(runner.race_id.clone()).or_default().push(runner);
        }

        let mut summary = PromoteSummary {
            races: races.len(),
            ..Default::default()
        };
        let mut candidates: Vec<Candidate> = Vec::new();

        for (race_id, rows) in &races {
            let active: Vec<&RunnerRecord> =
                rows.iter().copied().filter(|r| !r.removed).collect();
            let total = active.len() as i64;
            let analyzed = active.iter().filter(|r| r.is_analyzed()).count() as i64;
            let coverage = if total > 0 {
                analyzed as f64 / total as f64
            } else {
                0.0
            };

            if !dry_run {
                self.store
                    .update_coverage(date, race_id, analyzed, total, coverage)
                    .await?;
            }

            if coverage < weights.coverage_min {
                debug!(
                    race_id = %race_id,
                    coverage = format!("{coverage:.2}"),
                    "Race below coverage floor, no candidate"
                );
                continue;
            }
            summary.valid_races += 1;

            let mut scored: Vec<&RunnerRecord> =
                active.iter().copied().filter(|r| r.is_analyzed()).collect();
            scored.sort_by(|a, b| {
                b.comprehensive_score
                    .cmp(&a.comprehensive_score)
                    .then_with(|| {
                        a.decimal_odds
                            .partial_cmp(&b.decimal_odds)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
            });

            let Some(best) = scored.first() else { continue };
            let best_score = best.comprehensive_score.unwrap_or(0);
            if best_score < weights.ui_threshold {
                continue;
            }

            if let Some(second) = scored.get(1) {
                let second_score = second.comprehensive_score.unwrap_or(0);
                if best_score - second_score <= weights.tie_epsilon {
                    warn!(
                        race_id = %race_id,
                        best = best_score,
                        second = second_score,
                        "Tied top score, race is ambiguous"
                    );
                    summary.ambiguous_races += 1;
                    continue;
                }
            }

            candidates.push(Candidate {
                record_id: best.record_id.clone(),
                race_id: race_id.clone(),
                score: best_score,
                race_time: best.race_time,
            });
        }

        summary.candidates = candidates.len();

        // Day cap: keep the strongest picks, deterministically.
        candidates.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.race_time.cmp(&b.race_time))
                .then_with(|| a.record_id.cmp(&b.record_id))
        });
        candidates.truncate(weights.daily_cap);
        summary.promoted = candidates.len();

        // At most one pick per race, by construction.
        let mut per_race: HashMap<&str, usize> = HashMap::new();
        for c in &candidates {
            let n = per_race.entry(c.race_id.as_str()).or_default();
            *n += 1;
            if *n > 1 {
                bail!("Multiple picks selected for race {}", c.race_id);
            }
        }

        let chosen: HashSet<&str> = candidates.iter().map(|c| c.record_id.as_str()).collect();

        for runner in &runners {
            let desired = chosen.contains(runner.record_id.as_str());
            if (runner.show_in_ui, runner.recommended_bet) != (desired, desired) {
                summary.flag_writes += 1;
                if dry_run {
                    debug!(record_id = %runner.record_id, desired, "Would flip UI flags (dry run)");
                } else {
                    self.store
                        .set_ui_flags(date, &runner.record_id, desired, desired)
                        .await?;
                }
            }
        }

        info!(
            date = %date,
            races = summary.races,
            valid = summary.valid_races,
            ambiguous = summary.ambiguous_races,
            candidates = summary.candidates,
            promoted = summary.promoted,
            flag_writes = summary.flag_writes,
            dry_run,
            "Promotion complete"
        );
        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
