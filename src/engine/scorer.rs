//! Comprehensive scoring.
//!
//! Every analysable runner gets `base + sum(factor contributions)`,
//! clipped to [0, 100] and graded. All tunable factor points come
//! from the current weights record; the position-score decay map and
//! the going table carry fixed points. Each contribution lands in
//! `score_breakdown` under its canonical factor name, so
//! `base + sum(breakdown) == comprehensive_score` always holds — the
//! clip itself is recorded as a `range_clip` entry.

use anyhow::Result;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::form::ParsedForm;
use crate::store::RaceStore;
use crate::types::{factors, Outcome, RunnerRecord, Surface, WeightConfig};

/// Position-score map for the recent-form decay factor.
fn position_score(position: u8) -> i64 {
    match position {
        1 => 30,
        2 => 20,
        3 => 10,
        4 => 5,
        5 => 0,
        6 => -5,
        7 => -10,
        8 => -15,
        9 => -20,
        0 => -25,
        _ => -20,
    }
}

/// Decay weights over the five most recent finishing positions.
const FORM_DECAY: [f64; 5] = [0.50, 0.30, 0.15, 0.03, 0.02];

/// Trainers whose yards historically outperform; substring match on
/// the lowercased trainer name.
const ELITE_TRAINERS: [&str; 4] = ["nicholls", "mullins", "elliott", "henderson"];

/// How far back the runner-history scan looks for the database-match
/// factor.
const HISTORY_SCAN_LIMIT: i64 = 20;

pub struct Scorer<'a> {
    store: &'a RaceStore,
}

#[derive(Debug, Default)]
pub struct ScoreSummary {
    pub scored: usize,
    pub skipped: usize,
}

impl<'a> Scorer<'a> {
    pub fn new(store: &'a RaceStore) -> Self {
        Self { store }
    }

    /// Score every analysable runner on one race day.
    pub async fn run(&self, date: NaiveDate, dry_run: bool) -> Result<ScoreSummary> {
        let weights = self.store.latest_weights().await?.unwrap_or_default();
        let runners = self.store.runners_for_date(date).await?;
        let mut summary = ScoreSummary::default();

        for mut record in runners {
            if record.removed || record.form.is_empty() || record.decimal_odds.is_none() {
                debug!(record_id = %record.record_id, "Runner not analysable, skipping");
                summary.skipped += 1;
                continue;
            }

            let course_history = self
                .store
                .course_history(&record.runner_name, &record.course, date)
                .await?;
            record.course_history = (course_history.runs > 0).then_some(course_history);

            let history = self
                .store
                .runner_history(&record.runner_name, date, HISTORY_SCAN_LIMIT)
                .await?;
            record.db_match_score = db_match_score(&history);

            score_runner(&weights, &mut record);
            if !dry_run {
                self.store.update_scores(&record).await?;
            }
            summary.scored += 1;
        }

        info!(
            date = %date,
            scored = summary.scored,
            skipped = summary.skipped,
            dry_run,
            "Scoring complete"
        );
        Ok(summary)
    }
}

/// Database-match points from the runner's own settled rows:
/// a high historical win rate is rewarded, a demonstrated poor one
/// penalised, thin history contributes nothing.
pub fn db_match_score(history: &[RunnerRecord]) -> Option<f64> {
    let runs = history
        .iter()
        .filter(|r| matches!(r.outcome, Outcome::Won | Outcome::Placed | Outcome::Lost))
        .count();
    if runs == 0 {
        return None;
    }
    let wins = history.iter().filter(|r| r.outcome == Outcome::Won).count();
    let win_rate = wins as f64 / runs as f64;

    if win_rate >= 0.5 {
        Some(15.0)
    } else if win_rate >= 1.0 / 3.0 {
        Some(10.0)
    } else if win_rate < 0.2 && runs >= 2 {
        Some(-10.0)
    } else {
        Some(0.0)
    }
}

/// Compute the full breakdown, score and grade for one runner.
///
/// Pure over the record's own fields plus the weights; safe to re-run
/// (the breakdown is rebuilt from scratch).
pub fn score_runner(w: &WeightConfig, record: &mut RunnerRecord) {
    let form = ParsedForm::parse(&record.form);
    let mut breakdown: BTreeMap<String, i64> = BTreeMap::new();
    let mut notes: Vec<String> = Vec::new();

    // Recent win.
    if form.has_win_in_first(3) {
        breakdown.insert(factors::RECENT_WIN.to_string(), w.recent_win);
    }

    // Odds bands: the optimal band stacks on the sweet spot.
    if let Some(odds) = record.decimal_odds {
        if (3.0..=9.0).contains(&odds) {
            breakdown.insert(factors::SWEET_SPOT_ODDS.to_string(), w.sweet_spot);
            if odds <= 6.0 {
                breakdown.insert(factors::OPTIMAL_ODDS.to_string(), w.optimal_band);
            }
        } else if odds > 15.0 {
            breakdown.insert(
                factors::LONGSHOT_PENALTY.to_string(),
                -w.longshot_far_penalty,
            );
        } else if (10.0..=15.0).contains(&odds) {
            breakdown.insert(
                factors::LONGSHOT_PENALTY.to_string(),
                -w.longshot_mid_penalty,
            );
        }
    }

    // Recent-form decay over the five most recent finishing positions.
    let digits = form.digit_positions(5);
    if !digits.is_empty() {
        let weighted: f64 = digits
            .iter()
            .zip(FORM_DECAY)
            .map(|(p, decay)| decay * position_score(*p) as f64)
            .sum();
        let points = weighted.round() as i64;
        if points != 0 {
            breakdown.insert(factors::RECENT_FORM.to_string(), points);
        }
    }

    // Improvement trend over the first four positive positions.
    let trend = form.positive_positions(4);
    if trend.len() >= 4 {
        let steps = trend.windows(2).filter(|pair| pair[0] > pair[1]).count();
        if steps >= 3 {
            breakdown.insert(factors::IMPROVEMENT_TREND.to_string(), w.improvement_strong);
        } else if steps == 2 {
            breakdown.insert(factors::IMPROVEMENT_TREND.to_string(), w.improvement_mild);
        }
        let recent_avg = f64::from(u16::from(trend[0]) + u16::from(trend[1])) / 2.0;
        let older_avg = f64::from(u16::from(trend[2]) + u16::from(trend[3])) / 2.0;
        if recent_avg < older_avg - 2.0 {
            breakdown.insert(factors::RECENT_SURGE.to_string(), w.recent_surge);
        }
    }

    // Consistency over the last three actual finishes; an unplaced
    // `0` (10th or worse) disqualifies both bands.
    let last3 = form.digit_positions(3);
    if last3.len() == 3 {
        if last3.iter().all(|p| (1..=3).contains(p)) {
            breakdown.insert(factors::CONSISTENCY.to_string(), w.consistency_tight);
        } else if last3.iter().all(|p| (1..=5).contains(p)) {
            breakdown.insert(factors::CONSISTENCY.to_string(), w.consistency_loose);
        }
    }

    // Course winner.
    if record
        .course_history
        .as_ref()
        .map(|h| h.wins >= 1)
        .unwrap_or(false)
    {
        breakdown.insert(factors::COURSE_WINNER.to_string(), w.course_winner);
        notes.push(format!("previous winner at {}", record.course));
    }

    // Elite trainer.
    let trainer = record.trainer.to_lowercase();
    if ELITE_TRAINERS.iter().any(|t| trainer.contains(t)) {
        breakdown.insert(factors::ELITE_TRAINER.to_string(), w.elite_trainer);
    }

    // Going suitability.
    let going = effective_going(record.going.as_deref(), record.rainfall_mm);
    let (going_points, going_note) = going_suitability(going.as_deref(), record.surface, &form);
    if going_points != 0 {
        breakdown.insert(factors::GOING_SUITABILITY.to_string(), going_points);
    }
    if let Some(note) = going_note {
        notes.push(note);
    }

    // Database match.
    if let Some(db) = record.db_match_score {
        let points = db.round() as i64;
        if points != 0 {
            breakdown.insert(factors::DB_MATCH.to_string(), points);
        }
    }

    let raw = w.base + breakdown.values().sum::<i64>();
    let clipped = raw.clamp(0, 100);
    if clipped != raw {
        breakdown.insert(factors::RANGE_CLIP.to_string(), clipped - raw);
    }

    record.comprehensive_score = Some(clipped);
    record.confidence_grade = Some(w.grade(clipped));
    record.score_breakdown = breakdown;
    record.score_notes = notes;
}

// ---------------------------------------------------------------------------
// Going
// ---------------------------------------------------------------------------

/// The going string to score against: the exchange's, or one inferred
/// from recent rainfall when the exchange published none.
pub fn effective_going(going: Option<&str>, rainfall_mm: Option<f64>) -> Option<String> {
    match going {
        Some(g) if !g.trim().is_empty() => Some(g.to_string()),
        _ => rainfall_mm.map(|mm| going_from_rainfall(mm).to_string()),
    }
}

/// Rainfall bands to an approximate going description.
pub fn going_from_rainfall(mm: f64) -> &'static str {
    if mm >= 20.0 {
        "Heavy"
    } else if mm >= 10.0 {
        "Soft"
    } else if mm >= 5.0 {
        "Good to Soft"
    } else if mm >= 2.0 {
        "Good"
    } else {
        "Good to Firm"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GoingBucket {
    SoftHeavy,
    Firm,
    Good,
}

fn going_bucket(going: Option<&str>) -> GoingBucket {
    let lower = going.unwrap_or("").to_lowercase();
    if lower.contains("heavy") || lower.contains("soft") {
        GoingBucket::SoftHeavy
    } else if lower.contains("firm") {
        GoingBucket::Firm
    } else {
        GoingBucket::Good
    }
}

/// Going adjustment from the runner's profile over its five most
/// recent figures. All-weather surfaces get no adjustment.
pub fn going_suitability(
    going: Option<&str>,
    surface: Surface,
    form: &ParsedForm,
) -> (i64, Option<String>) {
    if surface == Surface::AllWeather {
        return (0, None);
    }

    let profile = form.recent_profile(5);
    let label = going.unwrap_or("Good");

    match going_bucket(going) {
        GoingBucket::SoftHeavy => {
            if profile.places >= 3 && profile.non_completions == 0 {
                (3, Some(format!("strong stamina profile for {label}")))
            } else if profile.places >= 2 && profile.non_completions <= 1 {
                (2, Some(format!("handles testing ground ({label})")))
            } else if profile.wins >= 2 && profile.places < 3 {
                (-2, Some(format!("speed profile unsuited to {label}")))
            } else {
                (0, None)
            }
        }
        GoingBucket::Firm => {
            if profile.wins >= 2 {
                (3, Some(format!("proven speed on {label}")))
            } else if profile.wins >= 1 && profile.places >= 2 {
                (2, Some(format!("effective on fast ground ({label})")))
            } else if profile.places >= 4 && profile.wins == 0 {
                (-2, Some(format!("grinds places, rarely wins on {label}")))
            } else {
                (0, None)
            }
        }
        GoingBucket::Good => {
            if profile.wins >= 1 && profile.places >= 3 {
                (2, Some(format!("balanced profile for {label}")))
            } else if profile.places >= 3 {
                (1, Some(format!("consistent placer on {label}")))
            } else {
                (0, None)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
