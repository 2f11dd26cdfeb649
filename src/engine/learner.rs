//! Weight learning.
//!
//! After races settle, the learner compares realised win rates across
//! factor-contribution buckets and grade bands, and nudges the
//! weights record one point at a time. Every run writes a learning
//! note; a new weights record is only written when something actually
//! moved. Below the minimum sample the learner observes and records,
//! but never adjusts.

use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::store::RaceStore;
use crate::types::{factors, ConfidenceGrade, LearningNote, Outcome, RunnerRecord, WeightConfig};

/// Factors the learner may adjust. Form decay, going and the
/// database-match factor carry fixed points.
const ADJUSTABLE_FACTORS: [&str; 7] = [
    factors::RECENT_WIN,
    factors::SWEET_SPOT_ODDS,
    factors::OPTIMAL_ODDS,
    factors::IMPROVEMENT_TREND,
    factors::CONSISTENCY,
    factors::COURSE_WINNER,
    factors::ELITE_TRAINER,
];

pub struct Learner<'a> {
    store: &'a RaceStore,
}

impl<'a> Learner<'a> {
    pub fn new(store: &'a RaceStore) -> Self {
        Self { store }
    }

    /// Evaluate the trailing window ending at `today` and adjust
    /// weights where the evidence clears the configured margins.
    pub async fn run(
        &self,
        today: NaiveDate,
        window_days: i64,
        dry_run: bool,
    ) -> Result<LearningNote> {
        let window_start = today - Duration::days(window_days.max(1) - 1);
        let settled_rows = self.store.settled_between(window_start, today).await?;

        // Only analysed real results inform learning.
        let sample: Vec<&RunnerRecord> = settled_rows
            .iter()
            .filter(|r| r.is_analyzed() && r.outcome != Outcome::NonRunner)
            .collect();

        let weights = self.store.latest_weights().await?.unwrap_or_default();
        let mut adjusted = weights.clone();
        let mut adjustments: Vec<String> = Vec::new();

        let baseline_win_rate = win_rate(&sample);

        // Days on which the promoter filled its daily cap.
        let mut picks_per_day: HashMap<NaiveDate, usize> = HashMap::new();
        for row in &settled_rows {
            if row.show_in_ui {
                *picks_per_day.entry(row.race_date).or_default() += 1;
            }
        }
        let cap_hit_days = picks_per_day
            .values()
            .filter(|n| **n >= weights.daily_cap)
            .count();

        let excellent: Vec<&RunnerRecord> = sample
            .iter()
            .copied()
            .filter(|r| r.confidence_grade == Some(ConfidenceGrade::Excellent))
            .collect();
        let excellent_win_rate = (!excellent.is_empty()).then(|| win_rate(&excellent));
        let window_roi = (!sample.is_empty()).then(|| {
            let total: f64 = sample.iter().filter_map(|r| r.profit_loss).sum();
            total / sample.len() as f64
        });

        if sample.len() >= weights.min_sample {
            self.adjust_factors(&sample, &weights, &mut adjusted, &mut adjustments);
            self.adjust_threshold(
                &weights,
                &mut adjusted,
                &excellent,
                excellent_win_rate,
                cap_hit_days,
                &mut adjustments,
            );
        } else {
            debug!(
                sample = sample.len(),
                min = weights.min_sample,
                "Sample below learning minimum, observing only"
            );
        }

        let note = LearningNote {
            window_start,
            window_end: today,
            settled_count: sample.len(),
            baseline_win_rate,
            excellent_win_rate,
            window_roi,
            cap_hit_days,
            adjustments: adjustments.clone(),
            created_at: Utc::now(),
        };

        if dry_run {
            info!(note = %note, "Learning pass complete (dry run, nothing written)");
            return Ok(note);
        }

        if !adjustments.is_empty() {
            self.store.save_weights(&adjusted).await?;
        }
        self.store.insert_learning_note(&note).await?;

        info!(note = %note, adjusted = !adjustments.is_empty(), "Learning pass complete");
        Ok(note)
    }

    /// One ±1 step per factor: up when its bucket beats the
    /// complement by more than the configured margin, down when it
    /// fails to exceed the complement at all. In between holds.
    fn adjust_factors(
        &self,
        sample: &[&RunnerRecord],
        weights: &WeightConfig,
        adjusted: &mut WeightConfig,
        adjustments: &mut Vec<String>,
    ) {
        let margin = weights.outperform_margin_pp / 100.0;

        for factor in ADJUSTABLE_FACTORS {
            let (with, without): (Vec<&RunnerRecord>, Vec<&RunnerRecord>) =
                sample.iter().copied().partition(|r| {
                    r.score_breakdown.get(factor).map(|v| *v > 0).unwrap_or(false)
                });

            if with.len() < weights.min_grade_sample || without.len() < weights.min_grade_sample {
                continue;
            }

            let rate_with = win_rate(&with);
            let rate_without = win_rate(&without);
            let Some(current) = weights.factor_weight(factor) else {
                continue;
            };

            let target = if rate_with >= rate_without + margin {
                (current + 1).min(WeightConfig::factor_ceiling(factor))
            } else if rate_with <= rate_without {
                (current - 1).max(0)
            } else {
                current
            };

            if target != current {
                adjusted.set_factor_weight(factor, target);
                adjustments.push(format!(
                    "{factor}: {current} -> {target} (with {:.1}% vs without {:.1}%)",
                    rate_with * 100.0,
                    rate_without * 100.0,
                ));
            }
        }
    }

    /// EXCELLENT calibration drives the UI threshold: an
    /// underperforming grade tightens it, an overperforming grade on
    /// cap-saturated days relaxes it, never below the GOOD boundary.
    fn adjust_threshold(
        &self,
        weights: &WeightConfig,
        adjusted: &mut WeightConfig,
        excellent: &[&RunnerRecord],
        excellent_win_rate: Option<f64>,
        cap_hit_days: usize,
        adjustments: &mut Vec<String>,
    ) {
        if excellent.len() < weights.min_grade_sample {
            return;
        }
        let Some(rate) = excellent_win_rate else {
            return;
        };

        let current = weights.ui_threshold;
        if rate < weights.excellent_floor {
            let target = (current + 1).min(weights.ui_threshold_max);
            if target != current {
                adjusted.ui_threshold = target;
                adjustments.push(format!(
                    "ui_threshold: {current} -> {target} (EXCELLENT win rate {:.1}% below floor)",
                    rate * 100.0,
                ));
            }
        } else if rate > weights.excellent_ceiling && cap_hit_days >= weights.cap_hit_days_min {
            let target = (current - 1).max(weights.grade_good);
            if target != current {
                adjusted.ui_threshold = target;
                adjustments.push(format!(
                    "ui_threshold: {current} -> {target} (EXCELLENT win rate {:.1}% with cap hit {cap_hit_days} days)",
                    rate * 100.0,
                ));
            }
        }
    }
}

fn win_rate(rows: &[&RunnerRecord]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    let wins = rows.iter().filter(|r| r.outcome == Outcome::Won).count();
    wins as f64 / rows.len() as f64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
