//! Shared types for the SureBet pipeline.
//!
//! These types form the data model used across all stages. They are
//! designed to be stable so that the exchange client, store, and
//! engine modules can depend on them without circular references.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Record kinds
// ---------------------------------------------------------------------------

/// Discriminator for the polymorphic rows in the keyed store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    RunnerScore,
    SettledRunner,
    LearningNote,
    Weights,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::RunnerScore => "runner_score",
            RecordKind::SettledRunner => "settled_runner",
            RecordKind::LearningNote => "learning_note",
            RecordKind::Weights => "weights",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RecordKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "runner_score" => Ok(RecordKind::RunnerScore),
            "settled_runner" => Ok(RecordKind::SettledRunner),
            "learning_note" => Ok(RecordKind::LearningNote),
            "weights" => Ok(RecordKind::Weights),
            _ => Err(anyhow::anyhow!("Unknown record kind: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Grades and outcomes
// ---------------------------------------------------------------------------

/// Discretised confidence label over the comprehensive score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfidenceGrade {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl ConfidenceGrade {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceGrade::Excellent => "EXCELLENT",
            ConfidenceGrade::Good => "GOOD",
            ConfidenceGrade::Fair => "FAIR",
            ConfidenceGrade::Poor => "POOR",
        }
    }
}

impl fmt::Display for ConfidenceGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ConfidenceGrade {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EXCELLENT" => Ok(ConfidenceGrade::Excellent),
            "GOOD" => Ok(ConfidenceGrade::Good),
            "FAIR" => Ok(ConfidenceGrade::Fair),
            "POOR" => Ok(ConfidenceGrade::Poor),
            _ => Err(anyhow::anyhow!("Unknown confidence grade: {s}")),
        }
    }
}

/// Settled result of a runner in a market.
///
/// `Placed` is the exchange's each-way status recorded verbatim; for
/// WIN-stake profit purposes it settles as a loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Won,
    Placed,
    Lost,
    NonRunner,
    Pending,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Won => "WON",
            Outcome::Placed => "PLACED",
            Outcome::Lost => "LOST",
            Outcome::NonRunner => "NON_RUNNER",
            Outcome::Pending => "PENDING",
        }
    }

    /// Terminal outcomes are write-once; result fields become immutable.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::Pending)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Outcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WON" => Ok(Outcome::Won),
            "PLACED" => Ok(Outcome::Placed),
            "LOST" => Ok(Outcome::Lost),
            "NON_RUNNER" => Ok(Outcome::NonRunner),
            "PENDING" => Ok(Outcome::Pending),
            _ => Err(anyhow::anyhow!("Unknown outcome: {s}")),
        }
    }
}

/// Racing surface. All-weather tracks get no going adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Surface {
    Turf,
    AllWeather,
}

impl Surface {
    pub fn as_str(&self) -> &'static str {
        match self {
            Surface::Turf => "turf",
            Surface::AllWeather => "all-weather",
        }
    }
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Surface {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "turf" => Ok(Surface::Turf),
            "all-weather" => Ok(Surface::AllWeather),
            _ => Err(anyhow::anyhow!("Unknown surface: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Runner record
// ---------------------------------------------------------------------------

/// A runner's record of wins and places at today's course, built from
/// the store's own settled history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CourseHistory {
    pub wins: u32,
    pub places: u32,
    pub runs: u32,
}

/// One runner in one race — the authoritative wide row.
///
/// Created by the ingestor with empty scoring fields and
/// `outcome = PENDING`; the scorer, promoter, and settler each mutate
/// their own field group and nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerRecord {
    // identity
    pub race_date: NaiveDate,
    pub record_id: String,
    pub race_id: String,
    pub race_time: DateTime<Utc>,
    pub course: String,
    pub runner_name: String,
    pub selection_id: i64,

    // market
    pub decimal_odds: Option<f64>,

    // form / enrichment
    pub form: String,
    pub trainer: String,
    pub jockey: String,
    pub course_history: Option<CourseHistory>,
    pub db_match_score: Option<f64>,

    // conditions
    pub going: Option<String>,
    pub surface: Surface,
    pub rainfall_mm: Option<f64>,

    /// The exchange reported this runner REMOVED / REMOVED_VACANT
    /// pre-race; excluded from coverage denominators.
    pub removed: bool,

    // scoring
    pub comprehensive_score: Option<i64>,
    pub confidence_grade: Option<ConfidenceGrade>,
    pub score_breakdown: BTreeMap<String, i64>,
    pub score_notes: Vec<String>,

    // validation
    pub race_analyzed_count: Option<i64>,
    pub race_total_count: Option<i64>,
    pub race_coverage_pct: Option<f64>,

    // display
    pub show_in_ui: bool,
    pub recommended_bet: bool,

    // result
    pub outcome: Outcome,
    pub profit_loss: Option<f64>,
}

impl RunnerRecord {
    /// Stable record id within the date partition.
    pub fn record_id_for(race_id: &str, selection_id: i64) -> String {
        format!("{race_id}#{selection_id}")
    }

    /// Implied win probability from decimal odds.
    pub fn market_probability(&self) -> Option<f64> {
        self.decimal_odds.filter(|o| *o > 1.0).map(|o| 1.0 / o)
    }

    /// Record kind follows the lifecycle: a runner row becomes
    /// `settled_runner` once its outcome is terminal.
    pub fn kind(&self) -> RecordKind {
        if self.outcome.is_terminal() {
            RecordKind::SettledRunner
        } else {
            RecordKind::RunnerScore
        }
    }

    /// Whether the scorer produced a usable (non-zero) score.
    pub fn is_analyzed(&self) -> bool {
        self.comprehensive_score.map(|s| s > 0).unwrap_or(false)
    }

    /// Minimal record as the ingestor creates it.
    pub fn new_unscored(
        race_date: NaiveDate,
        race_id: &str,
        race_time: DateTime<Utc>,
        course: &str,
        runner_name: &str,
        selection_id: i64,
    ) -> Self {
        Self {
            race_date,
            record_id: Self::record_id_for(race_id, selection_id),
            race_id: race_id.to_string(),
            race_time,
            course: course.to_string(),
            runner_name: runner_name.to_string(),
            selection_id,
            decimal_odds: None,
            form: String::new(),
            trainer: String::new(),
            jockey: String::new(),
            course_history: None,
            db_match_score: None,
            going: None,
            surface: Surface::Turf,
            rainfall_mm: None,
            removed: false,
            comprehensive_score: None,
            confidence_grade: None,
            score_breakdown: BTreeMap::new(),
            score_notes: Vec::new(),
            race_analyzed_count: None,
            race_total_count: None,
            race_coverage_pct: None,
            show_in_ui: false,
            recommended_bet: false,
            outcome: Outcome::Pending,
            profit_loss: None,
        }
    }
}

impl fmt::Display for RunnerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {} {} | odds={} score={} grade={} | {}",
            self.runner_name,
            self.course,
            self.race_time.format("%H:%M"),
            self.decimal_odds
                .map(|o| format!("{o:.2}"))
                .unwrap_or_else(|| "-".into()),
            self.comprehensive_score
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".into()),
            self.confidence_grade
                .map(|g| g.to_string())
                .unwrap_or_else(|| "-".into()),
            self.outcome,
        )
    }
}

// ---------------------------------------------------------------------------
// Scoring factor names
// ---------------------------------------------------------------------------

/// Canonical factor names used in `score_breakdown`. The learner keys
/// its contribution buckets on these, so they must stay stable.
pub mod factors {
    pub const RECENT_WIN: &str = "recent_win";
    pub const SWEET_SPOT_ODDS: &str = "sweet_spot_odds";
    pub const OPTIMAL_ODDS: &str = "optimal_odds";
    pub const LONGSHOT_PENALTY: &str = "longshot_penalty";
    pub const RECENT_FORM: &str = "recent_form";
    pub const IMPROVEMENT_TREND: &str = "improvement_trend";
    pub const RECENT_SURGE: &str = "recent_surge";
    pub const CONSISTENCY: &str = "consistency";
    pub const COURSE_WINNER: &str = "course_winner";
    pub const ELITE_TRAINER: &str = "elite_trainer";
    pub const GOING_SUITABILITY: &str = "going_suitability";
    pub const DB_MATCH: &str = "db_match";
    pub const RANGE_CLIP: &str = "range_clip";
}

// ---------------------------------------------------------------------------
// Weight configuration
// ---------------------------------------------------------------------------

/// Scoring weights and promotion thresholds.
///
/// Lives in the store (CONFIG partition), never in code paths: the
/// scorer and promoter read the most recent record, and the learner
/// writes adjusted copies with a new timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    // scoring
    pub base: i64,
    pub recent_win: i64,
    pub sweet_spot: i64,
    pub optimal_band: i64,
    pub longshot_mid_penalty: i64,
    pub longshot_far_penalty: i64,
    pub improvement_strong: i64,
    pub improvement_mild: i64,
    pub recent_surge: i64,
    pub consistency_tight: i64,
    pub consistency_loose: i64,
    pub course_winner: i64,
    pub elite_trainer: i64,

    // grade boundaries
    pub grade_excellent: i64,
    pub grade_good: i64,
    pub grade_fair: i64,

    // promotion
    pub ui_threshold: i64,
    /// Ceiling the learner may raise `ui_threshold` to.
    pub ui_threshold_max: i64,
    pub coverage_min: f64,
    pub daily_cap: usize,
    pub tie_epsilon: i64,

    // learning
    pub min_sample: usize,
    pub min_grade_sample: usize,
    pub outperform_margin_pp: f64,
    pub excellent_floor: f64,
    pub excellent_ceiling: f64,
    pub cap_hit_days_min: usize,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            base: 30,
            recent_win: 25,
            sweet_spot: 30,
            optimal_band: 20,
            longshot_mid_penalty: 5,
            longshot_far_penalty: 10,
            improvement_strong: 15,
            improvement_mild: 8,
            recent_surge: 10,
            consistency_tight: 10,
            consistency_loose: 5,
            course_winner: 10,
            elite_trainer: 5,
            grade_excellent: 85,
            grade_good: 70,
            grade_fair: 55,
            ui_threshold: 85,
            ui_threshold_max: 95,
            coverage_min: 0.75,
            daily_cap: 10,
            tie_epsilon: 0,
            min_sample: 30,
            min_grade_sample: 10,
            outperform_margin_pp: 5.0,
            excellent_floor: 0.30,
            excellent_ceiling: 0.45,
            cap_hit_days_min: 4,
        }
    }
}

impl WeightConfig {
    /// Grade a clipped score against the configured boundaries.
    pub fn grade(&self, score: i64) -> ConfidenceGrade {
        if score >= self.grade_excellent {
            ConfidenceGrade::Excellent
        } else if score >= self.grade_good {
            ConfidenceGrade::Good
        } else if score >= self.grade_fair {
            ConfidenceGrade::Fair
        } else {
            ConfidenceGrade::Poor
        }
    }

    /// Current weight for a learner-adjustable factor.
    pub fn factor_weight(&self, factor: &str) -> Option<i64> {
        match factor {
            factors::RECENT_WIN => Some(self.recent_win),
            factors::SWEET_SPOT_ODDS => Some(self.sweet_spot),
            factors::OPTIMAL_ODDS => Some(self.optimal_band),
            factors::IMPROVEMENT_TREND => Some(self.improvement_strong),
            factors::CONSISTENCY => Some(self.consistency_tight),
            factors::COURSE_WINNER => Some(self.course_winner),
            factors::ELITE_TRAINER => Some(self.elite_trainer),
            _ => None,
        }
    }

    /// Set a learner-adjustable factor weight (clamped to >= 0).
    pub fn set_factor_weight(&mut self, factor: &str, value: i64) {
        let value = value.max(0);
        match factor {
            factors::RECENT_WIN => self.recent_win = value,
            factors::SWEET_SPOT_ODDS => self.sweet_spot = value,
            factors::OPTIMAL_ODDS => self.optimal_band = value,
            factors::IMPROVEMENT_TREND => self.improvement_strong = value,
            factors::CONSISTENCY => self.consistency_tight = value,
            factors::COURSE_WINNER => self.course_winner = value,
            factors::ELITE_TRAINER => self.elite_trainer = value,
            _ => {}
        }
    }

    /// Per-factor ceiling: twice the shipped default.
    pub fn factor_ceiling(factor: &str) -> i64 {
        let defaults = WeightConfig::default();
        defaults.factor_weight(factor).unwrap_or(0) * 2
    }
}

// ---------------------------------------------------------------------------
// Learning note
// ---------------------------------------------------------------------------

/// Aggregated observation written by the learner after each
/// evaluation window, whether or not weights changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningNote {
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub settled_count: usize,
    pub baseline_win_rate: f64,
    pub excellent_win_rate: Option<f64>,
    /// Mean `profit_loss` per settled unit stake over the window.
    pub window_roi: Option<f64>,
    pub cap_hit_days: usize,
    pub adjustments: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for LearningNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{} | settled={} baseline={:.1}% excellent={} roi={} adjustments={}",
            self.window_start,
            self.window_end,
            self.settled_count,
            self.baseline_win_rate * 100.0,
            self.excellent_win_rate
                .map(|r| format!("{:.1}%", r * 100.0))
                .unwrap_or_else(|| "-".into()),
            self.window_roi
                .map(|r| format!("{r:+.2}"))
                .unwrap_or_else(|| "-".into()),
            self.adjustments.len(),
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error kinds for the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Transient exchange error: {0}")]
    TransientExchange(String),

    #[error("Exchange contract violation: {0}")]
    ExchangeContract(String),

    #[error("Concurrent mutation on ({race_date}, {record_id})")]
    ConcurrentMutation {
        race_date: String,
        record_id: String,
    },

    #[error("Validation violation: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
