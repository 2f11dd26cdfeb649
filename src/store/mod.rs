//! Persistence layer.
//!
//! A single SQLite database keyed on `(race_date, record_id)`. Runner
//! rows live in the wide `runners` table; weights and learning notes
//! are JSON payloads in `system_records` under reserved partitions
//! (`CONFIG`, `LEARNING`) so they never collide with race dates.
//!
//! Mutations are conditional where the lifecycle demands it: settling
//! only fires while the row is still `PENDING`, and the stage lock is
//! an `INSERT OR IGNORE` race that at most one runner of a stage wins.

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::types::{
    ConfidenceGrade, CourseHistory, LearningNote, Outcome, RecordKind, RunnerRecord, Surface,
    WeightConfig,
};

/// Partition holding the weights records.
const CONFIG_PARTITION: &str = "CONFIG";
/// Partition holding learning notes.
const LEARNING_PARTITION: &str = "LEARNING";

/// Result of a conditional settlement write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleResult {
    /// The row moved from PENDING to the terminal outcome.
    Applied,
    /// The row was already terminal; nothing was written.
    AlreadySettled,
    /// No such row.
    NotFound,
}

/// Keyed race store over SQLite.
#[derive(Clone)]
pub struct RaceStore {
    pool: SqlitePool,
}

impl RaceStore {
    /// Open (or create) the database at `path` and run migrations.
    pub async fn open(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(Path::new(path))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database at {path}"))?;

        let store = Self { pool };
        store.migrate().await?;
        info!(path, "Race store opened");
        Ok(store)
    }

    /// In-memory store for tests. Single connection so every query
    /// sees the same database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("Failed to build in-memory options")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runners (
                race_date           TEXT    NOT NULL,
                record_id           TEXT    NOT NULL,
                race_id             TEXT    NOT NULL,
                race_time           TEXT    NOT NULL,
                course              TEXT    NOT NULL,
                runner_name         TEXT    NOT NULL,
                selection_id        INTEGER NOT NULL,
                decimal_odds        REAL,
                form                TEXT    NOT NULL DEFAULT '',
                trainer             TEXT    NOT NULL DEFAULT '',
                jockey              TEXT    NOT NULL DEFAULT '',
                course_history      TEXT,
                db_match_score      REAL,
                going               TEXT,
                surface             TEXT    NOT NULL DEFAULT 'turf',
                rainfall_mm         REAL,
                removed             INTEGER NOT NULL DEFAULT 0,
                comprehensive_score INTEGER,
                confidence_grade    TEXT,
                score_breakdown     TEXT    NOT NULL DEFAULT '{}',
                score_notes         TEXT    NOT NULL DEFAULT '[]',
                race_analyzed_count INTEGER,
                race_total_count    INTEGER,
                race_coverage_pct   REAL,
                show_in_ui          INTEGER NOT NULL DEFAULT 0,
                recommended_bet     INTEGER NOT NULL DEFAULT 0,
                outcome             TEXT    NOT NULL DEFAULT 'PENDING',
                profit_loss         REAL,
                updated_at          TEXT    NOT NULL,
                PRIMARY KEY (race_date, record_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create runners table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS system_records (
                partition  TEXT NOT NULL,
                record_id  TEXT NOT NULL,
                kind       TEXT NOT NULL,
                payload    TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (partition, record_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create system_records table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stage_locks (
                stage       TEXT NOT NULL,
                race_date   TEXT NOT NULL,
                acquired_at TEXT NOT NULL,
                PRIMARY KEY (stage, race_date)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create stage_locks table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_runners_name ON runners (runner_name, race_date)",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create runner name index")?;

        Ok(())
    }

    // -- Runner rows -------------------------------------------------------

    /// Insert or refresh a runner row from ingest.
    ///
    /// On conflict only the market and conditions fields are updated;
    /// enrichment fields are filled only when the incoming value is
    /// non-empty, and scoring, validation, display and result fields
    /// are never touched, so re-ingest is idempotent across the day.
    pub async fn upsert_runner(&self, record: &RunnerRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO runners (
                race_date, record_id, race_id, race_time, course, runner_name,
                selection_id, decimal_odds, form, trainer, jockey,
                course_history, db_match_score, going, surface, rainfall_mm,
                removed, comprehensive_score, confidence_grade,
                score_breakdown, score_notes, race_analyzed_count,
                race_total_count, race_coverage_pct, show_in_ui,
                recommended_bet, outcome, profit_loss, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26,
                ?27, ?28, ?29
            )
            ON CONFLICT (race_date, record_id) DO UPDATE SET
                race_time    = excluded.race_time,
                decimal_odds = COALESCE(excluded.decimal_odds, runners.decimal_odds),
                form    = CASE WHEN excluded.form    <> '' THEN excluded.form    ELSE runners.form    END,
                trainer = CASE WHEN excluded.trainer <> '' THEN excluded.trainer ELSE runners.trainer END,
                jockey  = CASE WHEN excluded.jockey  <> '' THEN excluded.jockey  ELSE runners.jockey  END,
                going       = COALESCE(excluded.going, runners.going),
                surface     = excluded.surface,
                rainfall_mm = COALESCE(excluded.rainfall_mm, runners.rainfall_mm),
                removed     = excluded.removed,
                updated_at  = excluded.updated_at
            "#,
        )
        .bind(record.race_date.to_string())
        .bind(&record.record_id)
        .bind(&record.race_id)
        .bind(record.race_time.to_rfc3339())
        .bind(&record.course)
        .bind(&record.runner_name)
        .bind(record.selection_id)
        .bind(record.decimal_odds)
        .bind(&record.form)
        .bind(&record.trainer)
        .bind(&record.jockey)
        .bind(
            record
                .course_history
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(record.db_match_score)
        .bind(&record.going)
        .bind(record.surface.as_str())
        .bind(record.rainfall_mm)
        .bind(record.removed)
        .bind(record.comprehensive_score)
        .bind(record.confidence_grade.map(|g| g.as_str()))
        .bind(serde_json::to_string(&record.score_breakdown)?)
        .bind(serde_json::to_string(&record.score_notes)?)
        .bind(record.race_analyzed_count)
        .bind(record.race_total_count)
        .bind(record.race_coverage_pct)
        .bind(record.show_in_ui)
        .bind(record.recommended_bet)
        .bind(record.outcome.as_str())
        .bind(record.profit_loss)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert runner {}", record.record_id))?;

        Ok(())
    }

    /// All runner rows for one race day, in race order.
    pub async fn runners_for_date(&self, date: NaiveDate) -> Result<Vec<RunnerRecord>> {
        let rows = sqlx::query("SELECT * FROM runners WHERE race_date = ?1 ORDER BY race_time, record_id")
            .bind(date.to_string())
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch runners for date")?;

        rows.iter().map(row_to_runner).collect()
    }

    /// One runner row by key.
    pub async fn get_runner(
        &self,
        date: NaiveDate,
        record_id: &str,
    ) -> Result<Option<RunnerRecord>> {
        let row = sqlx::query("SELECT * FROM runners WHERE race_date = ?1 AND record_id = ?2")
            .bind(date.to_string())
            .bind(record_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch runner")?;

        row.as_ref().map(row_to_runner).transpose()
    }

    /// Write the scorer's field group for one runner.
    pub async fn update_scores(&self, record: &RunnerRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE runners SET
                comprehensive_score = ?1,
                confidence_grade    = ?2,
                score_breakdown     = ?3,
                score_notes         = ?4,
                course_history      = ?5,
                db_match_score      = ?6,
                updated_at          = ?7
            WHERE race_date = ?8 AND record_id = ?9
            "#,
        )
        .bind(record.comprehensive_score)
        .bind(record.confidence_grade.map(|g| g.as_str()))
        .bind(serde_json::to_string(&record.score_breakdown)?)
        .bind(serde_json::to_string(&record.score_notes)?)
        .bind(
            record
                .course_history
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(record.db_match_score)
        .bind(Utc::now().to_rfc3339())
        .bind(record.race_date.to_string())
        .bind(&record.record_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to update scores for {}", record.record_id))?;

        if result.rows_affected() == 0 {
            bail!("No runner row for {} on {}", record.record_id, record.race_date);
        }
        Ok(())
    }

    /// Write coverage stats onto every runner of one race.
    pub async fn update_coverage(
        &self,
        date: NaiveDate,
        race_id: &str,
        analyzed: i64,
        total: i64,
        coverage_pct: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE runners SET
                race_analyzed_count = ?1,
                race_total_count    = ?2,
                race_coverage_pct   = ?3,
                updated_at          = ?4
            WHERE race_date = ?5 AND race_id = ?6
            "#,
        )
        .bind(analyzed)
        .bind(total)
        .bind(coverage_pct)
        .bind(Utc::now().to_rfc3339())
        .bind(date.to_string())
        .bind(race_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to update coverage for race {race_id}"))?;
        Ok(())
    }

    /// Write the promoter's display flags for one runner.
    pub async fn set_ui_flags(
        &self,
        date: NaiveDate,
        record_id: &str,
        show_in_ui: bool,
        recommended_bet: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE runners SET
                show_in_ui      = ?1,
                recommended_bet = ?2,
                updated_at      = ?3
            WHERE race_date = ?4 AND record_id = ?5
            "#,
        )
        .bind(show_in_ui)
        .bind(recommended_bet)
        .bind(Utc::now().to_rfc3339())
        .bind(date.to_string())
        .bind(record_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to set UI flags for {record_id}"))?;
        Ok(())
    }

    /// Conditionally settle a runner: only a PENDING row is written.
    pub async fn settle(
        &self,
        date: NaiveDate,
        record_id: &str,
        outcome: Outcome,
        profit_loss: Option<f64>,
    ) -> Result<SettleResult> {
        let result = sqlx::query(
            r#"
            UPDATE runners SET
                outcome     = ?1,
                profit_loss = ?2,
                updated_at  = ?3
            WHERE race_date = ?4 AND record_id = ?5 AND outcome = 'PENDING'
            "#,
        )
        .bind(outcome.as_str())
        .bind(profit_loss)
        .bind(Utc::now().to_rfc3339())
        .bind(date.to_string())
        .bind(record_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to settle {record_id}"))?;

        if result.rows_affected() == 1 {
            debug!(record_id, outcome = %outcome, "Runner settled");
            return Ok(SettleResult::Applied);
        }

        match self.get_runner(date, record_id).await? {
            Some(_) => Ok(SettleResult::AlreadySettled),
            None => Ok(SettleResult::NotFound),
        }
    }

    /// Settled runner rows in a closed date window, for the learner.
    pub async fn settled_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RunnerRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM runners
            WHERE race_date >= ?1 AND race_date <= ?2 AND outcome <> 'PENDING'
            ORDER BY race_date, record_id
            "#,
        )
        .bind(start.to_string())
        .bind(end.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch settled runners")?;

        rows.iter().map(row_to_runner).collect()
    }

    /// A runner's settled rows before `before`, newest first.
    pub async fn runner_history(
        &self,
        runner_name: &str,
        before: NaiveDate,
        limit: i64,
    ) -> Result<Vec<RunnerRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM runners
            WHERE runner_name = ?1 AND race_date < ?2 AND outcome <> 'PENDING'
            ORDER BY race_date DESC
            LIMIT ?3
            "#,
        )
        .bind(runner_name)
        .bind(before.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch runner history")?;

        rows.iter().map(row_to_runner).collect()
    }

    /// Wins/places/runs for a runner at one course, from settled rows
    /// before `before`. Non-runners do not count as runs.
    pub async fn course_history(
        &self,
        runner_name: &str,
        course: &str,
        before: NaiveDate,
    ) -> Result<CourseHistory> {
        let row = sqlx::query(
            r#"
            SELECT
                SUM(CASE WHEN outcome = 'WON' THEN 1 ELSE 0 END)               AS wins,
                SUM(CASE WHEN outcome IN ('WON', 'PLACED') THEN 1 ELSE 0 END)  AS places,
                COUNT(*)                                                        AS runs
            FROM runners
            WHERE runner_name = ?1 AND course = ?2 AND race_date < ?3
              AND outcome IN ('WON', 'PLACED', 'LOST')
            "#,
        )
        .bind(runner_name)
        .bind(course)
        .bind(before.to_string())
        .fetch_one(&self.pool)
        .await
        .context("Failed to fetch course history")?;

        Ok(CourseHistory {
            wins: row.try_get::<i64, _>("wins").unwrap_or(0) as u32,
            places: row.try_get::<i64, _>("places").unwrap_or(0) as u32,
            runs: row.try_get::<i64, _>("runs").unwrap_or(0) as u32,
        })
    }

    /// The day's flagged picks in race order — the read contract the
    /// display layer consumes.
    pub async fn flagged_picks(&self, date: NaiveDate) -> Result<Vec<RunnerRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM runners
            WHERE race_date = ?1 AND show_in_ui = 1
            ORDER BY race_time, record_id
            "#,
        )
        .bind(date.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch flagged picks")?;

        rows.iter().map(row_to_runner).collect()
    }

    /// How many runners are flagged for the UI on one day.
    pub async fn ui_count_for_date(&self, date: NaiveDate) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM runners WHERE race_date = ?1 AND show_in_ui = 1",
        )
        .bind(date.to_string())
        .fetch_one(&self.pool)
        .await
        .context("Failed to count UI runners")?;
        Ok(row.try_get("n")?)
    }

    // -- Weights and learning notes ----------------------------------------

    /// Most recent weights record, if any has been written.
    pub async fn latest_weights(&self) -> Result<Option<WeightConfig>> {
        let row = sqlx::query(
            r#"
            SELECT payload FROM system_records
            WHERE partition = ?1 AND kind = ?2
            ORDER BY record_id DESC
            LIMIT 1
            "#,
        )
        .bind(CONFIG_PARTITION)
        .bind(RecordKind::Weights.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch weights")?;

        match row {
            Some(row) => {
                let payload: String = row.try_get("payload")?;
                let weights = serde_json::from_str(&payload)
                    .context("Failed to parse stored weights")?;
                Ok(Some(weights))
            }
            None => Ok(None),
        }
    }

    /// Append a new timestamped weights record.
    pub async fn save_weights(&self, weights: &WeightConfig) -> Result<()> {
        let record_id = format!("weights#{}", Utc::now().format("%Y%m%dT%H%M%S%6fZ"));
        sqlx::query(
            r#"
            INSERT INTO system_records (partition, record_id, kind, payload, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(CONFIG_PARTITION)
        .bind(&record_id)
        .bind(RecordKind::Weights.as_str())
        .bind(serde_json::to_string(weights)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save weights")?;

        info!(record_id, "Weights record written");
        Ok(())
    }

    /// Append a learning note.
    pub async fn insert_learning_note(&self, note: &LearningNote) -> Result<()> {
        let record_id = format!("note#{}", note.created_at.format("%Y%m%dT%H%M%S%6fZ"));
        sqlx::query(
            r#"
            INSERT INTO system_records (partition, record_id, kind, payload, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(LEARNING_PARTITION)
        .bind(&record_id)
        .bind(RecordKind::LearningNote.as_str())
        .bind(serde_json::to_string(note)?)
        .bind(note.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to insert learning note")?;
        Ok(())
    }

    /// Most recent learning notes, newest first.
    pub async fn learning_notes(&self, limit: i64) -> Result<Vec<LearningNote>> {
        let rows = sqlx::query(
            r#"
            SELECT payload FROM system_records
            WHERE partition = ?1 AND kind = ?2
            ORDER BY record_id DESC
            LIMIT ?3
            "#,
        )
        .bind(LEARNING_PARTITION)
        .bind(RecordKind::LearningNote.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch learning notes")?;

        rows.iter()
            .map(|row| {
                let payload: String = row.try_get("payload")?;
                serde_json::from_str(&payload).context("Failed to parse learning note")
            })
            .collect()
    }

    // -- Stage locks -------------------------------------------------------

    /// Advisory per-stage, per-day lock. Returns true when this caller
    /// won the insert race.
    pub async fn try_stage_lock(&self, stage: &str, date: NaiveDate) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO stage_locks (stage, race_date, acquired_at) VALUES (?1, ?2, ?3)",
        )
        .bind(stage)
        .bind(date.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to acquire stage lock")?;
        Ok(result.rows_affected() == 1)
    }

    /// Release a previously acquired stage lock.
    pub async fn release_stage_lock(&self, stage: &str, date: NaiveDate) -> Result<()> {
        sqlx::query("DELETE FROM stage_locks WHERE stage = ?1 AND race_date = ?2")
            .bind(stage)
            .bind(date.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to release stage lock")?;
        Ok(())
    }
}

/// Decode one wide row back into a `RunnerRecord`.
fn row_to_runner(row: &SqliteRow) -> Result<RunnerRecord> {
    let race_date: String = row.try_get("race_date")?;
    let race_time: String = row.try_get("race_time")?;
    let surface: String = row.try_get("surface")?;
    let outcome: String = row.try_get("outcome")?;
    let grade: Option<String> = row.try_get("confidence_grade")?;
    let course_history: Option<String> = row.try_get("course_history")?;
    let breakdown: String = row.try_get("score_breakdown")?;
    let notes: String = row.try_get("score_notes")?;

    Ok(RunnerRecord {
        race_date: NaiveDate::parse_from_str(&race_date, "%Y-%m-%d")
            .context("Bad race_date in store")?,
        record_id: row.try_get("record_id")?,
        race_id: row.try_get("race_id")?,
        race_time: chrono::DateTime::parse_from_rfc3339(&race_time)
            .context("Bad race_time in store")?
            .with_timezone(&Utc),
        course: row.try_get("course")?,
        runner_name: row.try_get("runner_name")?,
        selection_id: row.try_get("selection_id")?,
        decimal_odds: row.try_get("decimal_odds")?,
        form: row.try_get("form")?,
        trainer: row.try_get("trainer")?,
        jockey: row.try_get("jockey")?,
        course_history: course_history
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .context("Bad course_history in store")?,
        db_match_score: row.try_get("db_match_score")?,
        going: row.try_get("going")?,
        surface: surface.parse::<Surface>()?,
        rainfall_mm: row.try_get("rainfall_mm")?,
        removed: row.try_get("removed")?,
        comprehensive_score: row.try_get("comprehensive_score")?,
        confidence_grade: grade.map(|g| g.parse::<ConfidenceGrade>()).transpose()?,
        score_breakdown: serde_json::from_str(&breakdown).context("Bad score_breakdown")?,
        score_notes: serde_json::from_str(&notes).context("Bad score_notes")?,
        race_analyzed_count: row.try_get("race_analyzed_count")?,
        race_total_count: row.try_get("race_total_count")?,
        race_coverage_pct: row.try_get("race_coverage_pct")?,
        show_in_ui: row.try_get("show_in_ui")?,
        recommended_bet: row.try_get("recommended_bet")?,
        outcome: outcome.parse::<Outcome>()?,
        profit_loss: row.try_get("profit_loss")?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
