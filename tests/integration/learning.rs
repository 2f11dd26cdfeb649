//! Learning over a settled window, end to end on a file-backed store.

use chrono::{Duration, TimeZone, Utc};

use surebet::engine::{Ingestor, Learner, Promoter, Scorer, Settler};
use surebet::exchange::RunnerStatus;
use surebet::store::RaceStore;
use surebet::types::{factors, ConfidenceGrade, Outcome, RunnerRecord};

use crate::mock_exchange::{entry, market, open_book, closed_book, post_time, race_day, MockExchange};

fn countries() -> Vec<String> {
    vec!["GB".to_string(), "IE".to_string()]
}

#[tokio::test]
async fn test_small_settled_sample_writes_note_only() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("surebet.db");
    let store = RaceStore::open(db_path.to_str().unwrap()).await.unwrap();

    let markets = vec![market(
        "1.601",
        "Ascot",
        post_time(14, 0),
        vec![
            entry(71, "Yankee Moor", "111", ""),
            entry(72, "Zulu Breeze", "890", ""),
        ],
    )];
    let books = vec![open_book("1.601", vec![(71, 4.0), (72, 20.0)])];
    let exchange = MockExchange::new(markets, books);

    Ingestor::new(&exchange, &store, countries())
        .run(race_day(), false)
        .await
        .unwrap();
    Scorer::new(&store).run(race_day(), false).await.unwrap();
    Promoter::new(&store).run(race_day(), false).await.unwrap();

    exchange.set_books(vec![closed_book(
        "1.601",
        vec![(71, RunnerStatus::Winner), (72, RunnerStatus::Loser)],
    )]);
    Settler::new(&exchange, &store)
        .run(race_day(), false)
        .await
        .unwrap();

    let note = Learner::new(&store).run(race_day(), 14, false).await.unwrap();
    assert_eq!(note.settled_count, 2);
    assert!(note.adjustments.is_empty());
    assert_eq!(note.baseline_win_rate, 0.5);

    // Note persisted, weights untouched.
    assert_eq!(store.learning_notes(5).await.unwrap().len(), 1);
    assert!(store.latest_weights().await.unwrap().is_none());
}

#[tokio::test]
async fn test_clear_factor_signal_moves_weights_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("surebet.db");

    {
        let store = RaceStore::open(db_path.to_str().unwrap()).await.unwrap();
        // 20 settled winners carrying the recent-win factor against 20
        // factor-less losers with a handful of wins.
        for i in 0..40u32 {
            let with_factor = i < 20;
            let won = if with_factor { i < 12 } else { i < 22 };
            let day = race_day() - Duration::days((i % 7) as i64);
            let mut r = RunnerRecord::new_unscored(
                day,
                &format!("1.7{i:02}"),
                Utc.with_ymd_and_hms(2026, 4, 11, 14, 0, 0).unwrap(),
                "Kempton",
                &format!("Learner {i}"),
                1,
            );
            r.decimal_odds = Some(5.0);
            r.form = "123".to_string();
            r.comprehensive_score = Some(75);
            r.confidence_grade = Some(ConfidenceGrade::Good);
            if with_factor {
                r.score_breakdown.insert(factors::RECENT_WIN.to_string(), 25);
            }
            r.outcome = if won { Outcome::Won } else { Outcome::Lost };
            r.profit_loss = Some(if won { 4.0 } else { -1.0 });
            store.upsert_runner(&r).await.unwrap();
        }

        let note = Learner::new(&store).run(race_day(), 14, false).await.unwrap();
        assert!(note
            .adjustments
            .iter()
            .any(|a| a.starts_with("recent_win: 25 -> 26")));
    }

    // A fresh handle sees the adjusted weights.
    let reopened = RaceStore::open(db_path.to_str().unwrap()).await.unwrap();
    let weights = reopened.latest_weights().await.unwrap().unwrap();
    assert_eq!(weights.recent_win, 26);
}
