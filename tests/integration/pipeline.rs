//! Ingest → score → promote across a full race day.

use chrono::{Duration, TimeZone, Utc};

use surebet::engine::{Ingestor, Promoter, Scorer};
use surebet::store::RaceStore;
use surebet::types::{ConfidenceGrade, RunnerRecord};

use crate::mock_exchange::{entry, market, open_book, post_time, race_day, MockExchange};

fn countries() -> Vec<String> {
    vec!["GB".to_string(), "IE".to_string()]
}

/// Three races, each with one standout on strong recent form at short
/// odds and seven out-of-form mid-to-long shots.
fn standard_day() -> MockExchange {
    let markets = vec![
        market(
            "1.201",
            "Kempton",
            post_time(13, 30),
            vec![
                entry(11, "Alpha Star", "111", "P Nicholls"),
                entry(12, "Beta Mist", "890", ""),
                entry(13, "Gamma Hill", "780", ""),
                entry(14, "Delta Glen", "980", ""),
                entry(15, "Epsilon Ford", "456", ""),
                entry(16, "Zeta Marsh", "654", ""),
                entry(17, "Eta Crag", "765", ""),
                entry(18, "Theta Wood", "567", ""),
            ],
        ),
        market(
            "1.202",
            "Ascot",
            post_time(14, 5),
            vec![
                entry(21, "Echo Vale", "112", "W Mullins"),
                entry(22, "Foxtrot Bay", "809", ""),
                entry(23, "Golf Moor", "978", ""),
                entry(24, "Hotel Ridge", "880", ""),
                entry(25, "Iota Chase", "456", ""),
                entry(26, "Kappa Heath", "654", ""),
                entry(27, "Lambda Rise", "765", ""),
                entry(28, "Mu Haven", "567", ""),
            ],
        ),
        market(
            "1.203",
            "Dundalk",
            post_time(15, 40),
            vec![
                entry(31, "India Breeze", "121", ""),
                entry(32, "Juliet Storm", "918", ""),
                entry(33, "Kilo Dawn", "870", ""),
                entry(34, "Lima Frost", "790", ""),
                entry(35, "Nu Harbour", "456", ""),
                entry(36, "Xi Meadow", "654", ""),
                entry(37, "Omicron Bank", "765", ""),
                entry(38, "Pi Hollow", "567", ""),
            ],
        ),
    ];
    let books = vec![
        open_book(
            "1.201",
            vec![
                (11, 4.0),
                (12, 20.0),
                (13, 22.0),
                (14, 26.0),
                (15, 11.0),
                (16, 12.0),
                (17, 13.0),
                (18, 14.0),
            ],
        ),
        open_book(
            "1.202",
            vec![
                (21, 4.5),
                (22, 18.0),
                (23, 24.0),
                (24, 30.0),
                (25, 11.0),
                (26, 12.0),
                (27, 13.0),
                (28, 14.0),
            ],
        ),
        open_book(
            "1.203",
            vec![
                (31, 5.0),
                (32, 21.0),
                (33, 19.0),
                (34, 25.0),
                (35, 11.0),
                (36, 12.0),
                (37, 13.0),
                (38, 14.0),
            ],
        ),
    ];
    MockExchange::new(markets, books)
}

async fn run_day(exchange: &MockExchange, store: &RaceStore) {
    let ingest = Ingestor::new(exchange, store, countries())
        .run(race_day(), false)
        .await
        .unwrap();
    assert_eq!(ingest.markets, 3);
    assert_eq!(ingest.runners, 24);

    let score = Scorer::new(store).run(race_day(), false).await.unwrap();
    assert_eq!(score.scored, 24);
    assert_eq!(score.skipped, 0);

    Promoter::new(store).run(race_day(), false).await.unwrap();
}

fn picks(rows: &[RunnerRecord]) -> Vec<&RunnerRecord> {
    rows.iter().filter(|r| r.show_in_ui).collect()
}

#[tokio::test]
async fn test_full_day_promotes_one_pick_per_race() {
    let exchange = standard_day();
    let store = RaceStore::in_memory().await.unwrap();
    run_day(&exchange, &store).await;

    let rows = store.runners_for_date(race_day()).await.unwrap();
    let picks = picks(&rows);
    assert_eq!(picks.len(), 3);
    for pick in &picks {
        assert!(pick.comprehensive_score.unwrap() >= 85);
        assert_eq!(pick.confidence_grade, Some(ConfidenceGrade::Excellent));
        assert!(pick.recommended_bet);
    }
    // One per race, and it is the standout selection.
    let mut pick_ids: Vec<&str> = picks.iter().map(|p| p.record_id.as_str()).collect();
    pick_ids.sort();
    assert_eq!(pick_ids, vec!["1.201#11", "1.202#21", "1.203#31"]);

    // The display query returns the same picks in post-time order.
    let display = store.flagged_picks(race_day()).await.unwrap();
    let display_ids: Vec<&str> = display.iter().map(|p| p.record_id.as_str()).collect();
    assert_eq!(display_ids, vec!["1.201#11", "1.202#21", "1.203#31"]);

    // Full coverage recorded on every row.
    for row in &rows {
        assert_eq!(row.race_coverage_pct, Some(1.0));
        assert_eq!(row.race_analyzed_count, Some(8));
        assert_eq!(row.race_total_count, Some(8));
    }
}

#[tokio::test]
async fn test_race_below_coverage_floor_gets_no_pick() {
    // Two of four runners have no recorded form, so they never score.
    let markets = vec![market(
        "1.301",
        "Newbury",
        post_time(14, 0),
        vec![
            entry(41, "Metro Flame", "111", ""),
            entry(42, "November Sky", "890", ""),
            entry(43, "Oscar Reef", "", ""),
            entry(44, "Papa Stone", "", ""),
        ],
    )];
    let books = vec![open_book(
        "1.301",
        vec![(41, 4.0), (42, 20.0), (43, 8.0), (44, 12.0)],
    )];
    let exchange = MockExchange::new(markets, books);
    let store = RaceStore::in_memory().await.unwrap();

    Ingestor::new(&exchange, &store, countries())
        .run(race_day(), false)
        .await
        .unwrap();
    Scorer::new(&store).run(race_day(), false).await.unwrap();
    let summary = Promoter::new(&store).run(race_day(), false).await.unwrap();

    assert_eq!(summary.races, 1);
    assert_eq!(summary.valid_races, 0);
    assert_eq!(summary.promoted, 0);

    // Coverage stats are still written for the failed race.
    let rows = store.runners_for_date(race_day()).await.unwrap();
    assert!(rows.iter().all(|r| !r.show_in_ui));
    assert_eq!(rows[0].race_coverage_pct, Some(0.5));
}

#[tokio::test]
async fn test_tied_best_scores_promote_nothing() {
    // Two identical standouts produce an exact score tie.
    let markets = vec![market(
        "1.302",
        "Leopardstown",
        post_time(15, 0),
        vec![
            entry(51, "Quebec Mist", "111", ""),
            entry(52, "Romeo Vale", "111", ""),
            entry(53, "Sierra Glen", "890", ""),
            entry(54, "Tango Moor", "918", ""),
        ],
    )];
    let books = vec![open_book(
        "1.302",
        vec![(51, 4.0), (52, 4.0), (53, 20.0), (54, 22.0)],
    )];
    let exchange = MockExchange::new(markets, books);
    let store = RaceStore::in_memory().await.unwrap();

    Ingestor::new(&exchange, &store, countries())
        .run(race_day(), false)
        .await
        .unwrap();
    Scorer::new(&store).run(race_day(), false).await.unwrap();
    let summary = Promoter::new(&store).run(race_day(), false).await.unwrap();

    assert_eq!(summary.valid_races, 1);
    assert_eq!(summary.ambiguous_races, 1);
    assert_eq!(summary.promoted, 0);
    let rows = store.runners_for_date(race_day()).await.unwrap();
    assert!(rows.iter().all(|r| !r.show_in_ui));
}

#[tokio::test]
async fn test_daily_cap_keeps_strongest_candidates() {
    // Fifteen one-sided races seeded directly; scores 86..=100 so the
    // five weakest qualifying picks fall outside the cap of ten.
    let store = RaceStore::in_memory().await.unwrap();
    for i in 0..15u32 {
        let race_id = format!("1.4{i:02}");
        let race_time = Utc.with_ymd_and_hms(2026, 4, 11, 12, 0, 0).unwrap()
            + Duration::minutes(i as i64 * 30);
        for sel in 1..=2i64 {
            let mut r = RunnerRecord::new_unscored(
                race_day(),
                &race_id,
                race_time,
                "Kempton",
                &format!("Runner {i}/{sel}"),
                sel,
            );
            r.decimal_odds = Some(5.0);
            r.form = "111".to_string();
            r.comprehensive_score = Some(if sel == 1 { 86 + i as i64 } else { 40 });
            r.confidence_grade = Some(if sel == 1 {
                ConfidenceGrade::Excellent
            } else {
                ConfidenceGrade::Poor
            });
            store.upsert_runner(&r).await.unwrap();
        }
    }

    let summary = Promoter::new(&store).run(race_day(), false).await.unwrap();
    assert_eq!(summary.candidates, 15);
    assert_eq!(summary.promoted, 10);

    let rows = store.runners_for_date(race_day()).await.unwrap();
    let flagged: Vec<&RunnerRecord> = rows.iter().filter(|r| r.show_in_ui).collect();
    assert_eq!(flagged.len(), 10);
    // The 86..=90 scores miss the cut.
    assert!(flagged.iter().all(|r| r.comprehensive_score.unwrap() >= 91));
}

#[tokio::test]
async fn test_rerunning_the_day_changes_nothing() {
    let exchange = standard_day();
    let store = RaceStore::in_memory().await.unwrap();
    run_day(&exchange, &store).await;

    let before = store.runners_for_date(race_day()).await.unwrap();

    // Second pass over the same data.
    Ingestor::new(&exchange, &store, countries())
        .run(race_day(), false)
        .await
        .unwrap();
    Scorer::new(&store).run(race_day(), false).await.unwrap();
    let second = Promoter::new(&store).run(race_day(), false).await.unwrap();

    assert_eq!(second.promoted, 3);
    assert_eq!(second.flag_writes, 0);

    let after = store.runners_for_date(race_day()).await.unwrap();
    for (a, b) in before.iter().zip(after.iter()) {
        assert_eq!(a.record_id, b.record_id);
        assert_eq!(a.comprehensive_score, b.comprehensive_score);
        assert_eq!(a.show_in_ui, b.show_in_ui);
        assert_eq!(a.recommended_bet, b.recommended_bet);
    }
}

#[tokio::test]
async fn test_dry_run_promotion_writes_no_flags() {
    let exchange = standard_day();
    let store = RaceStore::in_memory().await.unwrap();
    Ingestor::new(&exchange, &store, countries())
        .run(race_day(), false)
        .await
        .unwrap();
    Scorer::new(&store).run(race_day(), false).await.unwrap();

    let summary = Promoter::new(&store).run(race_day(), true).await.unwrap();
    assert_eq!(summary.promoted, 3);
    // Three flips would happen, none are written.
    assert_eq!(summary.flag_writes, 3);

    let rows = store.runners_for_date(race_day()).await.unwrap();
    assert!(rows.iter().all(|r| !r.show_in_ui));
    assert!(rows.iter().all(|r| r.race_coverage_pct.is_none()));
}
