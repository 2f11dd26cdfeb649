//! Result settlement against closed market books.

use surebet::engine::{Ingestor, Scorer, Settler};
use surebet::exchange::RunnerStatus;
use surebet::store::RaceStore;
use surebet::types::Outcome;

use crate::mock_exchange::{entry, market, open_book, closed_book, post_time, race_day, MockExchange};

fn countries() -> Vec<String> {
    vec!["GB".to_string(), "IE".to_string()]
}

fn one_race() -> MockExchange {
    let markets = vec![market(
        "1.501",
        "Kempton",
        post_time(14, 30),
        vec![
            entry(61, "Umber Sky", "111", ""),
            entry(62, "Victor Reef", "890", ""),
            entry(63, "Whisky Glen", "780", ""),
            entry(64, "Xray Stone", "980", ""),
        ],
    )];
    let books = vec![open_book(
        "1.501",
        vec![(61, 5.0), (62, 20.0), (63, 22.0), (64, 26.0)],
    )];
    MockExchange::new(markets, books)
}

async fn ingest_and_score(exchange: &MockExchange, store: &RaceStore) {
    Ingestor::new(exchange, store, countries())
        .run(race_day(), false)
        .await
        .unwrap();
    Scorer::new(store).run(race_day(), false).await.unwrap();
}

#[tokio::test]
async fn test_closed_market_settles_with_profit() {
    let exchange = one_race();
    let store = RaceStore::in_memory().await.unwrap();
    ingest_and_score(&exchange, &store).await;

    exchange.set_books(vec![closed_book(
        "1.501",
        vec![
            (61, RunnerStatus::Winner),
            (62, RunnerStatus::Placed),
            (63, RunnerStatus::Loser),
            (64, RunnerStatus::Loser),
        ],
    )]);

    let summary = Settler::new(&exchange, &store)
        .run(race_day(), false)
        .await
        .unwrap();
    assert_eq!(summary.settled, 4);
    assert_eq!(summary.left_pending, 0);
    assert_eq!(summary.missing, 0);

    let winner = store.get_runner(race_day(), "1.501#61").await.unwrap().unwrap();
    assert_eq!(winner.outcome, Outcome::Won);
    assert_eq!(winner.profit_loss, Some(4.0));

    let placed = store.get_runner(race_day(), "1.501#62").await.unwrap().unwrap();
    assert_eq!(placed.outcome, Outcome::Placed);
    assert_eq!(placed.profit_loss, Some(-1.0));

    let loser = store.get_runner(race_day(), "1.501#63").await.unwrap().unwrap();
    assert_eq!(loser.outcome, Outcome::Lost);
    assert_eq!(loser.profit_loss, Some(-1.0));
}

#[tokio::test]
async fn test_settlement_is_write_once() {
    let exchange = one_race();
    let store = RaceStore::in_memory().await.unwrap();
    ingest_and_score(&exchange, &store).await;

    exchange.set_books(vec![closed_book(
        "1.501",
        vec![
            (61, RunnerStatus::Winner),
            (62, RunnerStatus::Loser),
            (63, RunnerStatus::Loser),
            (64, RunnerStatus::Loser),
        ],
    )]);
    let settler = Settler::new(&exchange, &store);
    let first = settler.run(race_day(), false).await.unwrap();
    assert_eq!(first.settled, 4);

    // Flip the scripted result; settled rows must not move.
    exchange.set_books(vec![closed_book(
        "1.501",
        vec![
            (61, RunnerStatus::Loser),
            (62, RunnerStatus::Winner),
            (63, RunnerStatus::Loser),
            (64, RunnerStatus::Loser),
        ],
    )]);
    let second = settler.run(race_day(), false).await.unwrap();
    assert_eq!(second.settled, 0);

    let winner = store.get_runner(race_day(), "1.501#61").await.unwrap().unwrap();
    assert_eq!(winner.outcome, Outcome::Won);
    assert_eq!(winner.profit_loss, Some(4.0));
}

#[tokio::test]
async fn test_open_market_left_pending() {
    let exchange = one_race();
    let store = RaceStore::in_memory().await.unwrap();
    ingest_and_score(&exchange, &store).await;

    // Books never close.
    let summary = Settler::new(&exchange, &store)
        .run(race_day(), false)
        .await
        .unwrap();
    assert_eq!(summary.settled, 0);
    assert_eq!(summary.left_pending, 4);

    let rows = store.runners_for_date(race_day()).await.unwrap();
    assert!(rows.iter().all(|r| r.outcome == Outcome::Pending));
}

#[tokio::test]
async fn test_removed_runner_settles_as_non_runner() {
    let exchange = one_race();
    let store = RaceStore::in_memory().await.unwrap();
    ingest_and_score(&exchange, &store).await;

    exchange.set_books(vec![closed_book(
        "1.501",
        vec![
            (61, RunnerStatus::Winner),
            (62, RunnerStatus::Removed),
            (63, RunnerStatus::Loser),
            (64, RunnerStatus::Loser),
        ],
    )]);
    Settler::new(&exchange, &store)
        .run(race_day(), false)
        .await
        .unwrap();

    let scratched = store.get_runner(race_day(), "1.501#62").await.unwrap().unwrap();
    assert_eq!(scratched.outcome, Outcome::NonRunner);
    assert_eq!(scratched.profit_loss, Some(0.0));
}

#[tokio::test]
async fn test_selection_missing_from_closed_book_is_flagged() {
    let exchange = one_race();
    let store = RaceStore::in_memory().await.unwrap();
    ingest_and_score(&exchange, &store).await;

    // Result published without selection 64.
    exchange.set_books(vec![closed_book(
        "1.501",
        vec![
            (61, RunnerStatus::Winner),
            (62, RunnerStatus::Loser),
            (63, RunnerStatus::Loser),
        ],
    )]);
    let summary = Settler::new(&exchange, &store)
        .run(race_day(), false)
        .await
        .unwrap();
    assert_eq!(summary.settled, 3);
    assert_eq!(summary.missing, 1);

    let absent = store.get_runner(race_day(), "1.501#64").await.unwrap().unwrap();
    assert_eq!(absent.outcome, Outcome::Pending);
}
