//! `PgSurveyStore` integration tests.
//!
//! These tests require a running `PostgreSQL` instance.
//! Run with: `cargo test -p tally-db --test db_integration -- --ignored`
//!
//! Environment variables:
//!   `TEST_DB_HOST` (default: localhost)
//!   `TEST_DB_PORT` (default: 5433)
//!   `TEST_DB_USER` (default: `tally_test`)
//!   `TEST_DB_PASSWORD` (default: `tally_test`)

#![allow(clippy::unwrap_used)]

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use tally_db::model::{AggregateSnapshot, Choice, ControlState, NewResponse, Question};
use tally_db::test_utils::{TestDatabase, TestDbConfig};
use tally_db::{PgSurveyStore, SurveyStore};

fn question(id: &str, sort_order: i32, choices: usize) -> Question {
    Question {
        id: id.to_string(),
        question: format!("Question {id}"),
        choices: (1..=choices)
            .map(|n| Choice {
                text: format!("Option {n}"),
            })
            .collect(),
        sort_order,
    }
}

fn response(id: &str, q1: &[u32]) -> NewResponse {
    let mut answers = BTreeMap::new();
    answers.insert("q1".to_string(), q1.iter().copied().collect::<BTreeSet<_>>());
    NewResponse {
        id: id.to_string(),
        answers,
        submitted_at: Utc::now(),
    }
}

async fn store() -> (TestDatabase, PgSurveyStore) {
    let db = TestDatabase::create_unique().await.expect("Failed to create database");
    let store = PgSurveyStore::new(db.shared_connection());
    (db, store)
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_store_shares_harness_connection() {
    let (db, store) = store().await;

    store.save_question(&question("q1", 1, 3)).await.unwrap();
    store.record_response(&response("r1", &[0])).await.unwrap();
    assert_eq!(store.count_responses().await.unwrap(), 1);

    db.cleanup().await.unwrap();
    assert!(store.list_questions().await.unwrap().is_empty());
    assert_eq!(store.count_responses().await.unwrap(), 0);

    db.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_questions_roundtrip_in_order() {
    let (db, store) = store().await;

    store.save_question(&question("q2", 2, 5)).await.unwrap();
    store.save_question(&question("q1", 1, 9)).await.unwrap();

    let questions = store.list_questions().await.unwrap();
    assert_eq!(
        questions.iter().map(|q| q.id.as_str()).collect::<Vec<_>>(),
        ["q1", "q2"]
    );
    assert_eq!(questions[0].choices.len(), 9);

    let mut renamed = question("q1", 1, 9);
    renamed.question = "Renamed".to_string();
    store.save_question(&renamed).await.unwrap();
    assert_eq!(
        store.find_question("q1").await.unwrap().unwrap().question,
        "Renamed"
    );

    db.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_record_response_updates_counters_atomically() {
    let (db, store) = store().await;
    store.save_question(&question("q1", 1, 3)).await.unwrap();

    store.record_response(&response("r1", &[0])).await.unwrap();
    store.record_response(&response("r2", &[0, 1])).await.unwrap();
    store.record_response(&response("r3", &[1])).await.unwrap();

    let totals = store.read_counters().await.unwrap();
    assert_eq!(totals.total_responses, 3);
    assert_eq!(totals.counters.get("q1c1"), Some(&2));
    assert_eq!(totals.counters.get("q1c2"), Some(&2));
    assert_eq!(store.count_responses().await.unwrap(), 3);

    db.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_control_compare_and_swap() {
    let (db, store) = store().await;

    let initial = store.load_control().await.unwrap();
    assert_eq!(initial, ControlState::initial());

    let claimed = initial.claimed(1_000);
    assert!(store.compare_and_swap_control(0, &claimed).await.unwrap());
    assert!(!store.compare_and_swap_control(0, &claimed).await.unwrap());

    let scheduled = claimed.scheduled(2_000);
    assert!(store.compare_and_swap_control(1, &scheduled).await.unwrap());
    assert_eq!(store.load_control().await.unwrap(), scheduled);

    db.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_snapshot_generation_guard_and_reset() {
    let (db, store) = store().await;
    store.save_question(&question("q1", 1, 2)).await.unwrap();
    store.record_response(&response("r1", &[0])).await.unwrap();

    let claimed = ControlState::initial().claimed(1_000);
    assert!(store.compare_and_swap_control(0, &claimed).await.unwrap());

    let mut snapshot = AggregateSnapshot::empty(&[question("q1", 1, 2)], 1, 1_000);
    snapshot.total_responses = 1;
    snapshot.counters.insert("q1c1".to_string(), 1);
    assert!(store.write_snapshot(&snapshot).await.unwrap());
    assert!(!store.write_snapshot(&snapshot).await.unwrap());

    let empty = store.reset(2_000).await.unwrap();
    assert_eq!(empty.generation, 2);
    assert_eq!(empty.total_responses, 0);
    assert_eq!(store.count_responses().await.unwrap(), 0);
    assert_eq!(store.load_control().await.unwrap().version, 2);

    // A recount claimed before the reset can no longer land.
    assert!(!store.write_snapshot(&snapshot).await.unwrap());
    assert_eq!(store.read_snapshot().await.unwrap().unwrap(), empty);
    assert_eq!(store.list_questions().await.unwrap().len(), 1);

    db.drop_database().await.unwrap();
}

#[test]
fn test_config_from_env() {
    let config = TestDbConfig::default();
    assert!(!config.host.is_empty());
    assert!(config.port > 0);
    assert!(config.database_url().starts_with("postgres://"));
}
