use std::sync::Arc;
use std::time;

use claim::assert_err;
use sqlx::PgPool;

use crate::helpers::{configure_db, TestApp};
use rate_notifier::config::get_configuration;
use rate_notifier::domain::subscriber_email::SubscriberEmail;
use rate_notifier::subscription_store::{AddOutcome, PgSubscriptionStore, SubscriptionStore};

fn email(raw: &str) -> SubscriberEmail {
    SubscriberEmail::parse(raw.to_string()).unwrap()
}

async fn store() -> (PgSubscriptionStore, PgPool) {
    let mut config = get_configuration().expect("Missing configuration file.");
    let db_pool = configure_db(&mut config.database).await;

    (PgSubscriptionStore::new(db_pool.clone(), None), db_pool)
}

#[tokio::test]
async fn adding_the_same_email_twice_reports_already_exists() {
    let (store, db_pool) = store().await;

    let first = store.add(&email("frank@test.com")).await.unwrap();
    let second = store.add(&email("frank@test.com")).await.unwrap();

    assert_eq!(first, AddOutcome::Added);
    assert_eq!(second, AddOutcome::AlreadyExists);

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM subscriptions")
        .fetch_one(&db_pool)
        .await
        .expect("Failed to count subscriptions.");
    assert_eq!(count, 1);
}

#[tokio::test]
async fn normalized_spellings_are_stored_once() {
    let (store, db_pool) = store().await;

    store.add(&email("  Frank@Test.com ")).await.unwrap();
    let outcome = store.add(&email("frank@test.com")).await.unwrap();

    assert_eq!(outcome, AddOutcome::AlreadyExists);

    let (stored,): (String,) = sqlx::query_as("SELECT email FROM subscriptions")
        .fetch_one(&db_pool)
        .await
        .expect("Failed to fetch saved subscription.");
    assert_eq!(stored, "frank@test.com");
}

#[tokio::test]
async fn list_all_returns_every_subscriber() {
    let (store, _) = store().await;

    store.add(&email("first@test.com")).await.unwrap();
    store.add(&email("second@test.com")).await.unwrap();

    let subscribers = store.list_all().await.unwrap();

    assert_eq!(subscribers.len(), 2);
    assert!(subscribers.contains(&email("first@test.com")));
    assert!(subscribers.contains(&email("second@test.com")));
}

#[tokio::test]
async fn list_all_skips_rows_that_are_not_valid_emails() {
    let (store, db_pool) = store().await;

    store.add(&email("valid@test.com")).await.unwrap();
    sqlx::query("INSERT INTO subscriptions (email) VALUES ('not-an-email')")
        .execute(&db_pool)
        .await
        .expect("Failed to insert invalid row.");

    let subscribers = store.list_all().await.unwrap();

    assert_eq!(subscribers, vec![email("valid@test.com")]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_of_the_same_email_yield_a_single_added() {
    let (store, _) = store().await;
    let store = Arc::new(store);

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.add(&email("race@test.com")).await.unwrap() })
        })
        .collect();

    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.unwrap());
    }

    let added = outcomes
        .iter()
        .filter(|outcome| **outcome == AddOutcome::Added)
        .count();

    assert_eq!(added, 1);
    assert_eq!(store.list_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn queries_that_outlast_the_timeout_report_the_store_unavailable() {
    let (_, db_pool) = store().await;
    let store = PgSubscriptionStore::new(db_pool.clone(), Some(time::Duration::from_millis(200)));

    let mut transaction = db_pool.begin().await.unwrap();
    sqlx::query("LOCK TABLE subscriptions IN ACCESS EXCLUSIVE MODE")
        .execute(&mut transaction)
        .await
        .expect("Failed to lock the subscriptions table.");

    assert_err!(store.list_all().await);

    transaction.rollback().await.unwrap();
}

#[tokio::test]
async fn subscribe_against_postgres_returns_200_then_409() {
    let (test_app, db_pool) = TestApp::spawn_app_with_postgres().await;

    let first = test_app.subscribe("Frank@Test.com").await;
    let second = test_app.subscribe("frank@test.com").await;

    assert_eq!(200, first.status().as_u16());
    assert_eq!(409, second.status().as_u16());

    let (stored,): (String,) = sqlx::query_as("SELECT email FROM subscriptions")
        .fetch_one(&db_pool)
        .await
        .expect("Failed to fetch saved subscription.");
    assert_eq!(stored, "frank@test.com");
}
