use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time;

use crate::domain::subscriber_email::SubscriberEmail;
use crate::utils::{error_chain_fmt, BoxError};

const QUERY_TIMEOUT: time::Duration = time::Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyExists,
}

#[derive(thiserror::Error)]
pub enum StoreError {
    #[error("The subscription store is unavailable.")]
    Unavailable(#[source] BoxError),
}

impl std::fmt::Debug for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// De-duplicated set of subscribers.
///
/// `add` must be atomic: concurrent calls with the same identity yield exactly
/// one `Added`, every other call sees `AlreadyExists`.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn add(&self, email: &SubscriberEmail) -> Result<AddOutcome, StoreError>;

    async fn list_all(&self) -> Result<Vec<SubscriberEmail>, StoreError>;
}

/// Postgres backed store. Uniqueness is enforced by the `subscriptions.email`
/// unique constraint.
pub struct PgSubscriptionStore {
    db_pool: PgPool,
    query_timeout: time::Duration,
}

impl PgSubscriptionStore {
    pub fn new(db_pool: PgPool, query_timeout: Option<time::Duration>) -> PgSubscriptionStore {
        PgSubscriptionStore {
            db_pool,
            query_timeout: query_timeout.unwrap_or(QUERY_TIMEOUT),
        }
    }
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    #[tracing::instrument(
        name = "Insert a new subscriber into the database",
        skip(self, email),
        fields(subscriber_email = %email)
    )]
    async fn add(&self, email: &SubscriberEmail) -> Result<AddOutcome, StoreError> {
        let insert = sqlx::query(
            r#"
            INSERT INTO subscriptions (email, subscribed_at)
            VALUES ($1, now())
            ON CONFLICT (email) DO NOTHING
            "#,
        )
        .bind(email.as_ref())
        .execute(&self.db_pool);

        let result = tokio::time::timeout(self.query_timeout, insert)
            .await
            .map_err(|elapsed| StoreError::Unavailable(Box::new(elapsed)))?
            .map_err(|err| {
                tracing::error!("Failed to execute query: {:?}", err);
                StoreError::Unavailable(Box::new(err))
            })?;

        if result.rows_affected() == 1 {
            Ok(AddOutcome::Added)
        } else {
            Ok(AddOutcome::AlreadyExists)
        }
    }

    #[tracing::instrument(name = "Get all subscribers from the database", skip(self))]
    async fn list_all(&self) -> Result<Vec<SubscriberEmail>, StoreError> {
        let select = sqlx::query(
            r#"
            SELECT email
            FROM subscriptions
            "#,
        )
        .map(|row: PgRow| row.get::<String, _>("email"))
        .fetch_all(&self.db_pool);

        let rows = tokio::time::timeout(self.query_timeout, select)
            .await
            .map_err(|elapsed| StoreError::Unavailable(Box::new(elapsed)))?
            .map_err(|err| {
                tracing::error!("Failed to execute query: {:?}", err);
                StoreError::Unavailable(Box::new(err))
            })?;

        let subscribers = rows
            .into_iter()
            .filter_map(|email| match SubscriberEmail::parse(email) {
                Ok(email) => Some(email),
                Err(err) => {
                    tracing::warn!("Skipping a stored subscriber with an invalid email: {}", err);
                    None
                }
            })
            .collect();

        Ok(subscribers)
    }
}

/// Process-local store. The mutex makes check-and-insert a single critical
/// section.
#[derive(Default)]
pub struct InMemorySubscriptionStore {
    subscribers: Mutex<HashSet<SubscriberEmail>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> InMemorySubscriptionStore {
        InMemorySubscriptionStore::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashSet<SubscriberEmail>>, StoreError> {
        self.subscribers
            .lock()
            .map_err(|err| StoreError::Unavailable(err.to_string().into()))
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn add(&self, email: &SubscriberEmail) -> Result<AddOutcome, StoreError> {
        if self.lock()?.insert(email.clone()) {
            Ok(AddOutcome::Added)
        } else {
            Ok(AddOutcome::AlreadyExists)
        }
    }

    async fn list_all(&self) -> Result<Vec<SubscriberEmail>, StoreError> {
        Ok(self.lock()?.iter().cloned().collect())
    }
}
