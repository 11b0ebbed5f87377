use std::sync::Arc;
use std::time;

use crate::domain::rate::Rate;
use crate::domain::subscriber_email::SubscriberEmail;
use crate::email_client::MailTransport;
use crate::rate_client::{RateError, RateSource};
use crate::subscription_store::{StoreError, SubscriptionStore};
use crate::utils::{error_chain_fmt, error_chain_line};

pub const NOTIFICATION_SUBJECT: &str = "Daily Exchange Rate Update";

const CALL_TIMEOUT: time::Duration = time::Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed(String),
}

/// Reasons a run ends before any email is attempted.
#[derive(thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to fetch the current exchange rate.")]
    Rate(#[source] RateError),
    #[error("Failed to get subscribers from the store.")]
    Store(#[source] StoreError),
}

impl std::fmt::Debug for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub rate: Option<Rate>,
    pub outcomes: Vec<(SubscriberEmail, DeliveryOutcome)>,
    pub aborted: Option<PipelineError>,
}

impl RunSummary {
    fn aborted(err: PipelineError) -> RunSummary {
        RunSummary {
            aborted: Some(err),
            ..RunSummary::default()
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    pub fn delivered(&self) -> impl Iterator<Item = &SubscriberEmail> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, DeliveryOutcome::Delivered))
            .map(|(subscriber, _)| subscriber)
    }

    pub fn failed(&self) -> impl Iterator<Item = (&SubscriberEmail, &str)> {
        self.outcomes
            .iter()
            .filter_map(|(subscriber, outcome)| match outcome {
                DeliveryOutcome::Failed(reason) => Some((subscriber, reason.as_str())),
                DeliveryOutcome::Delivered => None,
            })
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered().count()
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }
}

/// Fetches the rate once, lists the subscribers once and mails every one of
/// them. A failed delivery never stops the batch.
pub struct NotificationPipeline {
    rate_source: Arc<dyn RateSource>,
    store: Arc<dyn SubscriptionStore>,
    mail_transport: Arc<dyn MailTransport>,
    call_timeout: time::Duration,
}

impl NotificationPipeline {
    pub fn new(
        rate_source: Arc<dyn RateSource>,
        store: Arc<dyn SubscriptionStore>,
        mail_transport: Arc<dyn MailTransport>,
        call_timeout: Option<time::Duration>,
    ) -> NotificationPipeline {
        NotificationPipeline {
            rate_source,
            store,
            mail_transport,
            call_timeout: call_timeout.unwrap_or(CALL_TIMEOUT),
        }
    }

    #[tracing::instrument(name = "Sending the daily exchange rate to all subscribers", skip(self))]
    pub async fn run(&self) -> RunSummary {
        let rate = match self.fetch_rate().await {
            Ok(rate) => rate,
            Err(err) => {
                tracing::error!("Failed to fetch current exchange rate: {:?}", err);
                return RunSummary::aborted(PipelineError::Rate(err));
            }
        };

        let subscribers = match self.list_subscribers().await {
            Ok(subscribers) => subscribers,
            Err(err) => {
                tracing::error!("Failed to fetch subscribers: {:?}", err);
                return RunSummary::aborted(PipelineError::Store(err));
            }
        };

        if subscribers.is_empty() {
            tracing::info!("No emails to send");
            return RunSummary {
                rate: Some(rate),
                ..RunSummary::default()
            };
        }

        let body = notification_body(&rate);
        let mut outcomes = Vec::with_capacity(subscribers.len());

        for subscriber in subscribers {
            let outcome = self.deliver(&subscriber, &body).await;
            outcomes.push((subscriber, outcome));
        }

        let rate_text = rate.to_fixed_point();
        let summary = RunSummary {
            rate: Some(rate),
            outcomes,
            aborted: None,
        };

        tracing::info!(
            rate = %rate_text,
            delivered = summary.delivered_count(),
            failed = summary.failed_count(),
            "Daily exchange rate notification finished"
        );

        summary
    }

    async fn fetch_rate(&self) -> Result<Rate, RateError> {
        match tokio::time::timeout(self.call_timeout, self.rate_source.fetch_rate()).await {
            Ok(result) => result,
            Err(elapsed) => Err(RateError::UpstreamUnavailable(Box::new(elapsed))),
        }
    }

    async fn list_subscribers(&self) -> Result<Vec<SubscriberEmail>, StoreError> {
        match tokio::time::timeout(self.call_timeout, self.store.list_all()).await {
            Ok(result) => result,
            Err(elapsed) => Err(StoreError::Unavailable(Box::new(elapsed))),
        }
    }

    async fn deliver(&self, subscriber: &SubscriberEmail, body: &str) -> DeliveryOutcome {
        let send = self
            .mail_transport
            .send(subscriber, NOTIFICATION_SUBJECT, body);

        match tokio::time::timeout(self.call_timeout, send).await {
            Ok(Ok(())) => {
                tracing::info!("Email sent to {}", subscriber);
                DeliveryOutcome::Delivered
            }
            Ok(Err(err)) => {
                let reason = error_chain_line(&err);
                tracing::warn!("Could not send email to {}: {}", subscriber, reason);
                DeliveryOutcome::Failed(reason)
            }
            Err(_) => {
                let reason = format!("timed out after {:?}", self.call_timeout);
                tracing::warn!("Could not send email to {}: {}", subscriber, reason);
                DeliveryOutcome::Failed(reason)
            }
        }
    }
}

pub fn notification_body(rate: &Rate) -> String {
    format!(
        "The current {} to {} exchange rate is: {}",
        rate.base,
        rate.target,
        rate.to_fixed_point()
    )
}
