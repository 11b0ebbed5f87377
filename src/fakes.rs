use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time;

use crate::domain::rate::Rate;
use crate::domain::subscriber_email::SubscriberEmail;
use crate::email_client::{MailError, MailTransport};
use crate::rate_client::{RateError, RateSource};
use crate::subscription_store::{AddOutcome, StoreError, SubscriptionStore};

pub struct StubRateSource {
    value: Option<f64>,
    delay: Option<time::Duration>,
    calls: AtomicUsize,
}

impl StubRateSource {
    pub fn returning(value: f64) -> StubRateSource {
        StubRateSource {
            value: Some(value),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> StubRateSource {
        StubRateSource {
            value: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: time::Duration) -> StubRateSource {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RateSource for StubRateSource {
    async fn fetch_rate(&self) -> Result<Rate, RateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.value {
            Some(value) => Ok(Rate::new(value, "USD".into(), "UAH".into())),
            None => Err(RateError::UpstreamUnavailable("connection refused".into())),
        }
    }
}

pub struct FailingStore;

#[async_trait]
impl SubscriptionStore for FailingStore {
    async fn add(&self, _email: &SubscriberEmail) -> Result<AddOutcome, StoreError> {
        Err(StoreError::Unavailable("database is down".into()))
    }

    async fn list_all(&self) -> Result<Vec<SubscriberEmail>, StoreError> {
        Err(StoreError::Unavailable("database is down".into()))
    }
}

/// Records every attempt. Recipients listed in `failing` are rejected and the
/// ones in `slow` hang for the configured delay.
#[derive(Default)]
pub struct RecordingMailTransport {
    failing: HashSet<String>,
    slow: HashMap<String, time::Duration>,
    sent: Mutex<Vec<(String, String, String)>>,
    attempts: AtomicUsize,
}

impl RecordingMailTransport {
    pub fn failing_for(recipients: &[&str]) -> RecordingMailTransport {
        RecordingMailTransport {
            failing: recipients.iter().map(|r| r.to_string()).collect(),
            ..RecordingMailTransport::default()
        }
    }

    pub fn slow_for(
        mut self,
        recipients: &[&str],
        delay: time::Duration,
    ) -> RecordingMailTransport {
        for recipient in recipients {
            self.slow.insert(recipient.to_string(), delay);
        }
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for RecordingMailTransport {
    async fn send(
        &self,
        recipient: &SubscriberEmail,
        subject: &str,
        body: &str,
    ) -> Result<(), MailError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.slow.get(recipient.as_ref()) {
            tokio::time::sleep(*delay).await;
        }

        if self.failing.contains(recipient.as_ref()) {
            return Err(MailError::DeliveryFailed {
                recipient: recipient.to_string(),
                source: "mailbox unavailable".into(),
            });
        }

        self.sent.lock().unwrap().push((
            recipient.to_string(),
            subject.to_string(),
            body.to_string(),
        ));

        Ok(())
    }
}
