use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time;

use crate::domain::rate::Rate;
use crate::utils::{error_chain_fmt, BoxError};

const REQUEST_TIMEOUT: time::Duration = time::Duration::from_secs(10);

/// Source of the current exchange rate. Every call hits the upstream API.
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn fetch_rate(&self) -> Result<Rate, RateError>;
}

#[derive(thiserror::Error)]
pub enum RateError {
    #[error("The upstream rate API is unavailable.")]
    UpstreamUnavailable(#[source] BoxError),
    #[error("The upstream rate API returned a malformed response: {0}")]
    MalformedResponse(String),
}

impl std::fmt::Debug for RateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

pub struct RateClient {
    http_client: Client,
    base_url: String,
    base_currency: String,
    target_currency: String,
}

impl RateClient {
    pub fn new(
        base_url: String,
        base_currency: String,
        target_currency: String,
        timeout: Option<time::Duration>,
    ) -> Result<RateClient, reqwest::Error> {
        let http_client = Client::builder()
            .timeout(timeout.unwrap_or(REQUEST_TIMEOUT))
            .build()?;

        Ok(RateClient {
            http_client,
            base_url,
            base_currency,
            target_currency,
        })
    }
}

#[async_trait]
impl RateSource for RateClient {
    #[tracing::instrument(
        name = "Fetching the current exchange rate",
        skip(self),
        fields(
            base_currency = %self.base_currency,
            target_currency = %self.target_currency
        )
    )]
    async fn fetch_rate(&self) -> Result<Rate, RateError> {
        let url = format!("{}/v4/latest/{}", self.base_url, self.base_currency);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| RateError::UpstreamUnavailable(Box::new(err)))?;

        let body: Value = response.json().await.map_err(|err| {
            if err.is_decode() {
                RateError::MalformedResponse(err.to_string())
            } else {
                RateError::UpstreamUnavailable(Box::new(err))
            }
        })?;

        let value = extract_rate(&body, &self.target_currency)?;

        Ok(Rate::new(
            value,
            self.base_currency.clone(),
            self.target_currency.clone(),
        ))
    }
}

fn extract_rate(body: &Value, target_currency: &str) -> Result<f64, RateError> {
    let rates = body
        .get("rates")
        .and_then(Value::as_object)
        .ok_or_else(|| RateError::MalformedResponse("missing `rates` object".into()))?;

    let value = rates.get(target_currency).ok_or_else(|| {
        RateError::MalformedResponse(format!("missing `rates.{}` field", target_currency))
    })?;

    value.as_f64().ok_or_else(|| {
        RateError::MalformedResponse(format!("`rates.{}` is not a number", target_currency))
    })
}
