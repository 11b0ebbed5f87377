use actix_web::{http::StatusCode, web, HttpResponse, ResponseError};

use crate::rate_client::{RateError, RateSource};
use crate::utils::error_chain_fmt;

#[derive(serde::Serialize)]
struct RateResponse {
    rate: f64,
}

#[derive(thiserror::Error)]
pub enum GetRateError {
    #[error("Failed to fetch the current exchange rate.")]
    RateUnavailable(#[from] RateError),
}

impl std::fmt::Debug for GetRateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ResponseError for GetRateError {
    fn status_code(&self) -> StatusCode {
        match self {
            GetRateError::RateUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Every request fetches a fresh rate from the upstream API.
#[tracing::instrument(name = "Getting the current exchange rate", skip(rate_source))]
pub async fn handle_get_rate(
    rate_source: web::Data<dyn RateSource>,
) -> Result<HttpResponse, GetRateError> {
    let rate = rate_source.fetch_rate().await?;

    Ok(HttpResponse::Ok().json(RateResponse { rate: rate.value }))
}
