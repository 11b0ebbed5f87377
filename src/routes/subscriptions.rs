use actix_web::{http::StatusCode, web, HttpResponse, ResponseError};
use serde::Deserialize;

use crate::domain::subscriber_email::SubscriberEmail;
use crate::subscription_store::{AddOutcome, StoreError, SubscriptionStore};
use crate::utils::error_chain_fmt;

#[derive(Deserialize)]
pub struct SubscribeForm {
    pub email: String,
}

#[derive(thiserror::Error)]
pub enum SubscribeError {
    #[error("{0}")]
    ValidationError(String),
    #[error("Email already subscribed")]
    AlreadySubscribed,
    #[error("Failed to subscribe email")]
    StoreError(#[from] StoreError),
}

impl std::fmt::Debug for SubscribeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ResponseError for SubscribeError {
    fn status_code(&self) -> StatusCode {
        match self {
            SubscribeError::ValidationError(_) => StatusCode::BAD_REQUEST,
            SubscribeError::AlreadySubscribed => StatusCode::CONFLICT,
            SubscribeError::StoreError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[tracing::instrument(
    name = "Adding a new subscriber",
    skip(form, store),
    fields(subscriber_email = %form.email)
)]
pub async fn handle_subscribe(
    form: web::Form<SubscribeForm>,
    store: web::Data<dyn SubscriptionStore>,
) -> Result<HttpResponse, SubscribeError> {
    let email = SubscriberEmail::parse(form.0.email).map_err(SubscribeError::ValidationError)?;

    match store.add(&email).await? {
        AddOutcome::Added => Ok(HttpResponse::Ok().body("Subscribed")),
        AddOutcome::AlreadyExists => Err(SubscribeError::AlreadySubscribed),
    }
}
