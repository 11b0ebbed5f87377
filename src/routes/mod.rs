mod health_check;
mod rate;
mod subscriptions;

pub use health_check::health_check;
pub use rate::{handle_get_rate, GetRateError};
pub use subscriptions::{handle_subscribe, SubscribeError, SubscribeForm};
