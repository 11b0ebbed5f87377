pub mod config;
pub mod domain;
pub mod email_client;
pub mod pipeline;
pub mod rate_client;
pub mod routes;
pub mod scheduler;
pub mod startup;
pub mod subscription_store;
pub mod telemetry;
pub mod utils;

#[cfg(test)]
mod fakes;
