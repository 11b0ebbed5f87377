use chrono::{DateTime, Utc};

/// A single observation of the exchange rate. Never cached: every caller
/// fetches its own.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Rate {
    pub value: f64,
    pub base: String,
    pub target: String,
    pub observed_at: DateTime<Utc>,
}

impl Rate {
    pub fn new(value: f64, base: String, target: String) -> Rate {
        Rate {
            value,
            base,
            target,
            observed_at: Utc::now(),
        }
    }

    pub fn to_fixed_point(&self) -> String {
        format!("{:.6}", self.value)
    }
}
