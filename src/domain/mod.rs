pub mod rate;
pub mod subscriber_email;
