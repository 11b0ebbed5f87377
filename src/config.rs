use config::{Config, ConfigError, File};
use secrecy::{ExposeSecret, Secret};
use serde_aux::field_attributes::{
    deserialize_number_from_string, deserialize_option_number_from_string,
};
use sqlx::{
    postgres::{PgConnectOptions, PgSslMode},
    ConnectOptions,
};
use std::time;

use crate::domain::subscriber_email::SubscriberEmail;
use crate::email_client::EmailClient;
use crate::rate_client::RateClient;
use crate::scheduler::{DailySchedule, ScheduleError};

#[derive(Debug)]
pub enum Environment {
    Development,
    Production,
}

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    pub email_client: EmailClientSettings,
    pub rate_api: RateApiSettings,
    pub scheduler: SchedulerSettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
}

#[derive(serde::Deserialize, Clone)]
pub struct EmailClientSettings {
    pub base_url: String,
    pub sender_email: String,
    pub api_key: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_milliseconds: u64,
}

#[derive(serde::Deserialize, Clone)]
pub struct RateApiSettings {
    pub base_url: String,
    pub base_currency: String,
    pub target_currency: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_milliseconds: u64,
}

/// When `hour` and `minute` are both set the daily run happens at that time.
/// When neither is set the time of day is taken from process start plus the
/// offset. Setting only one of them is an error.
#[derive(serde::Deserialize, Clone)]
pub struct SchedulerSettings {
    #[serde(default, deserialize_with = "deserialize_option_number_from_string")]
    pub hour: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_option_number_from_string")]
    pub minute: Option<u32>,
    #[serde(
        default = "default_startup_offset",
        deserialize_with = "deserialize_number_from_string"
    )]
    pub startup_offset_seconds: i64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub call_timeout_milliseconds: u64,
}

fn default_startup_offset() -> i64 {
    60
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    // secrecy protects secret information and prevents them to be exposed (eg: via logs)
    pub password: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub name: String,
    pub require_ssl: bool,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub query_timeout_milliseconds: u64,
}

impl Settings {
    pub fn get_address(&self) -> String {
        format!(
            "{}:{}",
            self.application.get_host(),
            self.application.get_port()
        )
    }

    pub fn set_email_client_base_url(&mut self, new_base_url: String) {
        self.email_client.set_base_url(new_base_url)
    }

    pub fn set_rate_api_base_url(&mut self, new_base_url: String) {
        self.rate_api.base_url = new_base_url
    }

    pub fn set_app_port(&mut self, port: u16) {
        self.application.port = port;
    }
}

impl DatabaseSettings {
    pub fn get_db_options(&self) -> PgConnectOptions {
        let ssl_mode = if self.require_ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };

        let mut db_options = PgConnectOptions::new()
            .host(&self.host)
            .password(self.password.expose_secret())
            .username(&self.username)
            .port(self.port)
            .database(&self.name)
            .ssl_mode(ssl_mode);

        db_options.log_statements(tracing::log::LevelFilter::Trace);

        db_options
    }

    pub fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub fn get_query_timeout(&self) -> time::Duration {
        time::Duration::from_millis(self.query_timeout_milliseconds)
    }
}

impl ApplicationSettings {
    pub fn get_port(&self) -> u16 {
        self.port
    }

    pub fn get_host(&self) -> String {
        self.host.clone()
    }
}

impl EmailClientSettings {
    pub fn get_sender_email(&self) -> Result<SubscriberEmail, String> {
        SubscriberEmail::parse(self.sender_email.clone())
    }

    pub fn get_timeout(&self) -> time::Duration {
        time::Duration::from_millis(self.timeout_milliseconds)
    }

    pub fn set_base_url(&mut self, new_base_url: String) {
        self.base_url = new_base_url
    }

    pub fn client(&self, sender: SubscriberEmail) -> Result<EmailClient, reqwest::Error> {
        EmailClient::new(
            self.base_url.clone(),
            sender,
            self.api_key.clone(),
            Some(self.get_timeout()),
        )
    }
}

impl RateApiSettings {
    pub fn get_timeout(&self) -> time::Duration {
        time::Duration::from_millis(self.timeout_milliseconds)
    }

    pub fn client(&self) -> Result<RateClient, reqwest::Error> {
        RateClient::new(
            self.base_url.clone(),
            self.base_currency.clone(),
            self.target_currency.clone(),
            Some(self.get_timeout()),
        )
    }
}

impl SchedulerSettings {
    pub fn get_call_timeout(&self) -> time::Duration {
        time::Duration::from_millis(self.call_timeout_milliseconds)
    }

    pub fn daily_schedule(
        &self,
        now: &chrono::DateTime<chrono::Local>,
    ) -> Result<DailySchedule, ScheduleError> {
        match (self.hour, self.minute) {
            (Some(hour), Some(minute)) => DailySchedule::new(hour, minute),
            (None, None) => {
                let offset = chrono::Duration::try_seconds(self.startup_offset_seconds).ok_or(
                    ScheduleError::InvalidStartupOffset {
                        seconds: self.startup_offset_seconds,
                    },
                )?;
                DailySchedule::starting_after(now, offset)
            }
            (hour, minute) => Err(ScheduleError::IncompleteCadence { hour, minute }),
        }
    }
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            unknown_env => Err(format!(
                "{} is not supported environment. Use either 'development' or 'production'.",
                unknown_env
            )),
        }
    }
}

pub fn get_configuration() -> Result<Settings, ConfigError> {
    let root_path = std::env::current_dir().map_err(|err| {
        ConfigError::Message(format!("Failed to determine the current directory: {}", err))
    })?;
    let config_directory = root_path.join("config");
    // Uses development environment by default
    let enviroment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "development".into())
        .try_into()
        .map_err(ConfigError::Message)?;
    let config_base_filepath = config_directory.join("base");
    let config_env_filepath = config_directory.join(enviroment.as_str());

    // It merges the base configuration file with the one from the specific environment (development or production)
    let settings = Config::builder()
        .add_source(File::from(config_base_filepath).required(true))
        .add_source(File::from(config_env_filepath).required(true))
        // Merge settings from environment variables with a prefix of APP and "__" separator
        // E.g APP_APPLICATION__PORT would set Settings.application.port
        .add_source(config::Environment::with_prefix("app").separator("__"))
        .build()?;

    tracing::info!("Application environment = {:?}", enviroment);

    // Try to convert the value from the configuration file into a Settings type
    settings.try_deserialize()
}
