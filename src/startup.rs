use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use chrono::{DateTime, Local};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::net::TcpListener;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_actix_web::TracingLogger;

use crate::config::{DatabaseSettings, Settings};
use crate::pipeline::NotificationPipeline;
use crate::rate_client::RateSource;
use crate::routes::{handle_get_rate, handle_subscribe, health_check};
use crate::scheduler::{ScheduleError, Scheduler, SchedulerHandle};
use crate::subscription_store::{PgSubscriptionStore, SubscriptionStore};
use crate::utils::error_chain_fmt;

#[derive(thiserror::Error)]
pub enum StartupError {
    #[error("Failed to bind the address.")]
    Io(#[from] std::io::Error),
    #[error("Failed to run the database migrations.")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Sender email is not valid: {0}")]
    InvalidSender(String),
    #[error("Failed to build an HTTP client.")]
    HttpClient(#[from] reqwest::Error),
    #[error("Failed to register the daily schedule.")]
    Schedule(#[from] ScheduleError),
}

impl std::fmt::Debug for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

pub struct Application {
    port: u16,
    server: Server,
    scheduler: SchedulerHandle,
    pipeline: Arc<NotificationPipeline>,
}

impl Application {
    pub async fn build(config: Settings) -> Result<Self, StartupError> {
        let db_pool = get_connection_db_pool(&config.database);

        sqlx::migrate!("./migrations").run(&db_pool).await?;

        let store = Arc::new(PgSubscriptionStore::new(
            db_pool,
            Some(config.database.get_query_timeout()),
        ));

        Self::build_with_store(config, store)
    }

    /// Wires every component around the given store and starts the daily
    /// scheduler. Must be called from within a tokio runtime.
    pub fn build_with_store(
        config: Settings,
        store: Arc<dyn SubscriptionStore>,
    ) -> Result<Self, StartupError> {
        let sender_email = config
            .email_client
            .get_sender_email()
            .map_err(StartupError::InvalidSender)?;
        let email_client = Arc::new(config.email_client.client(sender_email)?);
        let rate_source: Arc<dyn RateSource> = Arc::new(config.rate_api.client()?);

        let pipeline = Arc::new(NotificationPipeline::new(
            rate_source.clone(),
            store.clone(),
            email_client,
            Some(config.scheduler.get_call_timeout()),
        ));
        let schedule = config.scheduler.daily_schedule(&Local::now())?;

        let listener = TcpListener::bind(config.get_address())?;
        let port = listener.local_addr()?.port();
        let server = run(listener, store, rate_source)?;

        let scheduler =
            Scheduler::new(schedule, pipeline.clone()).spawn(CancellationToken::new())?;

        Ok(Self {
            port,
            server,
            scheduler,
            pipeline,
        })
    }

    pub fn get_port(&self) -> u16 {
        self.port
    }

    pub fn pipeline(&self) -> Arc<NotificationPipeline> {
        self.pipeline.clone()
    }

    pub fn next_scheduled_run(&self) -> Option<DateTime<Local>> {
        self.scheduler.next_firing()
    }

    /// Serves requests until the server stops, then shuts the scheduler down.
    pub async fn run_until_stop(self) -> Result<(), std::io::Error> {
        let result = self.server.await;

        self.scheduler.shutdown().await;

        result
    }
}

pub fn run(
    listener: TcpListener,
    store: Arc<dyn SubscriptionStore>,
    rate_source: Arc<dyn RateSource>,
) -> Result<Server, std::io::Error> {
    let store = web::Data::from(store);
    let rate_source = web::Data::from(rate_source);

    let server = HttpServer::new(move || {
        // App is where your application logic lives: routing, middlewares, request handler, etc
        App::new()
            // 'wrap' method adds a middleware to the App. This specific middleware provide incoming
            // request logger
            .wrap(TracingLogger::default())
            .route("/health_check", web::get().to(health_check))
            .route("/rate", web::get().to(handle_get_rate))
            .route("/subscribe", web::post().to(handle_subscribe))
            .app_data(store.clone())
            .app_data(rate_source.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}

pub fn get_connection_db_pool(config: &DatabaseSettings) -> Pool<Postgres> {
    PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_secs(2))
        .connect_lazy_with(config.get_db_options())
}
