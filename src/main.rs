use rate_notifier::config::get_configuration;
use rate_notifier::startup::{Application, StartupError};
use rate_notifier::telemetry::{get_subscriber, init_subscriber};

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    let subscriber = get_subscriber(String::from("rate_notifier"), String::from("info"));

    init_subscriber(subscriber);

    let config = get_configuration().expect("Missing configuration file.");
    let address = config.get_address();
    let application = Application::build(config).await?;

    tracing::info!("Server listening on {}", address);

    application.run_until_stop().await?;

    Ok(())
}
