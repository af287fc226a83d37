use newsletter_api::config::get_configuration;
use newsletter_api::startup::Application;
use newsletter_api::telemetry::{get_subscriber, init_subscriber};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let subscriber = get_subscriber(String::from("newsletter_api"), String::from("info"));
    init_subscriber(subscriber);

    let config = get_configuration().expect("Missing configuration file.");

    tracing::info!("Server listening on {}", config.get_address());

    let application = Application::build(config).await?;
    application.run_until_stop().await
}
