use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Pool, Postgres};
use std::net::TcpListener;
use std::time::Duration;
use tracing_actix_web::TracingLogger;

use crate::bot_check::BotVerifier;
use crate::config::{DatabaseSettings, Settings};
use crate::email_client::EmailClient;
use crate::rate_limit::{RateLimitConfig, RateLimiter, RateLimiters};
use crate::routes::{handle_confirm, handle_subscribe, handle_unsubscribe, health_check};
use crate::token::TokenService;

/// Public base URL of this API, used to build the links mailed to
/// subscribers.
pub struct ApplicationBaseUrl(pub String);

/// Base URL of the marketing site the link handlers redirect back to.
pub struct SiteBaseUrl(pub String);

pub struct Application {
    pub port: u16,
    pub server: Server,
}

impl Application {
    pub async fn build(config: Settings) -> Result<Self, std::io::Error> {
        let db_pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_secs(2))
            .connect_lazy_with(config.get_db_options());

        let sender_email = config
            .get_email_client_sender()
            .expect("Sender email is not valid");
        let email_client = EmailClient::new(
            config.email_client.base_url.clone(),
            sender_email,
            config.email_client.api_key.clone(),
            None,
        );

        let bot_verifier = BotVerifier::new(
            config.bot_check.base_url.clone(),
            config.bot_check.secret_key.clone(),
            None,
        );

        let token_service = TokenService::new(
            config.token.signing_key.clone(),
            config.token.confirmation_expiry_hours,
        );

        let rate_limiters = RateLimiters {
            subscribe: RateLimiter::new(RateLimitConfig {
                max_requests: config.rate_limit.subscribe_max_requests,
                window: Duration::from_secs(config.rate_limit.subscribe_window_seconds),
            }),
            links: RateLimiter::new(RateLimitConfig {
                max_requests: config.rate_limit.link_max_requests,
                window: Duration::from_secs(config.rate_limit.link_window_seconds),
            }),
        };

        let listener =
            TcpListener::bind(config.get_address()).expect("Failed to bind the address.");
        let port = listener.local_addr().unwrap().port();
        let server = run(
            listener,
            db_pool,
            email_client,
            bot_verifier,
            token_service,
            rate_limiters,
            config.application.base_url.clone(),
            config.application.site_base_url.clone(),
        )?;

        Ok(Self { port, server })
    }

    pub fn get_port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stop(self) -> Result<(), std::io::Error> {
        self.server.await
    }
}

#[allow(clippy::too_many_arguments)]
pub fn run(
    listener: TcpListener,
    db_pool: PgPool,
    email_client: EmailClient,
    bot_verifier: BotVerifier,
    token_service: TokenService,
    rate_limiters: RateLimiters,
    base_url: String,
    site_base_url: String,
) -> Result<Server, std::io::Error> {
    let db_pool = web::Data::new(db_pool);
    let email_client = web::Data::new(email_client);
    let bot_verifier = web::Data::new(bot_verifier);
    let token_service = web::Data::new(token_service);
    // One shared set of counters across all workers.
    let rate_limiters = web::Data::new(rate_limiters);
    let base_url = web::Data::new(ApplicationBaseUrl(base_url));
    let site_base_url = web::Data::new(SiteBaseUrl(site_base_url));

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .route("/health_check", web::get().to(health_check))
            .service(
                web::scope("/api/newsletter")
                    .route("/subscribe", web::post().to(handle_subscribe))
                    .route("/confirm", web::get().to(handle_confirm))
                    .route("/unsubscribe", web::get().to(handle_unsubscribe)),
            )
            .app_data(db_pool.clone())
            .app_data(email_client.clone())
            .app_data(bot_verifier.clone())
            .app_data(token_service.clone())
            .app_data(rate_limiters.clone())
            .app_data(base_url.clone())
            .app_data(site_base_url.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}

pub fn get_connection_db_pool(config: &DatabaseSettings) -> Pool<Postgres> {
    PgPoolOptions::new()
        .acquire_timeout(Duration::from_secs(2))
        .connect_lazy_with(config.get_db_options())
}
