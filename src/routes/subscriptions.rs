use actix_web::http::{header, StatusCode};
use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use anyhow::Context;
use serde_json::json;
use sqlx::PgPool;
use std::fmt::{Debug, Formatter};
use std::time::Duration;
use uuid::Uuid;

use crate::bot_check::{BotCheckError, BotVerifier};
use crate::domain::new_subscriber::{NewSubscriber, SubscribeBody};
use crate::email_client::EmailClient;
use crate::notifications::{dispatch_email, send_confirmation_email, SendFailurePolicy};
use crate::rate_limit::{client_ip, retry_after_secs, RateLimitDecision, RateLimiters};
use crate::startup::ApplicationBaseUrl;
use crate::store;
use crate::token::TokenService;

#[derive(thiserror::Error)]
pub enum SubscribeError {
    #[error("{0}")]
    ValidationError(String),
    #[error("too many subscribe attempts from this client")]
    RateLimited { retry_after: Duration },
    #[error("the bot challenge could not be verified")]
    BotCheckFailed(#[source] BotCheckError),
    #[error("the email address is already subscribed")]
    AlreadyConfirmed,
    #[error("failed to persist the subscriber")]
    StoreError(#[source] sqlx::Error),
    #[error("failed to send the confirmation email")]
    SendEmailError(#[source] reqwest::Error),
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl Debug for SubscribeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ResponseError for SubscribeError {
    fn status_code(&self) -> StatusCode {
        match self {
            SubscribeError::ValidationError(_)
            | SubscribeError::BotCheckFailed(_)
            | SubscribeError::AlreadyConfirmed => StatusCode::BAD_REQUEST,
            SubscribeError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            SubscribeError::StoreError(_)
            | SubscribeError::SendEmailError(_)
            | SubscribeError::UnexpectedError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    // Internal detail stays in the logs; clients get a generic message.
    fn error_response(&self) -> HttpResponse {
        match self {
            SubscribeError::ValidationError(message) => {
                HttpResponse::BadRequest().json(json!({ "message": message }))
            }
            SubscribeError::RateLimited { retry_after } => HttpResponse::TooManyRequests()
                .insert_header((
                    header::RETRY_AFTER,
                    retry_after_secs(*retry_after).to_string(),
                ))
                .json(json!({
                    "message": "Too many requests. Please try again later."
                })),
            SubscribeError::BotCheckFailed(_) => HttpResponse::BadRequest().json(json!({
                "message": "We could not verify that you are human. Please try again."
            })),
            SubscribeError::AlreadyConfirmed => HttpResponse::BadRequest().json(json!({
                "message": "This email address is already subscribed to the newsletter."
            })),
            SubscribeError::StoreError(_)
            | SubscribeError::SendEmailError(_)
            | SubscribeError::UnexpectedError(_) => {
                HttpResponse::InternalServerError().json(json!({
                    "message": "Something went wrong. Please try again later."
                }))
            }
        }
    }
}

#[tracing::instrument(
    name = "Adding a new subscriber",
    skip(req, body, db_pool, email_client, bot_verifier, token_service, rate_limiters, base_url),
    fields(
        subscriber_email = %body.email,
        subscriber_name = %body.name
    )
)]
pub async fn handle_subscribe(
    req: HttpRequest,
    body: web::Json<SubscribeBody>,
    db_pool: web::Data<PgPool>,
    email_client: web::Data<EmailClient>,
    bot_verifier: web::Data<BotVerifier>,
    token_service: web::Data<TokenService>,
    rate_limiters: web::Data<RateLimiters>,
    base_url: web::Data<ApplicationBaseUrl>,
) -> Result<HttpResponse, SubscribeError> {
    let client_ip = client_ip(&req);
    if let RateLimitDecision::Limited { retry_after } =
        rate_limiters.subscribe.check(&client_ip).await
    {
        return Err(SubscribeError::RateLimited { retry_after });
    }

    let body = body.into_inner();
    let new_subscriber: NewSubscriber =
        (&body).try_into().map_err(SubscribeError::ValidationError)?;

    bot_verifier
        .verify(&body.turnstile_token, &client_ip)
        .await
        .map_err(SubscribeError::BotCheckFailed)?;

    match store::find_by_email(&db_pool, new_subscriber.email.as_ref())
        .await
        .map_err(SubscribeError::StoreError)?
    {
        Some(existing) if existing.status.is_confirmed() => {
            return Err(SubscribeError::AlreadyConfirmed);
        }
        Some(existing) if existing.status.is_pending() => {
            // No new token: re-submitting must not churn the pending record.
            return Ok(HttpResponse::Ok().json(json!({
                "message": "A confirmation email is already on its way. Please check your inbox."
            })));
        }
        _ => {}
    }

    let subscriber_id = Uuid::new_v4();
    let confirmation_token = token_service
        .issue_confirmation_token(new_subscriber.email.as_ref(), subscriber_id)
        .context("Failed to sign the confirmation token")?;

    store::upsert_pending(
        &db_pool,
        subscriber_id,
        &new_subscriber,
        &confirmation_token,
        &client_ip,
        body.privacy_accepted,
    )
    .await
    .map_err(SubscribeError::StoreError)?;

    let confirm_url = format!(
        "{}/api/newsletter/confirm?token={}",
        base_url.0, confirmation_token
    );
    let send = send_confirmation_email(
        &email_client,
        &new_subscriber.email,
        new_subscriber.name.as_ref(),
        &confirm_url,
    );
    dispatch_email(
        &db_pool,
        send,
        SendFailurePolicy::CompensateDelete { subscriber_id },
    )
    .await
    .map_err(SubscribeError::SendEmailError)?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Almost there! Please check your inbox to confirm your subscription."
    })))
}

fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{}\n", e)?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{}", cause)?;
        current = cause.source();
    }
    Ok(())
}
