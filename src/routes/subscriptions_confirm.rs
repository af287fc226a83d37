use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;
use sqlx::PgPool;

use crate::email_client::EmailClient;
use crate::notifications::{dispatch_email, send_welcome_email, SendFailurePolicy};
use crate::rate_limit::{client_ip, retry_after_secs, RateLimitDecision, RateLimiters};
use crate::startup::{ApplicationBaseUrl, SiteBaseUrl};
use crate::store;
use crate::token::{TokenPurpose, TokenService};
use crate::utils::see_other;

#[derive(serde::Deserialize)]
pub struct ConfirmParameters {
    pub token: Option<String>,
}

/// Confirmation link handler. The user lands here from their inbox, so every
/// outcome past the rate limit is a redirect back to the marketing site —
/// token failures all collapse to the same error page, with the specific
/// reason kept in the logs.
#[tracing::instrument(
    name = "Confirming a newsletter subscription",
    skip(req, parameters, db_pool, email_client, token_service, rate_limiters, base_url, site_base_url)
)]
pub async fn handle_confirm(
    req: HttpRequest,
    parameters: web::Query<ConfirmParameters>,
    db_pool: web::Data<PgPool>,
    email_client: web::Data<EmailClient>,
    token_service: web::Data<TokenService>,
    rate_limiters: web::Data<RateLimiters>,
    base_url: web::Data<ApplicationBaseUrl>,
    site_base_url: web::Data<SiteBaseUrl>,
) -> HttpResponse {
    let client_ip = client_ip(&req);
    if let RateLimitDecision::Limited { retry_after } = rate_limiters.links.check(&client_ip).await
    {
        return HttpResponse::TooManyRequests()
            .insert_header((
                header::RETRY_AFTER,
                retry_after_secs(retry_after).to_string(),
            ))
            .json(json!({
                "message": "Too many requests. Please try again later."
            }));
    }

    let confirmed_page = format!("{}/newsletter/confirmed", site_base_url.0);
    let error_page = format!("{}/newsletter/error", site_base_url.0);

    let token = match parameters.token.as_deref() {
        Some(token) if !token.is_empty() => token,
        _ => {
            tracing::warn!("Confirmation link is missing its token");
            return see_other(&error_page);
        }
    };

    let verified = match token_service.verify(token, TokenPurpose::Confirm) {
        Ok(verified) => verified,
        Err(reason) => {
            tracing::warn!("Rejected confirmation token: {}", reason);
            return see_other(&error_page);
        }
    };

    let subscriber = match store::find_by_email(&db_pool, &verified.email).await {
        Ok(Some(subscriber)) => subscriber,
        Ok(None) => {
            tracing::warn!("Confirmation token for an unknown subscriber");
            return see_other(&error_page);
        }
        Err(_) => {
            return HttpResponse::InternalServerError().json(json!({
                "message": "Something went wrong. Please try again later."
            }));
        }
    };

    // Re-clicking an already-used link is a success, not an error.
    if subscriber.status.is_confirmed() {
        return see_other(&confirmed_page);
    }

    // The signature checked out above; the stored copy has to match too.
    // Once a confirmation clears it, any re-presented token dies here.
    if subscriber.confirmation_token.as_deref() != Some(token) {
        tracing::warn!("Confirmation token does not match the stored copy");
        return see_other(&error_page);
    }

    match store::mark_confirmed(&db_pool, subscriber.id).await {
        Ok(true) => {}
        // Zero rows: a concurrent click got there first.
        Ok(false) => return see_other(&confirmed_page),
        Err(_) => {
            return HttpResponse::InternalServerError().json(json!({
                "message": "Something went wrong. Please try again later."
            }));
        }
    }

    // Best-effort from here on: the confirmation already succeeded.
    match token_service.issue_unsubscribe_token(subscriber.email.as_ref()) {
        Ok(unsubscribe_token) => {
            let unsubscribe_url = format!(
                "{}/api/newsletter/unsubscribe?token={}",
                base_url.0, unsubscribe_token
            );
            let send = send_welcome_email(
                &email_client,
                &subscriber.email,
                subscriber.name.as_ref(),
                &unsubscribe_url,
            );
            let _ = dispatch_email(&db_pool, send, SendFailurePolicy::BestEffort).await;
        }
        Err(err) => {
            tracing::warn!(
                "Failed to sign an unsubscribe token for the welcome email: {:?}",
                err
            );
        }
    }

    see_other(&confirmed_page)
}
