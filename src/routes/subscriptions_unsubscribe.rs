use actix_web::{web, HttpRequest, HttpResponse};
use sqlx::PgPool;

use crate::rate_limit::{client_ip, RateLimiters};
use crate::startup::SiteBaseUrl;
use crate::store;
use crate::token::{TokenPurpose, TokenService};
use crate::utils::see_other;

#[derive(serde::Deserialize)]
pub struct UnsubscribeParameters {
    pub token: Option<String>,
}

/// Unsubscribe link handler. Idempotent: clicking the link twice redirects to
/// the same success page, the second time flagged as a no-op. Every failure
/// is a redirect to the site's error page with a machine-readable reason.
#[tracing::instrument(
    name = "Unsubscribing a subscriber",
    skip(req, parameters, db_pool, token_service, rate_limiters, site_base_url)
)]
pub async fn handle_unsubscribe(
    req: HttpRequest,
    parameters: web::Query<UnsubscribeParameters>,
    db_pool: web::Data<PgPool>,
    token_service: web::Data<TokenService>,
    rate_limiters: web::Data<RateLimiters>,
    site_base_url: web::Data<SiteBaseUrl>,
) -> HttpResponse {
    let error_page =
        |reason: &str| format!("{}/newsletter/error?reason={}", site_base_url.0, reason);

    let client_ip = client_ip(&req);
    if rate_limiters.links.check(&client_ip).await.is_limited() {
        return see_other(&error_page("rate_limit"));
    }

    let token = match parameters.token.as_deref() {
        Some(token) if !token.is_empty() => token,
        _ => {
            tracing::warn!("Unsubscribe link is missing its token");
            return see_other(&error_page("missing_token"));
        }
    };

    let verified = match token_service.verify(token, TokenPurpose::Unsubscribe) {
        Ok(verified) => verified,
        Err(reason) => {
            tracing::warn!("Rejected unsubscribe token: {}", reason);
            return see_other(&error_page("invalid_token"));
        }
    };

    match store::mark_unsubscribed(&db_pool, &verified.email).await {
        Ok(true) => see_other(&format!("{}/newsletter/unsubscribed", site_base_url.0)),
        // Already unsubscribed, or never subscribed: success either way.
        Ok(false) => see_other(&format!(
            "{}/newsletter/unsubscribed?status=not_applicable",
            site_base_url.0
        )),
        Err(_) => see_other(&error_page("db_error")),
    }
}
