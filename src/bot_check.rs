use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use std::time;

const REQUEST_TIMEOUT: time::Duration = time::Duration::from_secs(10);

/// Server-side validation of the Turnstile challenge token submitted with the
/// subscribe form. Any transport or service error counts as a failed check:
/// the verifier fails closed.
pub struct BotVerifier {
    http_client: Client,
    base_url: String,
    secret_key: Secret<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum BotCheckError {
    #[error("the challenge verification request failed")]
    Transport(#[from] reqwest::Error),
    #[error("the challenge was rejected: {0}")]
    Rejected(String),
}

#[derive(serde::Serialize)]
struct SiteverifyRequest<'a> {
    secret: &'a str,
    response: &'a str,
    remoteip: &'a str,
}

#[derive(serde::Deserialize)]
struct SiteverifyResponse {
    success: bool,
    #[serde(rename = "error-codes", default)]
    error_codes: Vec<String>,
}

impl BotVerifier {
    pub fn new(
        base_url: String,
        secret_key: Secret<String>,
        timeout: Option<time::Duration>,
    ) -> BotVerifier {
        let http_client = Client::builder()
            .timeout(timeout.unwrap_or(REQUEST_TIMEOUT))
            .build()
            .unwrap();

        BotVerifier {
            http_client,
            base_url,
            secret_key,
        }
    }

    #[tracing::instrument(name = "Verifying the bot challenge", skip(self, challenge_token))]
    pub async fn verify(&self, challenge_token: &str, client_ip: &str) -> Result<(), BotCheckError> {
        let url = format!("{}/turnstile/v0/siteverify", self.base_url);
        let body = SiteverifyRequest {
            secret: self.secret_key.expose_secret(),
            response: challenge_token,
            remoteip: client_ip,
        };

        let response: SiteverifyResponse = self
            .http_client
            .post(&url)
            .form(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.success {
            Ok(())
        } else {
            Err(BotCheckError::Rejected(response.error_codes.join(", ")))
        }
    }
}
