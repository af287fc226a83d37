use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::{ExposeSecret, Secret};
use uuid::Uuid;

/// Unsubscribe links are mailed into every newsletter issue and have to keep
/// working for as long as anyone might dig one out of their archive.
const UNSUBSCRIBE_EXPIRY_DAYS: i64 = 3650;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenPurpose {
    Confirm,
    Unsubscribe,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct Claims {
    /// Subscriber email address.
    sub: String,
    /// Subscriber id, present on confirmation tokens only.
    #[serde(skip_serializing_if = "Option::is_none")]
    sid: Option<Uuid>,
    purpose: TokenPurpose,
    exp: i64,
    iat: i64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("the token signature is invalid or the token is malformed")]
    InvalidSignature,
    #[error("the token has expired")]
    Expired,
    #[error("the token was issued for a different purpose")]
    WrongPurpose,
}

/// The claims of a successfully verified token.
#[derive(Debug)]
pub struct VerifiedToken {
    pub email: String,
    pub subscriber_id: Option<Uuid>,
}

/// Issues and verifies the signed tokens embedded in confirmation and
/// unsubscribe links. Tokens are self-contained: verification needs no
/// database round trip. Single-use semantics for confirmation tokens are the
/// orchestrator's job, by matching the copy stored on the subscriber record.
#[derive(Clone)]
pub struct TokenService {
    signing_key: Secret<String>,
    confirmation_expiry: Duration,
}

impl TokenService {
    pub fn new(signing_key: Secret<String>, confirmation_expiry_hours: i64) -> Self {
        Self {
            signing_key,
            confirmation_expiry: Duration::hours(confirmation_expiry_hours),
        }
    }

    pub fn issue_confirmation_token(
        &self,
        email: &str,
        subscriber_id: Uuid,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        self.issue(email, Some(subscriber_id), TokenPurpose::Confirm, self.confirmation_expiry)
    }

    pub fn issue_unsubscribe_token(&self, email: &str) -> Result<String, jsonwebtoken::errors::Error> {
        self.issue(
            email,
            None,
            TokenPurpose::Unsubscribe,
            Duration::days(UNSUBSCRIBE_EXPIRY_DAYS),
        )
    }

    pub fn verify(&self, token: &str, expected_purpose: TokenPurpose) -> Result<VerifiedToken, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.signing_key.expose_secret().as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::InvalidSignature,
        })?;

        if data.claims.purpose != expected_purpose {
            return Err(TokenError::WrongPurpose);
        }

        Ok(VerifiedToken {
            email: data.claims.sub,
            subscriber_id: data.claims.sid,
        })
    }

    fn issue(
        &self,
        email: &str,
        subscriber_id: Option<Uuid>,
        purpose: TokenPurpose,
        expiry: Duration,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let claims = Claims {
            sub: email.to_string(),
            sid: subscriber_id,
            purpose,
            exp: (now + expiry).timestamp(),
            iat: now.timestamp(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.signing_key.expose_secret().as_bytes()),
        )
    }
}
