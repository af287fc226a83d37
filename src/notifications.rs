use sqlx::PgPool;
use std::future::Future;
use uuid::Uuid;

use crate::domain::subscriber_email::SubscriberEmail;
use crate::email_client::EmailClient;
use crate::store;

/// What to do when a transactional email fails to go out.
///
/// The subscribe path compensates: a pending record whose confirmation email
/// never arrived would strand the address, so the record is deleted and the
/// failure surfaces to the caller. The confirm path is best-effort: the
/// subscription is already confirmed and a missing welcome email is not
/// worth rolling that back for.
pub enum SendFailurePolicy {
    CompensateDelete { subscriber_id: Uuid },
    BestEffort,
}

#[tracing::instrument(
    name = "Sending the confirmation email",
    skip(email_client, recipient, name),
    fields(confirm_url = %confirm_url)
)]
pub async fn send_confirmation_email(
    email_client: &EmailClient,
    recipient: &SubscriberEmail,
    name: &str,
    confirm_url: &str,
) -> Result<(), reqwest::Error> {
    let html_body = format!(
        r#"
            <div>
                <p>Hi {},</p>
                <p>Thanks for signing up to our newsletter. Click
                <a href="{}">here</a> to confirm your subscription.</p>
                <p>If you didn't request this, you can safely ignore this email.</p>
            </div>
        "#,
        name, confirm_url
    );

    email_client
        .send_email(recipient, "Confirm your newsletter subscription", &html_body)
        .await
}

#[tracing::instrument(
    name = "Sending the welcome email",
    skip(email_client, recipient, name),
    fields(unsubscribe_url = %unsubscribe_url)
)]
pub async fn send_welcome_email(
    email_client: &EmailClient,
    recipient: &SubscriberEmail,
    name: &str,
    unsubscribe_url: &str,
) -> Result<(), reqwest::Error> {
    let html_body = format!(
        r#"
            <div>
                <p>Hi {},</p>
                <p>Your subscription is confirmed. Welcome aboard!</p>
                <p>You can <a href="{}">unsubscribe</a> at any time.</p>
            </div>
        "#,
        name, unsubscribe_url
    );

    email_client
        .send_email(recipient, "Welcome to our newsletter", &html_body)
        .await
}

/// Runs a send and applies the failure policy. Both call sites share this
/// helper so the fatal/best-effort asymmetry stays in one visible place.
pub async fn dispatch_email<F>(
    db_pool: &PgPool,
    send: F,
    policy: SendFailurePolicy,
) -> Result<(), reqwest::Error>
where
    F: Future<Output = Result<(), reqwest::Error>>,
{
    match send.await {
        Ok(()) => Ok(()),
        Err(send_err) => match policy {
            SendFailurePolicy::CompensateDelete { subscriber_id } => {
                tracing::error!(
                    "Failed to send the email, deleting the pending subscriber: {:?}",
                    send_err
                );
                if let Err(delete_err) = store::delete_by_id(db_pool, subscriber_id).await {
                    tracing::error!(
                        "Failed to delete pending subscriber {}: {:?}",
                        subscriber_id,
                        delete_err
                    );
                }
                Err(send_err)
            }
            SendFailurePolicy::BestEffort => {
                tracing::warn!("Failed to send the email, continuing: {:?}", send_err);
                Ok(())
            }
        },
    }
}
