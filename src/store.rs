use chrono::Utc;
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::domain::{
    new_subscriber::NewSubscriber, subscriber::Subscriber, subscriber_email::SubscriberEmail,
    subscriber_name::SubscriberName, subscriber_status::SubscriberStatus,
};

fn map_subscriber(row: PgRow) -> Subscriber {
    Subscriber {
        id: row.get("id"),
        email: SubscriberEmail::parse(row.get("email")).unwrap(),
        name: SubscriberName::parse(row.get("name")).unwrap(),
        status: SubscriberStatus::parse(row.get("status")).unwrap(),
        confirmation_token: row.get("confirmation_token"),
        subscribed_at: row.get("subscribed_at"),
        confirmed_at: row.get("confirmed_at"),
        client_ip: row.get("client_ip"),
        privacy_accepted: row.get("privacy_accepted"),
    }
}

#[tracing::instrument(name = "Fetching a subscriber by email", skip(db_pool, email))]
pub async fn find_by_email(db_pool: &PgPool, email: &str) -> Result<Option<Subscriber>, sqlx::Error> {
    sqlx::query(
        r#"
        SELECT id, email, name, status, confirmation_token, subscribed_at,
               confirmed_at, client_ip, privacy_accepted
        FROM subscribers
        WHERE email = $1
        "#,
    )
    .bind(email)
    .map(map_subscriber)
    .fetch_optional(db_pool)
    .await
    .map_err(|err| {
        tracing::error!("Failed to execute query: {:?}", err);
        err
    })
}

/// Creates a pending record, or resets an existing one (an unsubscribed
/// subscriber re-submitting the form) back to pending with a fresh stored
/// token. The id is overwritten on conflict so it always matches the id
/// embedded in the stored confirmation token.
#[tracing::instrument(
    name = "Upserting a pending subscriber",
    skip(db_pool, new_subscriber, confirmation_token, client_ip)
)]
pub async fn upsert_pending(
    db_pool: &PgPool,
    id: Uuid,
    new_subscriber: &NewSubscriber,
    confirmation_token: &str,
    client_ip: &str,
    privacy_accepted: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO subscribers
            (id, email, name, status, confirmation_token, subscribed_at,
             confirmed_at, client_ip, privacy_accepted)
        VALUES ($1, $2, $3, 'pending', $4, $5, NULL, $6, $7)
        ON CONFLICT (email) DO UPDATE SET
            id = EXCLUDED.id,
            name = EXCLUDED.name,
            status = 'pending',
            confirmation_token = EXCLUDED.confirmation_token,
            subscribed_at = EXCLUDED.subscribed_at,
            confirmed_at = NULL,
            client_ip = EXCLUDED.client_ip,
            privacy_accepted = EXCLUDED.privacy_accepted
        "#,
    )
    .bind(id)
    .bind(new_subscriber.email.as_ref())
    .bind(new_subscriber.name.as_ref())
    .bind(confirmation_token)
    .bind(Utc::now())
    .bind(client_ip)
    .bind(privacy_accepted)
    .execute(db_pool)
    .await
    .map_err(|err| {
        tracing::error!("Failed to execute query: {:?}", err);
        err
    })?;

    Ok(())
}

/// Transitions pending -> confirmed and clears the stored token, making the
/// confirmation link single-use. Returns whether a row actually changed;
/// `false` means "already confirmed or record vanished", not a fault.
#[tracing::instrument(name = "Marking a subscriber as confirmed", skip(db_pool))]
pub async fn mark_confirmed(db_pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE subscribers
        SET status = 'confirmed', confirmed_at = $2, confirmation_token = NULL
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(id)
    .bind(Utc::now())
    .execute(db_pool)
    .await
    .map_err(|err| {
        tracing::error!("Failed to execute query: {:?}", err);
        err
    })?;

    Ok(result.rows_affected() > 0)
}

/// Idempotent: unsubscribing an already-unsubscribed (or unknown) email
/// changes zero rows, which the caller treats as success.
#[tracing::instrument(name = "Marking a subscriber as unsubscribed", skip(db_pool, email))]
pub async fn mark_unsubscribed(db_pool: &PgPool, email: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE subscribers
        SET status = 'unsubscribed'
        WHERE email = $1 AND status <> 'unsubscribed'
        "#,
    )
    .bind(email)
    .execute(db_pool)
    .await
    .map_err(|err| {
        tracing::error!("Failed to execute query: {:?}", err);
        err
    })?;

    Ok(result.rows_affected() > 0)
}

/// Compensating delete: removes a pending record whose confirmation email
/// never went out, so the address can re-subscribe cleanly.
#[tracing::instrument(name = "Deleting a subscriber", skip(db_pool))]
pub async fn delete_by_id(db_pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM subscribers WHERE id = $1")
        .bind(id)
        .execute(db_pool)
        .await
        .map_err(|err| {
            tracing::error!("Failed to execute query: {:?}", err);
            err
        })?;

    Ok(())
}
