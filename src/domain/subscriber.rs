use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::subscriber_email::SubscriberEmail;
use crate::domain::subscriber_name::SubscriberName;
use crate::domain::subscriber_status::SubscriberStatus;

/// A row of the `subscribers` table.
///
/// `confirmation_token` holds the stored copy of the confirmation token while
/// the subscriber is pending and is cleared when the subscription is
/// confirmed. A confirmed subscriber therefore always has
/// `confirmation_token = None` and `confirmed_at = Some(..)`.
#[derive(Debug)]
pub struct Subscriber {
    pub id: Uuid,
    pub email: SubscriberEmail,
    pub name: SubscriberName,
    pub status: SubscriberStatus,
    pub confirmation_token: Option<String>,
    pub subscribed_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub client_ip: Option<String>,
    pub privacy_accepted: bool,
}
