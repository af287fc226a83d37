use serde::Deserialize;

use crate::domain::subscriber_email::SubscriberEmail;
use crate::domain::subscriber_name::SubscriberName;

pub struct NewSubscriber {
    pub email: SubscriberEmail,
    pub name: SubscriberName,
}

/// Payload of `POST /api/newsletter/subscribe`. Field names follow the
/// marketing site's form payload.
#[derive(Deserialize)]
pub struct SubscribeBody {
    pub name: String,
    pub email: String,
    #[serde(rename = "turnstileToken")]
    pub turnstile_token: String,
    #[serde(rename = "privacyAccepted", default)]
    pub privacy_accepted: bool,
}

impl TryFrom<&SubscribeBody> for NewSubscriber {
    type Error = String;

    fn try_from(body: &SubscribeBody) -> Result<Self, Self::Error> {
        let name = SubscriberName::parse(body.name.clone())?;
        let email = SubscriberEmail::parse(body.email.clone())?;

        Ok(NewSubscriber { email, name })
    }
}
