use sqlx::{postgres::PgRow, Row};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::helpers::{subscribe_body, TestApp};

struct SavedSubscriber {
    email: String,
    name: String,
    status: String,
    confirmation_token: Option<String>,
    client_ip: Option<String>,
    privacy_accepted: bool,
}

async fn fetch_subscriber(app: &TestApp, email: &str) -> Option<SavedSubscriber> {
    sqlx::query(
        "SELECT email, name, status, confirmation_token, client_ip, privacy_accepted \
         FROM subscribers WHERE email = $1",
    )
    .bind(email)
    .map(|row: PgRow| SavedSubscriber {
        email: row.get("email"),
        name: row.get("name"),
        status: row.get("status"),
        confirmation_token: row.get("confirmation_token"),
        client_ip: row.get("client_ip"),
        privacy_accepted: row.get("privacy_accepted"),
    })
    .fetch_optional(&app.db_pool)
    .await
    .expect("Query to fetch subscribers failed.")
}

#[tokio::test]
async fn subscribe_returns_200_when_body_is_valid() {
    let app = TestApp::spawn_app().await;
    app.mock_bot_check_success().await;
    app.mock_email_delivery().await;

    let response = app
        .post_subscription(subscribe_body("Ada", "ada@example.com"))
        .await;

    assert_eq!(200, response.status().as_u16());
}

#[tokio::test]
async fn subscribe_persists_a_pending_subscriber() {
    let app = TestApp::spawn_app().await;
    app.mock_bot_check_success().await;
    app.mock_email_delivery().await;

    app.post_subscription(subscribe_body("Ada", "ada@example.com"))
        .await;

    let saved = fetch_subscriber(&app, "ada@example.com")
        .await
        .expect("No subscriber was persisted.");
    assert_eq!(saved.email, "ada@example.com");
    assert_eq!(saved.name, "Ada");
    assert_eq!(saved.status, "pending");
    assert!(saved.confirmation_token.is_some());
    assert_eq!(saved.client_ip.as_deref(), Some("127.0.0.1"));
    assert!(saved.privacy_accepted);
}

#[tokio::test]
async fn subscribe_sends_exactly_one_confirmation_email_with_a_link() {
    let app = TestApp::spawn_app().await;
    app.mock_bot_check_success().await;

    Mock::given(path("/mail/send"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.email_server)
        .await;

    app.post_subscription(subscribe_body("Ada", "ada@example.com"))
        .await;

    let received_requests = &app.email_server.received_requests().await.unwrap();
    assert_eq!(received_requests.len(), 1);

    let confirmation_link = app.get_confirmation_link(&received_requests[0]);
    assert!(confirmation_link
        .path()
        .starts_with("/api/newsletter/confirm"));
}

#[tokio::test]
async fn subscribe_returns_400_when_a_required_field_is_missing() {
    let app = TestApp::spawn_app().await;

    let test_cases = vec![
        (serde_json::json!({}), "missing every field"),
        (
            serde_json::json!({"name": "Ada", "turnstileToken": "t"}),
            "missing the email",
        ),
        (
            serde_json::json!({"email": "ada@example.com", "turnstileToken": "t"}),
            "missing the name",
        ),
        (
            serde_json::json!({"name": "Ada", "email": "ada@example.com"}),
            "missing the challenge token",
        ),
    ];

    for (invalid_body, error_message) in test_cases {
        let response = app.post_subscription(invalid_body).await;

        assert_eq!(
            400,
            response.status().as_u16(),
            "The API did not fail with 400 when the payload was {}",
            error_message
        );
    }
}

#[tokio::test]
async fn subscribe_returns_400_when_fields_are_present_but_invalid() {
    let app = TestApp::spawn_app().await;
    app.mock_bot_check_success().await;

    let test_cases = vec![
        (subscribe_body("", "ada@example.com"), "empty name"),
        (subscribe_body("Ada", ""), "empty email"),
        (subscribe_body("Ada", "not-an-email"), "invalid email"),
        (subscribe_body("<Ada>", "ada@example.com"), "markup in name"),
    ];

    for (invalid_body, error_message) in test_cases {
        let response = app.post_subscription(invalid_body).await;

        assert_eq!(
            400,
            response.status().as_u16(),
            "The API did not fail with 400 when the payload was {}",
            error_message
        );
    }
}

#[tokio::test]
async fn subscribe_returns_400_when_the_bot_check_rejects_the_challenge() {
    let app = TestApp::spawn_app().await;
    app.mock_bot_check_failure().await;
    app.mock_email_delivery().await;

    let response = app
        .post_subscription(subscribe_body("Ada", "ada@example.com"))
        .await;

    assert_eq!(400, response.status().as_u16());
    assert!(fetch_subscriber(&app, "ada@example.com").await.is_none());
}

#[tokio::test]
async fn subscribing_twice_does_not_duplicate_records_or_emails() {
    let app = TestApp::spawn_app().await;
    app.mock_bot_check_success().await;

    Mock::given(path("/mail/send"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.email_server)
        .await;

    let first = app
        .post_subscription(subscribe_body("Ada", "ada@example.com"))
        .await;
    let saved = fetch_subscriber(&app, "ada@example.com").await.unwrap();

    let second = app
        .post_subscription(subscribe_body("Ada", "ada@example.com"))
        .await;

    assert_eq!(200, first.status().as_u16());
    assert_eq!(200, second.status().as_u16());

    // The stored token was not churned by the second submission.
    let saved_again = fetch_subscriber(&app, "ada@example.com").await.unwrap();
    assert_eq!(saved.confirmation_token, saved_again.confirmation_token);

    let row_count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM subscribers")
        .map(|row: PgRow| row.get("count"))
        .fetch_one(&app.db_pool)
        .await
        .unwrap();
    assert_eq!(row_count, 1);
}

#[tokio::test]
async fn subscribing_a_confirmed_email_returns_400_without_touching_the_record() {
    let app = TestApp::spawn_app().await;
    app.mock_bot_check_success().await;
    app.mock_email_delivery().await;

    app.post_subscription(subscribe_body("Ada", "ada@example.com"))
        .await;
    let received_requests = &app.email_server.received_requests().await.unwrap();
    let confirmation_link = app.get_confirmation_link(&received_requests[0]);
    app.api_client
        .get(confirmation_link)
        .send()
        .await
        .unwrap();

    let response = app
        .post_subscription(subscribe_body("Ada", "ada@example.com"))
        .await;

    assert_eq!(400, response.status().as_u16());
    let saved = fetch_subscriber(&app, "ada@example.com").await.unwrap();
    assert_eq!(saved.status, "confirmed");
}

#[tokio::test]
async fn a_failed_confirmation_email_deletes_the_pending_record() {
    let app = TestApp::spawn_app().await;
    app.mock_bot_check_success().await;

    Mock::given(path("/mail/send"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&app.email_server)
        .await;

    let response = app
        .post_subscription(subscribe_body("Ada", "ada@example.com"))
        .await;

    assert_eq!(500, response.status().as_u16());
    assert!(fetch_subscriber(&app, "ada@example.com").await.is_none());

    // The address is free to retry as if the first attempt never happened.
    app.mock_email_delivery().await;
    let retry = app
        .post_subscription(subscribe_body("Ada", "ada@example.com"))
        .await;

    assert_eq!(200, retry.status().as_u16());
    let saved = fetch_subscriber(&app, "ada@example.com").await.unwrap();
    assert_eq!(saved.status, "pending");
}

#[tokio::test]
async fn the_request_over_the_rate_limit_gets_a_429_with_a_retry_hint() {
    let app = TestApp::spawn_app_with(|config| {
        config.rate_limit.subscribe_max_requests = 2;
    })
    .await;
    app.mock_bot_check_success().await;
    app.mock_email_delivery().await;

    let first = app
        .post_subscription(subscribe_body("Ada", "ada@example.com"))
        .await;
    let second = app
        .post_subscription(subscribe_body("Grace", "grace@example.com"))
        .await;
    let third = app
        .post_subscription(subscribe_body("Edsger", "edsger@example.com"))
        .await;

    assert_eq!(200, first.status().as_u16());
    assert_eq!(200, second.status().as_u16());
    assert_eq!(429, third.status().as_u16());

    let retry_after: u64 = third
        .headers()
        .get("Retry-After")
        .expect("429 response has no Retry-After header.")
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0);

    // The limited request never reached the store.
    assert!(fetch_subscriber(&app, "edsger@example.com").await.is_none());
}
