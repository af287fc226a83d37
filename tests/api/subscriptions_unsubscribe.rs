use sqlx::{postgres::PgRow, Row};

use crate::helpers::{assert_redirects_to, subscribe_body, TestApp};

async fn spawn_confirmed_subscriber(app: &TestApp, name: &str, email: &str) {
    app.post_subscription(subscribe_body(name, email)).await;
    let confirmation_link = {
        let received_requests = &app.email_server.received_requests().await.unwrap();
        app.get_confirmation_link(&received_requests[0])
    };
    app.api_client
        .get(confirmation_link)
        .send()
        .await
        .expect("Failed to execute request.");
}

async fn fetch_status(app: &TestApp, email: &str) -> String {
    sqlx::query("SELECT status FROM subscribers WHERE email = $1")
        .bind(email)
        .map(|row: PgRow| row.get("status"))
        .fetch_one(&app.db_pool)
        .await
        .expect("Failed to fetch saved subscriber.")
}

#[tokio::test]
async fn a_missing_token_redirects_with_the_missing_token_reason() {
    let app = TestApp::spawn_app().await;

    let response = app
        .api_client
        .get(format!("{}/api/newsletter/unsubscribe", app.address))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_redirects_to(
        &response,
        &format!(
            "{}/newsletter/error?reason=missing_token",
            app.site_base_url()
        ),
    );
}

#[tokio::test]
async fn a_garbage_token_redirects_with_the_invalid_token_reason() {
    let app = TestApp::spawn_app().await;

    let response = app.get_unsubscribe("not-a-real-token").await;

    assert_redirects_to(
        &response,
        &format!(
            "{}/newsletter/error?reason=invalid_token",
            app.site_base_url()
        ),
    );
}

#[tokio::test]
async fn a_confirmation_token_cannot_unsubscribe() {
    let app = TestApp::spawn_app().await;
    app.mock_bot_check_success().await;
    app.mock_email_delivery().await;
    spawn_confirmed_subscriber(&app, "Ada", "ada@example.com").await;

    let confirmation_token = app
        .token_service()
        .issue_confirmation_token("ada@example.com", uuid::Uuid::new_v4())
        .unwrap();

    let response = app.get_unsubscribe(&confirmation_token).await;

    assert_redirects_to(
        &response,
        &format!(
            "{}/newsletter/error?reason=invalid_token",
            app.site_base_url()
        ),
    );
    assert_eq!(fetch_status(&app, "ada@example.com").await, "confirmed");
}

#[tokio::test]
async fn a_valid_token_unsubscribes_the_subscriber() {
    let app = TestApp::spawn_app().await;
    app.mock_bot_check_success().await;
    app.mock_email_delivery().await;
    spawn_confirmed_subscriber(&app, "Ada", "ada@example.com").await;

    let token = app
        .token_service()
        .issue_unsubscribe_token("ada@example.com")
        .unwrap();

    let response = app.get_unsubscribe(&token).await;

    assert_redirects_to(
        &response,
        &format!("{}/newsletter/unsubscribed", app.site_base_url()),
    );
    assert_eq!(fetch_status(&app, "ada@example.com").await, "unsubscribed");
}

#[tokio::test]
async fn unsubscribing_twice_is_an_idempotent_success() {
    let app = TestApp::spawn_app().await;
    app.mock_bot_check_success().await;
    app.mock_email_delivery().await;
    spawn_confirmed_subscriber(&app, "Ada", "ada@example.com").await;

    let token = app
        .token_service()
        .issue_unsubscribe_token("ada@example.com")
        .unwrap();

    let first = app.get_unsubscribe(&token).await;
    let second = app.get_unsubscribe(&token).await;

    assert_redirects_to(
        &first,
        &format!("{}/newsletter/unsubscribed", app.site_base_url()),
    );
    // The second click changed zero rows and says so, but still succeeds.
    assert_redirects_to(
        &second,
        &format!(
            "{}/newsletter/unsubscribed?status=not_applicable",
            app.site_base_url()
        ),
    );
    assert_eq!(fetch_status(&app, "ada@example.com").await, "unsubscribed");
}

#[tokio::test]
async fn an_unknown_email_is_a_no_op_success() {
    let app = TestApp::spawn_app().await;

    let token = app
        .token_service()
        .issue_unsubscribe_token("nobody@example.com")
        .unwrap();

    let response = app.get_unsubscribe(&token).await;

    assert_redirects_to(
        &response,
        &format!(
            "{}/newsletter/unsubscribed?status=not_applicable",
            app.site_base_url()
        ),
    );
}

#[tokio::test]
async fn the_welcome_email_carries_a_working_unsubscribe_link() {
    let app = TestApp::spawn_app().await;
    app.mock_bot_check_success().await;
    app.mock_email_delivery().await;
    spawn_confirmed_subscriber(&app, "Ada", "ada@example.com").await;

    let unsubscribe_link = {
        let received_requests = &app.email_server.received_requests().await.unwrap();
        app.get_unsubscribe_link(&received_requests[1])
    };

    let response = app
        .api_client
        .get(unsubscribe_link)
        .send()
        .await
        .expect("Failed to execute request.");

    assert_redirects_to(
        &response,
        &format!("{}/newsletter/unsubscribed", app.site_base_url()),
    );
    assert_eq!(fetch_status(&app, "ada@example.com").await, "unsubscribed");
}

#[tokio::test]
async fn the_link_rate_limit_redirects_with_the_rate_limit_reason() {
    let app = TestApp::spawn_app_with(|config| {
        config.rate_limit.link_max_requests = 1;
    })
    .await;

    let first = app.get_unsubscribe("not-a-real-token").await;
    let second = app.get_unsubscribe("not-a-real-token").await;

    assert_eq!(303, first.status().as_u16());
    assert_redirects_to(
        &second,
        &format!("{}/newsletter/error?reason=rate_limit", app.site_base_url()),
    );
}
