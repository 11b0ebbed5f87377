use wiremock::matchers::any;
use wiremock::{Mock, ResponseTemplate};

use crate::helpers::TestApp;

#[tokio::test]
async fn rate_returns_the_current_upstream_rate() {
    let (test_app, _) = TestApp::spawn_app().await;
    test_app.mock_upstream_rate(27.35).await;

    let response = test_app.get_rate().await;

    assert_eq!(200, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["rate"], 27.35);
}

#[tokio::test]
async fn rate_is_fetched_from_upstream_on_every_request() {
    let (test_app, _) = TestApp::spawn_app().await;

    Mock::given(any())
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "rates": { "UAH": 27.35 } })),
        )
        .expect(2)
        .mount(&test_app.rate_server)
        .await;

    test_app.get_rate().await;
    test_app.get_rate().await;
}

#[tokio::test]
async fn rate_returns_500_when_upstream_fails() {
    let (test_app, _) = TestApp::spawn_app().await;

    Mock::given(any())
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&test_app.rate_server)
        .await;

    let response = test_app.get_rate().await;

    assert_eq!(500, response.status().as_u16());
}

#[tokio::test]
async fn rate_returns_500_when_upstream_response_is_malformed() {
    let (test_app, _) = TestApp::spawn_app().await;

    Mock::given(any())
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "rates": {} })),
        )
        .expect(1)
        .mount(&test_app.rate_server)
        .await;

    let response = test_app.get_rate().await;

    assert_eq!(500, response.status().as_u16());
}
