//! HTTP-level tests of the reqwest transport and the retrying client

use linksweep::config::HttpConfig;
use linksweep::http::{
    ChannelMetricsSink, HttpTransport, ProbeMethod, ReqwestTransport, RequestArgs, RetryingClient,
    TransportError,
};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport() -> ReqwestTransport {
    ReqwestTransport::new(Duration::from_secs(5))
}

fn fast_http_config() -> HttpConfig {
    HttpConfig {
        max_attempts: 3,
        initial_delay_ms: 10,
        max_delay_ms: 50,
        user_agents: vec!["TestBot/1.0".to_string()],
        ..HttpConfig::default()
    }
}

#[tokio::test]
async fn test_head_has_no_body_and_lowercase_headers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Type", "text/html"))
        .mount(&mock_server)
        .await;

    let url = Url::parse(&format!("{}/page", mock_server.uri())).unwrap();
    let response = transport()
        .send(ProbeMethod::Head, &url, &RequestArgs::default())
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert!(response.body.is_none());
    assert_eq!(response.header("content-type"), Some("text/html"));
    assert_eq!(response.header("Content-Type"), Some("text/html"));
}

#[tokio::test]
async fn test_get_body_is_capped() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/big"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(10_000)))
        .mount(&mock_server)
        .await;

    let url = Url::parse(&format!("{}/big", mock_server.uri())).unwrap();
    let args = RequestArgs {
        max_body_bytes: Some(100),
        ..RequestArgs::default()
    };
    let response = transport().send(ProbeMethod::Get, &url, &args).await.unwrap();

    assert_eq!(response.body.map(|b| b.len()), Some(100));
}

#[tokio::test]
async fn test_redirects_are_followed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(
            ResponseTemplate::new(301)
                .insert_header("location", format!("{}/new", mock_server.uri()).as_str()),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_string("moved here"))
        .mount(&mock_server)
        .await;

    let url = Url::parse(&format!("{}/old", mock_server.uri())).unwrap();
    let response = transport()
        .send(ProbeMethod::Get, &url, &RequestArgs::default())
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert!(response.final_url.ends_with("/new"));
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let mock_server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&mock_server)
        .await;

    let url = Url::parse(&format!("{}/slow", mock_server.uri())).unwrap();
    let args = RequestArgs {
        timeout: Some(Duration::from_millis(200)),
        ..RequestArgs::default()
    };
    let result = transport().send(ProbeMethod::Head, &url, &args).await;

    assert_eq!(result, Err(TransportError::Timeout));
}

#[tokio::test]
async fn test_client_retries_server_errors() {
    let mock_server = MockServer::start().await;

    // First call fails, later calls succeed
    Mock::given(method("HEAD"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("HEAD"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200))
        .with_priority(2)
        .mount(&mock_server)
        .await;

    let (sink, mut metrics) = ChannelMetricsSink::new();
    let client = RetryingClient::from_config(&fast_http_config(), Arc::new(transport()))
        .with_metrics(Arc::new(sink));

    let url = Url::parse(&format!("{}/flaky", mock_server.uri())).unwrap();
    let response = client
        .request(ProbeMethod::Head, &url, &RequestArgs::default())
        .await
        .unwrap();
    assert_eq!(response.status, 200);

    let first = metrics.recv().await.unwrap();
    assert_eq!(first.attempt, 1);
    assert_eq!(first.status, Some(503));
    assert!(first.will_retry);

    let second = metrics.recv().await.unwrap();
    assert_eq!(second.attempt, 2);
    assert_eq!(second.status, Some(200));
    assert!(!second.will_retry);
}

#[tokio::test]
async fn test_client_gives_up_after_max_attempts() {
    let mock_server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&mock_server)
        .await;

    let client = RetryingClient::from_config(&fast_http_config(), Arc::new(transport()));
    let url = Url::parse(&format!("{}/down", mock_server.uri())).unwrap();
    let response = client
        .request(ProbeMethod::Head, &url, &RequestArgs::default())
        .await
        .unwrap();

    assert_eq!(response.status, 500);
}

#[tokio::test]
async fn test_client_does_not_retry_not_found() {
    let mock_server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = RetryingClient::from_config(&fast_http_config(), Arc::new(transport()));
    let url = Url::parse(&format!("{}/gone", mock_server.uri())).unwrap();
    let response = client
        .request(ProbeMethod::Head, &url, &RequestArgs::default())
        .await
        .unwrap();

    assert_eq!(response.status, 404);
}

#[tokio::test]
async fn test_client_sends_configured_user_agent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(header("user-agent", "TestBot/1.0"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let client = RetryingClient::from_config(&fast_http_config(), Arc::new(transport()));
    let url = Url::parse(&format!("{}/ua", mock_server.uri())).unwrap();
    let response = client
        .request(ProbeMethod::Get, &url, &RequestArgs::default())
        .await
        .unwrap();

    // Without the matching user agent wiremock answers 404
    assert_eq!(response.status, 200);
}
