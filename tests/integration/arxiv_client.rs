//! arXiv client against a mock query endpoint

use pretty_assertions::assert_eq;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use paper_harvester::fetcher::arxiv_http::ArxivClient;
use paper_harvester::fetcher::{FetcherError, PageSource};
use paper_harvester::harvester::RateLimiter;
use paper_harvester::RecordId;

use crate::support::window;

const PAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:opensearch="http://a9.com/-/spec/opensearch/1.1/">
  <opensearch:totalResults>2</opensearch:totalResults>
  <entry>
    <id>http://arxiv.org/abs/2401.01234v2</id>
    <updated>2024-01-10T18:00:00Z</updated>
    <published>2024-01-09T20:00:00Z</published>
    <title>First</title>
    <summary>One.</summary>
    <author><name>Ada Lovelace</name></author>
    <category term="cs.AI"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2401.01300v1</id>
    <updated>2024-01-09T22:00:00Z</updated>
    <published>2024-01-09T22:00:00Z</published>
    <title>Second</title>
    <summary>Two.</summary>
    <author><name>Alan Turing</name></author>
    <category term="cs.AI"/>
  </entry>
</feed>"#;

const API_ERROR: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:opensearch="http://a9.com/-/spec/opensearch/1.1/">
  <opensearch:totalResults>1</opensearch:totalResults>
  <entry>
    <id>http://arxiv.org/api/errors#incorrect_id_format_for_1234</id>
    <title>Error</title>
    <summary>incorrect id format for 1234</summary>
    <updated>2024-01-10T00:00:00-05:00</updated>
  </entry>
</feed>"#;

fn client(server: &MockServer, spacing: Duration) -> ArxivClient {
    ArxivClient::new(
        Arc::new(Client::new()),
        format!("{}/api/query", server.uri()),
        Arc::new(RateLimiter::min_interval(spacing)),
    )
}

#[tokio::test]
async fn success_page_is_decoded_with_total() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param(
            "search_query",
            "cat:cs.AI AND submittedDate:[202401091900 TO 202401101859]",
        ))
        .and(query_param("start", "100"))
        .and(query_param("max_results", "50"))
        .and(query_param("sortBy", "submittedDate"))
        .and(query_param("sortOrder", "ascending"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
        .expect(1)
        .mount(&server)
        .await;

    let page = client(&server, Duration::ZERO)
        .fetch_page(&window("cs.AI"), 100, 50)
        .await
        .unwrap();

    assert_eq!(page.reported_total, 2);
    let ids: Vec<RecordId> = page.records.iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids, vec![RecordId::new("2401.01234"), RecordId::new("2401.01300")]);
    assert_eq!(page.records[0].version, Some(2));
}

#[tokio::test]
async fn status_codes_are_classified() {
    let cases = [
        (503, "transient"),
        (429, "transient"),
        (500, "transient"),
        (400, "permanent"),
        (404, "permanent"),
    ];

    for (status, expected) in cases {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&server)
            .await;

        let error = client(&server, Duration::ZERO)
            .fetch_page(&window("cs.AI"), 0, 100)
            .await
            .unwrap_err();

        let kind = if error.is_transient() { "transient" } else { "permanent" };
        assert_eq!(kind, expected, "HTTP {status} -> {error}");
        match status {
            429 | 503 => assert_eq!(error, FetcherError::Throttled { status }),
            500 => assert!(matches!(error, FetcherError::ServerError { status: 500, .. })),
            _ => assert!(matches!(error, FetcherError::ClientError { .. })),
        }
    }
}

#[tokio::test]
async fn api_error_entry_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(API_ERROR))
        .mount(&server)
        .await;

    let error = client(&server, Duration::ZERO)
        .fetch_page(&window("cs.AI"), 0, 100)
        .await
        .unwrap_err();

    assert_eq!(
        error,
        FetcherError::ApiError("incorrect id format for 1234".to_string())
    );
    assert!(!error.is_transient());
}

#[tokio::test]
async fn truncated_body_is_a_transient_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(&PAGE[..PAGE.len() / 2]))
        .mount(&server)
        .await;

    let error = client(&server, Duration::ZERO)
        .fetch_page(&window("cs.AI"), 0, 100)
        .await
        .unwrap_err();

    assert!(matches!(error, FetcherError::ParseError(_)));
    assert!(error.is_transient());
}

#[tokio::test]
async fn requests_share_the_client_throttle() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
        .expect(3)
        .mount(&server)
        .await;

    let client = Arc::new(client(&server, Duration::from_millis(150)));
    let started = Instant::now();
    let handles: Vec<_> = ["cs.AI", "cs.LG", "stat.ML"]
        .into_iter()
        .map(|feed| {
            let client = client.clone();
            tokio::spawn(async move { client.fetch_page(&window(feed), 0, 100).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Three requests need two full gaps
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn unreachable_endpoint_is_a_network_error() {
    let client = ArxivClient::new(
        Arc::new(Client::new()),
        "http://127.0.0.1:9/api/query",
        Arc::new(RateLimiter::min_interval(Duration::ZERO)),
    );

    let error = client
        .fetch_page(&window("cs.AI"), 0, 100)
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        FetcherError::NetworkError(_) | FetcherError::Timeout(_)
    ));
    assert!(error.is_transient());
}
