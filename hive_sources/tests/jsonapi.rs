use hive_sources::{JsonApiProducer, ProxyProducer, SourceSpec};
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn api_objects_become_scheme_prefixed_urls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"total": 2, "data": [{"ip": "1.2.3.4", "port": 1080}, {"host": "5.6.7.8", "port": "8081"}]}"#,
        ))
        .mount(&server)
        .await;

    let producer = JsonApiProducer::new(SourceSpec {
        name: "mock-api".into(),
        schedule: String::new(),
        scheme: "socks5".into(),
        format: "json".into(),
        urls: vec![format!("{}/api", server.uri())],
    });

    let (tx, mut rx) = mpsc::channel(8);
    producer.fetch_proxies(tx).await.unwrap();
    assert_eq!(rx.recv().await.unwrap(), "socks5://1.2.3.4:1080");
    assert_eq!(rx.recv().await.unwrap(), "socks5://5.6.7.8:8081");
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn non_json_body_counts_as_a_failed_source() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
        .mount(&server)
        .await;

    let producer = JsonApiProducer::new(SourceSpec {
        name: "bad-api".into(),
        schedule: String::new(),
        scheme: "socks5".into(),
        format: "json".into(),
        urls: vec![server.uri()],
    });

    let (tx, mut rx) = mpsc::channel(8);
    assert!(producer.fetch_proxies(tx).await.is_err());
    assert!(rx.recv().await.is_none());
}
