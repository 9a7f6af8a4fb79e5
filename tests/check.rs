use std::sync::Arc;
use std::time::Duration;

use proxyhive::check;
use proxyhive::config::{CheckGeolocateConfig, CheckSocksConfig};
use proxyhive::ingest::IngestQueue;
use proxyhive::pool::{FileStore, ProxyStore};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn probe_cfg(keyword: &str) -> CheckSocksConfig {
    CheckSocksConfig {
        check_url: "http://probe.invalid/check".into(),
        check_rsp_keywords: keyword.into(),
        max_concurrent_req: 4,
        timeout: 3,
        check_geolocate: CheckGeolocateConfig::default(),
    }
}

async fn file_store() -> (tempfile::TempDir, Arc<dyn ProxyStore>) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool.txt").to_str().unwrap().to_string();
    let store: Arc<dyn ProxyStore> = Arc::new(FileStore::open(&path, 100).await.unwrap());
    (dir, store)
}

/// The mock server plays an HTTP forward proxy: for a plain-http check URL
/// the probe sends it an absolute-form GET, and the canned body decides the
/// verdict.
#[tokio::test]
async fn validators_admit_passing_and_drop_failing_candidates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("status PROBE-OK region"))
        .mount(&server)
        .await;
    let good = server.uri();
    let dead = "socks5://127.0.0.1:1".to_string();

    let (_dir, store) = file_store().await;
    let queue = IngestQueue::new(64);
    check::spawn_validators(2, probe_cfg("PROBE-OK"), queue.clone(), store.clone());

    assert!(queue.push(good.clone()).await);
    assert!(queue.push(dead).await);

    let mut admitted = Vec::new();
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        admitted = store.get_all().await.unwrap();
        if !admitted.is_empty() {
            break;
        }
    }
    // the dead candidate needs a moment to be rejected too
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(store.get_all().await.unwrap(), vec![good]);
    assert_eq!(admitted.len(), 1);
}

#[tokio::test]
async fn keyword_mismatch_is_a_probe_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("something else entirely"))
        .mount(&server)
        .await;

    let (_dir, store) = file_store().await;
    let cfg = probe_cfg("PROBE-OK");
    assert!(!check::probe(&server.uri(), &cfg).await);
    check::check_batch(&cfg, vec![server.uri()], &store).await;
    assert_eq!(store.len().await.unwrap(), 0);
}
