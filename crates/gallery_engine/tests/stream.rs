use std::sync::{Arc, Mutex};
use std::time::Duration;

use gallery_core::MetadataItem;
use gallery_engine::{Engine, EngineConfig, MetadataSink};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct RecordingSink {
    items: Mutex<Vec<MetadataItem>>,
}

impl RecordingSink {
    fn snapshot(&self) -> Vec<MetadataItem> {
        self.items.lock().unwrap().clone()
    }
}

impl MetadataSink for RecordingSink {
    fn on_metadata(&self, item: MetadataItem) {
        self.items.lock().unwrap().push(item);
    }
}

fn post(id: &str, url: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "url": url,
        "title": format!("title {id}"),
        "author": "tester",
        "permalink": format!("/p/{id}"),
        "kind": "content-post",
    })
}

fn page_json(items: Vec<serde_json::Value>, next_cursor: Option<&str>) -> String {
    serde_json::json!({ "items": items, "nextCursor": next_cursor }).to_string()
}

fn engine_for(server: &MockServer) -> Engine {
    let config = EngineConfig::new(format!("{}/feed", server.uri()), server.uri());
    Engine::new(config).expect("engine")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn close(subscription: gallery_engine::MetadataSubscription) {
    tokio::task::spawn_blocking(move || subscription.close())
        .await
        .expect("close");
}

#[tokio::test]
async fn delivers_eligible_posts_with_normalized_urls() {
    engine_logging::initialize_for_tests();
    let server = MockServer::start().await;
    let body = page_json(
        vec![
            post("p1", "http://x/img"),
            post("p2", "http://x/img.png"),
            post("p3", ""),
            serde_json::json!({
                "id": "p4",
                "url": "http://x/ad.png",
                "title": "promoted",
                "author": "sponsor",
                "permalink": "/p/p4",
                "kind": "promo",
            }),
        ],
        None,
    );
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/json"))
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let sink = Arc::new(RecordingSink::default());
    let subscription = engine.subscribe_metadata(sink.clone(), None);
    subscription.load_next_batch();

    wait_until(|| sink.snapshot().len() == 2).await;
    let items = sink.snapshot();
    assert_eq!(items[0].id, "p1");
    assert_eq!(items[0].url, "http://x/img.jpg");
    assert_eq!(items[0].title, "title p1");
    assert_eq!(items[0].author, "tester");
    assert_eq!(items[0].permalink, format!("{}/p/p1", server.uri()));
    assert_eq!(items[1].url, "http://x/img.png");

    close(subscription).await;
}

#[tokio::test]
async fn duplicate_demands_fetch_a_single_page() {
    let server = MockServer::start().await;
    let body = page_json(vec![post("p1", "http://x/a.png")], None);
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(body, "application/json")
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let sink = Arc::new(RecordingSink::default());
    let subscription = engine.subscribe_metadata(sink.clone(), None);
    subscription.load_next_batch();
    subscription.load_next_batch();
    subscription.load_next_batch();

    wait_until(|| sink.snapshot().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sink.snapshot().len(), 1);

    close(subscription).await;
}

#[tokio::test]
async fn next_batch_resumes_after_the_last_delivered_entry() {
    let server = MockServer::start().await;
    let second_page = page_json(
        vec![post("p3", "http://x/c.png"), post("p4", "http://x/d.png")],
        None,
    );
    Mock::given(method("GET"))
        .and(path("/feed"))
        .and(query_param("after", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(second_page, "application/json"))
        .mount(&server)
        .await;
    let first_page = page_json(
        vec![post("p1", "http://x/a.png"), post("p2", "http://x/b.png")],
        Some("p2"),
    );
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(first_page, "application/json"))
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let sink = Arc::new(RecordingSink::default());
    let subscription = engine.subscribe_metadata(sink.clone(), None);

    subscription.load_next_batch();
    wait_until(|| sink.snapshot().len() == 2).await;
    subscription.load_next_batch();
    wait_until(|| sink.snapshot().len() == 4).await;

    let ids: Vec<String> = sink.snapshot().into_iter().map(|item| item.id).collect();
    assert_eq!(ids, vec!["p1", "p2", "p3", "p4"]);

    close(subscription).await;
}

#[tokio::test]
async fn upstream_failures_are_retried_until_a_page_lands() {
    engine_logging::initialize_for_tests();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            page_json(vec![post("p1", "http://x/a.png")], None),
            "application/json",
        ))
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let sink = Arc::new(RecordingSink::default());
    let subscription = engine.subscribe_metadata(sink.clone(), None);
    subscription.load_next_batch();

    // Two failures back off 100ms then 200ms before the third attempt lands.
    wait_until(|| sink.snapshot().len() == 1).await;

    close(subscription).await;
}

#[tokio::test]
async fn malformed_pages_are_retried_like_network_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("not json", "application/json"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            page_json(vec![post("p1", "http://x/a.png")], None),
            "application/json",
        ))
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let sink = Arc::new(RecordingSink::default());
    let subscription = engine.subscribe_metadata(sink.clone(), None);
    subscription.load_next_batch();

    wait_until(|| sink.snapshot().len() == 1).await;

    close(subscription).await;
}

#[tokio::test]
async fn no_metadata_arrives_after_close_returns() {
    let server = MockServer::start().await;
    let body = page_json(
        vec![
            post("p1", "http://x/a.png"),
            post("p2", "http://x/b.png"),
            post("p3", "http://x/c.png"),
        ],
        None,
    );
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(body, "application/json")
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let sink = Arc::new(RecordingSink::default());
    let subscription = engine.subscribe_metadata(sink.clone(), None);
    subscription.load_next_batch();
    tokio::time::sleep(Duration::from_millis(50)).await;

    close(subscription).await;
    let count_at_close = sink.snapshot().len();

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(sink.snapshot().len(), count_at_close);
}
