//! Integration tests for the on-disk cache: persistence across client
//! instances and recovery from a damaged cache document.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use url::Url;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use folio_feed::feed::{FeedClient, FeedSettings, Refresh, Relay, RetryPolicy};
use folio_feed::storage::{CacheEntry, CacheStore, FileStore};

const FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item>
        <guid>persisted-1</guid>
        <title>Persisted</title>
        <link>https://shirokokun.substack.com/p/persisted</link>
        <pubDate>Sat, 26 Jul 2025 14:03:00 GMT</pubDate>
        <description><![CDATA[<p>Kept on disk.</p>]]></description>
        <enclosure url="https://cdn.example.com/cover.jpg" type="image/jpeg" length="0"/>
    </item>
</channel></rss>"#;

fn cache_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("folio_feed_cache_it_{name}"));
    std::fs::remove_dir_all(&dir).ok();
    dir.join("feed-cache.json")
}

fn settings_for(server: &MockServer) -> FeedSettings {
    FeedSettings {
        retry: RetryPolicy::new(1, Duration::from_millis(5)),
        attempt_timeout: Duration::from_secs(2),
        ..FeedSettings::new(
            Url::parse("https://shirokokun.substack.com/feed").unwrap(),
            vec![Relay::Template(format!("{}/raw?url={{url}}", server.uri()))],
        )
    }
}

#[tokio::test]
async fn test_cache_survives_new_client() {
    let path = cache_path("survives");
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
        .expect(1)
        .mount(&server)
        .await;

    let first = FeedClient::new(
        reqwest::Client::new(),
        settings_for(&server),
        FileStore::new(&path),
    );
    let fetched = first.refresh(false).await.unwrap();
    assert!(matches!(fetched, Refresh::Fetched(_)));
    drop(first);

    // A second process start reads the same document without touching the network
    let second = FeedClient::new(
        reqwest::Client::new(),
        settings_for(&server),
        FileStore::new(&path),
    );
    let cached = second.load_cached().expect("warm cache");
    assert_eq!(cached.as_slice(), fetched.posts().as_slice());
    assert_eq!(second.state().posts.len(), 1);

    let refresh = second.refresh(false).await.unwrap();
    assert!(matches!(refresh, Refresh::Cached(_)));

    let post = &refresh.posts()[0];
    assert_eq!(post.guid, "persisted-1");
    assert_eq!(post.summary, "Kept on disk.");
    assert_eq!(
        post.enclosure.as_ref().map(|e| e.url.as_str()),
        Some("https://cdn.example.com/cover.jpg")
    );

    std::fs::remove_dir_all(path.parent().unwrap()).ok();
}

#[tokio::test]
async fn test_corrupt_cache_is_refetched_and_replaced() {
    let path = cache_path("corrupt");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"{\"posts\": [truncated").unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
        .expect(1)
        .mount(&server)
        .await;

    let client = FeedClient::new(
        reqwest::Client::new(),
        settings_for(&server),
        FileStore::new(&path),
    );
    assert!(client.state().posts.is_empty());
    assert!(client.load_cached().is_none());

    let refresh = client.refresh(false).await.unwrap();
    assert!(matches!(refresh, Refresh::Fetched(_)));

    let entry = FileStore::new(&path).get().unwrap().unwrap();
    assert_eq!(entry.posts.len(), 1);

    std::fs::remove_dir_all(path.parent().unwrap()).ok();
}

#[test]
fn test_expired_document_is_not_served() {
    let path = cache_path("expired");
    let store = FileStore::new(&path);
    store
        .set(&CacheEntry::new(
            Vec::new(),
            Utc::now() - chrono::Duration::minutes(31),
        ))
        .unwrap();

    let entry = store.get().unwrap().unwrap();
    assert!(!entry.is_fresh_at(Utc::now(), Duration::from_secs(30 * 60)));

    store.clear().unwrap();
    assert_eq!(store.get().unwrap(), None);
    std::fs::remove_dir_all(path.parent().unwrap()).ok();
}
