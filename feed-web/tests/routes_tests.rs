use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use feed_core::{CacheConfig, FeedCacheManager, FeedDescriptor, HttpSource, MemoryStore};
use feed_web::{compose, create_router, AppState};
use reqwest::{redirect, Client};
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PODCAST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>100komma7</title>
    <link>https://www.100komma7.lu/</link>
    <description>Podcasts</description>
    <item>
      <title>Moien &amp; Äddi
second line</title>
      <link>https://www.100komma7.lu/episode/1</link>
      <guid isPermaLink="false">episode-1</guid>
      <pubDate>Tue, 01 Oct 2024 07:28:00 GMT</pubDate>
      <description>Intro
	Track one
	Track two</description>
    </item>
  </channel>
</rss>"#;

const NEWS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>News</title>
    <link>https://news.example.lu/</link>
    <description>News</description>
    <item>
      <title>Budget vote</title>
      <link>https://news.example.lu/budget</link>
      <guid>https://news.example.lu/a/42</guid>
      <description>&lt;p&gt;Chamber &lt;b&gt;approves&lt;/b&gt;&lt;/p&gt;</description>
    </item>
  </channel>
</rss>"#;

async fn upstream() -> MockServer {
    let server = MockServer::start().await;
    for (route, body) in [("/podcast.xml", PODCAST), ("/news.xml", NEWS)] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/rss+xml")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/down.xml"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;
    server
}

fn feeds(server: &MockServer) -> Vec<FeedDescriptor> {
    vec![
        FeedDescriptor {
            id: "rtl.lu".into(),
            url: format!("{}/news.xml", server.uri()),
            title: None,
        },
        FeedDescriptor {
            id: "100komma7".into(),
            url: format!("{}/podcast.xml", server.uri()),
            title: Some("Radio 100,7".into()),
        },
        FeedDescriptor {
            id: "down".into(),
            url: format!("{}/down.xml", server.uri()),
            title: None,
        },
    ]
}

fn manager() -> FeedCacheManager {
    let config = CacheConfig {
        fetch_timeout: Duration::from_secs(2),
        ..CacheConfig::default()
    };
    let source = HttpSource::new(Client::new(), config.fetch_timeout);
    FeedCacheManager::new(&config, Arc::new(MemoryStore::new()), Arc::new(source))
}

async fn start_app(feeds: Vec<FeedDescriptor>) -> SocketAddr {
    let state = Arc::new(AppState {
        manager: manager(),
        feeds,
    });
    let app = create_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn client() -> Client {
    Client::builder()
        .redirect(redirect::Policy::none())
        .build()
        .unwrap()
}

#[tokio::test]
async fn compose_keeps_order_and_isolates_failures() {
    let server = upstream().await;
    let page = compose(&manager(), &feeds(&server), "/").await;

    let ids: Vec<_> = page.sections.iter().map(|s| s.feed.id.as_str()).collect();
    assert_eq!(ids, ["rtl.lu", "100komma7", "down"]);
    assert!(page.sections[0].result.is_ok());
    assert!(page.sections[1].result.is_ok());
    assert!(page.sections[2].result.is_err());
    assert_eq!(page.sections[0].heading(), "Rtl Lu");
    assert_eq!(page.sections[1].heading(), "Radio 100,7");
}

#[tokio::test]
async fn index_renders_all_feeds() {
    let server = upstream().await;
    let addr = start_app(feeds(&server)).await;

    let response = client()
        .get(format!("http://{addr}/"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();

    assert!(body.contains("What&#39;s up, Lëtzebuerg?"));
    assert!(body.contains("<h2>Rtl Lu</h2>"));
    // guid is a URL, so it wins over the link
    assert!(body.contains("href=\"https://news.example.lu/a/42\""));
    assert!(body.contains("Budget vote"));
    assert!(body.contains("Chamber approves"));
    // guid is not a URL, so the link is used
    assert!(body.contains("href=\"https://www.100komma7.lu/episode/1\""));
    assert!(body.contains("Moien &amp; Äddi"));
    assert!(!body.contains("second line"));
    assert!(body.contains("- Intro\n- Track one\n- Track two\n"));
    assert!(body.contains("1 October 2024 at 07:28"));
    assert!(body.contains("Feed unavailable (fetch error)"));

    // second view comes from the cache
    client()
        .get(format!("http://{addr}/"))
        .send()
        .await
        .unwrap();
    let requests = server.received_requests().await.unwrap();
    let news_fetches = requests
        .iter()
        .filter(|r| r.url.path() == "/news.xml")
        .count();
    assert_eq!(news_fetches, 1);
}

#[tokio::test]
async fn index_uses_forwarded_uri_for_path() {
    let server = upstream().await;
    let addr = start_app(feeds(&server)).await;

    let body = client()
        .get(format!("http://{addr}/"))
        .header("X-Forwarded-Request-Uri", "/lu/")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(body.contains("<link rel=\"canonical\" href=\"/lu/\">"));
}

#[tokio::test]
async fn robots_disallows_everything() {
    let addr = start_app(Vec::new()).await;

    let response = client()
        .get(format!("http://{addr}/robots.txt"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "User-agent: *\nDisallow: /");
}

#[tokio::test]
async fn unknown_paths_redirect_home() {
    let addr = start_app(Vec::new()).await;

    let response = client()
        .get(format!("http://{addr}/some/where"))
        .send()
        .await
        .unwrap();

    assert!(response.status().is_redirection());
    assert_eq!(response.headers()["location"], "/");
}
