mod common;

use common::{test_client, TestProxy, LISTED_IP};
use turnstile::test_report;
use wiremock::{matchers::any, Mock, MockServer, ResponseTemplate};

async fn ok_upstream() -> MockServer {
    let upstream = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200).set_body_string("front page"))
        .mount(&upstream)
        .await;
    upstream
}

async fn reddit_status(hour: u8, url: &str) -> (u16, String, usize) {
    let upstream = ok_upstream().await;
    let proxy = TestProxy::reference(hour, *upstream.address()).await;
    let resp = test_client(proxy.addr())
        .get(url)
        .header("X-Forwarded-For", LISTED_IP)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap();
    let dials = proxy.dialer.count();
    proxy.shutdown();
    (status, body, dials)
}

/// Both window boundaries block.
#[tokio::test]
async fn test_reddit_blocked_at_window_edges() {
    let t = test_report!("Reddit is blocked at 08:xx and 17:xx");
    for hour in [8u8, 12, 17] {
        let (status, body, dials) = reddit_status(hour, "http://www.reddit.com/").await;
        t.assert_eq(&format!("status at {}", hour), &status, &403u16);
        t.assert_eq(
            &format!("body at {}", hour),
            &body.as_str(),
            &"Access to Reddit is blocked during work hours.",
        );
        t.assert_eq(&format!("no dial at {}", hour), &dials, &0usize);
    }
}

/// Hours just outside the window are forwarded.
#[tokio::test]
async fn test_reddit_allowed_outside_window() {
    let t = test_report!("Reddit is forwarded at 07:xx and 18:xx");
    for hour in [0u8, 7, 18, 23] {
        let (status, body, dials) = reddit_status(hour, "http://www.reddit.com/r/rust").await;
        t.assert_eq(&format!("status at {}", hour), &status, &200u16);
        t.assert_eq(&format!("body at {}", hour), &body.as_str(), &"front page");
        t.assert_eq(&format!("one dial at {}", hour), &dials, &1usize);
    }
}

/// Only the exact configured host is scoped.
#[tokio::test]
async fn test_other_hosts_unaffected() {
    let (status, _, _) = reddit_status(12, "http://old.reddit.com/").await;
    assert_eq!(status, 200);
    let (status, _, _) = reddit_status(12, "http://example.com/").await;
    assert_eq!(status, 200);
    let (status, _, _) = reddit_status(12, "http://WWW.REDDIT.COM/").await;
    assert_eq!(status, 403);
}

/// A window that wraps past midnight.
#[tokio::test]
async fn test_overnight_window() {
    let upstream = ok_upstream().await;
    let policy = r#"
[[request_rules]]
kind = "block_hours"
host = "news.example"
start_hour = 22
end_hour = 5
status = 451
message = "Go to bed."
"#;
    for (hour, expected) in [(23u8, 451u16), (3, 451), (6, 200), (21, 200)] {
        let proxy = TestProxy::builder()
            .toml(policy)
            .hour(hour)
            .upstream(*upstream.address())
            .start()
            .await;
        let resp = test_client(proxy.addr())
            .get("http://news.example/")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), expected, "hour {}", hour);
        proxy.shutdown();
    }
}
