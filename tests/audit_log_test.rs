mod common;

use common::{
    dead_address, open_connect, read_audit_entries, start_echo_upstream, start_silent_upstream,
    test_client, TestProxy, LISTED_IP, REFERENCE_POLICY,
};
use turnstile::test_report;
use wiremock::{matchers::any, Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_audit_log_http_decisions() {
    let t = test_report!("Audit log records allowed and blocked HTTP requests");
    let dir = tempfile::tempdir().unwrap();
    let audit_path = dir.path().join("audit.jsonl");

    let upstream = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(204))
        .mount(&upstream)
        .await;

    let proxy = TestProxy::builder()
        .toml(REFERENCE_POLICY)
        .hour(9)
        .upstream(*upstream.address())
        .audit_log(&audit_path)
        .start()
        .await;
    let client = test_client(proxy.addr());

    t.action("Allowed GET http://example.com/a, blocked GET http://www.reddit.com/, unlisted GET");
    client
        .get("http://example.com/a")
        .header("X-Forwarded-For", LISTED_IP)
        .send()
        .await
        .unwrap();
    client
        .get("http://www.reddit.com/")
        .header("X-Forwarded-For", LISTED_IP)
        .send()
        .await
        .unwrap();
    client.get("http://example.com/b").send().await.unwrap();

    let entries = read_audit_entries(&audit_path);
    t.assert_eq("entry count", &entries.len(), &3usize);

    t.assert_eq("[0] event", &entries[0]["event"].as_str(), &Some("request_allowed"));
    t.assert_eq("[0] decision", &entries[0]["decision"].as_str(), &Some("allowed"));
    t.assert_eq("[0] status", &entries[0]["status"].as_u64(), &Some(204));
    t.assert_eq("[0] client_ip", &entries[0]["client_ip"].as_str(), &Some(LISTED_IP));
    t.assert_eq(
        "[0] url",
        &entries[0]["url"].as_str(),
        &Some("http://example.com/a"),
    );
    t.assert_true("[0] implicit allow has no rule", entries[0].get("rule").is_none());

    t.assert_eq("[1] event", &entries[1]["event"].as_str(), &Some("request_blocked"));
    t.assert_eq("[1] rule", &entries[1]["rule"].as_str(), &Some("block_hours"));
    t.assert_eq("[1] host", &entries[1]["host"].as_str(), &Some("www.reddit.com"));

    t.assert_eq("[2] rule", &entries[2]["rule"].as_str(), &Some("whitelist"));
    t.assert_eq("[2] client_ip", &entries[2]["client_ip"].as_str(), &Some("127.0.0.1"));
    t.assert_eq("[2] status", &entries[2]["status"].as_u64(), &Some(403));

    proxy.shutdown();
}

#[tokio::test]
async fn test_audit_log_connect_decisions() {
    let t = test_report!("Audit log records tunnel opened, refused and failed");
    let dir = tempfile::tempdir().unwrap();
    let audit_path = dir.path().join("audit.jsonl");
    let upstream = start_echo_upstream().await;

    let proxy = TestProxy::builder()
        .toml(REFERENCE_POLICY)
        .upstream(upstream)
        .audit_log(&audit_path)
        .start()
        .await;
    let listed = [("X-Forwarded-For", LISTED_IP)];

    let (_a, head) = open_connect(proxy.addr(), "example.com:443", &listed).await;
    t.assert_contains("opened", &head, "200");
    let (_b, head) = open_connect(proxy.addr(), "evil.gif:443", &listed).await;
    t.assert_contains("refused", &head, "403");
    proxy.shutdown();

    let dead = dead_address().await;
    let proxy = TestProxy::builder()
        .upstream(dead)
        .audit_log(&audit_path)
        .start()
        .await;
    let (_c, head) = open_connect(proxy.addr(), "example.com:443", &[]).await;
    t.assert_contains("failed", &head, "502");

    let entries = read_audit_entries(&audit_path);
    let events: Vec<_> = entries
        .iter()
        .map(|e| e["event"].as_str().unwrap_or_default().to_string())
        .collect();
    t.assert_eq(
        "events",
        &events,
        &vec![
            "tunnel_opened".to_string(),
            "tunnel_blocked".to_string(),
            "upstream_failed".to_string(),
        ],
    );
    t.assert_eq("method", &entries[0]["method"].as_str(), &Some("CONNECT"));
    t.assert_eq("url", &entries[0]["url"].as_str(), &Some("example.com:443"));
    t.assert_eq("blocked rule", &entries[1]["rule"].as_str(), &Some("reject_target"));
    t.assert_eq("failed status", &entries[2]["status"].as_u64(), &Some(502));
    t.assert_true("failure has error", entries[2]["error"].is_string());

    proxy.shutdown();
}

#[tokio::test]
async fn test_audit_log_http_upstream_failure() {
    let dir = tempfile::tempdir().unwrap();
    let audit_path = dir.path().join("audit.jsonl");
    let dead = dead_address().await;

    let proxy = TestProxy::builder()
        .upstream(dead)
        .audit_log(&audit_path)
        .start()
        .await;
    let resp = test_client(proxy.addr())
        .get("http://example.com/")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    assert!(resp.text().await.unwrap().starts_with("Proxy error: "));

    let entries = read_audit_entries(&audit_path);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["event"], "upstream_failed");
    assert_eq!(entries[0]["decision"], "allowed");

    proxy.shutdown();
}

#[tokio::test]
async fn test_silent_upstream_times_out() {
    let t = test_report!("Upstream that never answers yields 502 after the upstream timeout");
    let dir = tempfile::tempdir().unwrap();
    let audit_path = dir.path().join("audit.jsonl");
    let silent = start_silent_upstream().await;

    let proxy = TestProxy::builder()
        .config(|c| c.proxy.upstream_timeout_secs = 1)
        .upstream(silent)
        .audit_log(&audit_path)
        .start()
        .await;

    t.action("GET http://example.com/slow through a proxy whose upstream accepts and stays silent");
    let started = std::time::Instant::now();
    let resp = test_client(proxy.addr())
        .get("http://example.com/slow")
        .send()
        .await
        .unwrap();
    let elapsed = started.elapsed();

    t.assert_eq("status", &resp.status().as_u16(), &502u16);
    t.assert_true("answered before the client gave up", elapsed.as_secs() < 5);
    let body = resp.text().await.unwrap();
    t.assert_contains("body", &body, "no response within 1s");

    let entries = read_audit_entries(&audit_path);
    t.assert_eq("entry count", &entries.len(), &1usize);
    t.assert_eq("event", &entries[0]["event"].as_str(), &Some("upstream_failed"));
    t.assert_eq("status", &entries[0]["status"].as_u64(), &Some(502));

    proxy.shutdown();
}
