//! Request pipeline tests against a mock HTTP server.

use std::sync::Arc;
use std::time::Duration;

use agora_client::permissions::{actions, resources};
use agora_client::{
    AgoraClient, AuthEvent, Clock, Error, ErrorKind, FileStorage, ManualClock, TokenPair,
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Value, json};
use tempfile::tempdir;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LOGIN: &str = "/api/user/auth/login";
const REFRESH: &str = "/api/user/auth/refresh";
const PERMISSIONS: &str = "/api/user/auth/permissions";

fn jwt(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(json!({"sub": "1", "exp": exp}).to_string());
    format!("{}.{}.c2lnbmF0dXJl", header, payload)
}

fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

fn client_for(server: &MockServer, clock: Arc<ManualClock>) -> AgoraClient {
    AgoraClient::builder()
        .base_url(server.uri())
        .clock(clock)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

async fn mount_login(server: &MockServer, access: &str, role: &str) {
    Mock::given(method("POST"))
        .and(path(LOGIN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "access_token": access,
                "refresh_token": "refresh-1",
                "user": {"id": 42, "username": "alice"},
                "permissions": {"role": role, "permissions": [], "all_roles": [role]}
            }
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_login_expiry_refresh_scenario() {
    let server = MockServer::start().await;
    let clock = Arc::new(ManualClock::at_current_second());
    let now = clock.now().timestamp();
    let first = jwt(now + 3600);
    let second = jwt(now + 7200);

    mount_login(&server, &first, "USER").await;
    Mock::given(method("POST"))
        .and(path(REFRESH))
        .and(body_json(json!({"refresh_token": "refresh-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": second})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/notices"))
        .and(header("authorization", bearer(&first).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [1]})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/notices"))
        .and(header("authorization", bearer(&second).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [2]})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, clock.clone());
    let session = client.auth().login("alice", "secret").await.unwrap();
    assert_eq!(session.user.id, "42");
    assert!(client.is_logged_in());
    assert_eq!(client.access_token().as_deref(), Some(first.as_str()));

    let body: Value = client.get("/api/notices").await.unwrap();
    assert_eq!(body["items"][0], 1);

    // Inside the five minute buffer.
    clock.advance(chrono::Duration::seconds(3600 - 200));
    let body: Value = client.get("/api/notices").await.unwrap();
    assert_eq!(body["items"][0], 2);

    assert_eq!(client.refresher().refresh_calls(), 1);
    assert_eq!(
        client.tokens().get().unwrap(),
        Some(TokenPair::new(second, "refresh-1"))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_one_refresh() {
    let server = MockServer::start().await;
    let clock = Arc::new(ManualClock::at_current_second());
    let now = clock.now().timestamp();
    let fresh = jwt(now + 3600);

    Mock::given(method("POST"))
        .and(path(REFRESH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": fresh, "refresh_token": "refresh-2"}))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/forum/posts"))
        .and(header("authorization", bearer(&fresh).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(12)
        .mount(&server)
        .await;

    let client = client_for(&server, clock);
    client
        .tokens()
        .set(&TokenPair::new(jwt(now - 10), "refresh-1"))
        .unwrap();

    let handles: Vec<_> = (0..12)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.get::<Value>("/api/forum/posts").await })
        })
        .collect();

    for handle in handles {
        let body = handle.await.unwrap().unwrap();
        assert_eq!(body["ok"], true);
    }
    assert_eq!(client.refresher().refresh_calls(), 1);
    assert!(!client.refresher().is_refreshing());
    assert_eq!(client.refresher().pending_count(), 0);
    assert_eq!(client.tokens().get().unwrap().unwrap().refresh, "refresh-2");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_refresh_failure_rejects_all_and_releases_lock() {
    let server = MockServer::start().await;
    let clock = Arc::new(ManualClock::at_current_second());
    let now = clock.now().timestamp();

    Mock::given(method("POST"))
        .and(path(REFRESH))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"message": "refresh token revoked"}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/activities"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    // Logged in with a token already inside the refresh buffer.
    mount_login(&server, &jwt(now + 10), "USER").await;

    let client = client_for(&server, clock);
    let mut events = client.events().subscribe();
    client.auth().login("alice", "secret").await.unwrap();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.get::<Value>("/api/activities").await })
        })
        .collect();

    for handle in handles {
        match handle.await.unwrap() {
            Err(Error::ReauthRequired(message)) => assert_eq!(message, "refresh token revoked"),
            other => panic!("expected ReauthRequired, got {:?}", other),
        }
    }

    assert!(!client.refresher().is_refreshing());
    assert!(!client.is_logged_in());
    assert!(client.session().is_none());

    let mut forced = 0;
    while let Ok(event) = events.try_recv() {
        if let AuthEvent::ForcedLogout { kind, .. } = event {
            assert_eq!(kind, ErrorKind::Authentication);
            forced += 1;
        }
    }
    assert_eq!(forced, 1);
}

#[tokio::test]
async fn test_forbidden_tears_down_session() {
    let server = MockServer::start().await;
    let clock = Arc::new(ManualClock::at_current_second());
    let access = jwt(clock.now().timestamp() + 3600);

    mount_login(&server, &access, "USER").await;
    Mock::given(method("DELETE"))
        .and(path("/api/notices/7"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"message": "Forbidden"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, clock);
    let mut events = client.events().subscribe();
    client.auth().login("alice", "secret").await.unwrap();
    assert!(client.session().is_some());

    let err = client.delete::<Value>("/api/notices/7").await.unwrap_err();
    let classified = err.classified().unwrap();
    assert_eq!(classified.kind, ErrorKind::Authorization);
    assert_eq!(classified.status, Some(403));
    assert_eq!(classified.message, "Forbidden");
    assert!(!classified.retryable);

    assert!(client.session().is_none());
    assert!(!client.is_logged_in());

    let mut topics = Vec::new();
    while let Ok(event) = events.try_recv() {
        topics.push(event.topic());
    }
    assert_eq!(
        topics,
        vec!["tokens-updated", "tokens-cleared", "forced-logout"]
    );
}

#[tokio::test]
async fn test_unauthorized_requires_login() {
    let server = MockServer::start().await;
    let clock = Arc::new(ManualClock::at_current_second());
    let access = jwt(clock.now().timestamp() + 3600);

    mount_login(&server, &access, "USER").await;
    Mock::given(method("GET"))
        .and(path("/api/me"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = client_for(&server, clock);
    client.auth().login("alice", "secret").await.unwrap();

    let err = client.get::<Value>("/api/me").await.unwrap_err();
    assert!(err.requires_login());
    assert_eq!(err.classified().unwrap().message, "HTTP 401");
    assert!(!client.is_logged_in());
}

#[tokio::test]
async fn test_network_drop_is_network_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = AgoraClient::builder()
        .base_url(format!("http://127.0.0.1:{}", port))
        .build()
        .unwrap();

    let err = client.get::<Value>("/api/notices").await.unwrap_err();
    let classified = err.classified().unwrap();
    assert_eq!(classified.kind, ErrorKind::Network);
    assert!(classified.retryable);
    assert!(!classified.triggers_reauth);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_slow_response_is_timeout_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let client = AgoraClient::builder()
        .base_url(server.uri())
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();

    let err = client.get::<Value>("/api/slow").await.unwrap_err();
    assert_eq!(err.classified().unwrap().kind, ErrorKind::Timeout);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_status_table_and_parse_errors() {
    let server = MockServer::start().await;
    Mock::given(path("/api/validate"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({"msg": "title required"})))
        .mount(&server)
        .await;
    Mock::given(path("/api/broken"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(path("/api/garbage"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;
    Mock::given(path("/api/teapot"))
        .respond_with(ResponseTemplate::new(418))
        .mount(&server)
        .await;

    let client = AgoraClient::builder().base_url(server.uri()).build().unwrap();

    let cases = [
        ("/api/validate", ErrorKind::Validation),
        ("/api/broken", ErrorKind::Server),
        ("/api/garbage", ErrorKind::Parse),
        ("/api/teapot", ErrorKind::Unknown),
    ];
    for (route, kind) in cases {
        let err = client
            .post::<Value, _>(route, &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.classified().map(|e| e.kind), Some(kind), "{}", route);
    }

    let err = client
        .post::<Value, _>("/api/validate", &json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.classified().unwrap().message, "title required");
}

#[tokio::test]
async fn test_business_error_is_separate_from_transport() {
    let server = MockServer::start().await;
    let clock = Arc::new(ManualClock::at_current_second());
    let access = jwt(clock.now().timestamp() + 3600);

    mount_login(&server, &access, "USER").await;
    Mock::given(method("POST"))
        .and(path("/api/activities/3/signup"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "code": "ACTIVITY_FULL",
            "message": "Activity is full"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/notices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "code": "PERMISSION_DENIED",
            "message": "Not allowed"
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, clock);
    client.auth().login("alice", "secret").await.unwrap();

    match client
        .post::<Value, _>("/api/activities/3/signup", &json!({}))
        .await
    {
        Err(Error::Business(err)) => {
            assert_eq!(err.code.as_deref(), Some("ACTIVITY_FULL"));
            assert_eq!(err.message, "Activity is full");
            assert_eq!(err.permission_kind, None);
        }
        other => panic!("expected business error, got {:?}", other),
    }
    assert!(client.is_logged_in());

    match client.post::<Value, _>("/api/notices", &json!({})).await {
        Err(Error::Business(err)) => {
            assert_eq!(err.permission_kind, Some(ErrorKind::Authorization));
        }
        other => panic!("expected business error, got {:?}", other),
    }
    assert!(!client.is_logged_in());
    assert!(client.session().is_none());
}

#[tokio::test]
async fn test_login_is_skip_listed() {
    let server = MockServer::start().await;
    let clock = Arc::new(ManualClock::at_current_second());
    let now = clock.now().timestamp();
    let access = jwt(now + 3600);

    mount_login(&server, &access, "MODERATOR").await;
    Mock::given(method("POST"))
        .and(path(REFRESH))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server, clock);
    // An expired token must neither be attached nor refreshed for login.
    client
        .tokens()
        .set(&TokenPair::new(jwt(now - 100), "refresh-0"))
        .unwrap();

    let session = client.auth().login("alice", "secret").await.unwrap();
    assert_eq!(session.role, "MODERATOR");

    let requests = server.received_requests().await.unwrap();
    let login = requests
        .iter()
        .find(|r| r.url.path() == LOGIN)
        .unwrap();
    assert!(login.headers.get("authorization").is_none());
    let body: Value = serde_json::from_slice(&login.body).unwrap();
    assert_eq!(body, json!({"account": "alice", "password": "secret"}));
}

#[tokio::test]
async fn test_rejected_login_clears_stale_session() {
    let server = MockServer::start().await;
    let clock = Arc::new(ManualClock::at_current_second());
    let access = jwt(clock.now().timestamp() + 3600);

    mount_login(&server, &access, "USER").await;
    Mock::given(method("POST"))
        .and(path(LOGIN))
        .and(body_json(json!({"account": "alice", "password": "bad"})))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, clock);
    client.auth().login("alice", "secret").await.unwrap();
    assert!(client.is_logged_in());
    let mut events = client.events().subscribe();

    let err = client.auth().login("alice", "bad").await.unwrap_err();
    assert!(err.requires_login());
    assert_eq!(err.classified().unwrap().kind, ErrorKind::Authentication);

    assert!(!client.is_logged_in());
    assert!(client.session().is_none());
    let forced = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|e| matches!(e, AuthEvent::ForcedLogout { .. }))
        .count();
    assert_eq!(forced, 1);
}

#[tokio::test]
async fn test_corrupt_token_never_reaches_network() {
    let server = MockServer::start().await;
    let clock = Arc::new(ManualClock::at_current_second());
    let client = client_for(&server, clock);
    client
        .tokens()
        .set(&TokenPair::new("garbage", "r1"))
        .unwrap();

    let result = client.get::<Value>("/api/notices").await;
    assert!(matches!(result, Err(Error::ReauthRequired(_))));
    assert!(server.received_requests().await.unwrap().is_empty());
    assert!(!client.is_logged_in());
}

#[tokio::test]
async fn test_refresh_permissions_updates_session() {
    let server = MockServer::start().await;
    let clock = Arc::new(ManualClock::at_current_second());
    let access = jwt(clock.now().timestamp() + 3600);

    mount_login(&server, &access, "USER").await;
    Mock::given(method("GET"))
        .and(path(PERMISSIONS))
        .and(header("authorization", bearer(&access).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "role": "ADMIN",
                "permissions": ["system:manage"],
                "all_roles": ["USER", "ADMIN"]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, clock);
    client.auth().login("alice", "secret").await.unwrap();
    assert!(!client.permissions().has_role("ADMIN"));

    let session = client.auth().refresh_permissions().await.unwrap().unwrap();
    assert_eq!(session.user.username.as_deref(), Some("alice"));

    let permissions = client.permissions();
    assert!(permissions.has_role("ADMIN"));
    assert!(permissions.has_resource_permission(resources::NOTICE, actions::PUBLISH));
    assert!(permissions.has_resource_permission(resources::SYSTEM, actions::MANAGE));
}

#[tokio::test]
async fn test_file_storage_survives_restart() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    let clock = Arc::new(ManualClock::at_current_second());
    let access = jwt(clock.now().timestamp() + 3600);
    mount_login(&server, &access, "MODERATOR").await;

    let build = || {
        AgoraClient::builder()
            .base_url(server.uri())
            .storage(Arc::new(FileStorage::new(dir.path())))
            .clock(clock.clone())
            .build()
            .unwrap()
    };

    build().auth().login("alice", "secret").await.unwrap();

    let restarted = build();
    assert!(restarted.is_logged_in());
    assert_eq!(restarted.session().unwrap().role, "MODERATOR");
    assert!(
        restarted
            .permissions()
            .can_batch_operate(resources::FORUM_POST, actions::AUDIT, 50)
    );

    restarted.auth().logout().await.unwrap();
    assert!(!build().is_logged_in());
    assert!(build().session().is_none());
}

#[tokio::test]
async fn test_sync_external_drops_session_cleared_elsewhere() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    let clock = Arc::new(ManualClock::at_current_second());
    let access = jwt(clock.now().timestamp() + 3600);
    mount_login(&server, &access, "USER").await;

    let build = || {
        AgoraClient::builder()
            .base_url(server.uri())
            .storage(Arc::new(FileStorage::new(dir.path())))
            .clock(clock.clone())
            .build()
            .unwrap()
    };

    let first = build();
    first.auth().login("alice", "secret").await.unwrap();
    let second = build();
    assert!(second.session().is_some());
    assert!(second.sync_external().is_empty());

    clock.advance(chrono::Duration::seconds(5));
    first.auth().logout().await.unwrap();

    // Cached until the other process's clear is observed.
    assert!(second.session().is_some());
    let seen = second.sync_external();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].topic(), "tokens-cleared");
    assert!(second.session().is_none());
    assert!(!second.is_logged_in());
}
