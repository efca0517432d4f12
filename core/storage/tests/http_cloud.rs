use chrono::{TimeZone, Utc};
use fitsync_common::{DeviceId, EntityId, EntityKind, Error, Record, SyncPayload};
use fitsync_storage::{CloudStore, HttpCloudConfig, HttpCloudStore, ImportRequest};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn store_for(server: &MockServer) -> HttpCloudStore {
    let config = HttpCloudConfig {
        base_url: format!("{}/api", server.uri()),
        token: Some("session-token".to_string()),
        timeout_secs: 5,
    };
    HttpCloudStore::new(&config).unwrap()
}

// ── Export ──────────────────────────────────────────────────────

#[tokio::test]
async fn export_without_cursor_sends_no_since() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/sync"))
        .and(header("authorization", "Bearer session-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "workoutLogs": [{"id": "w1", "durationMin": 50}],
                "onboardingProfile": {"id": "profile", "weightKg": 80}
            },
            "syncedAt": "2024-05-01T12:00:00.000Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = store_for(&server).export(None).await.unwrap();
    assert_eq!(response.data.record_count(), 2);
    assert_eq!(response.synced_at, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].url.query().is_none());
}

#[tokio::test]
async fn export_with_cursor_sends_since() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/sync"))
        .and(query_param("since", "2024-05-01T12:00:00.000Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {},
            "syncedAt": "2024-05-02T08:00:00.000Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let since = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let response = store_for(&server).export(Some(since)).await.unwrap();
    assert!(response.data.is_empty());
}

#[tokio::test]
async fn export_server_error_surfaces_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/sync"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "Unauthorized"})))
        .mount(&server)
        .await;

    let err = store_for(&server).export(None).await.unwrap_err();
    match err {
        Error::Server { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "Unauthorized");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn export_error_without_json_body_uses_status_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/sync"))
        .respond_with(ResponseTemplate::new(503).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = store_for(&server).export(None).await.unwrap_err();
    assert!(matches!(err, Error::Server { status: 503, ref message } if message == "Service Unavailable"));
    assert!(err.is_transient());
}

#[tokio::test]
async fn export_malformed_body_is_serialization_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/sync"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
        .mount(&server)
        .await;

    let err = store_for(&server).export(None).await.unwrap_err();
    assert!(matches!(err, Error::Serialization(_)));
}

#[tokio::test]
async fn unreachable_server_is_network_error() {
    // Reserve a free port, then release it so nothing listens there.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = HttpCloudConfig {
        base_url: format!("http://{}/api", addr),
        token: None,
        timeout_secs: 5,
    };
    let store = HttpCloudStore::new(&config).unwrap();

    let err = store.export(None).await.unwrap_err();
    assert!(matches!(err, Error::Network(_)));
}

// ── Import ──────────────────────────────────────────────────────

#[tokio::test]
async fn import_posts_payload_and_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/sync"))
        .and(body_partial_json(json!({
            "deviceId": "device-a",
            "lastSyncedAt": "2024-05-01T12:00:00Z",
            "data": {"achievements": [{"achievementId": "first-workout"}]}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "syncedAt": "2024-05-01T12:05:00.000Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut data = SyncPayload::new();
    data.push(
        EntityKind::Achievement,
        Record::new(EntityId::new("first-workout").unwrap()),
    );
    let request = ImportRequest {
        last_synced_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
        device_id: DeviceId::new("device-a").unwrap(),
        email: None,
        data,
    };

    let response = store_for(&server).import(request).await.unwrap();
    assert_eq!(response.synced_at, Utc.with_ymd_and_hms(2024, 5, 1, 12, 5, 0).unwrap());
}

#[tokio::test]
async fn import_rejection_is_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/sync"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "Invalid payload"})))
        .mount(&server)
        .await;

    let request = ImportRequest {
        last_synced_at: None,
        device_id: DeviceId::generate(),
        email: Some("lifter@example.com".to_string()),
        data: SyncPayload::new(),
    };
    let err = store_for(&server).import(request).await.unwrap_err();
    assert!(matches!(err, Error::Server { status: 400, .. }));
    assert!(!err.is_transient());
}
