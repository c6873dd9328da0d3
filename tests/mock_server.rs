//! Mock server tests for the cirrus library.
//!
//! These tests use wiremock to simulate an API server and exercise the
//! library end to end without network access or real credentials.

use cirrus::{ApiConfig, Container, ErrorCode, Query, Record, RecordId, Value};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Helper to create a container pointed at a mock server.
fn mock_container(server: &MockServer) -> Container {
    // For tests, HTTP localhost is allowed
    let config = ApiConfig::new(server.uri(), "test-api-key").unwrap();
    Container::new(config)
}

fn alice_profile() -> serde_json::Value {
    json!({
        "$type": "record",
        "$id": "user/alice-id",
        "$created_at": "2026-01-02T03:04:05.000Z"
    })
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "token-1",
            "profile": alice_profile()
        })))
        .mount(server)
        .await;
}

// ============================================================================
// Authentication Tests
// ============================================================================

#[tokio::test]
async fn test_login_success() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(header("x-api-key", "test-api-key"))
        .and(body_json(json!({
            "username": "alice",
            "password": "secret123"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "token-1",
            "profile": alice_profile()
        })))
        .mount(&server)
        .await;

    let container = mock_container(&server);
    let user = container
        .auth()
        .login_with_username("alice", "secret123")
        .await
        .unwrap();

    assert_eq!(user.record_id().to_string(), "user/alice-id");
    assert_eq!(
        container.auth().access_token().await.as_deref(),
        Some("token-1")
    );
    let current = container.auth().current_user().await.unwrap();
    assert_eq!(current.record_id(), user.record_id());
}

#[tokio::test]
async fn test_login_invalid_credentials() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "status": 401,
            "error": {
                "code": 105,
                "message": "username or password incorrect"
            }
        })))
        .mount(&server)
        .await;

    let container = mock_container(&server);
    let result = container.auth().login_with_username("alice", "wrong").await;

    let err = result.unwrap_err();
    assert!(err.is_code(ErrorCode::InvalidCredentials));
    assert!(container.auth().current_user().await.is_none());
}

#[tokio::test]
async fn test_access_token_sent_after_login() {
    let server = MockServer::start().await;
    mount_login(&server).await;

    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let container = mock_container(&server);
    container
        .auth()
        .login_with_username("alice", "secret")
        .await
        .unwrap();
    container.auth().logout().await.unwrap();
}

#[tokio::test]
async fn test_logout_clears_session_and_notifies() {
    let server = MockServer::start().await;
    mount_login(&server).await;

    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": {}})))
        .mount(&server)
        .await;

    let container = mock_container(&server);
    let mut changes = container.auth().subscribe_user_changes().await;

    container
        .auth()
        .login_with_username("alice", "secret")
        .await
        .unwrap();
    let event = changes.try_recv().unwrap();
    assert!(event.user.is_some());

    container.auth().logout().await.unwrap();
    let event = changes.try_recv().unwrap();
    assert!(event.user.is_none());
    assert!(changes.try_recv().is_none());

    assert!(container.auth().current_user().await.is_none());
    assert!(container.auth().access_token().await.is_none());
}

#[tokio::test]
async fn test_cancelled_listener_receives_nothing() {
    let server = MockServer::start().await;
    mount_login(&server).await;

    let container = mock_container(&server);
    let changes = container.auth().subscribe_user_changes().await;
    changes.cancel().await;

    container
        .auth()
        .login_with_username("alice", "secret")
        .await
        .unwrap();
    // The cancelled subscription is detached; a fresh one sees nothing
    // retroactively.
    let mut fresh = container.auth().subscribe_user_changes().await;
    assert!(fresh.try_recv().is_none());
}

// ============================================================================
// Record Save Tests
// ============================================================================

#[tokio::test]
async fn test_save_record_success() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/record/save"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [{
                "$type": "record",
                "$id": "note/n1",
                "$created_at": "2026-03-01T10:00:00.000Z",
                "$updated_at": "2026-03-01T10:00:00.000Z",
                "$owner_id": "alice-id",
                "title": "hello"
            }]
        })))
        .mount(&server)
        .await;

    let container = mock_container(&server);
    let mut note = Record::with_id(RecordId::parse("note/n1").unwrap());
    note.set("title", Value::from("hello")).unwrap();

    let saved = container.public_db().save(&note).await.unwrap();
    assert_eq!(saved.record_id().to_string(), "note/n1");
    assert_eq!(saved.owner_id(), Some("alice-id"));
    assert!(saved.created_at().is_some());
    assert_eq!(saved.get("title"), Some(&Value::from("hello")));
}

#[tokio::test]
async fn test_save_batch_partial_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/record/save"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [
                {"$type": "record", "$id": "note/a"},
                {"$type": "error", "code": 113, "message": "title must be unique"},
                {"$type": "record", "$id": "note/c"}
            ]
        })))
        .mount(&server)
        .await;

    let container = mock_container(&server);
    let records = vec![
        Record::with_id(RecordId::parse("note/a").unwrap()),
        Record::with_id(RecordId::parse("note/b").unwrap()),
        Record::with_id(RecordId::parse("note/c").unwrap()),
    ];
    let output = container
        .public_db()
        .save_batch(&records, &cirrus::SaveOptions::default())
        .await
        .unwrap();

    assert!(!output.is_complete());
    assert!(output.saved[0].is_some());
    assert!(output.saved[1].is_none());
    assert!(output.saved[2].is_some());
    let err = output.errors[1].as_ref().unwrap();
    assert_eq!(err.code, ErrorCode::ConstraintViolated);
    assert!(output.errors[0].is_none());
    assert!(output.errors[2].is_none());
}

#[tokio::test]
async fn test_save_batch_atomic_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/record/save"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [
                {"$type": "error", "code": 115, "message": "atomic operation rolled back"},
                {"$type": "error", "code": 113, "message": "title must be unique"}
            ]
        })))
        .mount(&server)
        .await;

    let container = mock_container(&server);
    let records = vec![
        Record::with_id(RecordId::parse("note/a").unwrap()),
        Record::with_id(RecordId::parse("note/b").unwrap()),
    ];
    let output = container
        .public_db()
        .save_batch(&records, &cirrus::SaveOptions { atomic: true })
        .await
        .unwrap();

    assert!(output.saved.iter().all(Option::is_none));
    assert_eq!(
        output.errors[0].as_ref().unwrap().code,
        ErrorCode::AtomicOperationFailure
    );
}

#[tokio::test]
async fn test_save_single_surfaces_item_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/record/save"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [
                {"$type": "error", "code": 102, "message": "no write permission"}
            ]
        })))
        .mount(&server)
        .await;

    let container = mock_container(&server);
    let note = Record::with_id(RecordId::parse("note/locked").unwrap());
    let err = container.public_db().save(&note).await.unwrap_err();
    assert!(err.is_code(ErrorCode::PermissionDenied));
}

// ============================================================================
// Record Delete Tests
// ============================================================================

#[tokio::test]
async fn test_delete_batch_pairing() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/record/delete"))
        .and(body_json(json!({
            "database_id": "_private",
            "ids": ["note/a", "note/b"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [
                {"$type": "record", "$id": "note/a"},
                {"$type": "error", "code": 110, "message": "record not found"}
            ]
        })))
        .mount(&server)
        .await;

    let container = mock_container(&server);
    let ids = vec![
        RecordId::parse("note/a").unwrap(),
        RecordId::parse("note/b").unwrap(),
    ];
    let errors = container
        .private_db()
        .delete_batch(&ids, &cirrus::SaveOptions::default())
        .await
        .unwrap();

    assert!(errors[0].is_none());
    assert_eq!(
        errors[1].as_ref().unwrap().code,
        ErrorCode::ResourceNotFound
    );
}

// ============================================================================
// Query and Fetch Tests
// ============================================================================

#[tokio::test]
async fn test_query_preserves_order_and_count() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/record/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [
                {"$type": "record", "$id": "note/second", "rank": 2},
                {"$type": "record", "$id": "note/first", "rank": 1}
            ],
            "info": {"count": 42}
        })))
        .mount(&server)
        .await;

    let container = mock_container(&server);
    let query = Query::new("note").unwrap().overall_count();
    let result = container.public_db().query(&query).await.unwrap();

    assert_eq!(result.len(), 2);
    assert_eq!(result.overall_count(), Some(42));
    // Server order is authoritative
    assert_eq!(result.get(0).unwrap().record_id().to_string(), "note/second");
    assert_eq!(result.get(1).unwrap().record_id().to_string(), "note/first");
}

#[tokio::test]
async fn test_query_without_count_has_none() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/record/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": []
        })))
        .mount(&server)
        .await;

    let container = mock_container(&server);
    let query = Query::new("note").unwrap();
    let result = container.public_db().query(&query).await.unwrap();

    assert!(result.is_empty());
    assert_eq!(result.overall_count(), None);
}

#[tokio::test]
async fn test_get_record_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/record/fetch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": null
        })))
        .mount(&server)
        .await;

    let container = mock_container(&server);
    let id = RecordId::parse("note/missing").unwrap();
    let err = container.public_db().get_record(&id).await.unwrap_err();
    assert!(err.is_code(ErrorCode::ResourceNotFound));
}

#[tokio::test]
async fn test_get_record_success() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/record/fetch"))
        .and(body_json(json!({
            "database_id": "_public",
            "id": "note/n1"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {"$type": "record", "$id": "note/n1", "title": "hello"}
        })))
        .mount(&server)
        .await;

    let container = mock_container(&server);
    let id = RecordId::parse("note/n1").unwrap();
    let record = container.public_db().get_record(&id).await.unwrap();
    assert_eq!(record.get("title"), Some(&Value::from("hello")));
}

// ============================================================================
// Lambda and Raw Action Tests
// ============================================================================

#[tokio::test]
async fn test_lambda_wraps_args() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hello/world"))
        .and(body_json(json!({"args": ["alice", 3]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": "hello alice x3"
        })))
        .mount(&server)
        .await;

    let container = mock_container(&server);
    let response = container
        .lambda("hello:world", json!(["alice", 3]))
        .await
        .unwrap();
    assert_eq!(response["result"], "hello alice x3");
}

#[tokio::test]
async fn test_make_request_passes_payload_through() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/schema/fetch"))
        .and(body_json(json!({"record_types": ["note"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {"note": {}}
        })))
        .mount(&server)
        .await;

    let container = mock_container(&server);
    let response = container
        .make_request("schema:fetch", json!({"record_types": ["note"]}))
        .await
        .unwrap();
    assert!(response["result"].is_object());
}

// ============================================================================
// Asset Tests
// ============================================================================

#[tokio::test]
async fn test_upload_asset() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/asset/put"))
        .and(body_json(json!({
            "name": "photo.png",
            "content_type": "image/png",
            "data": "aGVsbG8="
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {
                "$type": "asset",
                "$name": "uuid-photo.png",
                "$url": "https://cdn.example.com/uuid-photo.png",
                "$content_type": "image/png"
            }
        })))
        .mount(&server)
        .await;

    let container = mock_container(&server);
    let asset = cirrus::Asset::new("photo.png", Some("image/png".to_string()));
    let stored = container.upload_asset(&asset, b"hello").await.unwrap();

    assert_eq!(stored.name, "uuid-photo.png");
    assert_eq!(
        stored.url.as_deref(),
        Some("https://cdn.example.com/uuid-photo.png")
    );
}

// ============================================================================
// Error Handling Tests
// ============================================================================

#[tokio::test]
async fn test_non_json_error_response() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_string("Internal Server Error")
                .insert_header("content-type", "text/plain"),
        )
        .mount(&server)
        .await;

    let container = mock_container(&server);
    let err = container
        .auth()
        .login_with_username("alice", "secret")
        .await
        .unwrap_err();

    // Falls back to a generic server error carrying the HTTP status
    assert!(err.is_code(ErrorCode::UnexpectedError));
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn test_unknown_error_code_maps_to_unexpected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/record/query"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "status": 500,
            "error": {"code": 999, "message": "novel failure"}
        })))
        .mount(&server)
        .await;

    let container = mock_container(&server);
    let query = Query::new("note").unwrap();
    let err = container.public_db().query(&query).await.unwrap_err();

    assert!(err.is_code(ErrorCode::UnexpectedError));
    match err {
        cirrus::Error::Server(server_err) => {
            assert_eq!(server_err.raw_code, 999);
            assert_eq!(server_err.message, "novel failure");
        }
        other => panic!("expected server error, got {:?}", other),
    }
}
