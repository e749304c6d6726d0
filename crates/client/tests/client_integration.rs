//! End-to-end tests for the client facade
//!
//! Each test builds a [`Client`] against a wiremock server and checks what a
//! caller observes: classified errors, timeouts versus cancellation, and the
//! interceptor pipeline around the whole stack.

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use vecta_client::{
    CallOptions, Client, ClientConfig, ClientError, Credential, Interceptor, OperationKind,
    ResourceType, WireRequest, WireResponse, WireStatus,
};
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> ClientConfig {
    let mut config = ClientConfig::new(server.uri());
    config.retry.max_retries = 1;
    config.retry.initial_delay = Duration::from_millis(5);
    config.retry.max_delay = Duration::from_millis(20);
    config
}

async fn client_for(server: &MockServer) -> Client {
    Client::builder(config_for(server))
        .credential(Credential::api_key("secret-key"))
        .with_tracing()
        .build()
        .await
        .unwrap()
}

async fn respond(server: &MockServer, status: u16, body: Value) {
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(server)
        .await;
}

/// Validates the NotFound classification with the resource hint.
#[tokio::test(flavor = "multi_thread")]
async fn test_missing_collection_is_not_found() {
    let server = MockServer::start().await;
    respond(&server, 404, json!({"error": [{"message": "class Article not found"}]})).await;
    let client = client_for(&server).await;

    let result = client
        .execute(
            WireRequest::get("/v1/schema/Article").with_resource(ResourceType::Collection),
            CallOptions::new(),
        )
        .await;

    match result {
        Err(ClientError::NotFound { resource, failure }) => {
            assert_eq!(resource, ResourceType::Collection);
            assert_eq!(failure.message, "class Article not found");
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
}

/// Validates message-based classification of 422 and 500 responses.
#[tokio::test(flavor = "multi_thread")]
async fn test_known_server_messages_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/schema"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "error": [{"message": "maximum number of collections (100) reached"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/objects"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": [{"message": "update vector: could not vectorize input"}]
        })))
        .expect(2)
        .mount(&server)
        .await;
    let client = client_for(&server).await;

    let limit = client
        .execute(WireRequest::post("/v1/schema", json!({"class": "A"})), CallOptions::new())
        .await;
    assert!(matches!(limit, Err(ClientError::CollectionLimitReached(_))), "{limit:?}");

    // 500 is transient, so it is retried once before classification
    let vectorize = client
        .execute(WireRequest::post("/v1/objects", json!({"class": "A"})), CallOptions::new())
        .await;
    assert!(matches!(vectorize, Err(ClientError::ExternalModuleProblem(_))), "{vectorize:?}");
}

/// Validates that an unmapped status is wrapped as a server error.
#[tokio::test(flavor = "multi_thread")]
async fn test_unmapped_status_is_server_error() {
    let server = MockServer::start().await;
    respond(&server, 418, json!({"message": "teapot"})).await;
    let client = client_for(&server).await;

    let result = client.execute(WireRequest::get("/v1/meta"), CallOptions::new()).await;

    match result {
        Err(ClientError::Server(failure)) => {
            assert_eq!(failure.status, WireStatus::Http(418));
            assert_eq!(failure.message, "teapot");
        }
        other => panic!("expected Server, got {other:?}"),
    }
}

/// Validates that an elapsed timeout is reported as Timeout with the
/// operation label.
#[tokio::test(flavor = "multi_thread")]
async fn test_slow_call_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;
    let client = client_for(&server).await;

    let result = client
        .execute(
            WireRequest::get("/v1/graphql").with_operation("near_text"),
            CallOptions::new().timeout(Duration::from_millis(100)),
        )
        .await;

    match result {
        Err(ClientError::Timeout { duration, operation }) => {
            assert_eq!(duration, Duration::from_millis(100));
            assert_eq!(operation, "near_text");
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
}

/// Validates that caller cancellation without a timeout is not reported as
/// a timeout.
#[tokio::test(flavor = "multi_thread")]
async fn test_caller_cancellation_is_not_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;
    let client = client_for(&server).await;
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let result = client
        .execute(
            WireRequest::get("/v1/meta"),
            CallOptions::new().without_timeout().cancellation(cancel),
        )
        .await;

    assert!(matches!(result, Err(ClientError::Cancelled)), "{result:?}");
}

/// Validates the configured per-kind timeout is applied.
#[tokio::test(flavor = "multi_thread")]
async fn test_operation_kind_timeout_from_config() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;
    let mut config = config_for(&server);
    config.timeouts.query = Some(Duration::from_millis(80));
    let client = Client::builder(config)
        .credential(Credential::api_key("k"))
        .build()
        .await
        .unwrap();

    let result = client
        .execute(WireRequest::get("/v1/graphql"), CallOptions::new().kind(OperationKind::Query))
        .await;

    assert!(
        matches!(result, Err(ClientError::Timeout { duration, .. }) if duration == Duration::from_millis(80))
    );
}

type Journal = Arc<Mutex<Vec<String>>>;

struct Recorder {
    name: &'static str,
    journal: Journal,
}

#[async_trait]
impl Interceptor for Recorder {
    async fn before_send(&self, request: &mut WireRequest) -> Result<(), ClientError> {
        self.journal.lock().push(format!("before:{}", self.name));
        request.set_header(format!("x-seen-{}", self.name), "1");
        Ok(())
    }

    async fn after_receive(
        &self,
        _request: &WireRequest,
        response: &mut WireResponse,
    ) -> Result<(), ClientError> {
        self.journal.lock().push(format!("after:{}:{}", self.name, response.status));
        Ok(())
    }

    async fn on_error(&self, _request: &WireRequest, error: &ClientError) {
        self.journal.lock().push(format!("error:{}:{}", self.name, error.is_timeout()));
    }
}

/// Validates interceptor ordering around a real call, and that the default
/// headers and credentials reach the server.
#[tokio::test(flavor = "multi_thread")]
async fn test_interceptors_wrap_the_stack() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/meta"))
        .and(header("authorization", "Bearer secret-key"))
        .and(header("x-seen-a", "1"))
        .and(header("x-seen-b", "1"))
        .and(header_exists("x-client-version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"version": "1.25.0"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let journal = Journal::default();
    let client = Client::builder(config_for(&server))
        .credential(Credential::api_key("secret-key"))
        .interceptor(Arc::new(Recorder { name: "a", journal: journal.clone() }))
        .interceptor(Arc::new(Recorder { name: "b", journal: journal.clone() }))
        .build()
        .await
        .unwrap();

    let meta: Value =
        client.get_json("/v1/meta", ResourceType::Unknown, CallOptions::new()).await.unwrap();
    assert_eq!(meta["version"], "1.25.0");
    assert_eq!(
        *journal.lock(),
        ["before:a", "before:b", "after:b:HTTP 200", "after:a:HTTP 200"]
    );

    journal.lock().clear();
    let missing = client.execute(WireRequest::get("/v1/missing"), CallOptions::new()).await;
    assert!(matches!(missing, Err(ClientError::NotFound { .. })));
    assert_eq!(*journal.lock(), ["before:a", "before:b", "error:a:false", "error:b:false"]);
}

/// Validates a client built from a TOML file with proactive refresh that
/// shuts down cleanly.
#[tokio::test(flavor = "multi_thread")]
async fn test_client_from_config_file() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    respond(&server, 200, json!({"ok": true})).await;

    let mut file = tempfile::NamedTempFile::new()?;
    write!(
        file,
        r#"
        base_url = "{}"

        [retry]
        max_retries = 0

        [auth]
        proactive_refresh = true
        proactive_interval = 60000
        "#,
        server.uri()
    )?;

    let config = ClientConfig::load(file.path())?;
    assert_eq!(config.retry.max_retries, 0);

    let client = Client::builder(config).credential(Credential::api_key("k")).build().await?;

    assert!(client.is_authenticated().await);
    let body: Value =
        client.get_json("/v1/meta", ResourceType::Unknown, CallOptions::new()).await?;
    assert_eq!(body["ok"], true);

    client.shutdown().await;
    Ok(())
}
