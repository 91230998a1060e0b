use super::*;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(server: &MockServer, dimension: u32) -> OllamaConfig {
    let url = Url::parse(&server.uri()).expect("mock server url");
    OllamaConfig {
        protocol: "http".to_string(),
        host: url.host_str().expect("host").to_string(),
        port: url.port().expect("port"),
        model: "test-model".to_string(),
        batch_size: 2,
        embedding_dimension: dimension,
        timeout_secs: 5,
    }
}

fn test_client(server: &MockServer, dimension: u32) -> OllamaClient {
    OllamaClient::new(&test_config(server, dimension))
        .expect("Failed to create client")
        .with_backoff(Duration::from_millis(5))
}

#[test]
fn client_configuration() {
    let config = OllamaConfig {
        protocol: "http".to_string(),
        host: "test-host".to_string(),
        port: 1234,
        model: "test-model".to_string(),
        batch_size: 128,
        embedding_dimension: 384,
        timeout_secs: 10,
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");

    assert_eq!(client.model(), "test-model");
    assert_eq!(client.batch_size, 128);
    assert_eq!(client.embedding_dimension, 384);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.http.timeout(), Duration::from_secs(10));
}

#[test]
fn client_builder_methods() {
    let client = OllamaClient::new(&OllamaConfig::default())
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(5);

    assert_eq!(client.http.retry_attempts(), 5);
    assert_eq!(client.http.timeout(), Duration::from_secs(60));
}

#[tokio::test]
async fn embed_returns_single_vector() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(
            json!({ "model": "test-model", "input": ["hello"] }),
        ))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [[0.1, 0.2, 0.3]] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let vector = test_client(&server, 3)
        .embed("hello")
        .await
        .expect("should embed");

    assert_eq!(vector, vec![0.1, 0.2, 0.3]);
}

#[tokio::test]
async fn embed_batch_splits_by_batch_size() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({ "input": ["a", "b"] })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "embeddings": [[1.0, 0.0], [0.0, 1.0]] })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({ "input": ["c"] })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [[0.5, 0.5]] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let vectors = test_client(&server, 2)
        .embed_batch(&texts)
        .await
        .expect("should embed batch");

    assert_eq!(
        vectors,
        vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.5, 0.5]]
    );
}

#[tokio::test]
async fn empty_batch_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let vectors = test_client(&server, 2)
        .embed_batch(&[])
        .await
        .expect("empty batch");
    assert!(vectors.is_empty());
}

#[tokio::test]
async fn wrong_dimension_is_a_gateway_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [[0.1, 0.2]] })),
        )
        .mount(&server)
        .await;

    let result = test_client(&server, 768).embed("text").await;
    assert!(matches!(result, Err(RagError::Gateway(_))));
}

#[tokio::test]
async fn count_mismatch_is_a_gateway_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [] })))
        .mount(&server)
        .await;

    let result = test_client(&server, 2).embed("text").await;
    assert!(matches!(result, Err(RagError::Gateway(_))));
}

#[tokio::test]
async fn unreachable_server_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let result = test_client(&server, 2)
        .with_retry_attempts(2)
        .embed("text")
        .await;

    let error = result.expect_err("server errors propagate");
    assert!(error.is_retryable());
}

#[tokio::test]
async fn health_check_requires_configured_model() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [
                { "name": "other-model", "size": 1024, "digest": "abc" }
            ]
        })))
        .mount(&server)
        .await;

    let client = test_client(&server, 2);
    let models = tokio::task::spawn_blocking(move || {
        let models = client.list_models();
        let health = client.health_check();
        (models, health)
    })
    .await
    .expect("blocking task");

    let (models, health) = models;
    let models = models.expect("should list models");
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].name, "other-model");
    assert!(matches!(health, Err(RagError::Gateway(_))));
}
