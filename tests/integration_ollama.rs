#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// Pipeline wired to HTTP embedding and completion servers, mocked with wiremock

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use docs_rag::RagError;
use docs_rag::config::{CompletionConfig, Config};
use docs_rag::pipeline::{AskRequest, RagPipeline};
use docs_rag::store::StorageBackend;
use docs_rag::synthesis::ChatCompletionClient;
use serde_json::{Value, json};
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const DIMENSION: u32 = 64;

/// Answers `/api/embed` with bag-of-words vectors for every input
struct EmbedResponder;

impl Respond for EmbedResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Ok(body) = serde_json::from_slice::<Value>(&request.body) else {
            return ResponseTemplate::new(400);
        };
        let embeddings: Vec<Vec<f32>> = body["input"]
            .as_array()
            .map(|inputs| {
                inputs
                    .iter()
                    .map(|input| bag_of_words(input.as_str().unwrap_or_default()))
                    .collect()
            })
            .unwrap_or_default();
        ResponseTemplate::new(200).set_body_json(json!({ "embeddings": embeddings }))
    }
}

fn bag_of_words(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0; DIMENSION as usize];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 3)
    {
        let mut hasher = DefaultHasher::new();
        word.to_lowercase().hash(&mut hasher);
        vector[(hasher.finish() % u64::from(DIMENSION)) as usize] += 1.0;
    }
    vector
}

async fn mock_embedding_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(EmbedResponder)
        .mount(&server)
        .await;
    server
}

fn test_config(server: &MockServer) -> (Config, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let url = Url::parse(&server.uri()).expect("mock server url");

    let mut config = Config::with_base_dir(temp_dir.path());
    config.ollama.host = url.host_str().expect("host").to_string();
    config.ollama.port = url.port().expect("port");
    config.ollama.model = "test-embed".to_string();
    config.ollama.batch_size = 4;
    config.ollama.embedding_dimension = DIMENSION;
    config.ollama.timeout_secs = 5;
    config.storage.backend = StorageBackend::Memory;
    config.chunking.max_size = 150;
    config.chunking.overlap = 30;
    (config, temp_dir)
}

const POLICY: &str = "Refunds are issued within thirty days of purchase when the receipt is shown.\n\n\
Store credit is offered for items returned after thirty days.\n\n\
Gift cards cannot be refunded or exchanged for cash under any circumstances.\n\n\
Damaged items may be returned at any time with proof of the defect.";

#[tokio::test]
async fn pipeline_from_config_ingests_through_ollama() {
    let server = mock_embedding_server().await;
    let (config, _temp_dir) = test_config(&server);
    let pipeline = RagPipeline::from_config(&config)
        .await
        .expect("should build pipeline");

    let count = pipeline
        .ingest_bytes("policy", "policy.txt", POLICY.as_bytes())
        .await
        .expect("should ingest");
    assert!(count > 1);

    let mut request = AskRequest::new("Can gift cards be refunded for cash?");
    request.k = Some(1);
    request.window = Some(0);
    let prompt = pipeline.ask(&request).await.expect("should assemble");

    assert_eq!(prompt.hits.len(), 1);
    assert!(prompt.prompt.contains("Gift cards cannot be refunded"));
}

#[tokio::test]
async fn answer_goes_through_chat_completion() {
    let server = mock_embedding_server().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": { "role": "assistant", "content": "  Refunds take up to thirty days.  " }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (config, _temp_dir) = test_config(&server);
    let pipeline = RagPipeline::from_config(&config)
        .await
        .expect("should build pipeline");
    pipeline
        .ingest("policy", "policy.txt", POLICY)
        .await
        .expect("should ingest");

    let completion = CompletionConfig {
        base_url: format!("{}/v1", server.uri()),
        model: "test-llm".to_string(),
        timeout_secs: 5,
        ..CompletionConfig::default()
    };
    let synthesizer = ChatCompletionClient::with_api_key(&completion, "test-key".to_string())
        .expect("client should build");

    let answer = pipeline
        .answer(&AskRequest::new("How long do refunds take?"), &synthesizer)
        .await
        .expect("should answer");

    assert_eq!(answer.text, "Refunds take up to thirty days.");
    assert_eq!(answer.prompt.sources[0].filename, "policy.txt");
}

#[tokio::test]
async fn empty_collection_never_calls_completion() {
    let server = mock_embedding_server().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (config, _temp_dir) = test_config(&server);
    let pipeline = RagPipeline::from_config(&config)
        .await
        .expect("should build pipeline");
    let completion = CompletionConfig {
        base_url: format!("{}/v1", server.uri()),
        ..CompletionConfig::default()
    };
    let synthesizer = ChatCompletionClient::with_api_key(&completion, "test-key".to_string())
        .expect("client should build");

    let result = pipeline
        .answer(&AskRequest::new("anything"), &synthesizer)
        .await;

    assert!(matches!(result, Err(RagError::EmptyContext)));
}

#[tokio::test]
async fn unavailable_embedding_server_leaves_store_empty() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (config, _temp_dir) = test_config(&server);
    let pipeline = RagPipeline::from_config(&config)
        .await
        .expect("should build pipeline")
        .with_embed_timeout(Duration::from_secs(30));

    let error = pipeline
        .ingest("policy", "policy.txt", POLICY)
        .await
        .expect_err("embedding fails");

    assert!(error.is_retryable());
    assert!(pipeline.list_documents().await.expect("list").is_empty());
}
