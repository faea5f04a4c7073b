use async_trait::async_trait;
use chrono::Utc;
use iabp_session::{AnalysisKind, AnalysisResult, SessionParameters};
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::{
    config::AppConfig,
    credentials::Credential,
    error::AnalysisError,
    image_prep::PreparedImage,
    prompts::{ANALYSIS_MAX_TOKENS, EXTRACTION_MAX_TOKENS, analysis_prompt, extraction_prompt},
};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

static JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("Invalid regex"));

/// Values read off the monitor plus the raw model reply they came from.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub values: Map<String, Value>,
    pub raw: AnalysisResult,
}

/// Contract between the session controller and the hosted model.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn extract_parameters(
        &self,
        credential: &Credential,
        image: &PreparedImage,
    ) -> Result<Extraction, AnalysisError>;

    async fn analyze(
        &self,
        credential: &Credential,
        parameters: &SessionParameters,
    ) -> Result<AnalysisResult, AnalysisError>;
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock<'a> {
    Text { text: String },
    Image { source: ImageSource<'a> },
}

#[derive(Debug, Serialize)]
struct ImageSource<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    model: Option<String>,
    #[serde(default)]
    content: Vec<ResponseBlock>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<String>,
}

/// Anthropic Messages API client with a single retry on provider outages.
#[derive(Clone)]
pub struct AnthropicClient {
    http: Client,
    base_url: String,
    model: String,
    retry_delay: Duration,
}

impl AnthropicClient {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            retry_delay: RETRY_DELAY,
        })
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    async fn complete(
        &self,
        credential: &Credential,
        content: Vec<ContentBlock<'_>>,
        max_tokens: u32,
        kind: AnalysisKind,
    ) -> Result<AnalysisResult, AnalysisError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens,
            messages: vec![Message {
                role: "user",
                content,
            }],
        };

        let response = match self.send_once(credential, &request).await {
            Err(e) if e.is_transient() => {
                warn!("Transient provider failure, retrying once: {}", e);
                tokio::time::sleep(self.retry_delay).await;
                self.send_once(credential, &request).await
            }
            other => other,
        }?;

        let text = response
            .content
            .into_iter()
            .find_map(|block| match block {
                ResponseBlock::Text { text } => Some(text),
                ResponseBlock::Other => None,
            })
            .ok_or_else(|| AnalysisError::MalformedResponse("no text content".to_string()))?;

        let usage = response.usage;
        Ok(AnalysisResult {
            kind,
            text,
            model: response.model.unwrap_or_else(|| self.model.clone()),
            generated_at: Utc::now(),
            input_tokens: usage.as_ref().and_then(|u| u.input_tokens),
            output_tokens: usage.as_ref().and_then(|u| u.output_tokens),
        })
    }

    async fn send_once(
        &self,
        credential: &Credential,
        request: &MessagesRequest<'_>,
    ) -> Result<MessagesResponse, AnalysisError> {
        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &credential.value)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| AnalysisError::ProviderUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = classify_failure(status, &body);
            error!("Model API request failed with {}: {}", status, err);
            return Err(err);
        }

        response
            .json::<MessagesResponse>()
            .await
            .map_err(|e| AnalysisError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl AnalysisClient for AnthropicClient {
    async fn extract_parameters(
        &self,
        credential: &Credential,
        image: &PreparedImage,
    ) -> Result<Extraction, AnalysisError> {
        info!(
            "Requesting parameter extraction ({:.2} MB payload)",
            image.payload_mb()
        );

        let content = vec![
            ContentBlock::Image {
                source: ImageSource {
                    kind: "base64",
                    media_type: image.media_type,
                    data: &image.base64_data,
                },
            },
            ContentBlock::Text {
                text: extraction_prompt(),
            },
        ];

        let raw = self
            .complete(
                credential,
                content,
                EXTRACTION_MAX_TOKENS,
                AnalysisKind::ParameterExtraction,
            )
            .await?;
        let values = parse_extracted_json(&raw.text)?;

        Ok(Extraction { values, raw })
    }

    async fn analyze(
        &self,
        credential: &Credential,
        parameters: &SessionParameters,
    ) -> Result<AnalysisResult, AnalysisError> {
        info!("Requesting clinical analysis");

        let content = vec![ContentBlock::Text {
            text: analysis_prompt(parameters),
        }];

        self.complete(
            credential,
            content,
            ANALYSIS_MAX_TOKENS,
            AnalysisKind::ClinicalAnalysis,
        )
        .await
    }
}

/// Map a non-success provider response onto the user-facing taxonomy.
pub fn classify_failure(status: StatusCode, body: &str) -> AnalysisError {
    let detail = serde_json::from_str::<ErrorEnvelope>(body).ok().map(|e| e.error);
    let kind = detail
        .as_ref()
        .and_then(|d| d.kind.clone())
        .unwrap_or_default();
    let message = detail
        .and_then(|d| d.message)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

    let lowered = message.to_lowercase();
    let quota = lowered.contains("credit balance")
        || lowered.contains("billing")
        || lowered.contains("quota");

    match status.as_u16() {
        401 | 403 => AnalysisError::InvalidCredential(message),
        402 => AnalysisError::QuotaExceeded(message),
        400 if quota => AnalysisError::QuotaExceeded(message),
        429 => AnalysisError::ProviderRateLimited(message),
        500..=599 => AnalysisError::ProviderUnavailable(message),
        _ if kind == "overloaded_error" || kind == "api_error" => {
            AnalysisError::ProviderUnavailable(message)
        }
        _ => AnalysisError::InvalidRequest(message),
    }
}

/// Pull the JSON object out of a model reply, tolerating a ```json fence or surrounding prose.
pub fn parse_extracted_json(raw: &str) -> Result<Map<String, Value>, AnalysisError> {
    let candidate = match JSON_FENCE.captures(raw).and_then(|c| c.get(1)) {
        Some(fenced) => fenced.as_str(),
        None => match (raw.find('{'), raw.rfind('}')) {
            (Some(start), Some(end)) if start < end => &raw[start..=end],
            _ => raw,
        },
    };

    match serde_json::from_str::<Value>(candidate.trim()) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(AnalysisError::MalformedResponse(
            "expected a JSON object of parameters".to_string(),
        )),
        Err(e) => Err(AnalysisError::MalformedResponse(format!(
            "invalid parameter JSON: {}",
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialSource;
    use axum::{Json, Router, extract::State, http::HeaderMap, routing::post};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct FakeProvider {
        calls: Arc<AtomicUsize>,
        fail_first_with: Option<u16>,
    }

    async fn messages(
        State(provider): State<FakeProvider>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (axum::http::StatusCode, Json<Value>) {
        let call = provider.calls.fetch_add(1, Ordering::SeqCst);

        if headers.get("x-api-key").and_then(|v| v.to_str().ok()) != Some("sk-good") {
            return (
                axum::http::StatusCode::UNAUTHORIZED,
                Json(json!({
                    "type": "error",
                    "error": { "type": "authentication_error", "message": "invalid x-api-key" }
                })),
            );
        }
        if let (0, Some(code)) = (call, provider.fail_first_with) {
            return (
                axum::http::StatusCode::from_u16(code).unwrap(),
                Json(json!({
                    "type": "error",
                    "error": { "type": "overloaded_error", "message": "Overloaded" }
                })),
            );
        }

        let has_image = body["messages"][0]["content"]
            .as_array()
            .map(|blocks| blocks.iter().any(|b| b["type"] == "image"))
            .unwrap_or(false);
        let text = if has_image {
            "```json\n{\"heartRate\": \"84\", \"systolic\": \"\"}\n```"
        } else {
            "Augmentation is effective."
        };

        (
            axum::http::StatusCode::OK,
            Json(json!({
                "model": body["model"],
                "content": [{ "type": "text", "text": text }],
                "usage": { "input_tokens": 120, "output_tokens": 40 }
            })),
        )
    }

    async fn spawn_provider(fail_first_with: Option<u16>) -> (AnthropicClient, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/v1/messages", post(messages))
            .with_state(FakeProvider {
                calls: calls.clone(),
                fail_first_with,
            });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = AppConfig {
            base_url: format!("http://{}", addr),
            ..AppConfig::default()
        };
        let client = AnthropicClient::new(&config)
            .unwrap()
            .with_retry_delay(Duration::from_millis(10));
        (client, calls)
    }

    fn credential(value: &str) -> Credential {
        Credential {
            value: value.to_string(),
            source: CredentialSource::User,
        }
    }

    #[tokio::test]
    async fn test_analyze_returns_text_and_usage() {
        let (client, calls) = spawn_provider(None).await;

        let result = client
            .analyze(&credential("sk-good"), &SessionParameters::default())
            .await
            .unwrap();

        assert_eq!(result.text, "Augmentation is effective.");
        assert_eq!(result.kind, AnalysisKind::ClinicalAnalysis);
        assert_eq!(result.model, crate::config::DEFAULT_MODEL);
        assert_eq!(result.input_tokens, Some(120));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_extract_parses_fenced_json() {
        let (client, _calls) = spawn_provider(None).await;
        let png = crate::image_prep::tests::png_bytes(32, 32);
        let image = crate::image_prep::prepare_for_model(&png).unwrap();

        let extraction = client
            .extract_parameters(&credential("sk-good"), &image)
            .await
            .unwrap();

        assert_eq!(extraction.values["heartRate"], "84");
        assert_eq!(extraction.raw.kind, AnalysisKind::ParameterExtraction);
    }

    #[tokio::test]
    async fn test_invalid_key_is_not_retried() {
        let (client, calls) = spawn_provider(None).await;

        let err = client
            .analyze(&credential("sk-bad"), &SessionParameters::default())
            .await
            .unwrap_err();

        assert!(matches!(err, AnalysisError::InvalidCredential(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_overloaded_provider_is_retried_once() {
        let (client, calls) = spawn_provider(Some(529)).await;

        let result = client
            .analyze(&credential("sk-good"), &SessionParameters::default())
            .await
            .unwrap();

        assert_eq!(result.text, "Augmentation is effective.");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_unavailable() {
        let config = AppConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            ..AppConfig::default()
        };
        let client = AnthropicClient::new(&config)
            .unwrap()
            .with_retry_delay(Duration::from_millis(1));

        let err = client
            .analyze(&credential("sk-good"), &SessionParameters::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::ProviderUnavailable(_)));
    }

    #[test]
    fn test_classify_failure() {
        let credit = r#"{"type":"error","error":{"type":"invalid_request_error","message":"Your credit balance is too low to access the Anthropic API."}}"#;
        assert!(matches!(
            classify_failure(StatusCode::BAD_REQUEST, credit),
            AnalysisError::QuotaExceeded(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::BAD_REQUEST, r#"{"error":{"message":"image too big"}}"#),
            AnalysisError::InvalidRequest(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, ""),
            AnalysisError::ProviderRateLimited(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::from_u16(529).unwrap(), "<html>"),
            AnalysisError::ProviderUnavailable(_)
        ));
    }

    #[test]
    fn test_parse_extracted_json_variants() {
        let plain = parse_extracted_json(r#"{"map": "72"}"#).unwrap();
        assert_eq!(plain["map"], "72");

        let prose = parse_extracted_json("Here you go: {\"pdap\": 130} Hope this helps").unwrap();
        assert_eq!(prose["pdap"], 130);

        let fenced = parse_extracted_json("```json\n{\"timing\": \"early\"}\n```").unwrap();
        assert_eq!(fenced["timing"], "early");

        assert!(matches!(
            parse_extracted_json("[1, 2]"),
            Err(AnalysisError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_extracted_json("I could not read the monitor."),
            Err(AnalysisError::MalformedResponse(_))
        ));
    }

    /// Live call against the real provider.
    /// Usage: ANTHROPIC_API_KEY=key cargo test test_live_analysis
    #[tokio::test]
    async fn test_live_analysis() -> anyhow::Result<()> {
        let Ok(key) = std::env::var("ANTHROPIC_API_KEY") else {
            println!("Skipping test - set ANTHROPIC_API_KEY environment variable");
            return Ok(());
        };

        let client = AnthropicClient::new(&AppConfig::default())?;
        let mut params = SessionParameters::default();
        params.heart_rate = "90".to_string();
        params.systolic = "105".to_string();
        params.pdap = "120".to_string();

        match client.analyze(&credential(&key), &params).await {
            Ok(result) => {
                println!("Analysis ({} characters)", result.text.len());
                assert!(!result.text.trim().is_empty());
            }
            Err(e) => println!("Live analysis failed: {}", e),
        }
        Ok(())
    }
}
