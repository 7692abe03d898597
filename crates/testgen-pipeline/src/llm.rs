use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use testgen_core::PipelineError;

/// A message in a model conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

impl LlmMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Request to the model service.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system_prompt: String,
    pub messages: Vec<LlmMessage>,
    pub max_tokens: u32,
    /// Ask the service to constrain its reply to a JSON object.
    pub json_output: bool,
}

/// Raw reply from the model service.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
}

/// Facade trait for model providers.
///
/// Implementations call an OpenAI-compatible endpoint or return canned
/// replies for testing. Every failure surfaces as `PipelineError::Generation`.
pub trait LlmClient: Send + Sync {
    fn chat<'a>(
        &'a self,
        request: &'a LlmRequest,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse, PipelineError>> + Send + 'a>>;
}

pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleClient {
    pub fn new(base_url: String, model: String, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
        }
    }

    fn request_body(&self, request: &LlmRequest) -> serde_json::Value {
        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": request.system_prompt,
        })];

        for msg in &request.messages {
            messages.push(serde_json::json!({
                "role": msg.role,
                "content": msg.content,
            }));
        }

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
        });
        if request.json_output {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }
        body
    }
}

impl LlmClient for OpenAiCompatibleClient {
    fn chat<'a>(
        &'a self,
        request: &'a LlmRequest,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse, PipelineError>> + Send + 'a>> {
        Box::pin(async move {
            let body = self.request_body(request);
            let url = format!("{}/chat/completions", self.base_url);
            let mut req = self.http.post(&url).json(&body);

            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }

            let resp = req.send().await.map_err(|e| {
                PipelineError::Generation(format!("model request failed: {e}"))
            })?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(PipelineError::Generation(format!(
                    "model API returned {status}: {body}"
                )));
            }

            let json: serde_json::Value = resp.json().await.map_err(|e| {
                PipelineError::Generation(format!("failed to parse model response: {e}"))
            })?;

            let content = json["choices"][0]["message"]["content"]
                .as_str()
                .ok_or_else(|| {
                    PipelineError::Generation(format!(
                        "no content in model response: {}",
                        serde_json::to_string(&json).unwrap_or_default()
                    ))
                })?
                .to_string();

            Ok(LlmResponse { content })
        })
    }
}

/// Stub client that returns deterministic replies and records every request.
pub struct StubLlmClient {
    responses: Vec<Result<String, String>>,
    call_count: AtomicUsize,
    requests: Mutex<Vec<LlmRequest>>,
}

impl StubLlmClient {
    pub fn new(responses: Vec<String>) -> Self {
        Self::scripted(responses.into_iter().map(Ok).collect())
    }

    /// Replies in order, cycling; `Err` entries fail with a generation error.
    pub fn scripted(responses: Vec<Result<String, String>>) -> Self {
        Self {
            responses,
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a stub that always returns the given response.
    pub fn constant(response: &str) -> Self {
        Self::new(vec![response.to_string()])
    }

    /// Create a stub whose every call fails.
    pub fn failing(message: &str) -> Self {
        Self::scripted(vec![Err(message.to_string())])
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl LlmClient for StubLlmClient {
    fn chat<'a>(
        &'a self,
        request: &'a LlmRequest,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse, PipelineError>> + Send + 'a>> {
        Box::pin(async move {
            let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(request.clone());
            }
            let response = if self.responses.is_empty() {
                Ok("stub response".to_string())
            } else {
                self.responses[idx % self.responses.len()].clone()
            };
            response
                .map(|content| LlmResponse { content })
                .map_err(PipelineError::Generation)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> LlmRequest {
        LlmRequest {
            system_prompt: "test".into(),
            messages: vec![],
            max_tokens: 100,
            json_output: false,
        }
    }

    #[tokio::test]
    async fn stub_returns_constant_response() {
        let client = StubLlmClient::constant("hello");
        let response = client.chat(&request()).await.unwrap();
        assert_eq!(response.content, "hello");
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn stub_cycles_through_responses() {
        let client = StubLlmClient::new(vec!["first".into(), "second".into()]);

        let r1 = client.chat(&request()).await.unwrap();
        assert_eq!(r1.content, "first");

        let r2 = client.chat(&request()).await.unwrap();
        assert_eq!(r2.content, "second");

        let r3 = client.chat(&request()).await.unwrap();
        assert_eq!(r3.content, "first");
        assert_eq!(client.requests().len(), 3);
    }

    #[tokio::test]
    async fn failing_stub_reports_generation_error() {
        let client = StubLlmClient::failing("model offline");
        let err = client.chat(&request()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Generation(ref m) if m == "model offline"));
    }

    #[test]
    fn openai_body_requests_json_when_asked() {
        let client = OpenAiCompatibleClient::new(
            "http://localhost:9999/v1/".into(),
            "test-model".into(),
            None,
        );
        let mut req = LlmRequest {
            system_prompt: "You are helpful.".into(),
            messages: vec![LlmMessage::user("Hello")],
            max_tokens: 100,
            json_output: true,
        };
        let body = client.request_body(&req);
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Hello");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(client.base_url, "http://localhost:9999/v1");

        req.json_output = false;
        assert!(client.request_body(&req).get("response_format").is_none());
    }

    #[tokio::test]
    async fn openai_client_unreachable_is_generation_error() {
        let client = OpenAiCompatibleClient::new(
            "http://127.0.0.1:9/v1".into(),
            "test-model".into(),
            None,
        );
        let result = client.chat(&request()).await;
        assert!(matches!(result, Err(PipelineError::Generation(_))));
    }

    #[tokio::test]
    #[ignore] // Requires an OpenAI-compatible server on localhost:8000
    async fn openai_client_calls_real_server() {
        let client = OpenAiCompatibleClient::new(
            "http://localhost:8000/v1".into(),
            "local-model".into(),
            None,
        );
        let request = LlmRequest {
            system_prompt: "Reply with exactly: PONG".into(),
            messages: vec![LlmMessage::user("PING")],
            max_tokens: 10,
            json_output: false,
        };
        let response = client.chat(&request).await.unwrap();
        assert!(!response.content.is_empty());
    }
}
