use crate::error::AnalysisError;
use crate::request::AnalysisRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";

/// Anything that can answer an `AnalysisRequest` with raw response text.
///
/// `Ok(None)` means the provider answered without any text.
#[async_trait]
pub trait VisionClient: Send + Sync {
    async fn generate_content(&self, request: &AnalysisRequest)
        -> Result<Option<String>, AnalysisError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig<'a>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData<'a>,
    },
    Text {
        text: &'a str,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_mime_type: &'a str,
    response_schema: &'a Value,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

fn request_body(request: &AnalysisRequest) -> GenerateContentRequest<'_> {
    GenerateContentRequest {
        contents: vec![Content {
            parts: vec![
                Part::InlineData {
                    inline_data: InlineData {
                        mime_type: &request.mime_type,
                        data: &request.image_base64,
                    },
                },
                Part::Text {
                    text: &request.prompt,
                },
            ],
        }],
        generation_config: GenerationConfig {
            response_mime_type: "application/json",
            response_schema: &request.response_schema,
        },
    }
}

fn response_text(response: GenerateContentResponse) -> Option<String> {
    let parts = response.candidates.into_iter().next()?.content?.parts;
    let text: String = parts.into_iter().filter_map(|p| p.text).collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Pulls `error.message` out of a provider error body, if it has one.
fn provider_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .pointer("/error/message")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(ToString::to_string)
}

/// HTTP client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
}

impl GeminiClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    fn url_for(&self, model_id: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.endpoint, model_id)
    }
}

impl Default for GeminiClient {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

#[async_trait]
impl VisionClient for GeminiClient {
    async fn generate_content(
        &self,
        request: &AnalysisRequest,
    ) -> Result<Option<String>, AnalysisError> {
        let model_id = request.model.model_id();
        info!(model = model_id, mime = %request.mime_type, "sending analysis request");
        debug!(image_base64_len = request.image_base64.len(), "request payload");

        let response = self
            .http
            .post(self.url_for(model_id))
            .query(&[("key", request.api_key.as_str())])
            .json(&request_body(request))
            .send()
            .await
            .map_err(|e| {
                let err = AnalysisError::from(e);
                error!(error = %err, "vision request failed");
                err
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, body = %body, "vision request rejected");
            let message = provider_error_message(&body)
                .unwrap_or_else(|| format!("Gemini API error ({status})"));
            return Err(AnalysisError::Transport(message));
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(|e| {
            let e = e.without_url();
            error!(error = %e, "unreadable generateContent envelope");
            AnalysisError::MalformedResponse(format!("unreadable response envelope: {e}"))
        })?;
        Ok(response_text(parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelKind;
    use crate::parse::parse_response;
    use crate::request::build_request;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    #[test]
    fn body_puts_image_before_prompt_and_sets_schema() {
        let req = build_request("k", ModelKind::Flash, "data:image/png;base64,QUJD", "花").unwrap();
        let body = serde_json::to_value(request_body(&req)).unwrap();

        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["mimeType"], json!("image/png"));
        assert_eq!(parts[0]["inlineData"]["data"], json!("QUJD"));
        assert!(parts[1]["text"].as_str().unwrap().contains("「花」"));
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            json!("application/json")
        );
        assert_eq!(body["generationConfig"]["responseSchema"], req.response_schema);
        assert!(body.get("key").is_none());
    }

    #[test]
    fn text_parts_are_joined() {
        let raw = json!({
            "candidates": [{
                "content": {"parts": [{"text": "{\"objects\":"}, {"text": "[]}"}]}
            }]
        });
        let parsed: GenerateContentResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(response_text(parsed).as_deref(), Some("{\"objects\":[]}"));
    }

    #[test]
    fn missing_candidates_is_no_text() {
        let parsed: GenerateContentResponse =
            serde_json::from_value(json!({"promptFeedback": {"blockReason": "SAFETY"}})).unwrap();
        assert_eq!(response_text(parsed), None);

        let parsed: GenerateContentResponse =
            serde_json::from_value(json!({"candidates": [{"finishReason": "SAFETY"}]})).unwrap();
        assert_eq!(response_text(parsed), None);
    }

    #[test]
    fn provider_error_message_is_extracted() {
        let body = r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key.","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(
            provider_error_message(body).as_deref(),
            Some("API key not valid. Please pass a valid API key.")
        );
        assert_eq!(provider_error_message("<html>bad gateway</html>"), None);
    }

    /// Answers a single HTTP request with a canned response and hands back
    /// the raw request it received.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (GeminiClient, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            request
        });

        let mut client = GeminiClient::new(format!("http://{addr}/"));
        client.http = reqwest::Client::builder().no_proxy().build().unwrap();
        (client, handle)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + len {
                break;
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn sample_request() -> AnalysisRequest {
        build_request("secret", ModelKind::Flash, "data:image/jpeg;base64,QUJD", "花").unwrap()
    }

    #[tokio::test]
    async fn sends_key_as_query_and_returns_text() {
        let (client, server) = serve_once(
            "200 OK",
            r#"{"candidates":[{"content":{"parts":[{"text":"{\"objects\":[]}"}]}}]}"#,
        )
        .await;
        let text = client.generate_content(&sample_request()).await.unwrap();
        assert_eq!(text.as_deref(), Some(r#"{"objects":[]}"#));

        let raw = server.await.unwrap();
        let request_line = raw.lines().next().unwrap();
        assert_eq!(
            request_line,
            "POST /v1beta/models/gemini-2.5-flash:generateContent?key=secret HTTP/1.1"
        );
        let body = &raw[raw.find("\r\n\r\n").unwrap() + 4..];
        let body: Value = serde_json::from_str(body).unwrap();
        assert_eq!(body["contents"][0]["parts"][0]["inlineData"]["data"], json!("QUJD"));
        assert!(!body.to_string().contains("secret"));
    }

    #[tokio::test]
    async fn rejected_request_carries_provider_message() {
        let (client, _server) = serve_once(
            "400 Bad Request",
            r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#,
        )
        .await;
        let err = client.generate_content(&sample_request()).await.unwrap_err();
        assert!(matches!(&err, AnalysisError::Transport(m) if m == "API key not valid."));
        assert_eq!(err.user_message(), "API key not valid.");
    }

    #[tokio::test]
    async fn rejected_request_without_message_reports_status() {
        let (client, _server) = serve_once("503 Service Unavailable", "<html>busy</html>").await;
        let err = client.generate_content(&sample_request()).await.unwrap_err();
        assert!(
            matches!(&err, AnalysisError::Transport(m) if m == "Gemini API error (503 Service Unavailable)"),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn unreadable_envelope_is_malformed() {
        let (client, _server) = serve_once("200 OK", "not json at all").await;
        let err = client.generate_content(&sample_request()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedResponse(_)), "{err:?}");
    }

    #[tokio::test]
    async fn no_candidates_becomes_empty_response() {
        let (client, _server) =
            serve_once("200 OK", r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).await;
        let text = client.generate_content(&sample_request()).await.unwrap();
        assert_eq!(text, None);
        assert!(matches!(
            parse_response(text.as_deref()),
            Err(AnalysisError::EmptyResponse)
        ));
    }

    #[test]
    fn url_uses_model_id() {
        let client = GeminiClient::new("http://localhost:8080/");
        assert_eq!(
            client.url_for("gemini-2.5-flash"),
            "http://localhost:8080/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }
}
