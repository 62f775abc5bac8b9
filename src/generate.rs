use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::backoff::LinearBackoff;
use crate::config::GenerateConfig;

/// Provider bodies shorter than this are surfaced verbatim when no message field exists
const RAW_MESSAGE_LIMIT: usize = 500;

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("Prompt is required")]
    EmptyPrompt,
    #[error("{0} not configured")]
    MissingApiKey(String),
    #[error("Provider failed after {attempts} attempts: {message}")]
    Unreachable { attempts: u32, message: String },
    #[error("Provider returned unreadable response after {attempts} attempts")]
    Unreadable { attempts: u32 },
    #[error("{message}")]
    Provider { status: u16, message: String },
    #[error("Invalid response from provider")]
    InvalidResponse,
}

impl GenerateError {
    /// HTTP status the boundary should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            Self::EmptyPrompt => 400,
            Self::MissingApiKey(_) => 500,
            Self::Unreachable { .. } | Self::Unreadable { .. } | Self::InvalidResponse => 502,
            Self::Provider { status, .. } => *status,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Turns a natural-language prompt into code through a chat-completion provider
///
/// Network failures, unreadable bodies, 429 and 5xx answers are retried with a
/// linearly growing delay. Any other answer is final.
pub struct GenerateClient {
    http: reqwest::Client,
    config: GenerateConfig,
    api_key: Option<String>,
}

impl GenerateClient {
    /// Reads the provider key from the environment variable named in the config
    pub fn from_config(config: GenerateConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            log::warn!("{} is not set, /generate will be unavailable", config.api_key_env);
        }
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: GenerateConfig, api_key: Option<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            config,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        })
    }

    pub async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        if prompt.trim().is_empty() {
            return Err(GenerateError::EmptyPrompt);
        }
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| GenerateError::MissingApiKey(self.config.api_key_env.clone()))?;

        let max_attempts = self.config.max_attempts.max(1);
        let mut backoff = LinearBackoff::new(self.config.backoff_base.into());
        let mut attempt = 0;

        let (status, body) = loop {
            attempt += 1;

            let response = match self.send(api_key, prompt).await {
                Ok(response) => response,
                Err(e) => {
                    log::error!("Provider request attempt {attempt} failed: {e}");
                    if attempt < max_attempts {
                        tokio::time::sleep(backoff.next_delay()).await;
                        continue;
                    }
                    return Err(GenerateError::Unreachable {
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
            };

            let status = response.status();
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    log::error!("Failed to read provider response on attempt {attempt}: {e}");
                    if attempt < max_attempts {
                        tokio::time::sleep(backoff.next_delay()).await;
                        continue;
                    }
                    return Err(GenerateError::Unreadable { attempts: attempt });
                }
            };

            if is_transient(status) && attempt < max_attempts {
                log::warn!("Provider answered {status} on attempt {attempt}, retrying");
                tokio::time::sleep(backoff.next_delay()).await;
                continue;
            }

            break (status, body);
        };

        if !status.is_success() {
            log::error!("Provider error (status {status}): {body}");
            return Err(GenerateError::Provider {
                status: status.as_u16(),
                message: provider_message(status, &body),
            });
        }

        let parsed: Value = serde_json::from_str(&body).map_err(|e| {
            log::error!("Failed to parse provider response: {e}");
            GenerateError::InvalidResponse
        })?;

        Ok(extract_result(&parsed))
    }

    async fn send(&self, api_key: &str, prompt: &str) -> reqwest::Result<reqwest::Response> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        self.http
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .header("HTTP-Referer", &self.config.referer)
            .header("X-Title", &self.config.title)
            .timeout(Duration::from(self.config.attempt_timeout))
            .json(&request)
            .send()
            .await
    }
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Best human-readable message in a provider error body
fn provider_message(status: StatusCode, body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let from_json = parsed.as_ref().and_then(|value| {
        [
            value.pointer("/error/message"),
            value.get("message"),
            value.get("detail"),
            value.pointer("/error/type"),
        ]
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .find(|message| !message.is_empty())
        .map(String::from)
    });

    let message = from_json.unwrap_or_else(|| {
        if !body.is_empty() && body.len() < RAW_MESSAGE_LIMIT {
            body.to_string()
        } else {
            format!("HTTP {}", status.as_u16())
        }
    });

    if message.trim().is_empty() {
        format!("Server error ({})", status.as_u16())
    } else {
        message
    }
}

fn extract_result(response: &Value) -> String {
    [
        response.pointer("/choices/0/message/content"),
        response.get("output"),
        response.get("result"),
    ]
    .into_iter()
    .flatten()
    .filter_map(Value::as_str)
    .find(|text| !text.is_empty())
    .unwrap_or_default()
    .to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_transient(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_transient(StatusCode::BAD_REQUEST));
        assert!(!is_transient(StatusCode::UNAUTHORIZED));
        assert!(!is_transient(StatusCode::OK));
    }

    #[test]
    fn test_provider_message_precedence() {
        let status = StatusCode::BAD_REQUEST;
        let body = json!({"error": {"message": "bad model", "type": "invalid"}, "message": "other"});
        assert_eq!(provider_message(status, &body.to_string()), "bad model");

        let body = json!({"message": "top level", "detail": "detail"});
        assert_eq!(provider_message(status, &body.to_string()), "top level");

        let body = json!({"detail": "only detail"});
        assert_eq!(provider_message(status, &body.to_string()), "only detail");

        let body = json!({"error": {"type": "rate_limited"}});
        assert_eq!(provider_message(status, &body.to_string()), "rate_limited");
    }

    #[test]
    fn test_provider_message_fallbacks() {
        assert_eq!(
            provider_message(StatusCode::BAD_GATEWAY, "upstream down"),
            "upstream down"
        );
        assert_eq!(provider_message(StatusCode::BAD_GATEWAY, ""), "HTTP 502");
        assert_eq!(
            provider_message(StatusCode::BAD_GATEWAY, &"x".repeat(600)),
            "HTTP 502"
        );
        assert_eq!(
            provider_message(StatusCode::BAD_GATEWAY, "   "),
            "Server error (502)"
        );
    }

    #[test]
    fn test_extract_result() {
        let response = json!({"choices": [{"message": {"content": "print(2+2)"}}]});
        assert_eq!(extract_result(&response), "print(2+2)");

        assert_eq!(extract_result(&json!({"output": "out"})), "out");
        assert_eq!(extract_result(&json!({"result": "res"})), "res");
        assert_eq!(extract_result(&json!({"choices": []})), "");
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(GenerateError::EmptyPrompt.status_code(), 400);
        assert_eq!(GenerateError::MissingApiKey("KEY".to_string()).status_code(), 500);
        assert_eq!(GenerateError::InvalidResponse.status_code(), 502);
        assert_eq!(
            GenerateError::Provider {
                status: 429,
                message: "slow down".to_string()
            }
            .status_code(),
            429
        );
        assert_eq!(
            GenerateError::MissingApiKey("OPENROUTER_API_KEY".to_string()).to_string(),
            "OPENROUTER_API_KEY not configured"
        );
    }

    #[tokio::test]
    async fn test_rejects_before_any_request() {
        let config = GenerateConfig {
            endpoint: "http://127.0.0.1:9/unused".to_string(),
            ..GenerateConfig::default()
        };
        let client = GenerateClient::with_api_key(config.clone(), Some("key".to_string())).unwrap();
        assert!(matches!(
            client.generate("  ").await,
            Err(GenerateError::EmptyPrompt)
        ));

        let client = GenerateClient::with_api_key(config, Some("  ".to_string())).unwrap();
        assert!(matches!(
            client.generate("write hello world").await,
            Err(GenerateError::MissingApiKey(_))
        ));
    }
}
