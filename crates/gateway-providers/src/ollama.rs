//! HTTP-backed provider talking to an Ollama-compatible `/api/chat` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use gateway_core::provider::{estimate_tokens, Provider, ProviderChunk, ProviderError, ProviderResult, ProviderStream};
use gateway_core::schemas::{ChatMessage, ChatRequest};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

pub struct OllamaProvider {
    name: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>, timeout_s: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_s))
            .build()
            .expect("reqwest client builds with a static configuration");

        OllamaProvider {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client,
        }
    }

    fn payload(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        let mut options = serde_json::Map::new();
        if let Some(temperature) = request.temperature {
            options.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            options.insert("num_predict".to_string(), json!(max_tokens));
        }

        json!({
            "model": self.model,
            "messages": request.messages.iter().map(ollama_message).collect::<Vec<_>>(),
            "stream": stream,
            "options": options,
        })
    }
}

fn ollama_message(message: &ChatMessage) -> serde_json::Value {
    json!({ "role": message.role, "content": message.content })
}

#[derive(Debug, Deserialize)]
struct OllamaChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaChatMessage>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<i64>,
    #[serde(default)]
    eval_count: Option<i64>,
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &ChatRequest) -> Result<ProviderResult, ProviderError> {
        let payload = self.payload(request, false);
        let resp = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;

        let resp = resp
            .error_for_status()
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;

        let data: OllamaChatResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;

        let content = data.message.map(|m| m.content).unwrap_or_default();
        let prompt_tokens = data.prompt_eval_count.unwrap_or(0);
        let completion_tokens = data.eval_count.unwrap_or(0);
        let mut total_tokens = prompt_tokens + completion_tokens;
        if total_tokens == 0 {
            let prompt_text: String = request.messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join(" ");
            total_tokens = estimate_tokens(&format!("{prompt_text} {content}"));
        }

        Ok(ProviderResult {
            response: content,
            prompt_tokens,
            completion_tokens,
            total_tokens,
            response_id: Uuid::new_v4().to_string(),
        })
    }

    /// Ollama streams newline-delimited JSON objects, one per token batch,
    /// terminated by an object with `"done": true`.
    async fn stream(&self, request: &ChatRequest) -> Result<ProviderStream, ProviderError> {
        let payload = self.payload(request, true);
        let resp = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;

        let resp = resp
            .error_for_status()
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;

        let model_name = self.model.clone();
        let mut byte_stream = resp.bytes_stream();

        let s = async_stream::stream! {
            let mut buf = Vec::new();
            let mut prompt_total: Option<i64> = None;
            let mut completion_total: Option<i64> = None;

            loop {
                let chunk = match byte_stream.next().await {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        yield Err(ProviderError::Upstream(e.to_string()));
                        return;
                    }
                    None => break,
                };
                buf.extend_from_slice(&chunk);

                while let Some(newline_pos) = buf.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=newline_pos).collect();
                    let line = line.strip_suffix(b"\n").unwrap_or(&line);
                    if line.is_empty() {
                        continue;
                    }

                    let parsed: OllamaChatResponse = match serde_json::from_slice(line) {
                        Ok(v) => v,
                        Err(e) => {
                            yield Err(ProviderError::Upstream(e.to_string()));
                            return;
                        }
                    };

                    if let Some(count) = parsed.prompt_eval_count {
                        prompt_total = Some(count);
                    }
                    if let Some(count) = parsed.eval_count {
                        completion_total = Some(count);
                    }

                    if parsed.done {
                        yield Ok(ProviderChunk::done(prompt_total, completion_total, parsed.model.or(Some(model_name.clone()))));
                        return;
                    }

                    if let Some(message) = parsed.message {
                        if !message.content.is_empty() {
                            yield Ok(ProviderChunk::content(message.content));
                        }
                    }
                }
            }

            yield Ok(ProviderChunk::done(prompt_total, completion_total, Some(model_name)));
        };

        Ok(Box::pin(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::schemas::Role;

    #[test]
    fn payload_maps_max_tokens_to_num_predict() {
        let provider = OllamaProvider::new("primary", "http://localhost:11434", "llama3", 30);
        let request = ChatRequest {
            model: "llama3".to_string(),
            messages: vec![ChatMessage {
                role: Role::User,
                content: "hi".to_string(),
            }],
            temperature: Some(0.2),
            max_tokens: Some(128),
            stream: false,
        };

        let payload = provider.payload(&request, false);
        assert_eq!(payload["options"]["num_predict"], json!(128));
        assert_eq!(payload["options"]["temperature"], json!(0.2));
        assert_eq!(payload["model"], json!("llama3"));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let provider = OllamaProvider::new("primary", "http://localhost:11434/", "llama3", 30);
        assert_eq!(provider.base_url, "http://localhost:11434");
    }
}
