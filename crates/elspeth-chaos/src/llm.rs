//! ChaosLLM: an OpenAI-compatible `/v1/chat/completions` mock that
//! fabricates a response body according to [`crate::config::ResponseMode`]
//! rather than calling a real model.

use crate::config::{FaultInjectionConfig, ResponseMode};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const RANDOM_SENTENCES: &[&str] = &[
    "The quick brown fox jumps over the lazy dog.",
    "Elspeth pipelines route rows through gates and sinks.",
    "A stable hash is a canonical JSON document, hashed.",
    "Burst mode multiplies every probability for a while.",
    "Contracts lock on the first accepted row.",
];

/// One message in an OpenAI-style chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// The subset of the OpenAI chat-completions request body this mock reads.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/// Fabricates chat-completion response bodies without calling a model.
pub struct ChatResponder {
    rng: Mutex<StdRng>,
    preset_index: Mutex<usize>,
}

impl ChatResponder {
    /// Build a responder seeded the same way as its owning
    /// [`crate::fault::FaultInjector`], so a fixed seed reproduces both
    /// the fault decisions and the fabricated content.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { rng: Mutex::new(rng), preset_index: Mutex::new(0) }
    }

    /// Build the OpenAI-shaped JSON body for a successful completion.
    pub fn respond(&self, config: &FaultInjectionConfig, request: &ChatCompletionRequest) -> Value {
        let content = match config.response_mode {
            ResponseMode::Random => {
                let mut rng = self.rng.lock();
                let idx = rng.random_range(0..RANDOM_SENTENCES.len());
                RANDOM_SENTENCES[idx].to_string()
            }
            ResponseMode::Template => {
                let input = request.messages.last().map(|m| m.content.as_str()).unwrap_or("");
                config.template.replace("{input}", input)
            }
            ResponseMode::Echo => request.messages.last().map(|m| m.content.clone()).unwrap_or_default(),
            ResponseMode::Preset => {
                if config.preset_responses.is_empty() {
                    String::new()
                } else {
                    let mut index = self.preset_index.lock();
                    let response = config.preset_responses[*index % config.preset_responses.len()].clone();
                    *index += 1;
                    response
                }
            }
        };

        json!({
            "id": format!("chatcmpl-{}", uuid_like()),
            "object": "chat.completion",
            "model": request.model,
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop",
            }],
            "usage": {
                "prompt_tokens": request.messages.iter().map(|m| m.content.len() as u64 / 4).sum::<u64>(),
                "completion_tokens": content.len() as u64 / 4,
                "total_tokens": 0,
            },
        })
    }
}

fn uuid_like() -> String {
    let mut rng = rand::rng();
    (0..24).map(|_| format!("{:x}", rng.random_range(0..16u8))).collect()
}

/// An OpenAI-shaped error body for an HTTP-status fault.
pub fn error_body(message: &str, error_type: &str) -> Value {
    json!({ "error": { "message": message, "type": error_type, "code": null } })
}

/// Wrap a raw request body's JSON into a typed request, quarantining
/// parse failures to the caller rather than panicking.
pub fn parse_request(body: &[u8]) -> Result<ChatCompletionRequest, serde_json::Error> {
    serde_json::from_slice(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(content: &str) -> ChatCompletionRequest {
        ChatCompletionRequest { model: "gpt-4".to_string(), messages: vec![ChatMessage { role: "user".to_string(), content: content.to_string() }] }
    }

    #[test]
    fn echo_mode_returns_last_message() {
        let responder = ChatResponder::new(Some(1));
        let config = FaultInjectionConfig { response_mode: ResponseMode::Echo, ..FaultInjectionConfig::default() };
        let response = responder.respond(&config, &request("hello there"));
        assert_eq!(response["choices"][0]["message"]["content"], "hello there");
    }

    #[test]
    fn template_mode_substitutes_input() {
        let responder = ChatResponder::new(Some(1));
        let config = FaultInjectionConfig {
            response_mode: ResponseMode::Template,
            template: "echo: {input}".to_string(),
            ..FaultInjectionConfig::default()
        };
        let response = responder.respond(&config, &request("ping"));
        assert_eq!(response["choices"][0]["message"]["content"], "echo: ping");
    }

    #[test]
    fn preset_mode_cycles_through_responses() {
        let responder = ChatResponder::new(Some(1));
        let config = FaultInjectionConfig {
            response_mode: ResponseMode::Preset,
            preset_responses: vec!["a".to_string(), "b".to_string()],
            ..FaultInjectionConfig::default()
        };
        let first = responder.respond(&config, &request("x"));
        let second = responder.respond(&config, &request("x"));
        let third = responder.respond(&config, &request("x"));
        assert_eq!(first["choices"][0]["message"]["content"], "a");
        assert_eq!(second["choices"][0]["message"]["content"], "b");
        assert_eq!(third["choices"][0]["message"]["content"], "a");
    }

    #[test]
    fn seeded_random_mode_is_deterministic() {
        let config = FaultInjectionConfig { response_mode: ResponseMode::Random, ..FaultInjectionConfig::default() };
        let a = ChatResponder::new(Some(7)).respond(&config, &request("x"));
        let b = ChatResponder::new(Some(7)).respond(&config, &request("x"));
        assert_eq!(a["choices"][0]["message"]["content"], b["choices"][0]["message"]["content"]);
    }
}
