//! `local-chat` chat backend: HTTPS `POST /chat` against an Ollama-like
//! endpoint (spec §6).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::mazerunner_core::client_wrapper::{
    ChatBackend, Message, NativeToolCall, Role, TokenUsage, ToolDefinition,
};
use crate::mazerunner_core::clients::common::get_shared_http_client;
use crate::mazerunner_core::error::Error;

/// Per-request inference knobs, captured immutably into `model_config` at
/// admission and baked into the backend for the lifetime of the experiment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InferenceOptions {
    pub num_ctx: i64,
    pub temperature: f64,
    pub repeat_penalty: f64,
    pub num_predict: i64,
}

pub struct LocalChatBackend {
    base_url: String,
    api_key: String,
    model: String,
    options: InferenceOptions,
    usage: Mutex<Option<TokenUsage>>,
}

impl LocalChatBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        options: InferenceOptions,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            options,
            usage: Mutex::new(None),
        }
    }

    fn role_str(role: &Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool { .. } => "tool",
        }
    }

    fn tool_to_schema(tool: &ToolDefinition) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters_schema,
            }
        })
    }
}

#[async_trait]
impl ChatBackend for LocalChatBackend {
    async fn send_message(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, Error> {
        let wire_messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                let mut entry = serde_json::json!({
                    "role": Self::role_str(&m.role),
                    "content": m.content.as_ref(),
                });
                if let Role::Tool { call_id } = &m.role {
                    entry["tool_call_id"] = serde_json::Value::String(call_id.clone());
                }
                entry
            })
            .collect();

        let wire_tools: Vec<serde_json::Value> = tools
            .unwrap_or_default()
            .iter()
            .map(Self::tool_to_schema)
            .collect();

        let body = serde_json::json!({
            "model": self.model,
            "messages": wire_messages,
            "tools": wire_tools,
            "options": {
                "num_ctx": self.options.num_ctx,
                "temperature": self.options.temperature,
                "repeat_penalty": self.options.repeat_penalty,
                "num_predict": self.options.num_predict,
            },
            "stream": false,
        });

        let url = format!("{}/chat", self.base_url.trim_end_matches('/'));
        let response = get_shared_http_client()
            .post(&url)
            .header("X-API-Key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::new(
                crate::mazerunner_core::error::ErrorKind::TransportError,
                format!("local-chat returned {status}: {text}"),
            ));
        }

        let parsed: LocalChatResponse = response.json().await?;

        let usage = TokenUsage {
            input_tokens: parsed.prompt_eval_count.unwrap_or(0) as usize,
            output_tokens: parsed.eval_count.unwrap_or(0) as usize,
            total_tokens: (parsed.prompt_eval_count.unwrap_or(0) + parsed.eval_count.unwrap_or(0))
                as usize,
            cost_usd: 0.0,
        };
        *self.usage.lock().await = Some(usage);

        let tool_calls = parsed
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(i, call)| NativeToolCall {
                id: format!("call_{i}"),
                name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect();

        Ok(Message {
            role: Role::Assistant,
            content: Arc::from(parsed.message.content),
            tool_calls,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.usage)
    }
}

#[derive(Debug, Deserialize)]
struct LocalChatResponse {
    message: LocalChatMessage,
    prompt_eval_count: Option<i64>,
    eval_count: Option<i64>,
    #[allow(dead_code)]
    done_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LocalChatMessage {
    #[allow(dead_code)]
    role: String,
    content: String,
    tool_calls: Option<Vec<LocalChatToolCall>>,
}

#[derive(Debug, Deserialize)]
struct LocalChatToolCall {
    function: LocalChatFunctionCall,
}

#[derive(Debug, Deserialize)]
struct LocalChatFunctionCall {
    name: String,
    arguments: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_mapping_matches_wire_format() {
        assert_eq!(LocalChatBackend::role_str(&Role::User), "user");
        assert_eq!(LocalChatBackend::role_str(&Role::Assistant), "assistant");
        assert_eq!(
            LocalChatBackend::role_str(&Role::Tool {
                call_id: "call_0".into()
            }),
            "tool"
        );
    }

    #[test]
    fn parses_response_without_tool_calls() {
        let raw = r#"{
            "message": {"role": "assistant", "content": "moving north"},
            "prompt_eval_count": 120,
            "eval_count": 15,
            "done_reason": "stop"
        }"#;
        let parsed: LocalChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.message.content, "moving north");
        assert!(parsed.message.tool_calls.is_none());
    }

    #[test]
    fn parses_response_with_tool_calls() {
        let raw = r#"{
            "message": {"role": "assistant", "content": "",
                "tool_calls": [{"function": {"name": "move_north", "arguments": {"experimentId": 3}}}]},
            "prompt_eval_count": 80,
            "eval_count": 5,
            "done_reason": "tool_calls"
        }"#;
        let parsed: LocalChatResponse = serde_json::from_str(raw).unwrap();
        let calls = parsed.message.tool_calls.unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "move_north");
    }
}
