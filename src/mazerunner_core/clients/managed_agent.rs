//! `managed-agent` chat backend: a hosted vendor endpoint behind the same
//! `{invoke(messages, tools), receive(tool_calls?, yield?)}` operations as
//! `local_chat`, but with its own request/response envelope (spec §6).
//!
//! The vendor wire format itself is an external collaborator and out of
//! scope for this core; this implementation targets a generic
//! request/response-with-usage envelope, the shape every managed provider
//! in this family exposes.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::mazerunner_core::client_wrapper::{
    ChatBackend, Message, NativeToolCall, Role, TokenUsage, ToolDefinition,
};
use crate::mazerunner_core::clients::common::get_shared_http_client;
use crate::mazerunner_core::error::Error;

pub struct ManagedAgentBackend {
    endpoint: String,
    api_key: String,
    model: String,
    usage: Mutex<Option<TokenUsage>>,
}

impl ManagedAgentBackend {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
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
}

#[async_trait]
impl ChatBackend for ManagedAgentBackend {
    async fn send_message(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, Error> {
        let input: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": Self::role_str(&m.role),
                    "content": m.content.as_ref(),
                })
            })
            .collect();

        let tool_specs: Vec<serde_json::Value> = tools
            .unwrap_or_default()
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters_schema,
                })
            })
            .collect();

        let body = serde_json::json!({
            "model": self.model,
            "input": input,
            "tools": tool_specs,
        });

        let response = get_shared_http_client()
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::new(
                crate::mazerunner_core::error::ErrorKind::TransportError,
                format!("managed-agent returned {status}: {text}"),
            ));
        }

        let parsed: ManagedAgentResponse = response.json().await?;

        let usage = TokenUsage {
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
            total_tokens: parsed.usage.input_tokens + parsed.usage.output_tokens,
            cost_usd: 0.0,
        };
        *self.usage.lock().await = Some(usage);

        let tool_calls = parsed
            .output
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| NativeToolCall {
                id: call.id,
                name: call.name,
                arguments: call.arguments,
            })
            .collect();

        Ok(Message {
            role: Role::Assistant,
            content: Arc::from(parsed.output.content),
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
struct ManagedAgentResponse {
    output: ManagedAgentOutput,
    usage: ManagedAgentUsage,
}

#[derive(Debug, Deserialize)]
struct ManagedAgentOutput {
    content: String,
    tool_calls: Option<Vec<ManagedAgentToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ManagedAgentUsage {
    input_tokens: usize,
    output_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ManagedAgentToolCall {
    id: String,
    name: String,
    arguments: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_response_envelope() {
        let raw = r#"{
            "output": {"content": "heading east", "tool_calls": [
                {"id": "t1", "name": "move_east", "arguments": {"experimentId": 1}}
            ]},
            "usage": {"input_tokens": 200, "output_tokens": 12}
        }"#;
        let parsed: ManagedAgentResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.usage.input_tokens, 200);
        assert_eq!(parsed.output.tool_calls.unwrap()[0].name, "move_east");
    }
}
