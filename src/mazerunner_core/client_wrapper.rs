//! Provider-agnostic chat transport: the [`ChatBackend`] trait and the
//! message/tool-call types that cross its boundary.
//!
//! This is deliberately thin. `ChatBackend` abstracts over *how* a request
//! reaches a model (HTTP to a local server, an in-process managed agent,
//! ...); conversation bookkeeping, the tool-execution loop, and turn-level
//! bookkeeping live one layer up in `invoker`.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::mazerunner_core::error::Error;

/// A single tool call requested by the model in its response.
#[derive(Debug, Clone)]
pub struct NativeToolCall {
    /// Backend-assigned call ID correlating a follow-up `Role::Tool` message.
    pub id: String,
    /// Tool name, matching one of the `ToolDefinition`s sent in the request.
    pub name: String,
    /// Parsed JSON arguments supplied by the model for this call.
    pub arguments: serde_json::Value,
}

/// Tool schema advertised to the model alongside a chat request. Built from
/// the fixed tool catalog in `tool_schema`.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

#[derive(Debug, Clone)]
pub enum Role {
    System,
    User,
    Assistant,
    /// A tool-result message correlating with a prior assistant `NativeToolCall`.
    Tool { call_id: String },
}

/// Prompt/completion token accounting for a single backend call, extended
/// with the USD cost derived from the configured per-model pricing (spec
/// §4.4 does not define pricing; this crate's ambient cost accounting needs
/// it populated before the turn record is persisted).
#[derive(Clone, Debug, Default)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
    pub cost_usd: f64,
}

#[derive(Clone)]
pub struct Message {
    pub role: Role,
    pub content: Arc<str>,
    /// Populated only on assistant messages returned by `ChatBackend::send_message`
    /// when the backend selected one or more tools.
    pub tool_calls: Vec<NativeToolCall>,
}

impl Message {
    pub fn system(content: impl Into<Arc<str>>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn user(content: impl Into<Arc<str>>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<Arc<str>>) -> Self {
        Self {
            role: Role::Tool {
                call_id: call_id.into(),
            },
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

/// A chat transport: translates a turn's conversation buffer into a single
/// backend request and back. One implementation per provider family
/// (`local-chat`, `managed-agent`; spec §6).
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send the given conversation (with any system priming already
    /// included by the caller) and the advertised tool catalog. Returns the
    /// assistant's reply, which may carry zero or more `tool_calls`.
    async fn send_message(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, Error>;

    /// Identifier used to select the upstream model, e.g. `"llama3"`.
    fn model_name(&self) -> &str;

    /// Usage recorded by the most recent `send_message` call.
    async fn get_last_usage(&self) -> Option<TokenUsage> {
        if let Some(slot) = self.usage_slot() {
            slot.lock().await.clone()
        } else {
            None
        }
    }

    /// Shared slot where the implementation persists token usage.
    /// Backends with no accounting data may leave this `None`.
    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        None
    }
}
