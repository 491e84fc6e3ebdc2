//! Admission & Finalization: converts a trigger event into a scheduler run
//! with captured, immutable configuration (spec §4.6).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::mazerunner_core::config::SystemConfig;
use crate::mazerunner_core::error::Error;
use crate::mazerunner_core::store::{ModelConfig, NewExperiment, Store};

/// Wire format of one admission trigger (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEnvelope {
    pub llm_provider: String,
    pub model_name: String,
    pub maze_id: i64,
    pub prompt_version: String,
    #[serde(default)]
    pub goal_description: Option<String>,
    #[serde(default)]
    pub config: Option<TriggerConfig>,
    /// Carried through to `experiments.message_id` for cross-referencing
    /// with the external queue; assigned by the ingress queue, not by the
    /// sender.
    #[serde(default)]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub num_ctx: Option<i64>,
    pub temperature: Option<f64>,
    pub repeat_penalty: Option<f64>,
    pub num_predict: Option<i64>,
    pub max_actions_per_turn: Option<i64>,
}

impl TriggerConfig {
    /// True if every field is unset, i.e. `config: {}` on the wire. The
    /// atomic config-in-event rule (spec §4.6) treats this the same as the
    /// field being absent entirely.
    fn is_empty(&self) -> bool {
        self.num_ctx.is_none()
            && self.temperature.is_none()
            && self.repeat_penalty.is_none()
            && self.num_predict.is_none()
            && self.max_actions_per_turn.is_none()
    }
}

/// An ordered, at-least-once source of trigger events (spec §6 "Ingress
/// queue"). The real trigger bus (SQS/RabbitMQ/...) is explicitly out of
/// scope (spec §1); this crate only needs one concrete, in-process
/// implementation to exercise the admission path end to end.
#[async_trait]
pub trait TriggerSource: Send + Sync {
    async fn receive(&self) -> Result<TriggerEnvelope, Error>;
}

/// An in-process FIFO trigger source backed by a single `mpsc` channel,
/// which inherently gives the "single message group" serialization the
/// queue contract requires.
pub struct InProcessTriggerSource {
    receiver: tokio::sync::Mutex<tokio::sync::mpsc::Receiver<TriggerEnvelope>>,
}

impl InProcessTriggerSource {
    pub fn channel(buffer: usize) -> (tokio::sync::mpsc::Sender<TriggerEnvelope>, Self) {
        let (tx, rx) = tokio::sync::mpsc::channel(buffer);
        (
            tx,
            Self {
                receiver: tokio::sync::Mutex::new(rx),
            },
        )
    }
}

#[async_trait]
impl TriggerSource for InProcessTriggerSource {
    async fn receive(&self) -> Result<TriggerEnvelope, Error> {
        self.receiver
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| Error::internal("trigger source closed"))
    }
}

/// Merges an event's config with system defaults into the immutable blob
/// that becomes `experiments.model_config`. Implements the "atomic
/// config-in-event rule" (spec §4.6): for `local-chat`, the event's
/// `config` object must be non-empty, with no fallback to the shared store.
pub fn resolve_model_config(
    envelope: &TriggerEnvelope,
    system: &SystemConfig,
) -> Result<ModelConfig, Error> {
    let event_config = match (&envelope.config, envelope.llm_provider.as_str()) {
        (Some(c), "local-chat") if c.is_empty() => {
            return Err(Error::config_missing(
                "local-chat admission requires a non-empty config object in the trigger event",
            ));
        }
        (Some(c), _) => c.clone(),
        (None, "local-chat") => {
            return Err(Error::config_missing(
                "local-chat admission requires a non-empty config object in the trigger event",
            ));
        }
        (None, _) => TriggerConfig::default(),
    };

    Ok(ModelConfig {
        num_ctx: event_config.num_ctx.unwrap_or(2048),
        temperature: event_config.temperature.unwrap_or(0.0),
        repeat_penalty: event_config.repeat_penalty.unwrap_or(1.0),
        num_predict: event_config.num_predict.unwrap_or(256),
        recall_interval: system.recall_interval as i64,
        max_recall_actions: system.max_recall_actions as i64,
        max_moves: system.max_moves as i64,
        max_duration_minutes: system.max_duration_minutes,
        max_actions_per_turn: event_config
            .max_actions_per_turn
            .unwrap_or(system.max_actions_per_turn as i64),
    })
}

/// Bounds concurrently in-flight experiments to `max_concurrent_experiments`
/// across the whole deployment (spec §4.6 "Bounded concurrency").
pub struct Admission {
    store: Arc<Store>,
    system: SystemConfig,
    concurrency: Arc<Semaphore>,
}

impl Admission {
    pub fn new(store: Arc<Store>, system: SystemConfig) -> Self {
        let concurrency = Arc::new(Semaphore::new(system.max_concurrent_experiments));
        Self {
            store,
            system,
            concurrency,
        }
    }

    /// Validate an envelope, merge config, and create the experiment row.
    /// Does not run the scheduler itself — callers acquire a concurrency
    /// permit and hand the resulting `experiment_id` to a
    /// `TurnLoopScheduler`.
    pub async fn admit(
        &self,
        envelope: TriggerEnvelope,
        maze_start: (i32, i32),
        execution_id: String,
        execution_name: String,
    ) -> Result<i64, Error> {
        let model_config = resolve_model_config(&envelope, &self.system)?;

        let new_experiment = NewExperiment {
            maze_id: envelope.maze_id,
            model_name: envelope.model_name,
            prompt_version: envelope.prompt_version,
            llm_provider: envelope.llm_provider,
            start_x: maze_start.0,
            start_y: maze_start.1,
            goal_description: envelope.goal_description.unwrap_or_default(),
            model_config,
            execution_id,
            execution_name,
            message_id: envelope.message_id.unwrap_or_default(),
        };

        self.store.create_experiment(new_experiment).await
    }

    pub fn concurrency_limiter(&self) -> Arc<Semaphore> {
        self.concurrency.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system_config() -> SystemConfig {
        SystemConfig {
            recall_interval: 3,
            max_recall_actions: 20,
            max_moves: 200,
            max_duration_minutes: 30.0,
            max_actions_per_turn: 5,
            max_concurrent_experiments: 1,
            ..Default::default()
        }
    }

    #[test]
    fn local_chat_without_config_is_rejected() {
        let envelope = TriggerEnvelope {
            llm_provider: "local-chat".into(),
            model_name: "llama3".into(),
            maze_id: 1,
            prompt_version: "v1".into(),
            goal_description: None,
            config: None,
            message_id: None,
        };
        let err = resolve_model_config(&envelope, &system_config()).unwrap_err();
        assert_eq!(
            err.kind,
            crate::mazerunner_core::error::ErrorKind::ConfigMissing
        );
    }

    #[test]
    fn local_chat_with_empty_config_is_rejected() {
        let envelope = TriggerEnvelope {
            llm_provider: "local-chat".into(),
            model_name: "llama3".into(),
            maze_id: 1,
            prompt_version: "v1".into(),
            goal_description: None,
            config: Some(TriggerConfig::default()),
            message_id: None,
        };
        let err = resolve_model_config(&envelope, &system_config()).unwrap_err();
        assert_eq!(
            err.kind,
            crate::mazerunner_core::error::ErrorKind::ConfigMissing
        );
    }

    #[test]
    fn managed_agent_without_config_uses_defaults() {
        let envelope = TriggerEnvelope {
            llm_provider: "managed-agent".into(),
            model_name: "some-model".into(),
            maze_id: 1,
            prompt_version: "v1".into(),
            goal_description: None,
            config: None,
            message_id: None,
        };
        let config = resolve_model_config(&envelope, &system_config()).unwrap();
        assert_eq!(config.recall_interval, 3);
        assert_eq!(config.max_actions_per_turn, 5);
    }

    #[test]
    fn event_config_overrides_system_default_actions_per_turn() {
        let envelope = TriggerEnvelope {
            llm_provider: "local-chat".into(),
            model_name: "llama3".into(),
            maze_id: 1,
            prompt_version: "v1".into(),
            goal_description: None,
            config: Some(TriggerConfig {
                max_actions_per_turn: Some(2),
                ..Default::default()
            }),
            message_id: None,
        };
        let config = resolve_model_config(&envelope, &system_config()).unwrap();
        assert_eq!(config.max_actions_per_turn, 2);
    }
}
