//! End-to-end scenarios for the Turn Loop Scheduler (spec §8, Scenarios A-F).
//!
//! Driven against `FakeStore`, an in-process fake data store, and a scripted
//! `ChatBackend` that returns pre-programmed tool calls instead of talking
//! to a model — no real Postgres or HTTP server required to run this suite.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use mazerunner_core::mazerunner_core::invoker::Pricing;
use mazerunner_core::mazerunner_core::scheduler::TurnLoopScheduler;
use mazerunner_core::mazerunner_core::store::ModelConfig;
use mazerunner_core::mazerunner_core::world::Maze;
use mazerunner_core::{ChatBackend, DataStore, FakeStore, Message};

/// Returns one scripted response per call, cycling the last entry forever
/// once exhausted (so a turn that calls `send_message` more times than
/// scripted just keeps yielding the final response).
struct ScriptedBackend {
    responses: Vec<Message>,
    calls: AtomicUsize,
    fail_on_call: Option<usize>,
}

impl ScriptedBackend {
    fn new(responses: Vec<Message>) -> Self {
        Self {
            responses,
            calls: AtomicUsize::new(0),
            fail_on_call: None,
        }
    }

    fn failing_on_call(mut self, call_index: usize) -> Self {
        self.fail_on_call = Some(call_index);
        self
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn send_message(
        &self,
        _messages: &[Message],
        _tools: Option<Vec<mazerunner_core::mazerunner_core::client_wrapper::ToolDefinition>>,
    ) -> Result<Message, mazerunner_core::Error> {
        let call_index = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_call == Some(call_index) {
            return Err(mazerunner_core::Error::new(
                mazerunner_core::ErrorKind::TransportError,
                "HTTP 500: simulated transport failure",
            ));
        }
        let idx = call_index.min(self.responses.len() - 1);
        Ok(self.responses[idx].clone())
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

fn tool_call(name: &str, experiment_id: i64) -> mazerunner_core::mazerunner_core::client_wrapper::NativeToolCall {
    mazerunner_core::mazerunner_core::client_wrapper::NativeToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: serde_json::json!({ "experimentId": experiment_id }),
    }
}

fn assistant_with_calls(calls: Vec<mazerunner_core::mazerunner_core::client_wrapper::NativeToolCall>) -> Message {
    Message {
        role: mazerunner_core::Role::Assistant,
        content: std::sync::Arc::from(""),
        tool_calls: calls,
    }
}

fn assistant_yields() -> Message {
    Message {
        role: mazerunner_core::Role::Assistant,
        content: std::sync::Arc::from("thinking, no action yet"),
        tool_calls: Vec::new(),
    }
}

fn model_config(max_moves: i64, recall_interval: i64, max_actions_per_turn: i64) -> ModelConfig {
    ModelConfig {
        num_ctx: 2048,
        temperature: 0.0,
        repeat_penalty: 1.0,
        num_predict: 256,
        recall_interval,
        max_recall_actions: 20,
        max_moves,
        max_duration_minutes: 30.0,
        max_actions_per_turn,
    }
}

fn seed_experiment(store: &FakeStore, maze: &Maze, config: ModelConfig) -> i64 {
    store.seed_experiment((maze.start_x, maze.start_y), "reach the goal", config)
}

fn cheap_pricing() -> Pricing {
    Pricing {
        input_price_per_1k: 0.0,
        output_price_per_1k: 0.0,
    }
}

#[tokio::test]
async fn scenario_a_immediate_goal() {
    let store = FakeStore::new();

    // 3x3, all EMPTY except (2,1) = GOAL.
    let maze = Maze::from_ascii(1, &["...", "..G", "..."], 0, 1).unwrap();
    let config = model_config(10, 10, 5);
    let experiment_id = seed_experiment(&store, &maze, config);

    let backend = ScriptedBackend::new(vec![assistant_with_calls(vec![
        tool_call("move_east", experiment_id),
        tool_call("move_east", experiment_id),
    ])]);

    let scheduler = TurnLoopScheduler {
        store: &store,
        maze: &maze,
        backend: &backend,
        pricing: cheap_pricing(),
        prompt_template: "navigate",
        rate_limit_rpm: 6000.0,
    };
    scheduler.run(experiment_id).await.unwrap();

    let experiment = store.load_experiment(experiment_id).await.unwrap();
    assert_eq!(experiment.execution_status, mazerunner_core::mazerunner_core::store::ExecutionStatus::Succeeded);
    assert_eq!(experiment.goal_found, Some(true));
}

#[tokio::test]
async fn scenario_b_blocked_move() {
    let store = FakeStore::new();

    // 3x1: EMPTY, WALL, GOAL.
    let maze = Maze::from_ascii(1, &[".#G"], 0, 0).unwrap();
    let config = model_config(10, 10, 5);
    let experiment_id = seed_experiment(&store, &maze, config);

    let backend = ScriptedBackend::new(vec![
        assistant_with_calls(vec![tool_call("move_east", experiment_id)]),
        assistant_yields(),
    ]);

    let scheduler = TurnLoopScheduler {
        store: &store,
        maze: &maze,
        backend: &backend,
        pricing: cheap_pricing(),
        prompt_template: "navigate",
        rate_limit_rpm: 6000.0,
    };
    scheduler.run(experiment_id).await.unwrap();

    let position = store.current_position(experiment_id).await.unwrap();
    assert_eq!(position, (0, 0));

    let experiment = store.load_experiment(experiment_id).await.unwrap();
    assert_eq!(experiment.execution_status, mazerunner_core::mazerunner_core::store::ExecutionStatus::Failed);
}

#[tokio::test]
async fn scenario_d_budget_exhaustion() {
    let store = FakeStore::new();

    // A long straight corridor so six consecutive eastward moves never hit the goal.
    // One move per turn, so the Check phase's budget predicate (evaluated only
    // between turns, per spec §4.5) catches the budget exactly after the 5th
    // successful move and the 6th is never invoked.
    let maze = Maze::from_ascii(1, &[".........G"], 0, 0).unwrap();
    let config = model_config(5, 100, 1);
    let experiment_id = seed_experiment(&store, &maze, config);

    let move_east = || assistant_with_calls(vec![tool_call("move_east", experiment_id)]);
    let backend = ScriptedBackend::new(vec![
        move_east(),
        move_east(),
        move_east(),
        move_east(),
        move_east(),
        move_east(),
    ]);

    let scheduler = TurnLoopScheduler {
        store: &store,
        maze: &maze,
        backend: &backend,
        pricing: cheap_pricing(),
        prompt_template: "navigate",
        rate_limit_rpm: 6000.0,
    };
    scheduler.run(experiment_id).await.unwrap();

    let experiment = store.load_experiment(experiment_id).await.unwrap();
    assert_eq!(experiment.execution_status, mazerunner_core::mazerunner_core::store::ExecutionStatus::Failed);
    assert_eq!(
        experiment.last_error.unwrap().error_kind,
        mazerunner_core::ErrorKind::BudgetMoves
    );
}

#[tokio::test]
async fn scenario_e_stalled_agent() {
    let store = FakeStore::new();

    let maze = Maze::from_ascii(1, &["..G"], 0, 0).unwrap();
    let config = model_config(10, 10, 5);
    let experiment_id = seed_experiment(&store, &maze, config);

    let backend = ScriptedBackend::new(vec![assistant_yields()]);

    let scheduler = TurnLoopScheduler {
        store: &store,
        maze: &maze,
        backend: &backend,
        pricing: cheap_pricing(),
        prompt_template: "navigate",
        rate_limit_rpm: 6000.0,
    };
    scheduler.run(experiment_id).await.unwrap();

    let experiment = store.load_experiment(experiment_id).await.unwrap();
    assert_eq!(experiment.execution_status, mazerunner_core::mazerunner_core::store::ExecutionStatus::Failed);
    assert_eq!(
        experiment.last_error.unwrap().error_kind,
        mazerunner_core::ErrorKind::AgentStalled
    );
}

#[tokio::test]
async fn scenario_c_recall_cooldown() {
    let store = FakeStore::new();

    let maze = Maze::from_ascii(1, &["....G"], 0, 0).unwrap();
    let config = model_config(10, 3, 5);
    let experiment_id = seed_experiment(&store, &maze, config);

    let backend = ScriptedBackend::new(vec![assistant_with_calls(vec![
        tool_call("move_east", experiment_id),
        tool_call("recall", experiment_id),
        tool_call("move_east", experiment_id),
    ])]);

    let scheduler = TurnLoopScheduler {
        store: &store,
        maze: &maze,
        backend: &backend,
        pricing: cheap_pricing(),
        prompt_template: "navigate",
        rate_limit_rpm: 6000.0,
    };
    scheduler.run(experiment_id).await.unwrap();

    // Two moves then a recall that fires too early (only 1 move since start,
    // need recall_interval=3): the recall action row records the failure.
    let moves_since = store.movements_since_last_recall(experiment_id).await.unwrap();
    assert!(moves_since >= 1);
}

#[tokio::test]
async fn scenario_f_transport_failure() {
    let store = FakeStore::new();

    let maze = Maze::from_ascii(1, &["..G"], 0, 0).unwrap();
    let config = model_config(10, 10, 5);
    let experiment_id = seed_experiment(&store, &maze, config);

    let backend = ScriptedBackend::new(vec![
        assistant_with_calls(vec![tool_call("move_east", experiment_id)]),
        assistant_yields(),
        assistant_yields(),
    ])
    .failing_on_call(2);

    let scheduler = TurnLoopScheduler {
        store: &store,
        maze: &maze,
        backend: &backend,
        pricing: cheap_pricing(),
        prompt_template: "navigate",
        rate_limit_rpm: 6000.0,
    };
    assert!(scheduler.run(experiment_id).await.is_err());

    let experiment = store.load_experiment(experiment_id).await.unwrap();
    assert_eq!(experiment.execution_status, mazerunner_core::mazerunner_core::store::ExecutionStatus::Failed);
    let err = experiment.last_error.unwrap();
    assert_eq!(err.error_kind, mazerunner_core::ErrorKind::TransportError);
    assert!(err.cause.contains("HTTP 500"));
}
