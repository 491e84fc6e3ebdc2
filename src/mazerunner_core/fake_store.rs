//! In-process stand-in for `Store`, used by the scenario test suite (spec
//! §8) so the Turn Loop Scheduler can be driven end to end without a
//! Postgres instance. Implements `DataStore` directly over a
//! `std::sync::Mutex<HashMap<...>>` rather than advisory locks — fine for a
//! single-threaded test harness where the real contention `append_action`
//! guards against never arises.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::mazerunner_core::error::{Error, ErrorKind};
use crate::mazerunner_core::store::{
    ActionType, AgentAction, DataStore, ExecutionStatus, Experiment, LastError, ModelConfig,
    NewAction, SeenTile,
};

struct FakeExperiment {
    start_x: i32,
    start_y: i32,
    goal_description: String,
    model_config: ModelConfig,
    started_at: chrono::DateTime<Utc>,
    completed_at: Option<chrono::DateTime<Utc>>,
    goal_found: Option<bool>,
    execution_status: ExecutionStatus,
    last_error: Option<LastError>,
    total_input_tokens: i64,
    total_output_tokens: i64,
    total_cost_usd: f64,
    actions: Vec<AgentAction>,
}

#[derive(Default)]
pub struct FakeStore {
    experiments: Mutex<HashMap<i64, FakeExperiment>>,
    next_experiment_id: Mutex<i64>,
    next_action_id: Mutex<i64>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds one experiment directly, bypassing `insert_maze`/
    /// `create_experiment` — there's no JSONB maze table to round-trip
    /// through here, just the rows `DataStore` reasons over.
    pub fn seed_experiment(
        &self,
        start: (i32, i32),
        goal_description: impl Into<String>,
        model_config: ModelConfig,
    ) -> i64 {
        let mut next_id = self.next_experiment_id.lock().unwrap();
        *next_id += 1;
        let id = *next_id;
        self.experiments.lock().unwrap().insert(
            id,
            FakeExperiment {
                start_x: start.0,
                start_y: start.1,
                goal_description: goal_description.into(),
                model_config,
                started_at: Utc::now(),
                completed_at: None,
                goal_found: None,
                execution_status: ExecutionStatus::Running,
                last_error: None,
                total_input_tokens: 0,
                total_output_tokens: 0,
                total_cost_usd: 0.0,
                actions: Vec::new(),
            },
        );
        id
    }

    fn not_found(experiment_id: i64) -> Error {
        Error::new(
            ErrorKind::Internal,
            format!("experiment {experiment_id} not found"),
        )
    }
}

#[async_trait]
impl DataStore for FakeStore {
    async fn current_position(&self, experiment_id: i64) -> Result<(i32, i32), Error> {
        let experiments = self.experiments.lock().unwrap();
        let exp = experiments
            .get(&experiment_id)
            .ok_or_else(|| Self::not_found(experiment_id))?;
        match exp.actions.last() {
            None => Ok((exp.start_x, exp.start_y)),
            Some(action) => match (action.to_x, action.to_y) {
                (Some(x), Some(y)) => Ok((x, y)),
                _ => Ok((action.from_x, action.from_y)),
            },
        }
    }

    async fn append_action(
        &self,
        experiment_id: i64,
        turn_number: i64,
        action: NewAction,
    ) -> Result<AgentAction, Error> {
        let mut experiments = self.experiments.lock().unwrap();
        let exp = experiments
            .get_mut(&experiment_id)
            .ok_or_else(|| Self::not_found(experiment_id))?;

        let mut next_action_id = self.next_action_id.lock().unwrap();
        *next_action_id += 1;

        let row = AgentAction {
            id: *next_action_id,
            experiment_id,
            step_number: exp.actions.len() as i64 + 1,
            turn_number,
            action_type: action.action_type,
            reasoning: action.reasoning,
            from_x: action.from_x,
            from_y: action.from_y,
            to_x: action.to_x,
            to_y: action.to_y,
            success: action.success,
            tiles_seen: action.tiles_seen,
            input_tokens: action.input_tokens,
            output_tokens: action.output_tokens,
            cost_usd: action.cost_usd,
            timestamp: Utc::now(),
        };
        exp.actions.push(row.clone());
        Ok(row)
    }

    async fn movements_since_last_recall(&self, experiment_id: i64) -> Result<i64, Error> {
        let experiments = self.experiments.lock().unwrap();
        let exp = experiments
            .get(&experiment_id)
            .ok_or_else(|| Self::not_found(experiment_id))?;

        let last_recall_step = exp
            .actions
            .iter()
            .rev()
            .find(|a| a.action_type == ActionType::Recall)
            .map(|a| a.step_number)
            .unwrap_or(0);

        let moves = exp
            .actions
            .iter()
            .filter(|a| a.step_number > last_recall_step && a.action_type != ActionType::Recall)
            .count();
        Ok(moves as i64)
    }

    async fn recall_tiles(&self, experiment_id: i64, limit: i64) -> Result<Vec<SeenTile>, Error> {
        let experiments = self.experiments.lock().unwrap();
        let exp = experiments
            .get(&experiment_id)
            .ok_or_else(|| Self::not_found(experiment_id))?;

        let mut seen_positions = std::collections::HashSet::new();
        let mut tiles = Vec::new();
        for action in exp.actions.iter().rev() {
            for tile in &action.tiles_seen {
                if seen_positions.insert((tile.x, tile.y)) {
                    tiles.push(tile.clone());
                }
            }
        }
        tiles.truncate(limit.max(0) as usize);
        Ok(tiles)
    }

    async fn load_experiment(&self, experiment_id: i64) -> Result<Experiment, Error> {
        let experiments = self.experiments.lock().unwrap();
        let exp = experiments
            .get(&experiment_id)
            .ok_or_else(|| Self::not_found(experiment_id))?;

        Ok(Experiment {
            id: experiment_id,
            maze_id: 0,
            model_name: String::new(),
            prompt_version: String::new(),
            llm_provider: String::new(),
            start_x: exp.start_x,
            start_y: exp.start_y,
            goal_description: exp.goal_description.clone(),
            model_config: exp.model_config.clone(),
            started_at: exp.started_at,
            completed_at: exp.completed_at,
            goal_found: exp.goal_found,
            execution_status: exp.execution_status.clone(),
            last_error: exp.last_error.clone(),
            execution_id: String::new(),
            execution_name: String::new(),
            message_id: String::new(),
            total_input_tokens: exp.total_input_tokens,
            total_output_tokens: exp.total_output_tokens,
            total_cost_usd: exp.total_cost_usd,
        })
    }

    async fn record_turn_tokens(
        &self,
        experiment_id: i64,
        delta_input: i64,
        delta_output: i64,
        delta_cost: f64,
    ) -> Result<(), Error> {
        let mut experiments = self.experiments.lock().unwrap();
        let exp = experiments
            .get_mut(&experiment_id)
            .ok_or_else(|| Self::not_found(experiment_id))?;
        exp.total_input_tokens += delta_input;
        exp.total_output_tokens += delta_output;
        exp.total_cost_usd += delta_cost;
        Ok(())
    }

    async fn finalize(
        &self,
        experiment_id: i64,
        status: ExecutionStatus,
        goal_found: Option<bool>,
        last_error: Option<LastError>,
    ) -> Result<(), Error> {
        let mut experiments = self.experiments.lock().unwrap();
        let exp = experiments
            .get_mut(&experiment_id)
            .ok_or_else(|| Self::not_found(experiment_id))?;

        if exp.completed_at.is_some() {
            log::warn!("finalize called again for already-finalized experiment {experiment_id}");
            return Ok(());
        }

        exp.completed_at = Some(Utc::now());
        exp.execution_status = status;
        exp.goal_found = goal_found;
        exp.last_error = last_error;
        Ok(())
    }
}
