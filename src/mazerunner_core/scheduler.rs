//! Turn Loop Scheduler: drives one experiment from `Start` through
//! `Finalize` via alternating Invoke/Check phases (spec §4.5).

use chrono::Utc;
use std::time::Duration;

use crate::mazerunner_core::error::{Error, ErrorKind};
use crate::mazerunner_core::invoker::{run_turn, Pricing, TurnContext};
use crate::mazerunner_core::client_wrapper::ChatBackend;
use crate::mazerunner_core::store::{DataStore, ExecutionStatus, LastError};
use crate::mazerunner_core::tool_schema::tool_definitions;
use crate::mazerunner_core::tools::ToolDispatcher;
use crate::mazerunner_core::world::Maze;

/// Wait computation (spec §4.5): guarantees the turn rate never exceeds the
/// configured RPM. Negative or zero RPM is rejected by
/// `SystemConfig::rate_limit_rpm` before this is ever called.
pub fn wait_seconds(rate_limit_rpm: f64) -> f64 {
    (60.0 / rate_limit_rpm).max(0.0)
}

pub struct TurnLoopScheduler<'a> {
    pub store: &'a dyn DataStore,
    pub maze: &'a Maze,
    pub backend: &'a dyn ChatBackend,
    pub pricing: Pricing,
    pub prompt_template: &'a str,
    pub rate_limit_rpm: f64,
}

impl<'a> TurnLoopScheduler<'a> {
    /// Run the experiment to completion: one call drives `Start` through
    /// `Finalize`. Returns once the experiment is terminal.
    pub async fn run(&self, experiment_id: i64) -> Result<(), Error> {
        let experiment = self.store.load_experiment(experiment_id).await?;
        let config = &experiment.model_config;

        let dispatcher = ToolDispatcher::new(
            self.store,
            self.maze,
            config.recall_interval,
            config.max_recall_actions,
        );
        let tools = tool_definitions();

        let mut turn_number: i64 = 1;
        let mut total_movements: i64 = 0;

        loop {
            if turn_number > 1 {
                let wait = wait_seconds(self.rate_limit_rpm);
                if wait > 0.0 {
                    tokio::time::sleep(Duration::from_secs_f64(wait)).await;
                }
            }

            let position = self.store.current_position(experiment_id).await?;

            let turn_result = run_turn(
                self.backend,
                tools.clone(),
                &dispatcher,
                self.pricing,
                TurnContext {
                    experiment_id,
                    turn_number,
                    position,
                    goal_description: &experiment.goal_description,
                    prompt_template: self.prompt_template,
                    max_actions_per_turn: config.max_actions_per_turn as u32,
                },
            )
            .await;

            let turn = match turn_result {
                Ok(turn) => turn,
                Err(err) => {
                    self.finalize_failure(experiment_id, &err).await?;
                    return Err(err);
                }
            };

            self.store
                .record_turn_tokens(
                    experiment_id,
                    turn.delta_input_tokens,
                    turn.delta_output_tokens,
                    turn.delta_cost_usd,
                )
                .await?;

            total_movements += turn.movements_executed as i64;

            // Termination predicates, evaluated in order (spec §4.5).
            if turn.goal_reached {
                self.store
                    .finalize(experiment_id, ExecutionStatus::Succeeded, Some(true), None)
                    .await?;
                return Ok(());
            }

            if total_movements >= config.max_moves {
                self.finalize_with_kind(experiment_id, ErrorKind::BudgetMoves, "max_moves exceeded")
                    .await?;
                return Ok(());
            }

            let elapsed_minutes =
                (Utc::now() - experiment.started_at).num_seconds() as f64 / 60.0;
            if elapsed_minutes >= config.max_duration_minutes {
                self.finalize_with_kind(experiment_id, ErrorKind::BudgetTime, "max_duration_minutes exceeded")
                    .await?;
                return Ok(());
            }

            if turn.actions_executed == 0 && !turn.capped {
                self.finalize_with_kind(
                    experiment_id,
                    ErrorKind::AgentStalled,
                    "model produced no tool calls",
                )
                .await?;
                return Ok(());
            }

            turn_number += 1;
        }
    }

    async fn finalize_failure(&self, experiment_id: i64, err: &Error) -> Result<(), Error> {
        let status = if err.kind == ErrorKind::BudgetTime {
            ExecutionStatus::TimedOut
        } else {
            ExecutionStatus::Failed
        };
        self.store
            .finalize(
                experiment_id,
                status,
                Some(false),
                Some(LastError {
                    error_kind: err.classify(),
                    cause: err.cause.clone(),
                    timestamp: Utc::now(),
                }),
            )
            .await
    }

    async fn finalize_with_kind(
        &self,
        experiment_id: i64,
        kind: ErrorKind,
        cause: &str,
    ) -> Result<(), Error> {
        let err = Error::new(kind, cause.to_string());
        let status = if kind == ErrorKind::BudgetTime {
            ExecutionStatus::TimedOut
        } else {
            ExecutionStatus::Failed
        };
        self.store
            .finalize(
                experiment_id,
                status,
                Some(false),
                Some(LastError {
                    error_kind: err.classify(),
                    cause: err.cause.clone(),
                    timestamp: Utc::now(),
                }),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_seconds_is_inverse_of_rpm() {
        assert_eq!(wait_seconds(60.0), 1.0);
        assert_eq!(wait_seconds(120.0), 0.5);
    }

    #[test]
    fn wait_seconds_never_negative() {
        assert_eq!(wait_seconds(1000.0).max(0.0), wait_seconds(1000.0));
    }
}
