//! Agent Invoker: runs one turn of model↔tool interaction (spec §4.4).
//!
//! A turn may contain many internal model↔tool round trips but is one
//! externally observable step to the Turn Loop Scheduler.

use crate::mazerunner_core::client_wrapper::{ChatBackend, Message, ToolDefinition};
use crate::mazerunner_core::error::Error;
use crate::mazerunner_core::tools::{action_type_for_tool_name, ToolDispatcher};

/// USD pricing for one `(model, provider)` pair, used to turn a turn's raw
/// token usage into `cost_usd` before it's persisted.
#[derive(Debug, Clone, Copy)]
pub struct Pricing {
    pub input_price_per_1k: f64,
    pub output_price_per_1k: f64,
}

impl Pricing {
    pub fn cost(&self, input_tokens: usize, output_tokens: usize) -> f64 {
        (input_tokens as f64 / 1000.0) * self.input_price_per_1k
            + (output_tokens as f64 / 1000.0) * self.output_price_per_1k
    }
}

/// What the turn accomplished, handed back to the scheduler for persistence
/// (`record_turn_tokens`) and termination-predicate evaluation.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub actions_executed: u32,
    /// Subset of `actions_executed` that were movement tool calls
    /// (`move_*`, success or failure both count — spec §8 Scenario B), used
    /// by the scheduler's `BUDGET_MOVES` predicate. Excludes `recall`.
    pub movements_executed: u32,
    pub yielded: bool,
    /// True if the turn ended because `max_actions_per_turn` was reached
    /// rather than because the model stopped requesting tools. Distinguishes
    /// a capped-but-productive turn from a genuinely stalled one (spec
    /// §4.5 termination predicate 4).
    pub capped: bool,
    pub goal_reached: bool,
    pub delta_input_tokens: i64,
    pub delta_output_tokens: i64,
    pub delta_cost_usd: f64,
}

pub struct TurnContext<'a> {
    pub experiment_id: i64,
    pub turn_number: i64,
    pub position: (i32, i32),
    pub goal_description: &'a str,
    pub prompt_template: &'a str,
    pub max_actions_per_turn: u32,
}

fn build_initial_message(ctx: &TurnContext) -> Message {
    let (x, y) = ctx.position;
    let content = format!(
        "{prompt}\n\nexperimentId: {experiment_id}\ncurrent_position: ({x}, {y})\ngoal: {goal}\n\
         Remember: pass experimentId with every tool call.",
        prompt = ctx.prompt_template,
        experiment_id = ctx.experiment_id,
        goal = ctx.goal_description,
    );
    Message::user(content)
}

/// Run one turn to completion: repeatedly calls the backend, dispatches
/// whatever tool calls it returns (up to the per-turn cap), and yields when
/// the model stops requesting tools.
pub async fn run_turn<'a>(
    backend: &dyn ChatBackend,
    tools: Vec<ToolDefinition>,
    dispatcher: &ToolDispatcher<'a>,
    pricing: Pricing,
    ctx: TurnContext<'a>,
) -> Result<TurnOutcome, Error> {
    let mut conversation = vec![build_initial_message(&ctx)];
    let mut actions_in_turn: u32 = 0;
    let mut movements_in_turn: u32 = 0;
    let mut goal_reached = false;
    let mut delta_input_tokens: i64 = 0;
    let mut delta_output_tokens: i64 = 0;
    let mut delta_cost_usd: f64 = 0.0;
    let mut yielded = false;
    let mut capped = false;

    loop {
        let response = backend
            .send_message(&conversation, Some(tools.clone()))
            .await?;

        if let Some(usage) = backend.get_last_usage().await {
            delta_input_tokens += usage.input_tokens as i64;
            delta_output_tokens += usage.output_tokens as i64;
            delta_cost_usd += pricing.cost(usage.input_tokens, usage.output_tokens);
        }

        if response.tool_calls.is_empty() {
            yielded = true;
            break;
        }

        let mut stop_after_this_response = false;

        for call in &response.tool_calls {
            if actions_in_turn >= ctx.max_actions_per_turn {
                // Cap reached: remaining calls in this response are dropped,
                // not deferred (spec §4.4 step 4a).
                capped = true;
                stop_after_this_response = true;
                break;
            }

            let action_type = action_type_for_tool_name(&call.name)?;
            let outcome = dispatcher
                .dispatch(action_type, ctx.turn_number, &call.arguments)
                .await?;
            actions_in_turn += 1;
            if action_type.is_movement() {
                movements_in_turn += 1;
            }

            let tool_message = Message::tool_result(
                call.id.clone(),
                serde_json::to_string(&outcome.result).unwrap_or_default(),
            );
            conversation.push(tool_message);

            if outcome.goal_reached {
                goal_reached = true;
                stop_after_this_response = true;
                break;
            }
        }

        if stop_after_this_response {
            yielded = true;
            break;
        }
        // Otherwise the model may still have more tool calls to make; loop
        // back and send the updated conversation (spec §4.4 step 5).
    }

    Ok(TurnOutcome {
        actions_executed: actions_in_turn,
        movements_executed: movements_in_turn,
        yielded,
        capped,
        goal_reached,
        delta_input_tokens,
        delta_output_tokens,
        delta_cost_usd,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pricing_cost_is_linear_in_tokens() {
        let pricing = Pricing {
            input_price_per_1k: 1.0,
            output_price_per_1k: 2.0,
        };
        assert_eq!(pricing.cost(1000, 500), 1.0 + 1.0);
    }

    #[test]
    fn initial_message_mentions_experiment_id_reminder() {
        let ctx = TurnContext {
            experiment_id: 42,
            turn_number: 1,
            position: (0, 1),
            goal_description: "reach the far corner",
            prompt_template: "You are navigating a maze.",
            max_actions_per_turn: 5,
        };
        let msg = build_initial_message(&ctx);
        assert!(msg.content.contains("experimentId: 42"));
        assert!(msg.content.contains("pass experimentId"));
    }
}
