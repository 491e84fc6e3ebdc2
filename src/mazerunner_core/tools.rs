//! Tool Dispatcher: executes a single tool request against authoritative
//! world state and persists the audit row (spec §4.3).

use serde::Deserialize;

use crate::mazerunner_core::error::Error;
use crate::mazerunner_core::store::{ActionType, DataStore, NewAction, SeenTile};
use crate::mazerunner_core::tool_schema::ToolResult;
use crate::mazerunner_core::world::{Classification, Maze, TileType};

/// Vision radius used for move observations. Not in the trigger envelope or
/// system config — the original spec leaves this as a constant property of
/// the experimental design rather than a per-run knob.
pub const VISION_RANGE: i32 = 3;

#[derive(Debug, Deserialize)]
pub struct ToolArguments {
    #[serde(rename = "experimentId")]
    pub experiment_id: i64,
    #[serde(default)]
    pub reasoning: Option<String>,
}

fn parse_arguments(raw: &serde_json::Value) -> Result<ToolArguments, Error> {
    serde_json::from_value(raw.clone())
        .map_err(|e| Error::tool_invalid_input(format!("malformed tool arguments: {e}")))
}

fn direction_offset(action_type: ActionType) -> (i32, i32) {
    match action_type {
        ActionType::MoveNorth => (0, -1),
        ActionType::MoveSouth => (0, 1),
        ActionType::MoveEast => (1, 0),
        ActionType::MoveWest => (-1, 0),
        ActionType::Recall => (0, 0),
    }
}

/// Outcome of one dispatched tool call, threaded back up to the invoker so
/// it can decide whether to stop processing further calls this turn.
pub struct DispatchOutcome {
    pub result: ToolResult,
    pub goal_reached: bool,
}

pub struct ToolDispatcher<'a> {
    pub store: &'a dyn DataStore,
    pub maze: &'a Maze,
    pub recall_interval: i64,
    pub max_recall_actions: i64,
}

impl<'a> ToolDispatcher<'a> {
    pub fn new(
        store: &'a dyn DataStore,
        maze: &'a Maze,
        recall_interval: i64,
        max_recall_actions: i64,
    ) -> Self {
        Self {
            store,
            maze,
            recall_interval,
            max_recall_actions,
        }
    }

    pub async fn dispatch(
        &self,
        action_type: ActionType,
        turn_number: i64,
        raw_arguments: &serde_json::Value,
    ) -> Result<DispatchOutcome, Error> {
        let args = parse_arguments(raw_arguments)?;

        match action_type {
            ActionType::Recall => self.dispatch_recall(args, turn_number).await,
            _ => self.dispatch_move(action_type, args, turn_number).await,
        }
    }

    async fn dispatch_move(
        &self,
        action_type: ActionType,
        args: ToolArguments,
        turn_number: i64,
    ) -> Result<DispatchOutcome, Error> {
        let (dx, dy) = direction_offset(action_type);
        let (fx, fy) = self.store.current_position(args.experiment_id).await?;
        let (tx, ty) = (fx + dx, fy + dy);

        let classification = self.maze.classify_tile(tx, ty);

        if !classification.can_enter() {
            let action = NewAction {
                action_type,
                reasoning: args.reasoning,
                from_x: fx,
                from_y: fy,
                to_x: None,
                to_y: None,
                success: false,
                tiles_seen: Vec::new(),
                input_tokens: 0,
                output_tokens: 0,
                cost_usd: 0.0,
            };
            self.store
                .append_action(args.experiment_id, turn_number, action)
                .await?;

            let message = match classification {
                Classification::OutOfBounds => "blocked: out of bounds",
                Classification::Tile(TileType::Wall) => "blocked: wall",
                _ => unreachable!("can_enter() already excluded this case"),
            };
            return Ok(DispatchOutcome {
                result: ToolResult::success(serde_json::json!({
                    "success": false,
                    "message": message,
                    "position": {"x": fx, "y": fy},
                    "visible": [],
                })),
                goal_reached: false,
            });
        }

        let seen = self.maze.vision(tx, ty, VISION_RANGE);
        let tiles_seen: Vec<SeenTile> = seen
            .into_iter()
            .map(|((x, y), tile_type)| SeenTile { x, y, tile_type })
            .collect();

        let is_goal = classification.is_goal();

        let action = NewAction {
            action_type,
            reasoning: args.reasoning,
            from_x: fx,
            from_y: fy,
            to_x: Some(tx),
            to_y: Some(ty),
            success: true,
            tiles_seen: tiles_seen.clone(),
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
        };
        self.store
            .append_action(args.experiment_id, turn_number, action)
            .await?;

        let visible: Vec<_> = tiles_seen
            .iter()
            .map(|t| serde_json::json!({"x": t.x, "y": t.y, "tile": t.tile_type}))
            .collect();

        Ok(DispatchOutcome {
            result: ToolResult::success(serde_json::json!({
                "success": true,
                "message": if is_goal { "reached the goal" } else { "moved" },
                "position": {"x": tx, "y": ty},
                "visible": visible,
            })),
            goal_reached: is_goal,
        })
    }

    async fn dispatch_recall(
        &self,
        args: ToolArguments,
        turn_number: i64,
    ) -> Result<DispatchOutcome, Error> {
        let moves_since = self
            .store
            .movements_since_last_recall(args.experiment_id)
            .await?;

        if moves_since < self.recall_interval {
            let (fx, fy) = self.store.current_position(args.experiment_id).await?;
            let action = NewAction {
                action_type: ActionType::Recall,
                reasoning: args.reasoning,
                from_x: fx,
                from_y: fy,
                to_x: None,
                to_y: None,
                success: false,
                tiles_seen: Vec::new(),
                input_tokens: 0,
                output_tokens: 0,
                cost_usd: 0.0,
            };
            self.store
                .append_action(args.experiment_id, turn_number, action)
                .await?;

            let moves_required = self.recall_interval - moves_since;
            return Ok(DispatchOutcome {
                result: ToolResult::success(serde_json::json!({
                    "success": false,
                    "message": format!("cooldown: need {moves_required} more moves"),
                    "moves_since_last_recall": moves_since,
                    "moves_required": moves_required,
                })),
                goal_reached: false,
            });
        }

        let tiles = self
            .store
            .recall_tiles(args.experiment_id, self.max_recall_actions)
            .await?;
        let (fx, fy) = self.store.current_position(args.experiment_id).await?;

        let action = NewAction {
            action_type: ActionType::Recall,
            reasoning: args.reasoning,
            from_x: fx,
            from_y: fy,
            to_x: None,
            to_y: None,
            success: true,
            tiles_seen: tiles.clone(),
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
        };
        self.store
            .append_action(args.experiment_id, turn_number, action)
            .await?;

        let visible: Vec<_> = tiles
            .iter()
            .map(|t| serde_json::json!({"x": t.x, "y": t.y, "tile": t.tile_type}))
            .collect();

        Ok(DispatchOutcome {
            result: ToolResult::success(serde_json::json!({
                "success": true,
                "message": format!("recalled {} tiles", visible.len()),
                "tiles": visible,
            })),
            goal_reached: false,
        })
    }
}

/// Maps a model-supplied tool name to the dispatcher's `ActionType`.
/// Unknown names are `TOOL_INVALID_INPUT`, not a panic: the model is an
/// untrusted caller.
pub fn action_type_for_tool_name(name: &str) -> Result<ActionType, Error> {
    match name {
        "move_north" => Ok(ActionType::MoveNorth),
        "move_south" => Ok(ActionType::MoveSouth),
        "move_east" => Ok(ActionType::MoveEast),
        "move_west" => Ok(ActionType::MoveWest),
        "recall" => Ok(ActionType::Recall),
        other => Err(Error::tool_invalid_input(format!("unknown tool '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_offsets_are_cardinal() {
        assert_eq!(direction_offset(ActionType::MoveNorth), (0, -1));
        assert_eq!(direction_offset(ActionType::MoveSouth), (0, 1));
        assert_eq!(direction_offset(ActionType::MoveEast), (1, 0));
        assert_eq!(direction_offset(ActionType::MoveWest), (-1, 0));
    }

    #[test]
    fn unknown_tool_name_is_invalid_input() {
        let err = action_type_for_tool_name("teleport").unwrap_err();
        assert_eq!(err.kind, crate::mazerunner_core::error::ErrorKind::ToolInvalidInput);
    }

    #[test]
    fn parse_arguments_requires_experiment_id() {
        let raw = serde_json::json!({"reasoning": "testing"});
        let err = parse_arguments(&raw).unwrap_err();
        assert_eq!(err.kind, crate::mazerunner_core::error::ErrorKind::ToolInvalidInput);
    }

    #[test]
    fn parse_arguments_accepts_missing_reasoning() {
        let raw = serde_json::json!({"experimentId": 7});
        let args = parse_arguments(&raw).unwrap();
        assert_eq!(args.experiment_id, 7);
        assert!(args.reasoning.is_none());
    }
}
