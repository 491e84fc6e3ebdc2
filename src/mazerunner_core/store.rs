//! Data Store Adapter: durable storage, advisory-lock concurrency control,
//! and the single shared "current position" accessor (spec §3, §4.2).
//!
//! Schema-on-write, `CREATE TABLE IF NOT EXISTS` migrations run once at
//! startup rather than a separate migration tool — this crate owns exactly
//! three tables and has no need for versioned migrations yet.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use crate::mazerunner_core::error::{Error, ErrorKind};
use crate::mazerunner_core::world::{Maze, TileType};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Aborted,
}

impl ExecutionStatus {
    fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Succeeded => "SUCCEEDED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::TimedOut => "TIMED_OUT",
            ExecutionStatus::Aborted => "ABORTED",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "RUNNING" => ExecutionStatus::Running,
            "SUCCEEDED" => ExecutionStatus::Succeeded,
            "FAILED" => ExecutionStatus::Failed,
            "TIMED_OUT" => ExecutionStatus::TimedOut,
            _ => ExecutionStatus::Aborted,
        }
    }
}

/// Immutable configuration blob captured at admission (spec §3
/// `Experiment.model_config`). Never re-read or re-merged after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub num_ctx: i64,
    pub temperature: f64,
    pub repeat_penalty: f64,
    pub num_predict: i64,
    pub recall_interval: i64,
    pub max_recall_actions: i64,
    pub max_moves: i64,
    pub max_duration_minutes: f64,
    pub max_actions_per_turn: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastError {
    pub error_kind: ErrorKind,
    pub cause: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewExperiment {
    pub maze_id: i64,
    pub model_name: String,
    pub prompt_version: String,
    pub llm_provider: String,
    pub start_x: i32,
    pub start_y: i32,
    pub goal_description: String,
    pub model_config: ModelConfig,
    pub execution_id: String,
    pub execution_name: String,
    pub message_id: String,
}

#[derive(Debug, Clone)]
pub struct Experiment {
    pub id: i64,
    pub maze_id: i64,
    pub model_name: String,
    pub prompt_version: String,
    pub llm_provider: String,
    pub start_x: i32,
    pub start_y: i32,
    pub goal_description: String,
    pub model_config: ModelConfig,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub goal_found: Option<bool>,
    pub execution_status: ExecutionStatus,
    pub last_error: Option<LastError>,
    pub execution_id: String,
    pub execution_name: String,
    pub message_id: String,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub total_cost_usd: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    MoveNorth,
    MoveSouth,
    MoveEast,
    MoveWest,
    Recall,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::MoveNorth => "move_north",
            ActionType::MoveSouth => "move_south",
            ActionType::MoveEast => "move_east",
            ActionType::MoveWest => "move_west",
            ActionType::Recall => "recall",
        }
    }

    pub fn is_movement(&self) -> bool {
        !matches!(self, ActionType::Recall)
    }

    fn from_str(s: &str) -> Self {
        match s {
            "move_north" => ActionType::MoveNorth,
            "move_south" => ActionType::MoveSouth,
            "move_east" => ActionType::MoveEast,
            "move_west" => ActionType::MoveWest,
            _ => ActionType::Recall,
        }
    }
}

/// One observed tile, the unit stored in `agent_actions.tiles_seen`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeenTile {
    pub x: i32,
    pub y: i32,
    pub tile_type: TileType,
}

#[derive(Debug, Clone)]
pub struct NewAction {
    pub action_type: ActionType,
    pub reasoning: Option<String>,
    pub from_x: i32,
    pub from_y: i32,
    pub to_x: Option<i32>,
    pub to_y: Option<i32>,
    pub success: bool,
    pub tiles_seen: Vec<SeenTile>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone)]
pub struct AgentAction {
    pub id: i64,
    pub experiment_id: i64,
    pub step_number: i64,
    pub turn_number: i64,
    pub action_type: ActionType,
    pub reasoning: Option<String>,
    pub from_x: i32,
    pub from_y: i32,
    pub to_x: Option<i32>,
    pub to_y: Option<i32>,
    pub success: bool,
    pub tiles_seen: Vec<SeenTile>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_usd: f64,
    pub timestamp: DateTime<Utc>,
}

/// The subset of `Store`'s contract the Turn Loop Scheduler and Tool
/// Dispatcher actually depend on, factored out so the scenario test suite
/// (spec §8) can run against an in-process fake instead of a real Postgres
/// instance. `Store` implements this by delegating to its own inherent
/// methods; `FakeStore` implements it directly over an in-memory map.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn current_position(&self, experiment_id: i64) -> Result<(i32, i32), Error>;

    async fn append_action(
        &self,
        experiment_id: i64,
        turn_number: i64,
        action: NewAction,
    ) -> Result<AgentAction, Error>;

    async fn movements_since_last_recall(&self, experiment_id: i64) -> Result<i64, Error>;

    async fn recall_tiles(&self, experiment_id: i64, limit: i64) -> Result<Vec<SeenTile>, Error>;

    async fn load_experiment(&self, experiment_id: i64) -> Result<Experiment, Error>;

    async fn record_turn_tokens(
        &self,
        experiment_id: i64,
        delta_input: i64,
        delta_output: i64,
        delta_cost: f64,
    ) -> Result<(), Error>;

    async fn finalize(
        &self,
        experiment_id: i64,
        status: ExecutionStatus,
        goal_found: Option<bool>,
        last_error: Option<LastError>,
    ) -> Result<(), Error>;
}

pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create the three tables this crate owns if they don't already exist,
    /// plus the indexed accessors named in spec §6.
    async fn migrate(&self) -> Result<(), Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mazes (
                id BIGSERIAL PRIMARY KEY,
                width INT NOT NULL,
                height INT NOT NULL,
                grid JSONB NOT NULL,
                start_x INT NOT NULL,
                start_y INT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS experiments (
                id BIGSERIAL PRIMARY KEY,
                maze_id BIGINT NOT NULL REFERENCES mazes(id),
                model_name TEXT NOT NULL,
                prompt_version TEXT NOT NULL,
                llm_provider TEXT NOT NULL,
                start_x INT NOT NULL,
                start_y INT NOT NULL,
                goal_description TEXT NOT NULL,
                model_config JSONB NOT NULL,
                started_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                completed_at TIMESTAMPTZ,
                goal_found BOOLEAN,
                execution_status TEXT NOT NULL,
                last_error JSONB,
                execution_id TEXT NOT NULL,
                execution_name TEXT NOT NULL,
                message_id TEXT NOT NULL,
                total_input_tokens BIGINT NOT NULL DEFAULT 0,
                total_output_tokens BIGINT NOT NULL DEFAULT 0,
                total_cost_usd DOUBLE PRECISION NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_experiments_status
                ON experiments(execution_status);
            CREATE INDEX IF NOT EXISTS idx_experiments_name
                ON experiments(execution_name);

            CREATE TABLE IF NOT EXISTS agent_actions (
                id BIGSERIAL PRIMARY KEY,
                experiment_id BIGINT NOT NULL REFERENCES experiments(id),
                step_number BIGINT NOT NULL,
                turn_number BIGINT NOT NULL,
                action_type TEXT NOT NULL,
                reasoning TEXT,
                from_x INT NOT NULL,
                from_y INT NOT NULL,
                to_x INT,
                to_y INT,
                success BOOLEAN NOT NULL,
                tiles_seen JSONB NOT NULL DEFAULT '[]',
                input_tokens BIGINT NOT NULL DEFAULT 0,
                output_tokens BIGINT NOT NULL DEFAULT 0,
                cost_usd DOUBLE PRECISION NOT NULL DEFAULT 0,
                "timestamp" TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (experiment_id, step_number)
            );

            CREATE INDEX IF NOT EXISTS idx_actions_experiment_step
                ON agent_actions(experiment_id, step_number DESC);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist a maze definition seeded out of band by an operator (see
    /// `maze_seed`). Mazes are otherwise read-only reference data.
    pub async fn insert_maze(&self, maze: &Maze) -> Result<i64, Error> {
        let grid_json = serde_json::to_value(maze.grid())?;
        let row = sqlx::query(
            r#"
            INSERT INTO mazes (width, height, grid, start_x, start_y)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(maze.width)
        .bind(maze.height)
        .bind(&grid_json)
        .bind(maze.start_x)
        .bind(maze.start_y)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("id"))
    }

    pub async fn load_maze(&self, id: i64) -> Result<Maze, Error> {
        let row = sqlx::query("SELECT grid, start_x, start_y FROM mazes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::new(ErrorKind::Internal, format!("maze {id} not found")))?;

        let grid_json: serde_json::Value = row.get("grid");
        let grid: Vec<Vec<TileType>> = serde_json::from_value(grid_json)?;
        Maze::new(id, grid, row.get("start_x"), row.get("start_y"))
    }

    pub async fn create_experiment(&self, new: NewExperiment) -> Result<i64, Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO experiments
                (maze_id, model_name, prompt_version, llm_provider, start_x, start_y,
                 goal_description, model_config, execution_status,
                 execution_id, execution_name, message_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING id
            "#,
        )
        .bind(new.maze_id)
        .bind(&new.model_name)
        .bind(&new.prompt_version)
        .bind(&new.llm_provider)
        .bind(new.start_x)
        .bind(new.start_y)
        .bind(&new.goal_description)
        .bind(Json(&new.model_config))
        .bind(ExecutionStatus::Running.as_str())
        .bind(&new.execution_id)
        .bind(&new.execution_name)
        .bind(&new.message_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("id"))
    }

    pub async fn load_experiment(&self, id: i64) -> Result<Experiment, Error> {
        let row = sqlx::query(
            r#"
            SELECT id, maze_id, model_name, prompt_version, llm_provider, start_x, start_y,
                   goal_description, model_config, started_at, completed_at, goal_found,
                   execution_status, last_error, execution_id, execution_name, message_id,
                   total_input_tokens, total_output_tokens, total_cost_usd
            FROM experiments WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::new(ErrorKind::Internal, format!("experiment {id} not found")))?;

        let model_config: Json<ModelConfig> = row.get("model_config");
        let last_error: Option<Json<LastError>> = row.get("last_error");

        Ok(Experiment {
            id: row.get("id"),
            maze_id: row.get("maze_id"),
            model_name: row.get("model_name"),
            prompt_version: row.get("prompt_version"),
            llm_provider: row.get("llm_provider"),
            start_x: row.get("start_x"),
            start_y: row.get("start_y"),
            goal_description: row.get("goal_description"),
            model_config: model_config.0,
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            goal_found: row.get("goal_found"),
            execution_status: ExecutionStatus::from_str(row.get("execution_status")),
            last_error: last_error.map(|j| j.0),
            execution_id: row.get("execution_id"),
            execution_name: row.get("execution_name"),
            message_id: row.get("message_id"),
            total_input_tokens: row.get("total_input_tokens"),
            total_output_tokens: row.get("total_output_tokens"),
            total_cost_usd: row.get("total_cost_usd"),
        })
    }

    /// Implements the §3 "Current Position Rule" against whichever
    /// connection is handed in, so callers holding the per-experiment
    /// advisory lock read a consistent snapshot.
    async fn current_position_on(
        conn: &mut sqlx::PgConnection,
        experiment_id: i64,
    ) -> Result<(i32, i32), Error> {
        let last = sqlx::query(
            r#"
            SELECT from_x, from_y, to_x, to_y FROM agent_actions
            WHERE experiment_id = $1
            ORDER BY step_number DESC LIMIT 1
            "#,
        )
        .bind(experiment_id)
        .fetch_optional(&mut *conn)
        .await?;

        match last {
            None => {
                let row = sqlx::query("SELECT start_x, start_y FROM experiments WHERE id = $1")
                    .bind(experiment_id)
                    .fetch_one(&mut *conn)
                    .await?;
                Ok((row.get("start_x"), row.get("start_y")))
            }
            Some(row) => {
                let to_x: Option<i32> = row.get("to_x");
                let to_y: Option<i32> = row.get("to_y");
                match (to_x, to_y) {
                    (Some(x), Some(y)) => Ok((x, y)),
                    _ => Ok((row.get("from_x"), row.get("from_y"))),
                }
            }
        }
    }

    pub async fn current_position(&self, experiment_id: i64) -> Result<(i32, i32), Error> {
        let mut conn = self.pool.acquire().await?;
        Self::current_position_on(&mut conn, experiment_id).await
    }

    async fn next_step_number_on(
        conn: &mut sqlx::PgConnection,
        experiment_id: i64,
    ) -> Result<i64, Error> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(step_number), 0) + 1 AS next FROM agent_actions WHERE experiment_id = $1",
        )
        .bind(experiment_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(row.get("next"))
    }

    pub async fn next_step_number(&self, experiment_id: i64) -> Result<i64, Error> {
        let mut conn = self.pool.acquire().await?;
        Self::next_step_number_on(&mut conn, experiment_id).await
    }

    /// Append one audit row under an advisory lock keyed on `experiment_id`,
    /// covering `(current_position, next_step_number, insert)` as one
    /// serialized unit (spec §4.2). Returns the position and step assigned.
    pub async fn append_action(
        &self,
        experiment_id: i64,
        turn_number: i64,
        action: NewAction,
    ) -> Result<AgentAction, Error> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(experiment_id)
            .execute(&mut *conn)
            .await?;

        let result = async {
            let step_number = Self::next_step_number_on(&mut conn, experiment_id).await?;
            let tiles_seen_json = serde_json::to_value(&action.tiles_seen)?;

            let row = sqlx::query(
                r#"
                INSERT INTO agent_actions
                    (experiment_id, step_number, turn_number, action_type, reasoning,
                     from_x, from_y, to_x, to_y, success, tiles_seen,
                     input_tokens, output_tokens, cost_usd)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                RETURNING id, "timestamp"
                "#,
            )
            .bind(experiment_id)
            .bind(step_number)
            .bind(turn_number)
            .bind(action.action_type.as_str())
            .bind(&action.reasoning)
            .bind(action.from_x)
            .bind(action.from_y)
            .bind(action.to_x)
            .bind(action.to_y)
            .bind(action.success)
            .bind(&tiles_seen_json)
            .bind(action.input_tokens)
            .bind(action.output_tokens)
            .bind(action.cost_usd)
            .fetch_one(&mut *conn)
            .await?;

            Ok::<AgentAction, Error>(AgentAction {
                id: row.get("id"),
                experiment_id,
                step_number,
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
                timestamp: row.get("timestamp"),
            })
        }
        .await;

        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(experiment_id)
            .execute(&mut *conn)
            .await?;

        result
    }

    /// Movement actions taken since the most recent `recall` (or since
    /// experiment start), used to enforce the recall cooldown. A failed
    /// movement still counts; only `recall` actions reset the counter.
    pub async fn movements_since_last_recall(&self, experiment_id: i64) -> Result<i64, Error> {
        let row = sqlx::query(
            r#"
            WITH last_recall AS (
                SELECT COALESCE(MAX(step_number), 0) AS step
                FROM agent_actions
                WHERE experiment_id = $1 AND action_type = 'recall'
            )
            SELECT COUNT(*) AS moves
            FROM agent_actions, last_recall
            WHERE experiment_id = $1
              AND step_number > last_recall.step
              AND action_type <> 'recall'
            "#,
        )
        .bind(experiment_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("moves"))
    }

    /// All distinct `(x, y, tile_type)` ever observed via `tiles_seen`,
    /// de-duplicated by position keeping the most recent observation, capped
    /// at `limit` entries, most-recent-first (spec §4.3 "Recall return
    /// payload"). Rows already arrive ordered `step_number DESC`; a
    /// position's first appearance in that scan is its most recent sighting,
    /// so dedup-by-insertion preserves the required order straight through
    /// to the truncation (a `HashMap` would scramble it).
    pub async fn recall_tiles(
        &self,
        experiment_id: i64,
        limit: i64,
    ) -> Result<Vec<SeenTile>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT tiles_seen, step_number FROM agent_actions
            WHERE experiment_id = $1 AND tiles_seen <> '[]'
            ORDER BY step_number DESC
            "#,
        )
        .bind(experiment_id)
        .fetch_all(&self.pool)
        .await?;

        let mut seen_positions: std::collections::HashSet<(i32, i32)> =
            std::collections::HashSet::new();
        let mut tiles: Vec<SeenTile> = Vec::new();
        for row in rows {
            let raw: serde_json::Value = row.get("tiles_seen");
            let row_tiles: Vec<SeenTile> = serde_json::from_value(raw)?;
            for tile in row_tiles {
                if seen_positions.insert((tile.x, tile.y)) {
                    tiles.push(tile);
                }
            }
        }

        tiles.truncate(limit.max(0) as usize);
        Ok(tiles)
    }

    /// Typed numeric accumulation — never string concatenation (spec §9).
    pub async fn record_turn_tokens(
        &self,
        experiment_id: i64,
        delta_input: i64,
        delta_output: i64,
        delta_cost: f64,
    ) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE experiments
            SET total_input_tokens = total_input_tokens + $2,
                total_output_tokens = total_output_tokens + $3,
                total_cost_usd = total_cost_usd + $4
            WHERE id = $1
            "#,
        )
        .bind(experiment_id)
        .bind(delta_input)
        .bind(delta_output)
        .bind(delta_cost)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Idempotent: a no-op (with a log line) if already finalized.
    pub async fn finalize(
        &self,
        experiment_id: i64,
        status: ExecutionStatus,
        goal_found: Option<bool>,
        last_error: Option<LastError>,
    ) -> Result<(), Error> {
        let already_done: Option<DateTime<Utc>> =
            sqlx::query("SELECT completed_at FROM experiments WHERE id = $1")
                .bind(experiment_id)
                .fetch_one(&self.pool)
                .await?
                .get("completed_at");

        if already_done.is_some() {
            log::warn!("finalize called again for already-finalized experiment {experiment_id}");
            return Ok(());
        }

        sqlx::query(
            r#"
            UPDATE experiments
            SET completed_at = now(), execution_status = $2, goal_found = $3, last_error = $4
            WHERE id = $1
            "#,
        )
        .bind(experiment_id)
        .bind(status.as_str())
        .bind(goal_found)
        .bind(last_error.map(|e| Json(e)))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DataStore for Store {
    async fn current_position(&self, experiment_id: i64) -> Result<(i32, i32), Error> {
        self.current_position(experiment_id).await
    }

    async fn append_action(
        &self,
        experiment_id: i64,
        turn_number: i64,
        action: NewAction,
    ) -> Result<AgentAction, Error> {
        self.append_action(experiment_id, turn_number, action).await
    }

    async fn movements_since_last_recall(&self, experiment_id: i64) -> Result<i64, Error> {
        self.movements_since_last_recall(experiment_id).await
    }

    async fn recall_tiles(&self, experiment_id: i64, limit: i64) -> Result<Vec<SeenTile>, Error> {
        self.recall_tiles(experiment_id, limit).await
    }

    async fn load_experiment(&self, experiment_id: i64) -> Result<Experiment, Error> {
        self.load_experiment(experiment_id).await
    }

    async fn record_turn_tokens(
        &self,
        experiment_id: i64,
        delta_input: i64,
        delta_output: i64,
        delta_cost: f64,
    ) -> Result<(), Error> {
        self.record_turn_tokens(experiment_id, delta_input, delta_output, delta_cost)
            .await
    }

    async fn finalize(
        &self,
        experiment_id: i64,
        status: ExecutionStatus,
        goal_found: Option<bool>,
        last_error: Option<LastError>,
    ) -> Result<(), Error> {
        self.finalize(experiment_id, status, goal_found, last_error).await
    }
}
