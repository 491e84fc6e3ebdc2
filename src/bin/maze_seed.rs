//! Operator utility: seed a `Maze` row from an ASCII grid file. Not part of
//! the orchestration core (spec §6 "Operator CLI surface").

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use mazerunner_core::mazerunner_core::config::SystemConfig;
use mazerunner_core::mazerunner_core::store::Store;
use mazerunner_core::Maze;

/// Seed a maze into the database from an ASCII grid file.
///
/// Grid format: one line per row, `.` empty, `#` wall, `G` goal. The start
/// position is given separately via `--start-x`/`--start-y`.
#[derive(Parser, Debug)]
#[command(name = "maze_seed")]
struct Args {
    /// Path to an ASCII grid file.
    #[arg(long)]
    grid_file: PathBuf,

    #[arg(long)]
    start_x: i32,

    #[arg(long)]
    start_y: i32,

    #[arg(long, default_value = "maze_config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = SystemConfig::load(&PathBuf::from(&args.config))?;
    let store = Arc::new(Store::connect(config.database_url()?).await?);

    let content = std::fs::read_to_string(&args.grid_file)?;
    let rows: Vec<&str> = content.lines().collect();
    let maze = Maze::from_ascii(0, &rows, args.start_x, args.start_y)?;

    let maze_id = store.insert_maze(&maze).await?;
    log::info!("seeded maze {maze_id} ({}x{})", maze.width, maze.height);
    println!("{maze_id}");
    Ok(())
}
