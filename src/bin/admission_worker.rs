//! Long-running queue consumer: reads trigger envelopes (one JSON object
//! per line) from stdin, admits each as a new experiment, and drives it
//! through the Turn Loop Scheduler (spec §4.6).
//!
//! The real trigger bus/ingress queue is an external collaborator out of
//! scope for this core (spec §1); stdin JSONL is fed into an
//! `InProcessTriggerSource` on a blocking thread and consumed through the
//! `TriggerSource` trait, the same seam a real queue adapter would sit
//! behind.

use clap::Parser;
use std::io::BufRead;
use std::sync::Arc;

use mazerunner_core::mazerunner_core::admission::{InProcessTriggerSource, TriggerSource};
use mazerunner_core::mazerunner_core::clients::local_chat::{InferenceOptions, LocalChatBackend};
use mazerunner_core::mazerunner_core::clients::managed_agent::ManagedAgentBackend;
use mazerunner_core::mazerunner_core::config::SystemConfig;
use mazerunner_core::mazerunner_core::invoker::Pricing;
use mazerunner_core::mazerunner_core::scheduler::TurnLoopScheduler;
use mazerunner_core::{Admission, ChatBackend, Store, TriggerEnvelope};

#[derive(Parser, Debug)]
#[command(name = "admission_worker")]
struct Args {
    #[arg(long, default_value = "maze_config.toml")]
    config: String,

    /// Static prompt template used for every admitted experiment. A real
    /// deployment resolves this per `prompt_version`; that resolver lives
    /// outside the core (spec §2 "Config & Prompt Resolver" is a separate
    /// component from this state machine).
    #[arg(long, default_value = "You are navigating a maze. Respond by calling exactly one tool.")]
    prompt_template: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = SystemConfig::load(std::path::Path::new(&args.config))?;
    let store = Arc::new(Store::connect(config.database_url()?).await?);
    let admission = Arc::new(Admission::new(store.clone(), config.clone()));
    let permits = admission.concurrency_limiter();

    let (tx, trigger_source) = InProcessTriggerSource::channel(64);

    // stdin reads block, so the JSON-parsing producer runs on a dedicated
    // blocking thread; only well-formed envelopes cross into the channel,
    // so `TriggerSource::receive` erroring means the source is exhausted.
    let producer = tokio::task::spawn_blocking(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    log::error!("stdin read error: {e}");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TriggerEnvelope>(&line) {
                Ok(envelope) => {
                    if tx.blocking_send(envelope).is_err() {
                        break;
                    }
                }
                Err(e) => log::error!("skipping malformed trigger envelope: {e}"),
            }
        }
    });

    loop {
        let envelope = match trigger_source.receive().await {
            Ok(envelope) => envelope,
            Err(_) => break,
        };

        let permit = permits.clone().acquire_owned().await?;
        let store = store.clone();
        let admission = admission.clone();
        let config = config.clone();
        let prompt_template = args.prompt_template.clone();

        tokio::spawn(async move {
            let _permit = permit;
            if let Err(err) = run_one(envelope, admission, store, config, prompt_template).await {
                log::error!("experiment run failed: {err}");
            }
        });
    }

    producer.await.ok();
    Ok(())
}

async fn run_one(
    envelope: TriggerEnvelope,
    admission: Arc<Admission>,
    store: Arc<Store>,
    config: SystemConfig,
    prompt_template: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let maze = store.load_maze(envelope.maze_id).await?;

    let execution_id = uuid::Uuid::new_v4().to_string();
    let execution_name = format!("{}-{}", envelope.model_name, envelope.prompt_version);
    let model_name = envelope.model_name.clone();
    let llm_provider = envelope.llm_provider.clone();

    let experiment_id = admission
        .admit(
            envelope,
            (maze.start_x, maze.start_y),
            execution_id,
            execution_name,
        )
        .await?;

    let model_config = store.load_experiment(experiment_id).await?.model_config;

    let endpoint = config
        .endpoint(&model_name, &llm_provider)
        .ok_or_else(|| {
            mazerunner_core::Error::config_missing(format!(
                "no endpoint configured for {model_name}:{llm_provider}"
            ))
        })?;

    let rate_limit_rpm = config.rate_limit_rpm(&model_name, &llm_provider)?;
    let pricing = Pricing {
        input_price_per_1k: endpoint.input_price_per_1k,
        output_price_per_1k: endpoint.output_price_per_1k,
    };

    let backend: Box<dyn ChatBackend> = if llm_provider == "local-chat" {
        Box::new(LocalChatBackend::new(
            endpoint.base_url.clone().unwrap_or_default(),
            config.chat_api_key.clone().unwrap_or_default(),
            model_name.clone(),
            InferenceOptions {
                num_ctx: model_config.num_ctx,
                temperature: model_config.temperature,
                repeat_penalty: model_config.repeat_penalty,
                num_predict: model_config.num_predict,
            },
        ))
    } else {
        Box::new(ManagedAgentBackend::new(
            endpoint.base_url.clone().unwrap_or_default(),
            config.chat_api_key.clone().unwrap_or_default(),
            model_name.clone(),
        ))
    };

    let scheduler = TurnLoopScheduler {
        store: &*store,
        maze: &maze,
        backend: backend.as_ref(),
        pricing,
        prompt_template: &prompt_template,
        rate_limit_rpm,
    };

    scheduler.run(experiment_id).await?;
    Ok(())
}
