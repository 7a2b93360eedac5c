// Captain recommender entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file, stdout carries the result)
// 2. Load config
// 3. Build the LLM client
// 4. Read the squad snapshot named on the command line
// 5. Run the recommendation, cancelling on Ctrl+C
// 6. Print the result as JSON

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use captain_app::{CancelFlag, Recommender};
use captain_core::config;
use captain_fpl::ingest::SquadSnapshot;
use captain_llm::client::LlmClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let snapshot_path = match std::env::args_os().nth(1) {
        Some(path) => PathBuf::from(path),
        None => anyhow::bail!("usage: captain <squad-snapshot.json>"),
    };

    // 1. Initialize tracing
    init_tracing()?;
    info!("Captain recommender starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: model={}, top_k={}, budget={} chars",
        config.engine.model, config.engine.top_k_candidates, config.engine.context_size_budget
    );

    // 3. Build the LLM client from config
    let llm_client = LlmClient::from_config(&config);
    match &llm_client {
        LlmClient::Active(_) => info!("LLM client initialized (API key configured)"),
        LlmClient::Disabled => warn!("LLM client disabled (no API key), results will use the fallback ranking"),
    }

    // 4. Read the snapshot
    let raw = std::fs::read_to_string(&snapshot_path)
        .with_context(|| format!("failed to read {}", snapshot_path.display()))?;
    let snapshot: SquadSnapshot = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse squad snapshot {}", snapshot_path.display()))?;
    info!(
        "Snapshot loaded: gameweek {}, {} elements, {} picks",
        snapshot.gameweek,
        snapshot.elements.len(),
        snapshot.picks.len()
    );

    // 5. Run, cancelling on Ctrl+C
    let recommender = Recommender::new(config.engine, Arc::new(llm_client))
        .context("invalid engine configuration")?;
    let cancel = CancelFlag::new();
    let ctrl_c_flag = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, cancelling");
            ctrl_c_flag.cancel();
        }
    });

    let result = recommender
        .recommend_with_cancel(&snapshot, &cancel)
        .await
        .context("recommendation failed")?;
    ctrl_c.abort();

    // 6. Print
    println!("{}", serde_json::to_string_pretty(&result)?);
    info!("Captain recommender finished");
    Ok(())
}

/// Initialize tracing to log to a file, keeping stdout clean for the JSON result.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("captain.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("captain=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
