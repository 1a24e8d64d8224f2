//! Application entry point: neural style transfer over a console transport.
//!
//! # Startup sequence
//!
//! 1. Initialise logging (`RUST_LOG`, default `info`).
//! 2. Load [`AppConfig`] from the path given as the first argument, or from
//!    the platform `settings.toml` (defaults on first run).
//! 3. Open the style catalog over the models directory.
//! 4. Build the model cache, image pipeline and inference executor.
//! 5. Build the session registry and start the idle sweeper.
//! 6. Read `<chat-id> <command>` lines from stdin until EOF or Ctrl-C, then
//!    close the executor and wait for every session to answer its last job.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use neural_style::{
    config::{AppConfig, AppPaths},
    imaging::ImagePipeline,
    inference::InferenceExecutor,
    session::SessionRegistry,
    style::{FsArtifactStore, ModelCache, StyleCatalog, TransformerNetLoader},
    transport::{
        console::{parse_line, ConsoleSink},
        ReplySink,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // 2. Config
    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => AppConfig::load_from(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => AppConfig::load().context("failed to load settings.toml")?,
    };
    log::info!("Config loaded: {:?}", config);

    // 3. Catalog
    let models_dir = config.models.models_dir();
    std::fs::create_dir_all(&models_dir)
        .with_context(|| format!("cannot create {}", models_dir.display()))?;
    let store = Arc::new(FsArtifactStore::new(&models_dir, config.models.extension.clone()));
    let catalog = Arc::new(
        StyleCatalog::open(store)
            .with_context(|| format!("cannot read models from {}", models_dir.display()))?,
    );

    // 4. Cache + executor
    let loader = Arc::new(TransformerNetLoader::new(config.models.use_gpu));
    log::info!("Inference device: {:?}", loader.device());
    let cache = Arc::new(ModelCache::new(
        Arc::clone(&catalog),
        loader,
        config.models.cache_capacity,
    ));
    let pipeline = ImagePipeline::new(&config.image);
    let executor = InferenceExecutor::from_config(pipeline, cache, &config.executor);
    log::info!(
        "Executor: {} worker(s), queue timeout {:?}",
        executor.workers(),
        config.executor.queue_timeout()
    );

    // 5. Sessions
    let output_dir = AppPaths::new().output_dir;
    let sink: Arc<dyn ReplySink> = Arc::new(ConsoleSink::new(tokio::io::stdout(), &output_dir));
    let registry = SessionRegistry::new(catalog, executor.clone(), sink, config.session.clone());
    let sweeper = registry.spawn_sweeper();
    log::info!("Results are written to {}", output_dir.display());

    // 6. Console loop
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted");
                None
            }
        };
        let Some(line) = line else {
            break;
        };

        let Some((key, input)) = parse_line(&line) else {
            if !line.trim().is_empty() && !line.trim_start().starts_with('#') {
                log::warn!("Ignoring line without a command: {line:?}");
            }
            continue;
        };
        let event = match input.into_event().await {
            Ok(event) => event,
            Err(e) => {
                log::warn!("{key}: {e}");
                continue;
            }
        };
        if let Err(e) = registry.dispatch(key, event).await {
            log::warn!("{e}");
        }
    }

    // Queued jobs fail fast; running ones finish and are delivered.
    executor.close();
    sweeper.abort();
    registry.shutdown().await;
    log::info!("Shut down");
    Ok(())
}
