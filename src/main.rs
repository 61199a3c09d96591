use std::sync::Arc;
use std::sync::atomic::Ordering;

use attache::agent::{ActionExtractor, spawn_extraction_worker};
use attache::config::AppConfig;
use attache::llm::{LlmBackend, LlmConfig, create_provider};
use attache::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env()?;

    // Read the backend's API key from environment
    let key_var = match config.backend {
        LlmBackend::Anthropic => "ANTHROPIC_API_KEY",
        LlmBackend::OpenAi => "OPENAI_API_KEY",
    };
    let api_key = std::env::var(key_var).unwrap_or_else(|_| {
        eprintln!("Error: {key_var} not set");
        eprintln!("  export {key_var}=...");
        std::process::exit(1);
    });

    eprintln!("attache v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.model);
    eprintln!("   Database: {}", config.db_path);
    eprintln!(
        "   Extraction interval: {}s\n",
        config.extract_interval.as_secs()
    );

    // Create LLM provider
    let llm_config = LlmConfig {
        backend: config.backend,
        api_key: secrecy::SecretString::from(api_key),
        model: config.model.clone(),
    };
    let llm = create_provider(&llm_config)?;

    // ── Database ─────────────────────────────────────────────────────────
    let db_path = std::path::Path::new(&config.db_path);
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_local(db_path).await.unwrap_or_else(
        |e| {
            eprintln!("Error: Failed to open database at {}: {}", config.db_path, e);
            std::process::exit(1);
        },
    ));

    // ── Extraction worker ────────────────────────────────────────────────
    let extractor = Arc::new(ActionExtractor::new(llm));
    let (handle, shutdown) =
        spawn_extraction_worker(Arc::clone(&db), extractor, config.extract_interval);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    shutdown.store(true, Ordering::Relaxed);
    handle.abort();

    Ok(())
}
