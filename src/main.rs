use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use mailmind::ai::{HttpInferenceClient, ResponseEngine, TemplateSet};
use mailmind::config::Config;
use mailmind::filter::FilterEngine;
use mailmind::mail::transport::ImapSmtpTransport;
use mailmind::pipeline::{Orchestrator, spawn_driver};
use mailmind::store::{Database, LibSqlBackend};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config_path =
        std::env::var("MAILMIND_CONFIG").unwrap_or_else(|_| "mailmind.json".to_string());
    let config_path = Path::new(&config_path);

    // First run: write an editable sample and bail out.
    if !config_path.exists() {
        std::fs::write(config_path, Config::sample_json())
            .with_context(|| format!("failed to write {}", config_path.display()))?;
        eprintln!(
            "No configuration found — wrote a sample to {}. Edit it and run again.",
            config_path.display()
        );
        return Ok(());
    }

    let config = Config::load(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    init_tracing(&config.pipeline.log_path)?;

    eprintln!("📬 MailMind v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   IMAP: {}:{}", config.mail.imap_host, config.mail.imap_port);
    eprintln!("   Model: {}", config.inference.model);
    eprintln!("   Database: {}", config.pipeline.db_path);
    eprintln!("   Check interval: {}s\n", config.pipeline.check_interval_secs);

    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(Path::new(&config.pipeline.db_path))
            .await
            .context("failed to open database")?,
    );

    let filter = FilterEngine::from_config(&config.filter)?;
    let templates = match &config.pipeline.templates_path {
        Some(path) => TemplateSet::load(Path::new(path))?,
        None => TemplateSet::empty(),
    };

    let transport = Arc::new(ImapSmtpTransport::new(
        config.mail.clone(),
        config.from_address().to_string(),
    ));
    let client = Arc::new(HttpInferenceClient::new(&config.inference));
    let engine = Arc::new(ResponseEngine::new(
        client,
        db.clone(),
        templates,
        &config.inference,
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        db,
        transport,
        engine,
        filter,
        config.pipeline.signature.clone(),
        config.pipeline.variant.clone(),
        Duration::from_secs(config.pipeline.response_delay_secs),
    ));

    let (handle, shutdown) = spawn_driver(
        orchestrator,
        Duration::from_secs(config.pipeline.check_interval_secs),
    );

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("ctrl-c received, shutting down");
    shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    // The driver checks the flag between messages and during sleeps, so
    // an in-flight delivery finishes before the task exits.
    let _ = handle.await;

    Ok(())
}

/// Console plus non-blocking file logging. The guard must outlive main,
/// so it is leaked deliberately.
fn init_tracing(log_path: &str) -> anyhow::Result<()> {
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let path = Path::new(log_path);
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let file = path.file_name().map(|f| f.to_string_lossy().to_string()).unwrap_or_else(|| "mailmind.log".to_string());

    let appender = tracing_appender::rolling::never(dir, file);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);
    Box::leak(Box::new(guard));

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(tracing_subscriber::fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();
    Ok(())
}
