use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use mail_webhook::callback::{CallbackTransport, ReqwestTransport};
use mail_webhook::config::{Config, ServiceSettings};
use mail_webhook::dispatch::Dispatcher;
use mail_webhook::mail::{ImapConfig, ImapMailClient, MailClient, SessionLimited};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let settings = ServiceSettings::from_env();
    let config = Config::load(&settings.config_path)
        .with_context(|| format!("Failed to load {}", settings.config_path.display()))?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(false)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %settings.config_path.display(),
        selectors = config.mail_selectors.len(),
        callback = %config.callback.url,
        strategy = %config.callback.attachments.strategy,
        "Mail webhook starting"
    );

    let imap = ImapConfig::from_env()?;
    let max_sessions = imap.max_sessions;
    let mail: Arc<dyn MailClient> =
        Arc::new(SessionLimited::new(ImapMailClient::new(imap), max_sessions));
    let transport: Arc<dyn CallbackTransport> = Arc::new(ReqwestTransport::new());
    let dispatcher = Dispatcher::new(&config, mail, transport)?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    match settings.poll_interval {
        Some(interval) => dispatcher.run_every(interval, cancel).await,
        None => {
            let summary = dispatcher.run(&cancel).await?;
            if summary.failed() > 0 {
                tracing::warn!(failed = summary.failed(), "Some messages were not delivered");
            }
            // One-shot runs report their summary on stdout
            println!("{}", serde_json::to_string(&summary)?);
        }
    }

    Ok(())
}
