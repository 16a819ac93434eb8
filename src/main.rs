use std::sync::atomic::Ordering;

use anyhow::Context;

use inbox_triage::app::{App, Settings};
use inbox_triage::config::TriggerMode;
use inbox_triage::trigger::spawn_poll_loop;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let settings = Settings::from_env().context("loading configuration")?;
    let port = settings.server.port;

    eprintln!("📬 Inbox Triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", settings.llm.model);
    eprintln!("   Mailbox: {} ({:?} mode)", settings.mail.username, settings.mail.dispatch_mode);
    eprintln!("   Max trials: {}", settings.engine.max_trials);
    eprintln!("   Trigger: {:?}", settings.trigger);
    eprintln!("   API: http://0.0.0.0:{port}/invoke\n");

    let app = App::build(settings).context("starting service")?;

    let poller = match app.trigger {
        TriggerMode::Poll { interval } => Some(spawn_poll_loop(
            app.engine.clone(),
            app.registry.clone(),
            interval,
        )),
        TriggerMode::Manual | TriggerMode::Webhook => None,
    };

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("HTTP server listening on {addr}");

    axum::serve(listener, app.router())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    if let Some((handle, shutdown)) = poller {
        shutdown.store(true, Ordering::Relaxed);
        handle.abort();
    }

    Ok(())
}
