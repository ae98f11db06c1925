use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, bail};
use tokio::io::AsyncReadExt;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use mail_agent::agent::{Coordinator, Outcome};
use mail_agent::app::{Services, build_coordinator};
use mail_agent::channels::{EmailConfig, EmailMailbox, Mailbox};
use mail_agent::channels::email::with_signature;
use mail_agent::config::{AppConfig, LogConfig};
use mail_agent::pipeline::spawn_mail_pipeline;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    let _log_guard = init_logging(&config.log);

    eprintln!("📬 Mail Agent v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Prompts: {}", config.storage.prompts_dir.display());
    match &config.storage.documents_base_url {
        Some(url) => eprintln!("   Documents: {url}"),
        None => eprintln!("   Documents: {}", config.storage.documents_dir.display()),
    }

    let services = Services::from_config(&config)?;
    let coordinator = Arc::new(build_coordinator(&services, &config).await?);

    match config.email.clone() {
        Some(email) => run_mail(email, coordinator, config.coordinator.reply_signature.clone()).await,
        None => run_once(&coordinator, config.coordinator.reply_signature.as_deref()).await,
    }
}

/// Poll the mailbox until Ctrl+C.
async fn run_mail(
    email: EmailConfig,
    coordinator: Arc<Coordinator>,
    signature: Option<String>,
) -> anyhow::Result<()> {
    let interval = Duration::from_secs(email.poll_interval_secs.max(1));
    eprintln!("   Mailbox: {} as {}", email.imap_host, email.from_address);
    if email.allowed_senders.is_empty() {
        eprintln!("   Warning: EMAIL_ALLOWED_SENDERS is empty, all mail will be skipped");
    }
    eprintln!("   Press Ctrl+C to stop.\n");

    let mailbox: Arc<dyn Mailbox> = Arc::new(EmailMailbox::new(email).with_signature(signature));
    let (handle, shutdown) = spawn_mail_pipeline(mailbox, coordinator, interval);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    tracing::info!("Shutdown requested");
    shutdown.store(true, Ordering::Relaxed);
    handle.await.context("Mail pipeline task failed")?;
    Ok(())
}

/// Read one message from stdin, run a session and print the outcome.
async fn run_once(coordinator: &Coordinator, signature: Option<&str>) -> anyhow::Result<()> {
    eprintln!("   Mailbox: not configured, reading one message from stdin.\n");

    let mut context = String::new();
    tokio::io::stdin()
        .read_to_string(&mut context)
        .await
        .context("Failed to read stdin")?;
    if context.trim().is_empty() {
        bail!("No message on stdin");
    }

    let report = coordinator.run_session(context.trim()).await;
    eprintln!(
        "   Session {}: {} LLM calls, {} tokens, ~${}",
        report.session_id,
        report.llm_calls,
        report.usage.total(),
        report.cost.round_dp(4)
    );

    match report.outcome {
        Outcome::Reply(body) => {
            println!("{}", with_signature(&body, signature));
            Ok(())
        }
        Outcome::NoResponse => {
            eprintln!("   (no response)");
            Ok(())
        }
        Outcome::Fatal(reason) => bail!("Session failed: {reason}"),
    }
}

/// Stderr logging, plus a daily rolling file when `LOG_DIR` is set.
///
/// The returned guard flushes the file writer on drop.
fn init_logging(log: &LogConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr = if log.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_target(false).with_writer(std::io::stderr).boxed()
    };

    let (file, guard) = match &log.dir {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "mail-agent.log"));
            let layer = if log.json {
                fmt::layer().json().with_writer(writer).boxed()
            } else {
                fmt::layer().with_ansi(false).with_writer(writer).boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .init();
    guard
}
