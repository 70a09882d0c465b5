use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use coldstore::archiver;
use coldstore::config::Config;
use coldstore::metrics;
use coldstore::runtime::Runtime;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_new(&config.log_level)
                .with_context(|| format!("invalid log level {:?}", config.log_level))?,
        )
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    // keep the guard alive for the life of the process so panics and error
    // events are flushed on the way out
    let _sentry = config.sentry_dsn.clone().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                environment: Some(config.deployment_id.clone().into()),
                ..Default::default()
            },
        ))
    });

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?
        .block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    metrics::init_metrics(config.metrics_listen)?;

    let once = config.once;
    let runtime = Runtime::create(config).await?;

    if once {
        archiver::run_pass(&runtime, chrono::Utc::now()).await?;
        return Ok(());
    }

    loop {
        let wait = next_start_delay(&runtime.config)?;
        info!(wait_secs = wait.as_secs(), "sleeping until next pass");
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
        }

        if let Err(e) = archiver::run_pass(&runtime, chrono::Utc::now()).await {
            error!("pass failed: {:#}", e);
        }
    }
}

/// Time until the next occurrence of the configured UTC start time
fn next_start_delay(config: &Config) -> Result<std::time::Duration> {
    let (hour, minute) = config.start_time_parts()?;
    let now = chrono::Utc::now();
    let today = now
        .date_naive()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
        .and_utc();
    let next = if today > now {
        today
    } else {
        today + chrono::TimeDelta::days(1)
    };
    Ok((next - now).to_std().unwrap_or_default())
}
