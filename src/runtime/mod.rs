use anyhow::{Context, Result};
use clap::ValueEnum;
#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// `RUST_LOG` wins over the verbosity flag when set.
pub fn init_tracing(verbose: u8, format: LogFormat) -> Result<()> {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    let _ = match format {
        LogFormat::Compact => builder.with_target(false).compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    Ok(())
}

/// Cancels `token` on the first SIGINT or SIGTERM.
pub async fn cancel_on_signal(token: CancellationToken) -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal(SignalKind::terminate()).context("failed to listen for SIGTERM")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("failed to listen for SIGINT")?;
                tracing::info!("SIGINT received, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("SIGTERM received, shutting down");
            }
            _ = token.cancelled() => return Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("failed to listen for SIGINT")?;
                tracing::info!("SIGINT received, shutting down");
            }
            _ = token.cancelled() => return Ok(()),
        }
    }

    token.cancel();
    Ok(())
}
