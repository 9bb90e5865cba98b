use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
    #[default]
    Minimal,
}

/// `RUST_LOG`, defaulting to `info`, with tokio's own spans capped at `warn`.
fn env_filter() -> anyhow::Result<EnvFilter> {
    Ok(EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive("tokio=warn".parse()?))
}

/// Installs the global tracing subscriber. Fails if a subscriber is already
/// installed.
pub fn init(log_format: LogFormat) -> anyhow::Result<()> {
    let base = tracing_subscriber::registry().with(env_filter()?);

    match log_format {
        LogFormat::Pretty => base.with(fmt::layer().pretty()).try_init()?,
        LogFormat::Json => base.with(fmt::layer().json()).try_init()?,
        LogFormat::Minimal => base
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_line_number(false)
                    .with_file(false)
                    .with_thread_ids(false)
                    .with_thread_names(false)
                    .with_level(true)
                    .compact(),
            )
            .try_init()?,
    }
    Ok(())
}
