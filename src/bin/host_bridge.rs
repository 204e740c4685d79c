//! Headless host bridge binary for stdin/stdout JSON communication.
//!
//! This binary reads `CommandEnvelope` messages as newline-delimited JSON
//! from stdin, dispatches them against a shared [`teller::Assistant`], and
//! writes `ResponseEnvelope` and `EventEnvelope` messages to stdout.
//!
//! All tracing/diagnostic output goes to stderr so that stdout remains a
//! clean JSON protocol channel.

use teller::Assistant;
use teller::host::stdio::run_stdio_bridge;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise tracing to stderr only (stdout is reserved for the JSON
    // protocol).
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("teller-host starting");

    let assistant = Assistant::new().map_err(|e| {
        tracing::error!(error = %e, "failed to initialise assistant");
        anyhow::anyhow!("teller-host failed to start: {e}")
    })?;

    run_stdio_bridge(assistant).await.map_err(|e| {
        tracing::error!(error = %e, "teller-host exited with error");
        anyhow::anyhow!("teller-host failed: {e}")
    })?;

    tracing::info!("teller-host shut down cleanly");
    Ok(())
}
