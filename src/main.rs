//! Shapeshift - book conversion worker.

use shapeshift::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    // chromiumoxide logs every unparsed CDP event at error level.
    let default_filter = if cli::is_verbose() {
        "shapeshift=debug,chromiumoxide=warn"
    } else {
        "shapeshift=info,chromiumoxide=off"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(cli::is_verbose()))
        .init();

    cli::run().await
}
