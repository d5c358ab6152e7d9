//! Lumen light-client serving node binary.

mod cli;
mod config;
mod logging;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    cli::run().await
}
