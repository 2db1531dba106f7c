mod config;
mod registry;
mod server;

use std::time::Instant;

use anyhow::Result;
use bt_common::{Engine, EngineConfig};
use config::load_server_configuration;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let server_configuration = load_server_configuration("bt-server.ini")?;

    tracing::info!(directory = %server_configuration.tape_directory.display(), "loading tape");
    let started = Instant::now();
    let assets = bt_ingest::discover_assets(
        &server_configuration.tape_directory,
        server_configuration.pace_asset.as_deref(),
    )?;
    let tape = bt_ingest::load_tape(&server_configuration.tape_directory, &assets)?;
    tracing::info!(
        assets = assets.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "loaded tape"
    );

    let engine = Engine::new(tape, EngineConfig::default(), server_configuration.id_seed)?;
    server::run(server_configuration.address, engine).await?;
    Ok(())
}
