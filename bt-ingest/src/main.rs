use std::env;
use std::path::PathBuf;
use std::time::Instant;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = env::args().skip(1);
    let dir = args
        .next()
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("usage: bt-ingest <tape-directory> [pace-asset]"))?;
    let pace_asset = args.next();

    let started = Instant::now();
    let assets = bt_ingest::discover_assets(&dir, pace_asset.as_deref())?;
    let tape = bt_ingest::load_tape(&dir, &assets)?;
    tracing::info!(
        assets = assets.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "loaded tape"
    );
    for asset in tape.assets() {
        let first = tape.first_ts(asset)?;
        let last = tape.last_ts(asset)?;
        println!("{asset}: {first} .. {last}");
    }
    Ok(())
}
