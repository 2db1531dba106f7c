use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use configparser::ini::Ini;

/// Process-level configuration for the `bt-server` binary: where it
/// binds, where the tape CSVs live, and which asset paces the clock.
/// Kept separate from the financial constants baked into
/// `bt_common::EngineConfig`, which describe the simulation rather than
/// the process hosting it.
pub struct ServerConfiguration {
    pub address: SocketAddr,
    pub tape_directory: PathBuf,
    pub pace_asset: Option<String>,
    pub id_seed: u64,
}

fn get_ini(path: &str) -> Result<Ini> {
    let mut config = Ini::new();
    config
        .load(path)
        .map_err(|error| anyhow!(error))
        .with_context(|| format!("failed to read configuration file \"{path}\""))?;
    Ok(config)
}

pub fn load_server_configuration(path: &str) -> Result<ServerConfiguration> {
    let config = get_ini(path)?;
    let get_string = |section: &str, key: &str| -> Result<String> {
        config
            .get(section, key)
            .with_context(|| anyhow!("failed to find key \"{key}\" in section \"{section}\" in \"{path}\""))
    };

    let section = "server";
    let address_string = get_string(section, "address")?;
    let address: SocketAddr = address_string
        .parse()
        .with_context(|| "unable to parse server address")?;
    let tape_directory = PathBuf::from(get_string(section, "data_directory")?);
    let pace_asset = config.get(section, "pace_asset");
    let id_seed = config
        .get(section, "id_seed")
        .map(|raw| raw.parse::<u64>())
        .transpose()
        .with_context(|| "unable to parse id_seed")?
        .unwrap_or(1);

    Ok(ServerConfiguration {
        address,
        tape_directory,
        pace_asset,
        id_seed,
    })
}
