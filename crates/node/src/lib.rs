//! `hodld-mncache`: inspect a masternode registry snapshot offline.

pub mod config;
pub mod report;

use hodld_consensus::chain_params;
use hodld_log::{log_info, log_warn};
use hodld_masternode::load_snapshot;

use crate::config::{parse_args_from, usage, Command};

pub fn run_entry() -> Result<(), String> {
    run_with_args(std::env::args().skip(1))
}

pub fn run_with_args<I>(raw_args: I) -> Result<(), String>
where
    I: IntoIterator<Item = String>,
{
    let config = parse_args_from(raw_args).map_err(|err| format!("{err}\n{}", usage()))?;
    match config.command {
        Command::Help => {
            println!("{}", usage());
            return Ok(());
        }
        Command::Version => {
            println!("hodld-mncache {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Command::Summary | Command::List => {}
    }

    hodld_log::init(config.log);
    if !config.ignored_conf_keys.is_empty() {
        log_warn!(
            "Ignoring unsupported keys in {}: {}",
            config.conf_path.display(),
            config.ignored_conf_keys.join(", ")
        );
    }

    let params = chain_params(config.network);
    let path = &config.snapshot_path;
    let state = load_snapshot(path, &params)
        .map_err(|err| format!("failed to read {}: {err}", path.display()))?
        .ok_or_else(|| format!("no masternode snapshot at {}", path.display()))?;
    log_info!(
        "Loaded {} masternodes from {}",
        state.records.len(),
        path.display()
    );

    let output = report::render(config.command, config.json, config.network, &state)?;
    println!("{output}");
    Ok(())
}
