mod app;
mod audio;
mod config;
mod error;
mod playback;
mod separation;
mod session;
mod ui;
mod waveform_cache;

use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    // RUST_LOG=debug shows every restart scheduled, fired and cancelled
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    log::info!("chopdeck starting up");

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(config::default_config_path);
    let config = config::load_config(&config_path);

    // First run writes the defaults so they can be edited
    if !config_path.exists() {
        if let Err(e) = config::save_config(&config, &config_path) {
            log::warn!("could not write default config: {e:#}");
        }
    }

    app::run(config)?;
    Ok(())
}
