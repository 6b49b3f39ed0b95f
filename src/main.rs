mod app;
mod config;
mod core;
mod game;

use clap::Parser;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = app::Cli::parse();

    // Install logger immediately, then set runtime max level from config after loading it.
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Trace)
        .try_init();
    // Startup default when config is missing or malformed.
    log::set_max_level(log::LevelFilter::Warn);

    match &cli.config {
        Some(path) => config::load_from(path),
        None => config::load(),
    }
    log::set_max_level(config::get().log_level.as_level_filter());
    app::run(cli)
}
