pub mod app;
pub mod renderer;

use clap::Parser;
use color_eyre::Result;
use renderer::config::RenderConfig;

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let config = RenderConfig::parse();
    log::info!("Starting with {config:?}");

    app::run(config)?;

    Ok(())
}
