use clap::Parser;
use motion_viewer::config::{self, ServerConfig};
use motion_viewer::server::Server;
use std::path::PathBuf;

/// Serve motion clips and their skeletons to the browser viewer.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(long, default_value = config::DEFAULT_HOST)]
    host: String,
    #[arg(short, long, default_value_t = config::DEFAULT_PORT)]
    port: u16,
    /// Directory searched (recursively) for .pkl clips
    #[arg(long, default_value = config::DEFAULT_MOTION_DIR)]
    motion_dir: PathBuf,
    /// Directory holding `<character>/<character>.xml` models
    #[arg(long, default_value = config::DEFAULT_ASSET_DIR)]
    asset_dir: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        motion_dir: args.motion_dir,
        asset_dir: args.asset_dir,
    };
    if !config.motion_dir.is_dir() {
        log::warn!("Motion directory {} does not exist", config.motion_dir.display());
    }

    let server = Server::bind(config.clone())?;
    log::info!("Starting Motion Viewer on http://localhost:{}", server.local_addr().port());
    log::info!("Motion directory: {}", config.motion_dir.display());
    log::info!("Asset directory: {}", config.asset_dir.display());
    server.wait()?;
    Ok(())
}
