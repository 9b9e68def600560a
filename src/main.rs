use anyhow::Result;
use skillmap::core::config::Config;
use skillmap::server::{app_router, run_server, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            eprintln!("Please check 'config.yml' or unset it to run with defaults.");
            return Err(e);
        }
    };

    // A missing completion key stops us here rather than on the first request.
    let state = AppState::from_config(&config)?;

    run_server(&config.server, app_router(state)).await
}
