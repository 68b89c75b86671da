mod headless;
mod ui;

use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use roomlink::LocalBus;
use roomlink::config;
use ui::ChatApp;

#[derive(Parser)]
#[command(
    name = "roomlink",
    version,
    about = "Serverless room chat over a local bus and a libp2p mesh"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    /// Room to pre-fill (GUI) or join (headless)
    #[arg(long)]
    room: Option<String>,
    /// Display name
    #[arg(long)]
    name: Option<String>,
    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Chat on stdin/stdout without a window
    Headless,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let app_config = config::load_config(&cli.config);
    log::info!(
        "Loaded config from {} ({} bootstrap nodes)",
        cli.config,
        app_config.bootstrap_nodes.len()
    );

    if cli.mode == Some(Mode::Headless) {
        let room = cli.room.unwrap_or_else(|| "lobby".to_string());
        let name = cli.name.unwrap_or_else(|| "Anonymous".to_string());
        headless::run(cli.config, app_config, room, name).await?;
        return Ok(());
    }

    let bus = LocalBus::new(app_config.local_capacity);
    let options = eframe::NativeOptions::default();
    let (room, name, config_path) = (cli.room, cli.name, cli.config);

    eframe::run_native(
        "roomlink",
        options,
        Box::new(move |cc| {
            Ok(Box::new(ChatApp::new(
                cc,
                config_path,
                app_config,
                bus,
                room,
                name,
            )))
        }),
    )?;
    Ok(())
}
