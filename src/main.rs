use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};
use kulersky_light::{discover, BtleplugTransport, Light};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for nearby Bluetooth devices
    Discover {
        /// Scan duration in seconds
        #[arg(short, long, default_value_t = 10)]
        timeout: u64,
    },
    /// Turn on the light with the given address
    On { address: String },
    /// Turn off the light with the given address
    Off { address: String },
    /// Set the light with the given address to an RRGGBBWW hex color
    Color { address: String, color: String },
    /// Print the current on/off state of the light
    IsOn { address: String },
    /// Print the current color of the light as RRGGBBWW hex
    GetColor { address: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("kulersky_light=info")),
        )
        .compact()
        .init();

    color_eyre::install()?;

    let cli = Cli::parse();
    debug!("Parsed command line arguments");

    match cli.command {
        Commands::Discover { timeout } => {
            let devices = discover(Duration::from_secs(timeout)).await?;
            for device in devices {
                println!("{}: {}", device.address, device.name);
            }
        }
        Commands::On { address } => {
            let mut light = connect(&address).await?;
            let result = light.turn_on().await;
            disconnect(&mut light).await;
            result?;
        }
        Commands::Off { address } => {
            let mut light = connect(&address).await?;
            let result = light.turn_off().await;
            disconnect(&mut light).await;
            result?;
        }
        Commands::Color { address, color } => {
            let (r, g, b, w) = parse_color(&color)?;
            let mut light = connect(&address).await?;
            let result = light.set_color(r, g, b, w).await;
            disconnect(&mut light).await;
            result?;
        }
        Commands::IsOn { address } => {
            let mut light = connect(&address).await?;
            let result = light.get_state().await;
            disconnect(&mut light).await;
            let state = result?;
            let answer = match state.is_on {
                Some(true) => "on",
                Some(false) => "off",
                None => "unknown",
            };
            println!("{answer}");
        }
        Commands::GetColor { address } => {
            let mut light = connect(&address).await?;
            let result = light.get_color().await;
            disconnect(&mut light).await;
            let (r, g, b, w) = result?;
            println!("{r:02x}{g:02x}{b:02x}{w:02x}");
        }
    }

    Ok(())
}

/// Connect to the light with the given address
async fn connect(address: &str) -> Result<Light> {
    let transport = Arc::new(BtleplugTransport::default());
    let mut light = Light::new(address, transport);
    light.connect().await?;
    Ok(light)
}

/// Best-effort disconnect once the command has run; a failed close must
/// not mask the result of the command itself
async fn disconnect(light: &mut Light) {
    if let Err(err) = light.disconnect().await {
        warn!("Failed to disconnect from {}: {}", light.address(), err);
    }
}

/// Parse an RRGGBBWW hex string into the four channel values
fn parse_color(color: &str) -> Result<(u8, u8, u8, u8)> {
    let color = color.trim_start_matches('#');
    if color.len() != 8 || !color.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(eyre!("expected an RRGGBBWW hex color, got {color:?}"));
    }

    let channel = |i: usize| u8::from_str_radix(&color[i..i + 2], 16);
    Ok((channel(0)?, channel(2)?, channel(4)?, channel(6)?))
}
