//! # cart-agent
//!
//! Bench console for the cart controller. Runs a full `CartSystem` on a
//! simulated scale and takes weights, barcodes and control commands from
//! stdin.
//!
//! ## Usage
//!
//! ```bash
//! cart-agent --autostart
//! > w 500          # put 500 g on the scale
//! > 4006381333931  # scan it
//! > {"type": "payment_created", "data": "p-1"}
//! > status
//! > q
//! ```
//!
//! `RUST_LOG` controls verbosity (default `info`).

mod console;

use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cart_engine::{
    apply_command, BarcodeSender, CartConfig, CartLifecycle, CartSystem, ChannelBarcodeSource,
    SimulatedScale,
};

use crate::console::{parse_line, ConsoleInput, HELP};

#[derive(Debug, Parser)]
#[command(name = "cart-agent", version, about = "Bench console for the cart controller")]
struct Args {
    /// Config file (defaults to the platform config dir).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the configured cart id.
    #[arg(long)]
    cart_id: Option<String>,

    /// Start a session immediately instead of waiting for session_started.
    #[arg(long)]
    autostart: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

/// Initializes the tracing subscriber.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=cart_engine=trace` - Trace the runtime only
/// - Default: INFO level
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let mut config = CartConfig::load(args.config)?;
    if let Some(id) = args.cart_id {
        config.cart.id = id;
    }
    info!(cart_id = %config.cart_id(), "Configuration loaded");

    let scale = SimulatedScale::new();
    let (scanner, barcodes) = ChannelBarcodeSource::channel(32);
    let mut cart = CartSystem::builder(config)
        .with_sensor(scale.clone())
        .with_barcode_source(barcodes)
        .build()?;

    if args.autostart {
        cart.start().await?;
    }
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !handle_line(&line, &mut cart, &scale, &scanner).await {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "Failed to read stdin");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    cart.shutdown().await?;
    info!("Bye");
    Ok(())
}

/// Handles one console line. Returns false when the console should exit.
async fn handle_line(
    line: &str,
    cart: &mut CartSystem,
    scale: &SimulatedScale,
    scanner: &BarcodeSender,
) -> bool {
    let input = match parse_line(line) {
        Ok(Some(input)) => input,
        Ok(None) => return true,
        Err(e) => {
            warn!("{}", e);
            return true;
        }
    };

    match input {
        ConsoleInput::SetWeight(grams) => {
            scale.set_load(grams);
            info!(load_g = grams, "Scale load set");
        }
        ConsoleInput::Scan(raw) => {
            if let Err(e) = scanner.scan(&raw) {
                warn!(error = %e, "Scan rejected");
            }
        }
        ConsoleInput::Command(command) => {
            if let Err(e) = apply_command(cart, command).await {
                if e.is_fatal() {
                    error!(error = %e, "Command failed");
                } else {
                    warn!(error = %e, "Command failed");
                }
            }
        }
        ConsoleInput::Status => match serde_json::to_string_pretty(&cart.status().await) {
            Ok(json) => println!("{}", json),
            Err(e) => warn!(error = %e, "Could not render status"),
        },
        ConsoleInput::Help => println!("{}", HELP),
        ConsoleInput::Quit => return false,
    }
    true
}
