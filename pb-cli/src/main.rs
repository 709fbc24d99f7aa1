//! pb-ble: encode, decode and loop back Pybricks BLE broadcasts

mod config;
mod values;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pb_protocol::{decode_message, encode_message, DisplayValues};
use pb_session::VirtualBle;
use pb_sim::SimulatedAir;
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::values::parse_values;

#[derive(Parser)]
#[command(name = "pb-ble")]
#[command(about = "Pybricks BLE broadcast messages", long_about = None)]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a message and print it as hex
    Encode {
        /// Channel (0 to 255)
        channel: u8,
        /// JSON values
        #[arg(required = true)]
        values: Vec<String>,
    },
    /// Decode a hex message
    Decode {
        /// Encoded message, channel byte first
        hex: String,
    },
    /// Broadcast between two simulated hubs
    Loopback {
        /// JSON values to broadcast
        #[arg(required = true)]
        values: Vec<String>,
        /// Broadcast channel
        #[arg(short, long)]
        channel: Option<u8>,
        /// Channels the receiver observes (all if not given)
        #[arg(short, long)]
        observe: Vec<u8>,
        /// RSSI threshold of the receiver
        #[arg(long, allow_hyphen_values = true, value_parser = clap::value_parser!(i16).range(-120..=0))]
        rssi: Option<i16>,
        /// Device name of the sender
        #[arg(long)]
        name: Option<String>,
        /// Broadcast timeout in seconds
        #[arg(long, default_value = "10")]
        timeout: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Commands::Encode { channel, values } => cmd_encode(channel, &values),
        Commands::Decode { hex } => cmd_decode(&hex),
        Commands::Loopback {
            values,
            channel,
            observe,
            rssi,
            name,
            timeout,
        } => {
            let mut config = Config::load(cli.config.as_deref())?;
            if let Some(channel) = channel {
                config.sender.broadcast_channel = channel;
            }
            if !observe.is_empty() {
                config.receiver.observe_channels = observe;
            }
            if rssi.is_some() {
                config.receiver.rssi_threshold = rssi;
            }
            if let Some(name) = name {
                config.sender.device_name = name;
            }
            cmd_loopback(config, &values, timeout).await
        }
    }
}

fn init_tracing(debug: bool) {
    let default_filter = if debug {
        "pb_ble=debug,pb_protocol=debug,pb_session=debug,pb_sim=debug"
    } else {
        "pb_ble=info,pb_protocol=info,pb_session=info,pb_sim=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn cmd_encode(channel: u8, args: &[String]) -> Result<()> {
    let values = parse_values(args)?;
    let encoded = encode_message(channel, &values)
        .with_context(|| format!("cannot encode {}", DisplayValues(&values)))?;
    println!("{}", hex::encode(encoded));
    Ok(())
}

fn cmd_decode(input: &str) -> Result<()> {
    let cleaned: String = input
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let bytes = hex::decode(&cleaned).with_context(|| format!("invalid hex: {}", input))?;
    let message = decode_message(&bytes).context("malformed message")?;

    println!("{}", message);
    println!("{}", serde_json::to_string(&message.values)?);
    Ok(())
}

async fn cmd_loopback(config: Config, args: &[String], timeout: u16) -> Result<()> {
    let values = parse_values(args)?;

    let air = SimulatedAir::new();
    let sender_adapter = air.adapter_with_config("hci0", config.adapter);
    let receiver_adapter = air.adapter("hci1");

    let (advertiser, scanner) = sender_adapter.transports();
    let sender = VirtualBle::from_config(config.sender, advertiser, scanner);
    let (advertiser, scanner) = receiver_adapter.transports();
    let receiver = VirtualBle::from_config(config.receiver, advertiser, scanner);

    let released = Arc::new(Notify::new());
    sender.advertisement().set_on_release({
        let released = released.clone();
        move |path: &str| {
            info!("Advertisement {} released", path);
            released.notify_one();
        }
    });
    sender.advertisement().set_timeout(timeout);

    let mut observations = receiver.subscribe();
    receiver.open().await?;
    sender.open().await?;
    sender
        .broadcast(Some(values))
        .await
        .context("failed to start broadcast")?;

    let channel = sender.broadcast_channel();
    let deadline = tokio::time::sleep(Duration::from_secs(timeout.into()) + Duration::from_secs(1));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            observation = observations.recv() => match observation {
                Ok(observation) => println!(
                    "received on channel {} at {} dBm: {}",
                    observation.channel,
                    observation.rssi,
                    DisplayValues(&observation.values)
                ),
                Err(e) => {
                    warn!("Observation stream ended: {}", e);
                    break;
                }
            },
            _ = released.notified() => break,
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    match receiver.observe(channel) {
        Some(values) => info!(
            "Last message on channel {}: {} ({} dBm)",
            channel,
            DisplayValues(&values),
            receiver.signal_strength(channel)
        ),
        None => info!("Nothing observed on channel {}", channel),
    }

    sender.close().await?;
    receiver.close().await?;
    Ok(())
}
