//! Latch bridge CLI
//!
//! Opens a channel to a Latch lock and relays its frames to the controller
//! until either side closes it.

use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use latch_ble_controller::ble::{self, BtleTransport};
use latch_bridge::config::{self, Config, Credentials};
use latch_bridge::{Dispatcher, HttpController};
use latch_proto::{Command, DiscoveryFilter};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "latch")]
#[command(about = "Relay between a Latch lock and its controller")]
struct Cli {
    #[command(flatten)]
    options: Options,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Options {
    /// Controller base URL
    #[arg(long, env = "LATCH_API_URL", default_value = config::DEFAULT_API_URL)]
    api_url: String,

    /// Seconds to wait for a matching lock
    #[arg(
        long,
        env = "LATCH_SCAN_TIMEOUT",
        default_value_t = config::DEFAULT_SCAN_TIMEOUT_SECS
    )]
    scan_timeout: u64,

    /// Seconds to wait for a controller reply
    #[arg(
        long,
        env = "LATCH_REQUEST_TIMEOUT",
        default_value_t = config::DEFAULT_REQUEST_TIMEOUT_SECS
    )]
    request_timeout: u64,

    /// AES-128 key as hex, enables payload encryption
    #[arg(long, env = "LATCH_KEY", hide_env_values = true)]
    key: Option<String>,

    /// 13-byte nonce for frames sent to the lock, as hex
    #[arg(long, env = "LATCH_TX_NONCE", hide_env_values = true)]
    tx_nonce: Option<String>,

    /// 13-byte nonce for frames received from the lock, as hex
    #[arg(long, env = "LATCH_RX_NONCE", hide_env_values = true)]
    rx_nonce: Option<String>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for BLE devices and mark the lock with the given serial
    Scan {
        #[arg(short, long)]
        serial: u64,
        /// Scan duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Open a channel to a lock and relay until it closes
    Open {
        #[arg(short, long)]
        serial: u64,
        /// First frame to send once bound, as hex
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Ask the controller which lock to open for an endpoint, then relay
    Activate {
        /// Endpoint identifier as hex
        #[arg(short, long)]
        endpoint_id: String,
    },
}

impl Options {
    fn config(&self) -> Result<Config, config::ConfigError> {
        Ok(Config {
            api_base_url: self.api_url.clone(),
            scan_timeout: Duration::from_secs(self.scan_timeout),
            request_timeout: Duration::from_secs(self.request_timeout),
            credentials: Credentials::from_hex(
                self.key.as_deref(),
                self.tx_nonce.as_deref(),
                self.rx_nonce.as_deref(),
            )?,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.options.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = cli.options.config()?;

    match cli.command {
        Commands::Scan { serial, duration } => {
            scan_devices(serial, duration).await?;
        }
        Commands::Open { serial, message } => {
            let message = match message {
                Some(hex) => config::decode_hex("message", &hex)?,
                None => Vec::new(),
            };
            relay(&config, Command::OpenChannel { serial, message }).await?;
        }
        Commands::Activate { endpoint_id } => {
            let controller = HttpController::new(&config.api_base_url, config.request_timeout);
            let first = controller.activate(&endpoint_id).await?;
            relay(&config, first).await?;
        }
    }

    Ok(())
}

async fn scan_devices(serial: u64, duration: u64) -> Result<(), Box<dyn std::error::Error>> {
    let filter = DiscoveryFilter::for_serial(serial)?;
    println!("Scanning for lock {} ({} seconds)...", serial, duration);

    let devices = ble::scan(&filter, Duration::from_secs(duration)).await?;

    println!("\nFound {} devices:", devices.len());
    for device in devices {
        let rssi = device
            .rssi
            .map(|r| format!("{} dBm", r))
            .unwrap_or_else(|| "N/A".to_string());
        let marker = if device.matches { " [LOCK]" } else { "" };
        println!("  {} ({}) RSSI: {}{}", device.name, device.address, rssi, marker);
    }
    Ok(())
}

async fn relay(config: &Config, first: Command) -> Result<(), Box<dyn std::error::Error>> {
    let transport = BtleTransport::new(config.scan_timeout).await?;
    let controller = HttpController::new(&config.api_base_url, config.request_timeout);
    tracing::info!(controller = controller.base_url(), "relaying to controller");

    let mut dispatcher = Dispatcher::new(transport, controller);
    if let Some(credentials) = &config.credentials {
        dispatcher = dispatcher.with_cipher(credentials.cipher()?);
    }

    let result = tokio::select! {
        result = dispatcher.run(first) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
            Ok(())
        }
    };

    // always leave the lock free for the next client
    dispatcher.handle(Command::CloseChannel).await?;
    result?;
    Ok(())
}
