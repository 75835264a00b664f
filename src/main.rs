use anyhow::Context;
use clap::{Parser, Subcommand};
use lora_bridge::bridge::Bridge;
use lora_bridge::config::{Config, DEFAULT_CONFIG_PATH};
use lora_bridge::constants;
use lora_bridge::crypto::{decrypt_payload, DeviceKeys};
use lora_bridge::{logging, metrics};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "lora-bridge")]
#[command(about = "Bridges LoRaWAN network operators to a single message sink")]
#[command(version)]
struct Cli {
    /// Path to the TOML config
    #[arg(long, global = true, env = "LORA_BRIDGE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge: pollers, webhook server and the delivery worker
    Run,
    /// Decrypt one LoRaWAN application payload and print it as hex
    Decrypt {
        /// Device address, 8 hex digits as printed by the operator
        #[arg(long)]
        dev_addr: String,
        /// AppSKey, 32 hex digits
        #[arg(long)]
        app_skey: String,
        /// Uplink frame counter
        #[arg(long)]
        fcnt: u32,
        /// Ciphertext as hex
        payload_hex: String,
    },
    /// Validate the config and list the configured networks
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run => {
            let config = load(&cli.config)?;
            let _log_guard = logging::init_logging(&config.log_dir);
            if let Some(port) = config.metrics_port {
                metrics::init_metrics(port);
            }
            info!(
                "Starting lora-bridge with {} network(s), storage {}",
                config.networks.len(),
                config.storage
            );
            Bridge::build(&config).await?.run().await?;
        }
        Commands::Decrypt {
            dev_addr,
            app_skey,
            fcnt,
            payload_hex,
        } => {
            let keys = DeviceKeys::from_hex(Some(dev_addr.as_str()), &app_skey)?;
            let addr = keys
                .dev_addr
                .context("device address is required to decrypt")?;
            let cipher = hex::decode(payload_hex.trim()).context("payload is not hex")?;
            println!("{}", hex::encode(decrypt_payload(&cipher, &addr, &keys.app_skey, fcnt)));
        }
        Commands::CheckConfig => {
            let config = load(&cli.config)?;
            println!("✅ {} is valid", cli.config.display());
            println!("   storage: {}", config.storage);
            println!("   listen:  {}", config.listen);
            println!("   devices: {}", config.devices.len());
            println!("   kinds:   {}", constants::get_supported_kinds().join(", "));
            for network in &config.networks {
                match network.webhook() {
                    Some(hook) => println!("   - {} ({}, webhook /{})", network.name(), network.kind(), hook.path()),
                    None => println!("   - {} ({}, polling)", network.name(), network.kind()),
                }
            }
        }
    }
    Ok(())
}

fn load(path: &Path) -> anyhow::Result<Config> {
    Config::load(path).with_context(|| format!("loading {}", path.display()))
}
