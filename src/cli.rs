// CLI definitions using clap

use bthle_unix::{parse_gatt_uuid, BluetoothAddress};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "bthle")]
#[command(author, version, about = "Windows Bluetooth LE APIs over a simulated Unix host")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Simulated host description (default: built-in demo host)
    #[arg(long, global = true, value_name = "FILE")]
    pub sim: Option<PathBuf>,

    /// Bus config file (default: ~/.config/bthle/bus.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List radios and their properties
    #[command(visible_alias = "r")]
    Radios,

    /// List remote devices known to the first radio
    #[command(visible_alias = "d")]
    Devices,

    /// List the GATT services of a device
    #[command(visible_alias = "svc")]
    Services {
        /// Device address (AA:BB:CC:DD:EE:FF)
        address: BluetoothAddress,
    },

    /// List the characteristics of a service
    #[command(visible_alias = "chars")]
    Characteristics {
        address: BluetoothAddress,
        /// Service UUID (16-bit short form or full)
        #[arg(value_parser = parse_uuid)]
        service: Uuid,
    },

    /// Read a characteristic value
    Read {
        address: BluetoothAddress,
        #[arg(value_parser = parse_uuid)]
        service: Uuid,
        /// Characteristic UUID
        #[arg(value_parser = parse_uuid)]
        characteristic: Uuid,
    },

    /// Write a characteristic value given as hex
    Write {
        address: BluetoothAddress,
        #[arg(value_parser = parse_uuid)]
        service: Uuid,
        #[arg(value_parser = parse_uuid)]
        characteristic: Uuid,
        /// Value bytes as hex (e.g. 0148)
        value: String,
        /// Write without response
        #[arg(long)]
        no_response: bool,
    },

    /// Scan for advertisements
    #[command(visible_alias = "scan")]
    Watch {
        /// Seconds to scan before stopping
        #[arg(short, long, default_value_t = 5)]
        seconds: u64,
        /// Only report devices advertising this local name
        #[arg(long)]
        name: Option<String>,
        /// Minimum signal strength in dBm
        #[arg(long, allow_hyphen_values = true)]
        min_rssi: Option<i16>,
    },

    /// Subscribe to a characteristic and print notifications
    Notify {
        address: BluetoothAddress,
        #[arg(value_parser = parse_uuid)]
        service: Uuid,
        #[arg(value_parser = parse_uuid)]
        characteristic: Uuid,
        /// Stop after this many notifications
        #[arg(short = 'n', long, default_value_t = 3)]
        count: usize,
    },

    /// Print the effective bus configuration
    Config {
        /// Write it to the config path
        #[arg(long)]
        save: bool,
    },
}

fn parse_uuid(s: &str) -> Result<Uuid, String> {
    parse_gatt_uuid(s).map_err(|e| e.to_string())
}
