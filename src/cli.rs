// CLI definitions using clap

use clap::{Parser, Subcommand, ValueEnum};
use m4sh_transport::Register;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "m4shctl")]
#[command(author, version, about = "M4 sensor hub inspection tool")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file path (default: built-in settings)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List interrupt lines and their register bits
    #[command(visible_aliases = ["irq", "i"])]
    Irqs,

    /// Print the register map
    #[command(visible_aliases = ["regs", "r"])]
    Registers,

    /// Decode a hex register dump as a sensor record
    #[command(visible_alias = "d")]
    Decode {
        /// Record type
        #[arg(value_enum)]
        record: RecordKind,

        /// Register bytes as hex (spaces, colons and 0x prefixes are ignored)
        hex: Vec<String>,
    },

    /// Run a simulated hub over the in-memory transport
    #[command(visible_alias = "sim")]
    Simulate {
        /// Sample rounds to generate
        #[arg(short, long, default_value = "3")]
        rounds: u32,
    },
}

/// Record types understood by `decode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RecordKind {
    Accel,
    Compass,
    Pressure,
    Gesture,
    Power,
    Download,
}

impl RecordKind {
    pub fn register(self) -> Register {
        match self {
            RecordKind::Accel => Register::AccelRecord,
            RecordKind::Compass => Register::CompassRecord,
            RecordKind::Pressure => Register::PressureRecord,
            RecordKind::Gesture => Register::GestureRecord,
            RecordKind::Power => Register::PowerStateRecord,
            RecordKind::Download => Register::DownloadPacket,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_decode() {
        let cli = Cli::try_parse_from(["m4shctl", "decode", "accel", "02", "00ff"]).unwrap();
        match cli.command {
            Commands::Decode { record, hex } => {
                assert_eq!(record, RecordKind::Accel);
                assert_eq!(hex, vec!["02", "00ff"]);
            }
            _ => panic!("expected decode"),
        }
    }
}
