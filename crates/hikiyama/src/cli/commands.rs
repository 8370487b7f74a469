//! CLI command definitions.

use std::path::PathBuf;

use clap::{ArgGroup, Args, Subcommand};

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Track command arguments.
#[derive(Debug, Args)]
pub struct TrackCommand {
    /// Float to publish for (e.g. yama01)
    #[arg(short, long, value_name = "ID")]
    pub float: String,

    /// Name of this device, shown to viewers
    #[arg(short, long, value_name = "NAME")]
    pub device: String,

    /// Shared tracker passcode
    #[arg(short, long)]
    pub passcode: String,

    /// NMEA source: a device node, file or FIFO, or "-" for stdin
    #[arg(short, long, value_name = "PATH", default_value = "-")]
    pub source: String,
}

/// Move command arguments.
#[derive(Debug, Args)]
pub struct MoveCommand {
    /// Float identifier
    pub id: String,

    /// New latitude in degrees
    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,

    /// New longitude in degrees
    #[arg(long, allow_negative_numbers = true)]
    pub lng: f64,
}

/// Rotate command arguments.
#[derive(Debug, Args)]
#[command(group(ArgGroup::new("rotation").required(true).args(["angle", "step"])))]
pub struct RotateCommand {
    /// Float identifier
    pub id: String,

    /// Absolute angle in degrees (-180 to 180)
    #[arg(long, allow_negative_numbers = true)]
    pub angle: Option<i32>,

    /// Number of 15° steps from the current angle
    #[arg(long, allow_negative_numbers = true)]
    pub step: Option<i32>,
}

/// Glyph command arguments.
#[derive(Debug, Args)]
pub struct GlyphCommand {
    /// Float identifier
    pub id: String,
}

/// Export command arguments.
#[derive(Debug, Args)]
pub struct ExportCommand {
    /// Pretty-print the GeoJSON
    #[arg(short, long)]
    pub pretty: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        file: Option<PathBuf>,
    },
}
