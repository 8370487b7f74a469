//! Command-line interface for hikiyama.
//!
//! This module provides the CLI structure for the `hikiyama` binary and the
//! plain-text rendering its commands print.

mod commands;
pub mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConfigCommand, ExportCommand, GlyphCommand, MoveCommand, RotateCommand, StatusCommand,
    TrackCommand,
};

use crate::logging::Verbosity;

/// hikiyama - Live map and tracker for festival floats
///
/// Watch where every float is, correct positions and marker rotation, or
/// publish this device's location for one float.
#[derive(Debug, Parser)]
#[command(name = "hikiyama")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the registered floats
    Floats,

    /// Show every float's current state
    Status(StatusCommand),

    /// Follow float updates live until interrupted
    View,

    /// Publish this device's location for a float
    Track(TrackCommand),

    /// Move a float's marker to a corrected position
    Move(MoveCommand),

    /// Save a manual marker rotation
    Rotate(RotateCommand),

    /// Print a float's marker glyph as SVG
    Glyph(GlyphCommand),

    /// Print the visible markers as GeoJSON
    Export(ExportCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.verbose, self.quiet)
    }
}
