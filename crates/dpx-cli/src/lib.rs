//! dpx CLI - Command-line interface for the data portal harvester
//!
//! This crate provides the CLI application that ties together all dpx components.

pub mod config;
pub mod output;
pub mod progress;

pub use config::{Command, Config, ExportFormat};
pub use output::FileSink;
pub use progress::BarReporter;
