use std::path::PathBuf;

use clap::Parser;

use crate::capture::ClassificationPolicy;
use crate::output::DumpFormat;
use crate::utils::config::{CaptureMode, Config};

#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Capture IPv4 traffic and classify it by application protocol")]
pub struct Cli {
    /// JSON configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Network interface to capture on ("default" for the system default)
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Read packets from a capture file instead of a live interface
    #[arg(short = 'r', long = "read")]
    pub capture_file: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub mode: Option<CaptureMode>,

    /// Strict drops packets to unknown ports, permissive labels them "unknown"
    #[arg(long, value_enum)]
    pub policy: Option<ClassificationPolicy>,

    #[arg(long, value_enum)]
    pub format: Option<DumpFormat>,

    /// Append the packet dump to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Do not print packets to the console
    #[arg(short, long)]
    pub quiet: bool,

    /// Histogram window in seconds
    #[arg(long)]
    pub seconds: Option<u64>,

    /// Save the histogram series as JSON
    #[arg(long)]
    pub histogram_output: Option<PathBuf>,

    /// BPF filter expression
    #[arg(short, long)]
    pub filter: Option<String>,

    /// trace, debug, info, warn or error
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log every discarded packet at debug level
    #[arg(long)]
    pub log_drops: bool,

    /// List capture devices and exit
    #[arg(long)]
    pub list_interfaces: bool,
}

impl Cli {
    /// Override `config` with whatever was given on the command line
    pub fn apply(&self, config: &mut Config) {
        if let Some(interface) = &self.interface {
            config.interface = interface.clone();
        }
        if let Some(path) = &self.capture_file {
            config.capture_file = Some(path.clone());
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(policy) = self.policy {
            config.policy = policy;
        }
        if let Some(format) = self.format {
            config.format = format;
        }
        if let Some(path) = &self.output {
            config.output_file = Some(path.clone());
        }
        if self.quiet {
            config.console = false;
        }
        if let Some(seconds) = self.seconds {
            config.histogram_seconds = seconds;
        }
        if let Some(path) = &self.histogram_output {
            config.histogram_output = Some(path.clone());
        }
        if let Some(filter) = &self.filter {
            config.bpf_filter = Some(filter.clone());
        }
        if self.log_drops {
            config.log_drops = true;
        }
    }
}
