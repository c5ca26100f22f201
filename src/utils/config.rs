use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::capture::ClassificationPolicy;
use crate::output::DumpFormat;
use crate::utils::error::AppError;

const ENV_PREFIX: &str = "IPSNIFF_";

/// What to do with the decoded packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Print every packet as it arrives
    #[default]
    Dump,
    /// Count packets per second and protocol, print the series at the end
    Histogram,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    // Capture settings
    pub interface: String,
    pub capture_file: Option<PathBuf>,
    pub bpf_filter: Option<String>,
    pub snaplen: i32,
    pub promisc: bool,
    pub read_timeout_ms: i32,

    // Classification settings
    pub mode: CaptureMode,
    pub policy: ClassificationPolicy,
    pub log_drops: bool,

    // Dump output settings
    pub format: DumpFormat,
    pub console: bool,
    pub output_file: Option<PathBuf>,

    // Histogram settings
    pub histogram_seconds: u64,
    pub histogram_output: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: "default".to_string(),
            capture_file: None,
            bpf_filter: None,
            snaplen: 65535,
            promisc: true,
            read_timeout_ms: 500,
            mode: CaptureMode::Dump,
            policy: ClassificationPolicy::Strict,
            log_drops: false,
            format: DumpFormat::Table,
            console: true,
            output_file: None,
            histogram_seconds: 60,
            histogram_output: None,
        }
    }
}

impl Config {
    /// Load configuration from `explicit` if given, otherwise from the first
    /// config file found, otherwise from `IPSNIFF_*` environment variables
    /// over defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        // Load environment variables from .env file if it exists
        dotenv::dotenv().ok();

        if let Some(path) = explicit {
            info!("Loading configuration from: {}", path.display());
            return Self::load_from_file(path);
        }

        for config_path in Self::candidate_paths() {
            if !config_path.exists() {
                continue;
            }

            match Self::load_from_file(&config_path) {
                Ok(config) => {
                    info!("Configuration loaded from: {}", config_path.display());
                    return Ok(config);
                }
                Err(e) => {
                    warn!("Failed to load config from {}: {:#}", config_path.display(), e);
                }
            }
        }

        info!("No configuration file found, using environment variables and defaults");
        Self::from_environment(|key| std::env::var(key).ok())
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(path) = std::env::var("IPSNIFF_CONFIG") {
            paths.push(PathBuf::from(path));
        }
        paths.push(PathBuf::from("ipsniff.json"));
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("ipsniff").join("config.json"));
        }
        paths
    }

    /// Load configuration from a specific file
    pub fn load_from_file(config_path: &Path) -> Result<Self> {
        let mut file = File::open(config_path)
            .with_context(|| format!("Failed to open config file: {}", config_path.display()))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        Ok(config)
    }

    /// Build a configuration from `IPSNIFF_*` variables resolved through
    /// `lookup`, falling back to defaults for anything unset.
    pub fn from_environment<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        let flag = |name: &str, default: bool| {
            var(name)
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(default)
        };
        let defaults = Self::default();

        let config = Config {
            interface: var("INTERFACE").unwrap_or(defaults.interface),
            capture_file: var("CAPTURE_FILE").map(PathBuf::from),
            bpf_filter: var("FILTER"),
            snaplen: match var("SNAPLEN") {
                Some(v) => v.parse().with_context(|| format!("Invalid IPSNIFF_SNAPLEN: {}", v))?,
                None => defaults.snaplen,
            },
            promisc: flag("PROMISC", defaults.promisc),
            read_timeout_ms: match var("READ_TIMEOUT_MS") {
                Some(v) => v
                    .parse()
                    .with_context(|| format!("Invalid IPSNIFF_READ_TIMEOUT_MS: {}", v))?,
                None => defaults.read_timeout_ms,
            },
            mode: match var("MODE") {
                Some(v) => CaptureMode::from_str(&v, true)
                    .map_err(|e| anyhow::anyhow!("Invalid IPSNIFF_MODE: {}", e))?,
                None => defaults.mode,
            },
            policy: match var("POLICY") {
                Some(v) => ClassificationPolicy::from_str(&v, true)
                    .map_err(|e| anyhow::anyhow!("Invalid IPSNIFF_POLICY: {}", e))?,
                None => defaults.policy,
            },
            log_drops: flag("LOG_DROPS", defaults.log_drops),
            format: match var("FORMAT") {
                Some(v) => DumpFormat::from_str(&v, true)
                    .map_err(|e| anyhow::anyhow!("Invalid IPSNIFF_FORMAT: {}", e))?,
                None => defaults.format,
            },
            console: flag("CONSOLE", defaults.console),
            output_file: var("OUTPUT").map(PathBuf::from),
            histogram_seconds: match var("HISTOGRAM_SECONDS") {
                Some(v) => v
                    .parse()
                    .with_context(|| format!("Invalid IPSNIFF_HISTOGRAM_SECONDS: {}", v))?,
                None => defaults.histogram_seconds,
            },
            histogram_output: var("HISTOGRAM_OUTPUT").map(PathBuf::from),
        };

        Ok(config)
    }

    /// Reject settings the capture cannot run with
    pub fn validate(&self) -> Result<(), AppError> {
        let mut errors = Vec::new();

        if self.capture_file.is_none() && self.interface.trim().is_empty() {
            errors.push("Interface name cannot be empty".to_string());
        }

        if !(68..=65535).contains(&self.snaplen) {
            errors.push(format!("Invalid snaplen: {} (must be 68..=65535)", self.snaplen));
        }

        if self.read_timeout_ms <= 0 {
            errors.push(format!("Invalid read timeout: {} ms", self.read_timeout_ms));
        }

        match self.mode {
            CaptureMode::Histogram if self.histogram_seconds == 0 => {
                errors.push("Histogram window must be at least one second".to_string());
            }
            CaptureMode::Dump if !self.console && self.output_file.is_none() => {
                errors.push("Dump mode needs the console or an output file".to_string());
            }
            _ => {}
        }

        if !errors.is_empty() {
            return Err(AppError::ConfigError(format!(
                "validation failed:\n{}",
                errors.join("\n")
            )));
        }

        Ok(())
    }

    pub fn display_summary(&self) {
        info!("Configuration Summary:");
        match &self.capture_file {
            Some(path) => info!("   Capture File: {}", path.display()),
            None => info!("   Network Interface: {}", self.interface),
        }
        info!("   Mode: {:?}", self.mode);
        info!("   Policy: {:?}", self.policy);
        if let Some(filter) = &self.bpf_filter {
            info!("   Filter: {}", filter);
        }
        match self.mode {
            CaptureMode::Dump => info!(
                "   Output: {:?}{}{}",
                self.format,
                if self.console { ", console" } else { "" },
                self.output_file
                    .as_ref()
                    .map(|p| format!(", {}", p.display()))
                    .unwrap_or_default()
            ),
            CaptureMode::Histogram => info!("   Window: {} seconds", self.histogram_seconds),
        }
    }
}
