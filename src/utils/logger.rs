use std::io::Write;
use anyhow::Result;
use log::{LevelFilter, debug, info};
use env_logger::Builder;
use chrono::Local;

/// Map a textual level onto a filter, falling back to `Info`
pub fn parse_level(log_level: &str) -> LevelFilter {
    match log_level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

/// Initialise the global logger.
///
/// An explicit `level` wins over `LOG_LEVEL`. When `LOG_FILE` is set, log
/// lines are appended to that file instead of stderr, which keeps them out of
/// the packet dump on the console.
pub fn init(level: Option<&str>) -> Result<()> {
    let mut builder = Builder::new();

    let log_level = match level {
        Some(level) => level.to_string(),
        None => std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
    };

    builder
        .format(|buf, record| {
            let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string();
            writeln!(
                buf,
                "[{}] [{}] [{}:{}] {}",
                timestamp,
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter(None, parse_level(&log_level));

    let log_file = std::env::var("LOG_FILE").ok();
    if let Some(path) = &log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.try_init()?;

    if let Some(path) = log_file {
        info!("Logging to file: {}", path);
    }
    debug!("Logger initialized with level: {}", log_level);
    Ok(())
}
