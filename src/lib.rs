//! src/lib.rs
//! Library crate for ipsniff:
//!   • `capture` – raw IPv4 decoding, port classification and the capture loop
//!   • `output` – packet dump and per-second protocol histogram
//!   • `run()` – CLI entry point wiring config, logging, capture and output

pub mod capture;
pub mod cli;
pub mod output;
pub mod utils;

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{error, info, warn};

use crate::{
    capture::{CaptureLoop, CaptureSettings, CaptureStats, PcapSource, ProtocolIdentifier, StopSignal},
    cli::Cli,
    output::{DumpWriter, Histogram},
    utils::{
        config::{CaptureMode, Config},
        error::AppError,
        logger,
    },
};

/// Run the sniffer as configured by `cli` until interrupted (or until the
/// histogram window or the capture file ends).
pub async fn run(cli: Cli) -> Result<()> {
    logger::init(cli.log_level.as_deref()).context("Logger initialization failed")?;

    if cli.list_interfaces {
        return list_interfaces();
    }

    let mut config = Config::load(cli.config.as_deref()).context("Configuration load failed")?;
    cli.apply(&mut config);
    config.validate()?;
    config.display_summary();

    let stop = StopSignal::new();
    spawn_interrupt_handler(stop.clone());

    let outcome = tokio::task::spawn_blocking(move || capture_blocking(&config, &stop))
        .await
        .context("Capture task failed")?;

    let stats = match outcome {
        Ok(stats) => stats,
        Err(e) => {
            error!("Capture failed [{}]: {}", e.kind(), e);
            return Err(e.into());
        }
    };

    log_stats(&stats);
    Ok(())
}

fn list_interfaces() -> Result<()> {
    for device in PcapSource::list_interfaces()? {
        match &device.desc {
            Some(desc) => println!("{}\t{}", device.name, desc),
            None => println!("{}", device.name),
        }
    }
    Ok(())
}

/// Stop the capture loop on Ctrl-C
fn spawn_interrupt_handler(stop: StopSignal) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, stopping capture");
                stop.stop();
            }
            Err(e) => warn!("Could not listen for interrupts: {}", e),
        }
    });
}

fn open_source(config: &Config) -> Result<PcapSource, AppError> {
    let settings = CaptureSettings {
        snaplen: config.snaplen,
        promisc: config.promisc,
        timeout_ms: config.read_timeout_ms,
        filter: config.bpf_filter.clone(),
    };

    match &config.capture_file {
        Some(path) => PcapSource::open_file(path, &settings),
        None => PcapSource::open_live(&config.interface, &settings),
    }
}

/// Blocking part of a run: one capture loop feeding one consumer, which is
/// finalised here once the loop has returned
fn capture_blocking(config: &Config, stop: &StopSignal) -> Result<CaptureStats, AppError> {
    let source = open_source(config)?;
    let identifier = ProtocolIdentifier::new(config.policy);
    let mut capture = CaptureLoop::new(source, identifier).log_drops(config.log_drops);

    match config.mode {
        CaptureMode::Dump => {
            let mut writer = DumpWriter::new(config.format);
            if config.console {
                writer = writer.console();
            }
            if let Some(path) = &config.output_file {
                writer = writer.file(path)?;
            }

            let outcome = capture.run(&mut writer, stop);
            let written = writer.finish()?;
            info!("{} packets written", written);
            outcome
        }
        CaptureMode::Histogram => {
            let window = config.histogram_seconds;
            let mut histogram = Histogram::new(Utc::now(), window as usize, identifier.table());
            let stop = stop.clone().with_deadline(Duration::from_secs(window));

            let outcome = capture.run(&mut histogram, &stop);
            print!("{}", histogram.render_text());
            let saved = match &config.histogram_output {
                Some(path) => histogram.save_json(path),
                None => Ok(()),
            };

            let stats = outcome?;
            saved?;
            Ok(stats)
        }
    }
}

fn log_stats(stats: &CaptureStats) {
    info!(
        "Run summary: received={} emitted={} malformed={} not_ipv4={} unsupported_transport={} unmapped_port={}",
        stats.received,
        stats.emitted,
        stats.malformed,
        stats.not_ipv4,
        stats.unsupported_transport,
        stats.unmapped_port
    );
}
