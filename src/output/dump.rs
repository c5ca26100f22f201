use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use log::info;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::capture::{ApplicationProtocol, PacketRecord, PacketSink, TransportProtocol};
use crate::utils::error::AppError;

/// How each record is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DumpFormat {
    /// Aligned columns plus a payload line
    #[default]
    Table,
    /// One JSON object per line
    Json,
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Payload as text when it is plain ASCII, otherwise as an escaped byte
/// string literal such as `b'\x16\x03\x01'`.
pub fn render_payload(payload: &[u8]) -> String {
    if payload.is_ascii() {
        return payload.iter().map(|&b| b as char).collect();
    }

    let mut out = String::with_capacity(payload.len() * 2 + 3);
    out.push_str("b'");
    for &byte in payload {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            b'\t' => out.push_str("\\t"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            0x20..=0x7e => out.push(byte as char),
            _ => {
                let _ = write!(out, "\\x{:02x}", byte);
            }
        }
    }
    out.push('\'');
    out
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    source_ip: String,
    source_port: u16,
    destination_ip: String,
    destination_port: u16,
    transport_protocol: TransportProtocol,
    application_protocol: ApplicationProtocol,
    captured_at: DateTime<Utc>,
    length: usize,
    payload: &'a str,
    payload_sha256: String,
}

/// Streams records to the console and/or an appended text log
pub struct DumpWriter {
    targets: Vec<Box<dyn Write + Send>>,
    format: DumpFormat,
    header_written: bool,
    written: u64,
}

impl DumpWriter {
    pub fn new(format: DumpFormat) -> Self {
        Self {
            targets: Vec::new(),
            format,
            header_written: false,
            written: 0,
        }
    }

    pub fn console(self) -> Self {
        self.writer(io::stdout())
    }

    /// Append to `path`, creating it if needed
    pub fn file(self, path: &Path) -> Result<Self, AppError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!("Writing packet dump to {}", path.display());
        Ok(self.writer(BufWriter::new(file)))
    }

    pub fn writer<W: Write + Send + 'static>(mut self, target: W) -> Self {
        self.targets.push(Box::new(target));
        self
    }

    pub fn has_targets(&self) -> bool {
        !self.targets.is_empty()
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn header(&self) -> String {
        format!(
            "{:<21} {:<21} {:<26} {:<9} {}",
            "SOURCE", "DESTINATION", "CAPTURED AT (UTC)", "TRANSPORT", "APPLICATION"
        )
    }

    /// Text written for `record`, including the trailing newline
    pub fn format_record(&self, record: &PacketRecord) -> Result<String, AppError> {
        let payload = render_payload(record.payload());

        match self.format {
            DumpFormat::Table => Ok(format!(
                "{:<21} {:<21} {:<26} {:<9} {}\n    {}\n",
                record.source_endpoint(),
                record.destination_endpoint(),
                record.captured_at().format(TIMESTAMP_FORMAT).to_string(),
                record.transport_protocol().as_str(),
                record.application_protocol().label(),
                payload
            )),
            DumpFormat::Json => {
                let line = JsonRecord {
                    source_ip: record.source_ip().to_string(),
                    source_port: record.source_port(),
                    destination_ip: record.destination_ip().to_string(),
                    destination_port: record.destination_port(),
                    transport_protocol: record.transport_protocol(),
                    application_protocol: record.application_protocol(),
                    captured_at: record.captured_at(),
                    length: record.length(),
                    payload: &payload,
                    payload_sha256: hex::encode(Sha256::digest(record.payload())),
                };
                Ok(format!("{}\n", serde_json::to_string(&line)?))
            }
        }
    }

    fn write_all(&mut self, text: &str) -> Result<(), AppError> {
        for target in self.targets.iter_mut() {
            target.write_all(text.as_bytes())?;
        }
        Ok(())
    }

    /// Flush every target; returns how many records were written
    pub fn finish(&mut self) -> Result<u64, AppError> {
        for target in self.targets.iter_mut() {
            target.flush()?;
        }
        Ok(self.written)
    }
}

impl PacketSink for DumpWriter {
    fn accept(&mut self, record: PacketRecord) -> Result<(), AppError> {
        if !self.header_written && self.format == DumpFormat::Table {
            let header = format!("{}\n", self.header());
            self.write_all(&header)?;
            self.header_written = true;
        }

        let text = self.format_record(&record)?;
        self.write_all(&text)?;
        self.written += 1;
        Ok(())
    }
}
