use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;

use crate::capture::{ApplicationProtocol, PacketRecord, PacketSink, ProtocolTable};
use crate::utils::error::AppError;

/// Non-zero counts of one protocol over time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolSeries {
    pub protocol: ApplicationProtocol,
    /// (elapsed second, packets in that second)
    pub points: Vec<(u64, u64)>,
}

#[derive(Serialize)]
struct HistogramReport<'a> {
    started_at: DateTime<Utc>,
    window_seconds: usize,
    ignored: u64,
    series: &'a [ProtocolSeries],
}

/// Per-second packet counts by application protocol over a fixed window
/// starting at `start`. Column order follows the protocol table.
#[derive(Debug, Clone)]
pub struct Histogram {
    start: DateTime<Utc>,
    labels: Vec<ApplicationProtocol>,
    counts: Vec<Vec<u64>>,
    ignored: u64,
}

impl Histogram {
    pub fn new(start: DateTime<Utc>, window_seconds: usize, table: &ProtocolTable) -> Self {
        let labels = table.labels();
        Self {
            start,
            counts: vec![vec![0; labels.len()]; window_seconds],
            labels,
            ignored: 0,
        }
    }

    pub fn window_seconds(&self) -> usize {
        self.counts.len()
    }

    pub fn labels(&self) -> &[ApplicationProtocol] {
        &self.labels
    }

    pub fn index_of(&self, protocol: ApplicationProtocol) -> Option<usize> {
        self.labels.iter().position(|label| *label == protocol)
    }

    /// `counts()[second][index_of(protocol)]`
    pub fn counts(&self) -> &[Vec<u64>] {
        &self.counts
    }

    pub fn count(&self, second: usize, protocol: ApplicationProtocol) -> u64 {
        match (self.counts.get(second), self.index_of(protocol)) {
            (Some(row), Some(column)) => row[column],
            _ => 0,
        }
    }

    /// Packets that fell outside the window
    pub fn ignored(&self) -> u64 {
        self.ignored
    }

    /// Count one packet at `elapsed_seconds` after the start. Returns false
    /// when it lies outside the window.
    pub fn record_at(&mut self, elapsed_seconds: i64, protocol: ApplicationProtocol) -> bool {
        let column = self.index_of(protocol);
        let row = usize::try_from(elapsed_seconds)
            .ok()
            .and_then(|second| self.counts.get_mut(second));

        match (row, column) {
            (Some(row), Some(column)) => {
                row[column] += 1;
                true
            }
            _ => {
                self.ignored += 1;
                false
            }
        }
    }

    /// One series per protocol that saw traffic, zero-count seconds left out
    pub fn series(&self) -> Vec<ProtocolSeries> {
        self.labels
            .iter()
            .enumerate()
            .filter_map(|(column, protocol)| {
                let points: Vec<(u64, u64)> = self
                    .counts
                    .iter()
                    .enumerate()
                    .filter(|(_, row)| row[column] > 0)
                    .map(|(second, row)| (second as u64, row[column]))
                    .collect();

                if points.is_empty() {
                    None
                } else {
                    Some(ProtocolSeries {
                        protocol: *protocol,
                        points,
                    })
                }
            })
            .collect()
    }

    /// Plain-text rendering of `series()`, one protocol per line
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Packets per second by application protocol ({}s window from {})",
            self.window_seconds(),
            self.start.format("%Y-%m-%d %H:%M:%S")
        );

        let series = self.series();
        if series.is_empty() {
            out.push_str("  no packets captured\n");
            return out;
        }

        for entry in &series {
            let total: u64 = entry.points.iter().map(|(_, count)| count).sum();
            let points: Vec<String> = entry
                .points
                .iter()
                .map(|(second, count)| format!("{}s={}", second, count))
                .collect();
            let _ = writeln!(
                out,
                "  {:<8} total={:<6} {}",
                entry.protocol.label(),
                total,
                points.join(" ")
            );
        }
        out
    }

    pub fn save_json(&self, path: &Path) -> Result<(), AppError> {
        let series = self.series();
        let report = HistogramReport {
            started_at: self.start,
            window_seconds: self.window_seconds(),
            ignored: self.ignored,
            series: &series,
        };

        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &report)?;
        writer.flush()?;
        info!("Histogram written to {}", path.display());
        Ok(())
    }
}

impl PacketSink for Histogram {
    fn accept(&mut self, record: PacketRecord) -> Result<(), AppError> {
        if record.captured_at() < self.start {
            debug!("Packet stamped before the histogram window");
            self.ignored += 1;
            return Ok(());
        }

        let elapsed = (record.captured_at() - self.start).num_seconds();
        if !self.record_at(elapsed, record.application_protocol()) {
            debug!("Packet at {}s is outside the histogram window", elapsed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    use crate::capture::test_utils::{record_at, tcp_packet, udp_packet};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_two_second_window() {
        let table = ProtocolTable::default();
        let mut histogram = Histogram::new(start(), 2, &table);

        let http = tcp_packet([10, 0, 0, 1], [10, 0, 0, 2], 40000, 80, b"GET /");
        let dns = udp_packet([10, 0, 0, 1], [10, 0, 0, 53], 50000, 53, b"");

        histogram.accept(record_at(&http, start())).unwrap();
        histogram
            .accept(record_at(&http, start() + Duration::milliseconds(900)))
            .unwrap();
        histogram
            .accept(record_at(&dns, start() + Duration::milliseconds(1500)))
            .unwrap();

        let http_index = table.index_of(ApplicationProtocol::HTTP).unwrap();
        let dns_index = table.index_of(ApplicationProtocol::DNS).unwrap();
        assert_eq!(histogram.counts()[0][http_index], 2);
        assert_eq!(histogram.counts()[1][dns_index], 1);

        let total: u64 = histogram.counts().iter().flatten().sum();
        assert_eq!(total, 3);
        assert_eq!(histogram.count(1, ApplicationProtocol::HTTP), 0);
        assert_eq!(histogram.ignored(), 0);
    }

    #[test]
    fn test_outside_window_is_ignored() {
        let mut histogram = Histogram::new(start(), 2, &ProtocolTable::default());

        assert!(!histogram.record_at(2, ApplicationProtocol::HTTP));
        assert!(!histogram.record_at(-1, ApplicationProtocol::HTTP));
        assert!(histogram.record_at(1, ApplicationProtocol::Unknown));
        assert_eq!(histogram.ignored(), 2);
        assert_eq!(histogram.count(1, ApplicationProtocol::Unknown), 1);
    }

    #[test]
    fn test_series_excludes_zero_counts() {
        let mut histogram = Histogram::new(start(), 5, &ProtocolTable::default());
        histogram.record_at(0, ApplicationProtocol::HTTP);
        histogram.record_at(3, ApplicationProtocol::HTTP);
        histogram.record_at(3, ApplicationProtocol::HTTP);
        histogram.record_at(4, ApplicationProtocol::SSH);

        let series = histogram.series();
        assert_eq!(
            series,
            vec![
                ProtocolSeries {
                    protocol: ApplicationProtocol::SSH,
                    points: vec![(4, 1)],
                },
                ProtocolSeries {
                    protocol: ApplicationProtocol::HTTP,
                    points: vec![(0, 1), (3, 2)],
                },
            ]
        );

        let text = histogram.render_text();
        assert!(text.contains("HTTP     total=3      0s=1 3s=2"));
        assert!(text.contains("SSH      total=1      4s=1"));
    }

    #[test]
    fn test_empty_rendering() {
        let histogram = Histogram::new(start(), 3, &ProtocolTable::default());
        assert!(histogram.series().is_empty());
        assert!(histogram.render_text().contains("no packets captured"));
    }

    #[test]
    fn test_save_json() {
        let mut histogram = Histogram::new(start(), 2, &ProtocolTable::default());
        histogram.record_at(1, ApplicationProtocol::DNS);

        let path = std::env::temp_dir().join(format!("ipsniff-histogram-{}.json", std::process::id()));
        histogram.save_json(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(value["window_seconds"], 2);
        assert_eq!(value["series"][0]["protocol"], "DNS");
        assert_eq!(value["series"][0]["points"][0][0], 1);
        assert_eq!(value["series"][0]["points"][0][1], 1);
    }

    #[test]
    fn test_save_json_reports_failure() {
        let histogram = Histogram::new(start(), 1, &ProtocolTable::default());
        let path = std::env::temp_dir()
            .join(format!("ipsniff-missing-{}", std::process::id()))
            .join("histogram.json");

        assert!(matches!(histogram.save_json(&path), Err(AppError::IoError(_))));
    }

    #[test]
    fn test_record_before_start_is_ignored() {
        let mut histogram = Histogram::new(start(), 2, &ProtocolTable::default());
        let http = tcp_packet([10, 0, 0, 1], [10, 0, 0, 2], 40000, 80, b"");

        histogram
            .accept(record_at(&http, start() - Duration::milliseconds(500)))
            .unwrap();

        assert_eq!(histogram.count(0, ApplicationProtocol::HTTP), 0);
        assert_eq!(histogram.ignored(), 1);
    }
}
