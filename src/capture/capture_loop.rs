use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, info, trace};

use crate::capture::header_parser::{HeaderParser, HeaderParserError};
use crate::capture::packet::PacketRecord;
use crate::capture::pcap::{CaptureSource, Received};
use crate::capture::protocol_identifier::ProtocolIdentifier;
use crate::capture::transport::{Dissection, TransportDissector};
use crate::utils::error::AppError;

/// Receives every record the capture loop emits, in arrival order
pub trait PacketSink {
    fn accept(&mut self, record: PacketRecord) -> Result<(), AppError>;
}

impl PacketSink for Vec<PacketRecord> {
    fn accept(&mut self, record: PacketRecord) -> Result<(), AppError> {
        self.push(record);
        Ok(())
    }
}

/// Cooperative cancellation shared between the loop and whoever stops it.
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also stop once `window` has elapsed from now
    pub fn with_deadline(mut self, window: Duration) -> Self {
        self.deadline = Some(Instant::now() + window);
        self
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        matches!(self.deadline, Some(deadline) if Instant::now() >= deadline)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopped,
}

/// Why a buffer produced no record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discard {
    Malformed(HeaderParserError),
    NotIpv4(u8),
    UnsupportedTransport(u8),
    UnmappedPort(u16),
}

/// Per-run counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub received: u64,
    pub emitted: u64,
    pub malformed: u64,
    pub not_ipv4: u64,
    pub unsupported_transport: u64,
    pub unmapped_port: u64,
}

impl CaptureStats {
    fn count(&mut self, discard: &Discard) {
        match discard {
            Discard::Malformed(_) => self.malformed += 1,
            Discard::NotIpv4(_) => self.not_ipv4 += 1,
            Discard::UnsupportedTransport(_) => self.unsupported_transport += 1,
            Discard::UnmappedPort(_) => self.unmapped_port += 1,
        }
    }

    pub fn discarded(&self) -> u64 {
        self.malformed + self.not_ipv4 + self.unsupported_transport + self.unmapped_port
    }
}

/// Pulls datagrams from a source, decodes and classifies them, and feeds the
/// resulting records to a sink.
pub struct CaptureLoop<S: CaptureSource> {
    source: S,
    identifier: ProtocolIdentifier,
    state: LoopState,
    stats: CaptureStats,
    log_drops: bool,
}

impl<S: CaptureSource> CaptureLoop<S> {
    pub fn new(source: S, identifier: ProtocolIdentifier) -> Self {
        Self {
            source,
            identifier,
            state: LoopState::Running,
            stats: CaptureStats::default(),
            log_drops: false,
        }
    }

    /// Log every discarded packet at debug level
    pub fn log_drops(mut self, enabled: bool) -> Self {
        self.log_drops = enabled;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    /// Give the source back, releasing the loop
    pub fn into_source(self) -> S {
        self.source
    }

    /// Run until `stop` fires or the source runs dry. Decode failures only
    /// discard the packet at hand; source and sink failures end the run.
    pub fn run<K: PacketSink>(
        &mut self,
        sink: &mut K,
        stop: &StopSignal,
    ) -> Result<CaptureStats, AppError> {
        info!("Capture loop running with {:?} classification", self.identifier.policy());

        while self.state == LoopState::Running {
            if stop.is_stopped() {
                self.state = LoopState::Stopped;
                break;
            }

            let data = match self.source.receive() {
                Ok(Received::Packet(data)) => data,
                Ok(Received::Idle) => {
                    trace!("No datagram this read");
                    continue;
                }
                Ok(Received::Exhausted) => {
                    info!("Capture source exhausted");
                    self.state = LoopState::Stopped;
                    break;
                }
                Err(e) => {
                    self.state = LoopState::Stopped;
                    return Err(e);
                }
            };

            self.stats.received += 1;
            match self.decode(&data, Utc::now()) {
                Ok(record) => {
                    self.stats.emitted += 1;
                    if let Err(e) = sink.accept(record) {
                        self.state = LoopState::Stopped;
                        return Err(e);
                    }
                }
                Err(discard) => {
                    if self.log_drops {
                        debug!("Discarded {}-byte packet: {:?}", data.len(), discard);
                    }
                    self.stats.count(&discard);
                }
            }
        }

        info!(
            "Capture loop stopped: {} received, {} emitted, {} discarded",
            self.stats.received,
            self.stats.emitted,
            self.stats.discarded()
        );
        Ok(self.stats.clone())
    }

    /// Decode one datagram into a record stamped with `captured_at`
    pub fn decode(&self, data: &[u8], captured_at: DateTime<Utc>) -> Result<PacketRecord, Discard> {
        let ip = HeaderParser::parse(data).map_err(Discard::Malformed)?;
        if ip.version != 4 {
            return Err(Discard::NotIpv4(ip.version));
        }

        let transport = match TransportDissector::dissect(data, &ip).map_err(Discard::Malformed)? {
            Dissection::Transport(transport) => transport,
            Dissection::UnsupportedTransport(protocol) => {
                return Err(Discard::UnsupportedTransport(protocol))
            }
        };

        let application_protocol = self
            .identifier
            .identify(transport.destination_port)
            .ok_or(Discard::UnmappedPort(transport.destination_port))?;

        Ok(PacketRecord::from_headers(
            data,
            &ip,
            &transport,
            application_protocol,
            captured_at,
        ))
    }
}
