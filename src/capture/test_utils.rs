//! Helpers for building synthetic datagrams in tests.

use chrono::{DateTime, Utc};
use etherparse::PacketBuilder;

use super::capture_loop::CaptureLoop;
use super::packet::PacketRecord;
use super::pcap::{CaptureSource, Received};
use super::protocol_identifier::{ClassificationPolicy, ProtocolIdentifier};
use crate::utils::error::AppError;

pub fn tcp_packet(
    source: [u8; 4],
    destination: [u8; 4],
    source_port: u16,
    destination_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    let builder = PacketBuilder::ipv4(source, destination, 64)
        .tcp(source_port, destination_port, 1, 1024);
    let mut data = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut data, payload).unwrap();
    data
}

pub fn udp_packet(
    source: [u8; 4],
    destination: [u8; 4],
    source_port: u16,
    destination_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    let builder = PacketBuilder::ipv4(source, destination, 64).udp(source_port, destination_port);
    let mut data = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut data, payload).unwrap();
    data
}

/// Source that never yields anything
pub struct EmptySource;

impl CaptureSource for EmptySource {
    fn receive(&mut self) -> Result<Received, AppError> {
        Ok(Received::Exhausted)
    }
}

/// Decode `data` permissively into a record stamped `captured_at`
pub fn record_at(data: &[u8], captured_at: DateTime<Utc>) -> PacketRecord {
    CaptureLoop::new(EmptySource, ProtocolIdentifier::new(ClassificationPolicy::Permissive))
        .decode(data, captured_at)
        .unwrap()
}
