use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};

use super::header_parser::IpHeader;
use super::protocol_identifier::ApplicationProtocol;
use super::transport::{TransportHeader, TransportProtocol};

/// A classified packet, handed to a sink once and never modified afterwards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRecord {
    version: u8,
    source_ip: Ipv4Addr,
    destination_ip: Ipv4Addr,
    source_port: u16,
    destination_port: u16,
    transport_protocol: TransportProtocol,
    application_protocol: ApplicationProtocol,
    captured_at: DateTime<Utc>,
    /// Size of the whole datagram as captured
    length: usize,
    payload: Vec<u8>,
}

impl PacketRecord {
    /// Assemble a record from the decoded headers of `data`
    pub fn from_headers(
        data: &[u8],
        ip: &IpHeader,
        transport: &TransportHeader,
        application_protocol: ApplicationProtocol,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            version: ip.version,
            source_ip: ip.source,
            destination_ip: ip.destination,
            source_port: transport.source_port,
            destination_port: transport.destination_port,
            transport_protocol: transport.protocol,
            application_protocol,
            captured_at,
            length: data.len(),
            payload: transport.payload(data).to_vec(),
        }
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn source_ip(&self) -> Ipv4Addr {
        self.source_ip
    }

    pub fn destination_ip(&self) -> Ipv4Addr {
        self.destination_ip
    }

    pub fn source_port(&self) -> u16 {
        self.source_port
    }

    pub fn destination_port(&self) -> u16 {
        self.destination_port
    }

    pub fn transport_protocol(&self) -> TransportProtocol {
        self.transport_protocol
    }

    pub fn application_protocol(&self) -> ApplicationProtocol {
        self.application_protocol
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// `ip:port` of the sender
    pub fn source_endpoint(&self) -> String {
        format!("{}:{}", self.source_ip, self.source_port)
    }

    /// `ip:port` of the receiver
    pub fn destination_endpoint(&self) -> String {
        format!("{}:{}", self.destination_ip, self.destination_port)
    }
}
