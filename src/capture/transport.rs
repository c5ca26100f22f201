use std::fmt;

use serde::Serialize;

use super::header_parser::{HeaderParserError, IpHeader};

/// IP protocol number for TCP
pub const IPPROTO_TCP: u8 = 6;
/// IP protocol number for UDP
pub const IPPROTO_UDP: u8 = 17;

/// TCP and UDP both open with source port then destination port, so the
/// ports are read at the same place relative to the transport header start
/// before knowing which of the two is being dissected.
pub const PORTS_OFFSET: usize = 0;
pub const PORTS_LEN: usize = 4;

/// Position of the data-offset nibble inside the TCP header
const TCP_DATA_OFFSET_BYTE: usize = 12;
const MIN_TCP_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;

/// Transport protocols the dissector understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransportProtocol {
    TCP,
    UDP,
}

impl TransportProtocol {
    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            IPPROTO_TCP => Some(Self::TCP),
            IPPROTO_UDP => Some(Self::UDP),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TCP => "TCP",
            Self::UDP => "UDP",
        }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded TCP or UDP header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    pub protocol: TransportProtocol,
    pub source_port: u16,
    pub destination_port: u16,
    pub header_length: usize,
    /// Offset of the application payload within the whole datagram. May lie
    /// past the end of the buffer, in which case the payload is empty.
    pub payload_offset: usize,
}

impl TransportHeader {
    /// Application payload of the datagram this header was dissected from
    pub fn payload<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        data.get(self.payload_offset..).unwrap_or(&[])
    }
}

/// Result of a dissection that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dissection {
    Transport(TransportHeader),
    /// Neither TCP nor UDP; the packet should be skipped
    UnsupportedTransport(u8),
}

pub struct TransportDissector;

impl TransportDissector {
    /// Dissect the transport header that follows `ip` inside `data`.
    pub fn dissect(data: &[u8], ip: &IpHeader) -> Result<Dissection, HeaderParserError> {
        let protocol = match TransportProtocol::from_number(ip.protocol) {
            Some(protocol) => protocol,
            None => return Ok(Dissection::UnsupportedTransport(ip.protocol)),
        };

        let base = ip.transport_offset();
        let (source_port, destination_port) = Self::read_ports(data, base)?;

        let header_length = match protocol {
            TransportProtocol::TCP => Self::tcp_header_length(data, base)?,
            TransportProtocol::UDP => UDP_HEADER_LEN,
        };

        Ok(Dissection::Transport(TransportHeader {
            protocol,
            source_port,
            destination_port,
            header_length,
            payload_offset: base + header_length,
        }))
    }

    fn read_ports(data: &[u8], base: usize) -> Result<(u16, u16), HeaderParserError> {
        let start = base + PORTS_OFFSET;
        let ports = data
            .get(start..start + PORTS_LEN)
            .ok_or(HeaderParserError::TruncatedHeader {
                needed: start + PORTS_LEN,
                available: data.len(),
            })?;

        Ok((
            u16::from_be_bytes([ports[0], ports[1]]),
            u16::from_be_bytes([ports[2], ports[3]]),
        ))
    }

    fn tcp_header_length(data: &[u8], base: usize) -> Result<usize, HeaderParserError> {
        let position = base + TCP_DATA_OFFSET_BYTE;
        let byte = *data.get(position).ok_or(HeaderParserError::TruncatedHeader {
            needed: position + 1,
            available: data.len(),
        })?;

        let words = byte >> 4;
        let header_length = words as usize * 4;
        if header_length < MIN_TCP_HEADER_LEN {
            return Err(HeaderParserError::InvalidHeaderLength(words));
        }

        Ok(header_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::header_parser::HeaderParser;

    fn ip_header(protocol: u8, total: usize) -> Vec<u8> {
        let mut data = vec![0u8; total];
        data[0] = 0x45; // Version and IHL
        data[9] = protocol; // Protocol
        data[12..16].copy_from_slice(&[10, 0, 0, 1]); // Source IP
        data[16..20].copy_from_slice(&[10, 0, 0, 2]); // Destination IP
        data
    }

    fn dissect(data: &[u8]) -> Result<Dissection, HeaderParserError> {
        let ip = HeaderParser::parse(data).unwrap();
        TransportDissector::dissect(data, &ip)
    }

    #[test]
    fn test_tcp_without_options() {
        let mut data = ip_header(IPPROTO_TCP, 44);
        data[20..22].copy_from_slice(&[0x04, 0x57]); // Source port 1111
        data[22..24].copy_from_slice(&[0x00, 0x50]); // Destination port 80
        data[32] = 0x50; // Data offset 5 words
        data[40..44].copy_from_slice(b"ping");

        let header = match dissect(&data).unwrap() {
            Dissection::Transport(header) => header,
            other => panic!("unexpected dissection: {:?}", other),
        };

        assert_eq!(header.protocol, TransportProtocol::TCP);
        assert_eq!(header.source_port, 1111);
        assert_eq!(header.destination_port, 80);
        assert_eq!(header.header_length, 20);
        assert_eq!(header.payload_offset, 40);
        assert_eq!(header.payload(&data), b"ping");
    }

    #[test]
    fn test_tcp_with_options() {
        let mut data = ip_header(IPPROTO_TCP, 60);
        data[32] = 0x80; // Data offset 8 words

        match dissect(&data).unwrap() {
            Dissection::Transport(header) => {
                assert_eq!(header.header_length, 32);
                assert_eq!(header.payload_offset, 52);
                assert_eq!(header.payload(&data).len(), 8);
            }
            other => panic!("unexpected dissection: {:?}", other),
        }
    }

    #[test]
    fn test_udp_offset_is_fixed() {
        let mut data = ip_header(IPPROTO_UDP, 28);
        data[20..22].copy_from_slice(&[0xC3, 0x50]); // Source port 50000
        data[22..24].copy_from_slice(&[0x00, 0x35]); // Destination port 53

        match dissect(&data).unwrap() {
            Dissection::Transport(header) => {
                assert_eq!(header.protocol, TransportProtocol::UDP);
                assert_eq!(header.source_port, 50000);
                assert_eq!(header.destination_port, 53);
                assert_eq!(header.payload_offset, 28);
                assert!(header.payload(&data).is_empty());
            }
            other => panic!("unexpected dissection: {:?}", other),
        }
    }

    #[test]
    fn test_ports_follow_ip_options() {
        let mut data = vec![0u8; 40];
        data[0] = 0x46; // IHL 6 words
        data[9] = IPPROTO_UDP;
        data[24..26].copy_from_slice(&[0x00, 0x44]); // Source port 68
        data[26..28].copy_from_slice(&[0x00, 0x43]); // Destination port 67

        match dissect(&data).unwrap() {
            Dissection::Transport(header) => {
                assert_eq!(header.source_port, 68);
                assert_eq!(header.destination_port, 67);
                assert_eq!(header.payload_offset, 32);
            }
            other => panic!("unexpected dissection: {:?}", other),
        }
    }

    #[test]
    fn test_payload_offset_past_end() {
        // Data offset claims 60 bytes of TCP header but the capture stops early
        let mut data = ip_header(IPPROTO_TCP, 40);
        data[32] = 0xF0;

        match dissect(&data).unwrap() {
            Dissection::Transport(header) => {
                assert_eq!(header.payload_offset, 80);
                assert!(header.payload(&data).is_empty());
            }
            other => panic!("unexpected dissection: {:?}", other),
        }
    }

    #[test]
    fn test_tcp_truncated_before_data_offset() {
        let data = ip_header(IPPROTO_TCP, 32);
        assert_eq!(
            dissect(&data),
            Err(HeaderParserError::TruncatedHeader { needed: 33, available: 32 })
        );
    }

    #[test]
    fn test_udp_truncated_before_ports() {
        let data = ip_header(IPPROTO_UDP, 22);
        assert_eq!(
            dissect(&data),
            Err(HeaderParserError::TruncatedHeader { needed: 24, available: 22 })
        );
    }

    #[test]
    fn test_tcp_data_offset_below_minimum() {
        let mut data = ip_header(IPPROTO_TCP, 40);
        data[32] = 0x30;
        assert_eq!(dissect(&data), Err(HeaderParserError::InvalidHeaderLength(3)));
    }

    #[test]
    fn test_unsupported_transport() {
        let data = ip_header(1, 28); // ICMP
        assert_eq!(dissect(&data), Ok(Dissection::UnsupportedTransport(1)));
    }
}
