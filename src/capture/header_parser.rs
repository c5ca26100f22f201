use std::net::Ipv4Addr;
use thiserror::Error;

/// Smallest legal IPv4 header, in bytes
pub const MIN_IPV4_HEADER_LEN: usize = 20;

/// Largest datagram a raw buffer can hold
pub const MAX_DATAGRAM_LEN: usize = 65535;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderParserError {
    #[error("Truncated header: needed {needed} bytes, got {available}")]
    TruncatedHeader { needed: usize, available: usize },

    #[error("Invalid header length: {0} words")]
    InvalidHeaderLength(u8),
}

/// IPv4 header information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpHeader {
    pub version: u8,
    pub header_length: usize,
    pub protocol: u8,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

impl IpHeader {
    /// Offset of the transport header within the datagram
    pub fn transport_offset(&self) -> usize {
        self.header_length
    }
}

/// Header parser for raw IPv4 datagrams
pub struct HeaderParser;

impl HeaderParser {
    /// Parse the IPv4 header at the start of `data`.
    ///
    /// The version nibble is reported as-is; rejecting non-IPv4 traffic is the
    /// caller's decision. Any transport protocol number is accepted.
    pub fn parse(data: &[u8]) -> Result<IpHeader, HeaderParserError> {
        if data.len() < MIN_IPV4_HEADER_LEN {
            return Err(HeaderParserError::TruncatedHeader {
                needed: MIN_IPV4_HEADER_LEN,
                available: data.len(),
            });
        }

        let version = data[0] >> 4;
        let ihl = data[0] & 0x0F;
        let header_length = ihl as usize * 4;

        if header_length < MIN_IPV4_HEADER_LEN {
            return Err(HeaderParserError::InvalidHeaderLength(ihl));
        }

        if data.len() < header_length {
            return Err(HeaderParserError::TruncatedHeader {
                needed: header_length,
                available: data.len(),
            });
        }

        let protocol = data[9];

        let mut source_addr = [0u8; 4];
        let mut dest_addr = [0u8; 4];
        source_addr.copy_from_slice(&data[12..16]);
        dest_addr.copy_from_slice(&data[16..20]);

        Ok(IpHeader {
            version,
            header_length,
            protocol,
            source: Ipv4Addr::from(source_addr),
            destination: Ipv4Addr::from(dest_addr),
        })
    }
}
