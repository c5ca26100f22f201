//! Packet capture and decoding.
//!
//! Raw IPv4 datagrams flow from a [`CaptureSource`] through the header
//! parser, the transport dissector and the port-based protocol identifier,
//! and come out as [`PacketRecord`]s handed to a [`PacketSink`].

pub mod capture_loop;
pub mod header_parser;
pub mod packet;
pub mod pcap;
pub mod protocol_identifier;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_utils;

pub use capture_loop::{CaptureLoop, CaptureStats, Discard, LoopState, PacketSink, StopSignal};
pub use header_parser::{HeaderParser, HeaderParserError, IpHeader};
pub use packet::PacketRecord;
pub use self::pcap::{CaptureSettings, CaptureSource, LinkLayer, PcapSource, Received};
pub use protocol_identifier::{
    ApplicationProtocol, ClassificationPolicy, ProtocolIdentifier, ProtocolTable,
};
pub use transport::{Dissection, TransportDissector, TransportHeader, TransportProtocol};
