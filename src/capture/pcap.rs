use std::path::Path;

use etherparse::{ether_type, Ethernet2HeaderSlice};
use log::{debug, info, warn};
use pcap::{Activated, Capture, Device, Linktype};

use crate::capture::header_parser::MAX_DATAGRAM_LEN;
use crate::utils::error::AppError;

/// Outcome of a single read from a capture source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// A raw IP datagram, header included
    Packet(Vec<u8>),
    /// Nothing for the decoder this time: the read timed out or the frame
    /// did not carry IPv4
    Idle,
    /// The source has no more packets (end of a capture file)
    Exhausted,
}

/// Anything that yields raw IP datagrams one at a time
pub trait CaptureSource {
    /// Block until the next datagram, a timeout, or the end of input
    fn receive(&mut self) -> Result<Received, AppError>;
}

/// Options for opening a pcap handle
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub snaplen: i32,
    pub promisc: bool,
    pub timeout_ms: i32,
    pub filter: Option<String>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            snaplen: MAX_DATAGRAM_LEN as i32,
            promisc: true,
            timeout_ms: 500,
            filter: None,
        }
    }
}

const SLL_HEADER_LEN: usize = 16;
const NULL_HEADER_LEN: usize = 4;
const VLAN_TAG_LEN: usize = 4;
const AF_INET: u32 = 2;

/// Link-layer framing in front of the IP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    Ethernet,
    LinuxSll,
    /// BSD loopback: 4-byte address family
    Null,
    RawIp,
}

impl LinkLayer {
    pub fn from_linktype(linktype: Linktype) -> Result<Self, AppError> {
        match linktype.0 {
            1 => Ok(Self::Ethernet),
            113 => Ok(Self::LinuxSll),
            0 | 108 => Ok(Self::Null),
            12 | 14 | 101 | 228 => Ok(Self::RawIp),
            other => Err(AppError::CaptureError(format!(
                "Unsupported link type: {}",
                other
            ))),
        }
    }

    /// Strip the link-layer header from `frame`, returning the IPv4 datagram
    /// it carries, or `None` for anything else. Padding and trailing FCS
    /// bytes past the datagram's total length are cut off.
    pub fn strip<'a>(&self, frame: &'a [u8]) -> Option<&'a [u8]> {
        self.network_layer(frame).map(trim_to_total_length)
    }

    fn network_layer<'a>(&self, frame: &'a [u8]) -> Option<&'a [u8]> {
        match self {
            Self::Ethernet => {
                let ethernet = Ethernet2HeaderSlice::from_slice(frame).ok()?;
                let mut offset = ethernet.slice().len();
                let mut kind = ethernet.ether_type();

                if kind == ether_type::VLAN_TAGGED_FRAME {
                    let tag = frame.get(offset..offset + VLAN_TAG_LEN)?;
                    kind = u16::from_be_bytes([tag[2], tag[3]]);
                    offset += VLAN_TAG_LEN;
                }

                if kind == ether_type::IPV4 {
                    frame.get(offset..)
                } else {
                    None
                }
            }
            Self::LinuxSll => {
                let header = frame.get(..SLL_HEADER_LEN)?;
                let kind = u16::from_be_bytes([header[14], header[15]]);
                if kind == ether_type::IPV4 {
                    frame.get(SLL_HEADER_LEN..)
                } else {
                    None
                }
            }
            Self::Null => {
                let header = frame.get(..NULL_HEADER_LEN)?;
                let family = [header[0], header[1], header[2], header[3]];
                // Host byte order for DLT_NULL, network order for DLT_LOOP
                if u32::from_le_bytes(family) == AF_INET || u32::from_be_bytes(family) == AF_INET {
                    frame.get(NULL_HEADER_LEN..)
                } else {
                    None
                }
            }
            Self::RawIp => match frame.first() {
                Some(byte) if byte >> 4 == 4 => Some(frame),
                _ => None,
            },
        }
    }
}

/// Cut `datagram` to the IPv4 total length when that length is consistent
/// with the header and the captured bytes; otherwise leave it as captured.
fn trim_to_total_length(datagram: &[u8]) -> &[u8] {
    let (first, length) = match (datagram.first(), datagram.get(2..4)) {
        (Some(first), Some(length)) => (*first, length),
        _ => return datagram,
    };

    let header_length = (first & 0x0F) as usize * 4;
    let total_length = u16::from_be_bytes([length[0], length[1]]) as usize;
    if header_length <= total_length && total_length <= datagram.len() {
        &datagram[..total_length]
    } else {
        datagram
    }
}

/// libpcap-backed capture source. The handle is released when the source is
/// dropped.
pub struct PcapSource {
    cap: Capture<dyn Activated>,
    link: LinkLayer,
    description: String,
}

impl PcapSource {
    /// Open a live capture on `interface_name` ("default" picks the system
    /// default device)
    pub fn open_live(interface_name: &str, settings: &CaptureSettings) -> Result<Self, AppError> {
        let interface = Self::resolve_interface(interface_name)?;
        info!("Starting packet capture on interface: {}", interface);

        let cap = Capture::from_device(interface.as_str())
            .map_err(|e| AppError::CaptureError(format!("Failed to open device: {}", e)))?
            .snaplen(settings.snaplen)
            .promisc(settings.promisc)
            .timeout(settings.timeout_ms)
            .open()
            .map_err(|e| AppError::CaptureError(format!("Failed to open capture: {}", e)))?;

        Self::from_capture(cap.into(), settings, interface)
    }

    /// Replay a capture file
    pub fn open_file(path: &Path, settings: &CaptureSettings) -> Result<Self, AppError> {
        info!("Reading packets from capture file: {}", path.display());

        let cap = Capture::from_file(path).map_err(|e| {
            AppError::CaptureError(format!("Failed to open {}: {}", path.display(), e))
        })?;

        Self::from_capture(cap.into(), settings, path.display().to_string())
    }

    fn from_capture(
        mut cap: Capture<dyn Activated>,
        settings: &CaptureSettings,
        description: String,
    ) -> Result<Self, AppError> {
        if let Some(filter_str) = &settings.filter {
            debug!("Applying filter: {}", filter_str);
            cap.filter(filter_str, true)
                .map_err(|e| AppError::CaptureError(format!("Failed to set filter: {}", e)))?;
        }

        let linktype = cap.get_datalink();
        let link = LinkLayer::from_linktype(linktype)?;
        debug!("Link type {} handled as {:?}", linktype.0, link);

        Ok(Self {
            cap,
            link,
            description,
        })
    }

    pub fn list_interfaces() -> Result<Vec<Device>, AppError> {
        Ok(Device::list()?)
    }

    fn resolve_interface(interface_name: &str) -> Result<String, AppError> {
        let devices = Self::list_interfaces()?;

        if interface_name == "default" {
            return match Device::lookup() {
                Ok(Some(device)) => {
                    info!("Using default network interface: {}", device.name);
                    Ok(device.name)
                }
                Ok(None) | Err(_) => {
                    warn!("Failed to find default interface");
                    match devices.first() {
                        Some(first_device) => {
                            info!("Falling back to first available interface: {}", first_device.name);
                            Ok(first_device.name.clone())
                        }
                        None => Err(AppError::CaptureError(
                            "No network interfaces available".to_string(),
                        )),
                    }
                }
            };
        }

        devices
            .iter()
            .find(|d| d.name == interface_name)
            .map(|d| d.name.clone())
            .ok_or_else(|| {
                AppError::CaptureError(format!("Network interface not found: {}", interface_name))
            })
    }
}

impl CaptureSource for PcapSource {
    fn receive(&mut self) -> Result<Received, AppError> {
        match self.cap.next_packet() {
            Ok(packet) => match self.link.strip(packet.data) {
                Some(datagram) => {
                    let len = datagram.len().min(MAX_DATAGRAM_LEN);
                    Ok(Received::Packet(datagram[..len].to_vec()))
                }
                None => Ok(Received::Idle),
            },
            Err(pcap::Error::TimeoutExpired) => Ok(Received::Idle),
            Err(pcap::Error::NoMorePackets) => Ok(Received::Exhausted),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for PcapSource {
    fn drop(&mut self) {
        info!("Closing capture on {}", self.description);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;

    use crate::capture::test_utils::record_at;

    const IPV4_STUB: [u8; 4] = [0x45, 0x00, 0x00, 0x14];

    #[test]
    fn test_linktype_mapping() {
        assert_eq!(LinkLayer::from_linktype(Linktype(1)).unwrap(), LinkLayer::Ethernet);
        assert_eq!(LinkLayer::from_linktype(Linktype(113)).unwrap(), LinkLayer::LinuxSll);
        assert_eq!(LinkLayer::from_linktype(Linktype(0)).unwrap(), LinkLayer::Null);
        assert_eq!(LinkLayer::from_linktype(Linktype(101)).unwrap(), LinkLayer::RawIp);
        assert!(LinkLayer::from_linktype(Linktype(127)).is_err());
    }

    #[test]
    fn test_strip_ethernet() {
        let mut frame = vec![0u8; 12]; // MAC addresses
        frame.extend_from_slice(&[0x08, 0x00]); // EtherType IPv4
        frame.extend_from_slice(&IPV4_STUB);

        assert_eq!(LinkLayer::Ethernet.strip(&frame), Some(&IPV4_STUB[..]));
    }

    #[test]
    fn test_strip_vlan_tagged_ethernet() {
        let mut frame = vec![0u8; 12];
        frame.extend_from_slice(&[0x81, 0x00]); // 802.1Q
        frame.extend_from_slice(&[0x00, 0x64, 0x08, 0x00]); // VLAN 100, IPv4
        frame.extend_from_slice(&IPV4_STUB);

        assert_eq!(LinkLayer::Ethernet.strip(&frame), Some(&IPV4_STUB[..]));
    }

    #[test]
    fn test_strip_skips_non_ipv4() {
        let mut frame = vec![0u8; 12];
        frame.extend_from_slice(&[0x08, 0x06]); // ARP
        frame.extend_from_slice(&[0u8; 28]);
        assert_eq!(LinkLayer::Ethernet.strip(&frame), None);

        let ipv6 = [0x60u8, 0, 0, 0];
        assert_eq!(LinkLayer::RawIp.strip(&ipv6), None);
        assert_eq!(LinkLayer::Ethernet.strip(&[0u8; 6]), None);
    }

    #[test]
    fn test_strip_linux_sll() {
        let mut frame = vec![0u8; 14];
        frame.extend_from_slice(&[0x08, 0x00]);
        frame.extend_from_slice(&IPV4_STUB);

        assert_eq!(LinkLayer::LinuxSll.strip(&frame), Some(&IPV4_STUB[..]));
    }

    #[test]
    fn test_strip_null_either_byte_order() {
        let mut little = vec![0x02, 0x00, 0x00, 0x00];
        little.extend_from_slice(&IPV4_STUB);
        let mut big = vec![0x00, 0x00, 0x00, 0x02];
        big.extend_from_slice(&IPV4_STUB);

        assert_eq!(LinkLayer::Null.strip(&little), Some(&IPV4_STUB[..]));
        assert_eq!(LinkLayer::Null.strip(&big), Some(&IPV4_STUB[..]));
        assert_eq!(LinkLayer::Null.strip(&[0x1e, 0, 0, 0, 0x60]), None);
    }

    #[test]
    fn test_raw_ip_passthrough() {
        assert_eq!(LinkLayer::RawIp.strip(&IPV4_STUB), Some(&IPV4_STUB[..]));
    }

    #[test]
    fn test_ethernet_padding_is_not_payload() {
        // A bare 54-byte TCP segment, padded to the 60-byte Ethernet minimum
        let builder = PacketBuilder::ethernet2([1, 1, 1, 1, 1, 1], [2, 2, 2, 2, 2, 2])
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .tcp(40000, 80, 1, 1024);
        let mut frame = Vec::with_capacity(60);
        builder.write(&mut frame, &[]).unwrap();
        assert_eq!(frame.len(), 54);
        frame.resize(60, 0);

        let datagram = LinkLayer::Ethernet.strip(&frame).unwrap();
        assert_eq!(datagram.len(), 40);

        let record = record_at(datagram, chrono::Utc::now());
        assert!(record.payload().is_empty());
        assert_eq!(record.length(), 40);
    }

    #[test]
    fn test_trailing_fcs_is_cut() {
        let builder = PacketBuilder::ipv4([10, 0, 0, 1], [10, 0, 0, 53], 64).udp(50000, 53);
        let mut datagram = Vec::new();
        builder.write(&mut datagram, b"query").unwrap();
        let expected = datagram.clone();
        datagram.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);

        assert_eq!(LinkLayer::RawIp.strip(&datagram), Some(&expected[..]));
    }

    #[test]
    fn test_snapped_datagram_kept_as_captured() {
        // Total length claims more bytes than were captured
        let mut datagram = vec![0u8; 30];
        datagram[0] = 0x45;
        datagram[2..4].copy_from_slice(&[0x05, 0xdc]); // 1500

        assert_eq!(LinkLayer::RawIp.strip(&datagram).map(|d| d.len()), Some(30));
    }
}
