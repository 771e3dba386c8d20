//! Decoded packet event types.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// Capacity of the application payload sample carried by each event.
pub const MAX_PAYLOAD_SAMPLE: usize = 256;

/// Transport protocol reported by the capture program's packet-type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
    #[serde(rename = "ICMP")]
    Icmp,
    Unknown,
}

impl Protocol {
    /// Resolve a packet-type code (0 TCP, 1 UDP, 2 ICMP).
    ///
    /// Codes outside the table map to `Unknown`; the producer may extend the
    /// taxonomy without the daemon rejecting records.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Protocol::Tcp,
            1 => Protocol::Udp,
            2 => Protocol::Icmp,
            _ => Protocol::Unknown,
        }
    }

    /// Name used on the collector wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Icmp => "ICMP",
            Protocol::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TCP flag bits as packed by the capture program.
///
/// Bit 0 FIN, 1 SYN, 2 RST, 3 PSH, 4 ACK, 5 URG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpFlags(pub u8);

impl TcpFlags {
    pub const FIN: u8 = 1 << 0;
    pub const SYN: u8 = 1 << 1;
    pub const RST: u8 = 1 << 2;
    pub const PSH: u8 = 1 << 3;
    pub const ACK: u8 = 1 << 4;
    pub const URG: u8 = 1 << 5;

    const NAMES: [(u8, &'static str); 6] = [
        (Self::FIN, "FIN"),
        (Self::SYN, "SYN"),
        (Self::RST, "RST"),
        (Self::PSH, "PSH"),
        (Self::ACK, "ACK"),
        (Self::URG, "URG"),
    ];

    pub fn contains(&self, bit: u8) -> bool {
        self.0 & bit == bit
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect();

        if names.is_empty() {
            write!(f, "{:#04x}", self.0)
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

/// One decoded capture record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketEvent {
    pub protocol: Protocol,
    /// Raw packet-type code the protocol was resolved from.
    pub packet_type: u8,
    /// IP protocol number from the IPv4 header.
    pub ip_protocol: u8,
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    /// Wire length of the packet in bytes.
    pub packet_len: u32,
    pub seq_num: u32,
    pub ack_num: u32,
    pub tcp_flags: u8,
    /// Application payload sample, at most `MAX_PAYLOAD_SAMPLE` bytes.
    pub payload: Vec<u8>,
}

impl PacketEvent {
    pub fn is_tcp(&self) -> bool {
        self.protocol == Protocol::Tcp
    }

    pub fn flags(&self) -> TcpFlags {
        TcpFlags(self.tcp_flags)
    }

    /// Lossy UTF-8 view of the payload sample, for clear-text inspection.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Single-line human readable summary used in debug logs.
    pub fn describe(&self) -> String {
        let mut line = format!(
            "{} {}:{} -> {}:{} len={}",
            self.protocol,
            self.src_addr,
            self.src_port,
            self.dst_addr,
            self.dst_port,
            self.packet_len
        );
        if self.is_tcp() {
            line.push_str(&format!(
                " seq={} ack={} flags={}",
                self.seq_num,
                self.ack_num,
                self.flags()
            ));
        }
        if !self.payload.is_empty() {
            line.push_str(&format!(" payload={}B", self.payload.len()));
        }
        line
    }
}
