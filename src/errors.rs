use std::io;

use strum::IntoStaticStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TunnelCreateError {
    #[error("no tunnel unit available in {first_unit}..={last_unit}")]
    Unavailable { first_unit: u32, last_unit: u32 },
}

#[derive(Debug, Error)]
pub enum EchoSendError {
    #[error("no raw socket")]
    NoSocket,
    #[error("payload of {payload_size} bytes does not fit into an IPv4 datagram")]
    PayloadTooLarge { payload_size: usize },
    #[error("could not enforce don't fragment: {0}")]
    DontFragment(io::Error),
    #[error("send would have blocked")]
    WouldBlock,
    #[error("send failed: {0}")]
    Send(io::Error),
    #[error("only sent {sent} of {expected} bytes")]
    ShortWrite { sent: usize, expected: usize },
}

/// Reasons an inbound datagram is rejected before its ICMP header is looked at.
#[derive(Debug, Error, IntoStaticStr, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
pub enum MalformedPacket {
    #[error("read incomplete packet of {read} bytes")]
    Truncated { read: usize },
    #[error("invalid IPv4 version {version}")]
    NotIpv4 { version: u8 },
    #[error("invalid IP header length {header_len} (read {read} bytes)")]
    BadHeaderLength { header_len: usize, read: usize },
    #[error("non-ICMP packet with protocol {protocol}")]
    NotIcmp { protocol: u8 },
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("could not read config: {0}")]
    ReadError(io::Error),
    #[error("could not deserialize config: {0}")]
    DeserializeError(serde_json::Error),
}
