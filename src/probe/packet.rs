use std::cmp::min;
use std::net::Ipv4Addr;
use std::time::SystemTime;

use etherparse::{IcmpEchoHeader, Icmpv4Header, Icmpv4Slice, Icmpv4Type};

use crate::errors::{EchoSendError, MalformedPacket};
use crate::probe::checksum::internet_checksum;
use crate::probe::platform;

pub const IPV4_HEADER_LEN: usize = 20;
pub const ICMP_ECHO_HEADER_LEN: usize = 8;
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize - IPV4_HEADER_LEN - ICMP_ECHO_HEADER_LEN;

pub const IPPROTO_ICMP: u8 = 1;
pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMP_ECHO_REQUEST: u8 = 8;

const TTL: u8 = 255;
const IP_DF: u16 = 0x4000;

/// One ICMP echo request, including the IPv4 header for a `IP_HDRINCL` socket.
#[derive(Clone, Debug)]
pub struct EchoRequest {
    pub destination: Ipv4Addr,
    pub identifier: u16,
    pub sequence: u16,
    pub payload_size: usize,
    pub dont_fragment: bool,
}

impl EchoRequest {
    pub fn packet_len(&self) -> usize {
        IPV4_HEADER_LEN + ICMP_ECHO_HEADER_LEN + self.payload_size
    }

    /// Build the datagram. The source address is left for the kernel to fill in.
    pub fn encode(&self, now: SystemTime) -> Result<Vec<u8>, EchoSendError> {
        if self.payload_size > MAX_PAYLOAD_LEN {
            return Err(EchoSendError::PayloadTooLarge { payload_size: self.payload_size });
        }
        let total_len = self.packet_len();
        let mut packet = vec![0u8; total_len];
        let (ip, icmp) = packet.split_at_mut(IPV4_HEADER_LEN);

        ip[0] = 0x40 | (IPV4_HEADER_LEN / 4) as u8;
        ip[2..4].copy_from_slice(&platform::raw_ip_u16(total_len as u16));
        // Only used for reassembly.
        ip[4..6].copy_from_slice(&self.identifier.to_be_bytes());
        let flags = if self.dont_fragment { IP_DF } else { 0 };
        ip[6..8].copy_from_slice(&platform::raw_ip_u16(flags));
        ip[8] = TTL;
        ip[9] = IPPROTO_ICMP;
        ip[16..20].copy_from_slice(&self.destination.octets());

        // Same layout as the system ping: an incrementing pattern that starts with a timestamp.
        let payload = &mut icmp[ICMP_ECHO_HEADER_LEN..];
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte = i as u8;
        }
        let timestamp = platform::timestamp(now);
        let len = min(timestamp.len(), payload.len());
        payload[..len].copy_from_slice(&timestamp[..len]);

        let echo = IcmpEchoHeader { id: self.identifier, seq: self.sequence };
        let header = Icmpv4Header::with_checksum(Icmpv4Type::EchoRequest(echo), &icmp[ICMP_ECHO_HEADER_LEN..]);
        icmp[..ICMP_ECHO_HEADER_LEN].copy_from_slice(&header.to_bytes());

        Ok(packet)
    }
}

/// Fields of an inbound ICMP message which passed structural validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EchoReply {
    pub source: Ipv4Addr,
    pub icmp_type: u8,
    pub code: u8,
    pub identifier: u16,
    pub sequence: u16,
    pub checksum_valid: bool,
}

impl EchoReply {
    /// Parse a datagram as read from a raw ICMP socket, IPv4 header included.
    ///
    /// The IP total length field is ignored, some kernels rewrite it before handing the packet up.
    pub fn parse(datagram: &[u8]) -> Result<Self, MalformedPacket> {
        let read = datagram.len();
        if read < IPV4_HEADER_LEN {
            return Err(MalformedPacket::Truncated { read });
        }
        let version = datagram[0] >> 4;
        if version != 4 {
            return Err(MalformedPacket::NotIpv4 { version });
        }
        let header_len = usize::from(datagram[0] & 0x0f) * 4;
        if header_len < IPV4_HEADER_LEN || header_len > read || read - header_len < ICMP_ECHO_HEADER_LEN {
            return Err(MalformedPacket::BadHeaderLength { header_len, read });
        }
        let protocol = datagram[9];
        if protocol != IPPROTO_ICMP {
            return Err(MalformedPacket::NotIcmp { protocol });
        }

        let source = Ipv4Addr::new(datagram[12], datagram[13], datagram[14], datagram[15]);
        let icmp = Icmpv4Slice::from_slice(&datagram[header_len..])
            .map_err(|_| MalformedPacket::BadHeaderLength { header_len, read })?;
        let [id_hi, id_lo, seq_hi, seq_lo] = icmp.bytes5to8();
        Ok(Self {
            source,
            icmp_type: icmp.type_u8(),
            code: icmp.code_u8(),
            identifier: u16::from_be_bytes([id_hi, id_lo]),
            sequence: u16::from_be_bytes([seq_hi, seq_lo]),
            checksum_valid: internet_checksum(icmp.slice()) == 0,
        })
    }

    pub fn is_reply_to(&self, identifier: u16) -> bool {
        self.icmp_type == ICMP_ECHO_REPLY && self.code == 0 && self.identifier == identifier
    }
}
