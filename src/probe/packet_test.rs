use std::net::Ipv4Addr;
use std::time::{Duration, UNIX_EPOCH};

use etherparse::{IcmpEchoHeader, Icmpv4Header, Icmpv4Slice, Icmpv4Type, PacketBuilder};

use crate::errors::{EchoSendError, MalformedPacket};
use crate::probe::checksum::internet_checksum;
use crate::probe::packet::{EchoReply, EchoRequest, ICMP_ECHO_HEADER_LEN, ICMP_ECHO_REQUEST, IPV4_HEADER_LEN, MAX_PAYLOAD_LEN};
use crate::probe::platform::TIMESTAMP_LEN;

const DESTINATION: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 9);
const SOURCE: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 1);

fn request(payload_size: usize) -> EchoRequest {
    EchoRequest { destination: DESTINATION, identifier: 0xbeef, sequence: 7, payload_size, dont_fragment: false }
}

fn reply(identifier: u16, payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ipv4(SOURCE.octets(), DESTINATION.octets(), 64).icmpv4_echo_reply(identifier, 3);
    let mut packet = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut packet, payload).unwrap();
    packet
}

#[test]
fn encode_request() {
    let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    let packet = request(56).encode(now).unwrap();
    assert_eq!(packet.len(), IPV4_HEADER_LEN + ICMP_ECHO_HEADER_LEN + 56);

    let ip = &packet[..IPV4_HEADER_LEN];
    assert_eq!(ip[0], 0x45);
    assert_eq!(&ip[4..6], &0xbeef_u16.to_be_bytes());
    assert_eq!(ip[8], 255);
    assert_eq!(ip[9], 1);
    assert_eq!(&ip[10..12], &[0, 0]);
    assert_eq!(&ip[12..16], &[0, 0, 0, 0]);
    assert_eq!(&ip[16..20], &DESTINATION.octets());

    let icmp = Icmpv4Slice::from_slice(&packet[IPV4_HEADER_LEN..]).unwrap();
    assert_eq!(icmp.icmp_type(), Icmpv4Type::EchoRequest(IcmpEchoHeader { id: 0xbeef, seq: 7 }));
    assert_eq!(icmp.code_u8(), 0);
    let expected = Icmpv4Header::with_checksum(icmp.icmp_type(), icmp.payload());
    assert_eq!(icmp.checksum(), expected.checksum);
    assert_eq!(internet_checksum(&packet[IPV4_HEADER_LEN..]), 0);

    let payload = icmp.payload();
    assert_eq!(payload.len(), 56);
    for (i, byte) in payload.iter().enumerate().skip(TIMESTAMP_LEN) {
        assert_eq!(usize::from(*byte), i);
    }
}

#[cfg(not(any(target_os = "macos", target_os = "ios")))]
#[test]
fn encode_request_header_fields() {
    use etherparse::{IpNumber, Ipv4HeaderSlice};

    let packet = EchoRequest { dont_fragment: true, ..request(100) }.encode(UNIX_EPOCH).unwrap();
    let ip = Ipv4HeaderSlice::from_slice(&packet).unwrap();
    assert_eq!(usize::from(ip.total_len()), packet.len());
    assert!(ip.dont_fragment());
    assert_eq!(ip.identification(), 0xbeef);
    assert_eq!(ip.protocol(), IpNumber::ICMP);
    assert_eq!(ip.destination_addr(), DESTINATION);

    let packet = request(100).encode(UNIX_EPOCH).unwrap();
    let ip = Ipv4HeaderSlice::from_slice(&packet).unwrap();
    assert!(!ip.dont_fragment());
}

#[test]
fn encode_icmp_matches_packet_builder() {
    let packet = request(40).encode(UNIX_EPOCH + Duration::from_secs(99)).unwrap();
    let payload = &packet[IPV4_HEADER_LEN + ICMP_ECHO_HEADER_LEN..];

    let builder = PacketBuilder::ipv4([0; 4], DESTINATION.octets(), 255).icmpv4_echo_request(0xbeef, 7);
    let mut built = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut built, payload).unwrap();
    assert_eq!(&packet[IPV4_HEADER_LEN..], &built[IPV4_HEADER_LEN..]);
}

#[test]
fn encode_small_payloads() {
    for payload_size in [0, 1, 3, TIMESTAMP_LEN - 1, TIMESTAMP_LEN, TIMESTAMP_LEN + 1] {
        let packet = request(payload_size).encode(UNIX_EPOCH + Duration::from_secs(12345)).unwrap();
        assert_eq!(packet.len(), IPV4_HEADER_LEN + ICMP_ECHO_HEADER_LEN + payload_size);
        assert_eq!(internet_checksum(&packet[IPV4_HEADER_LEN..]), 0, "payload_size {payload_size}");
    }
}

#[test]
fn encode_payload_too_large() {
    assert!(request(MAX_PAYLOAD_LEN).encode(UNIX_EPOCH).is_ok());
    assert!(matches!(
        request(MAX_PAYLOAD_LEN + 1).encode(UNIX_EPOCH),
        Err(EchoSendError::PayloadTooLarge { payload_size }) if payload_size == MAX_PAYLOAD_LEN + 1
    ));
}

#[test]
fn parse_reply() {
    let packet = reply(0xbeef, &[1, 2, 3, 4, 5]);
    let parsed = EchoReply::parse(&packet).unwrap();
    assert_eq!(
        parsed,
        EchoReply { source: SOURCE, icmp_type: 0, code: 0, identifier: 0xbeef, sequence: 3, checksum_valid: true }
    );
    assert!(parsed.is_reply_to(0xbeef));
    assert!(!parsed.is_reply_to(0xbeee));
}

#[test]
fn parse_own_request_is_not_reply() {
    let packet = request(16).encode(UNIX_EPOCH).unwrap();
    let parsed = EchoReply::parse(&packet).unwrap();
    assert_eq!(parsed.icmp_type, ICMP_ECHO_REQUEST);
    assert!(parsed.checksum_valid);
    assert!(!parsed.is_reply_to(0xbeef));
}

#[test]
fn parse_corrupt_checksum() {
    let mut packet = reply(0xbeef, &[1, 2, 3, 4, 5]);
    *packet.last_mut().unwrap() ^= 0xff;
    let parsed = EchoReply::parse(&packet).unwrap();
    assert!(!parsed.checksum_valid);
    assert!(parsed.is_reply_to(0xbeef));
}

#[test]
fn parse_truncated() {
    let packet = reply(0xbeef, &[]);
    for read in 0..IPV4_HEADER_LEN {
        assert_eq!(EchoReply::parse(&packet[..read]), Err(MalformedPacket::Truncated { read }));
    }
    for read in IPV4_HEADER_LEN..IPV4_HEADER_LEN + ICMP_ECHO_HEADER_LEN {
        assert_eq!(EchoReply::parse(&packet[..read]), Err(MalformedPacket::BadHeaderLength { header_len: 20, read }));
    }
    assert!(EchoReply::parse(&packet[..IPV4_HEADER_LEN + ICMP_ECHO_HEADER_LEN]).is_ok());
}

#[test]
fn parse_not_ipv4() {
    let mut packet = reply(0xbeef, &[]);
    packet[0] = 0x65;
    assert_eq!(EchoReply::parse(&packet), Err(MalformedPacket::NotIpv4 { version: 6 }));
}

#[test]
fn parse_bad_header_length() {
    let mut packet = reply(0xbeef, &[0; 32]);
    let read = packet.len();
    packet[0] = 0x44;
    assert_eq!(EchoReply::parse(&packet), Err(MalformedPacket::BadHeaderLength { header_len: 16, read }));
    packet[0] = 0x4f;
    assert_eq!(EchoReply::parse(&packet), Err(MalformedPacket::BadHeaderLength { header_len: 60, read }));
}

#[test]
fn parse_with_ip_options() {
    let packet = reply(0xbeef, &[9; 8]);
    let mut with_options = packet[..IPV4_HEADER_LEN].to_vec();
    with_options[0] = 0x46;
    // A single end-of-options-list option, padded.
    with_options.extend_from_slice(&[0, 0, 0, 0]);
    with_options.extend_from_slice(&packet[IPV4_HEADER_LEN..]);

    let parsed = EchoReply::parse(&with_options).unwrap();
    assert_eq!(parsed.source, SOURCE);
    assert!(parsed.checksum_valid);
    assert!(parsed.is_reply_to(0xbeef));
}

#[test]
fn parse_not_icmp() {
    let builder = PacketBuilder::ipv4(SOURCE.octets(), DESTINATION.octets(), 64).udp(1234, 53);
    let mut packet = Vec::new();
    builder.write(&mut packet, &[0; 8]).unwrap();
    assert_eq!(EchoReply::parse(&packet), Err(MalformedPacket::NotIcmp { protocol: 17 }));
}
