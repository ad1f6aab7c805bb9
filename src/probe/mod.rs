//! Raw ICMP echo probes for server reachability and latency.
//!
//! A probe owns one raw socket and only knows how to send a request and report which addresses replied.
//! Matching replies to requests, timeouts and RTT bookkeeping are up to the caller.

mod checksum;
pub mod packet;
mod platform;
mod simulated;

#[cfg(test)]
mod packet_test;

use std::future::poll_fn;
use std::io::{self, ErrorKind::WouldBlock, Read};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::SystemTime;

use futures::Stream;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use static_assertions::const_assert;
use strum::IntoStaticStr;
use tokio::io::unix::AsyncFd;

pub use checksum::internet_checksum;
pub use packet::{EchoReply, EchoRequest};

use crate::config::ProbeConfig;
use crate::errors::EchoSendError;
use packet::{ICMP_ECHO_HEADER_LEN, IPV4_HEADER_LEN};
use simulated::SimulatedReplies;

const RECV_BUFFER_LEN: usize = 2048;
const_assert!(RECV_BUFFER_LEN >= IPV4_HEADER_LEN + ICMP_ECHO_HEADER_LEN);

#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ProbeState {
    /// Raw socket open and registered with the reactor.
    SocketOpen,
    /// The raw socket could not be opened. Permanent, sends fail and no replies are reported.
    SocketFailed,
    Simulated,
}

enum Backend {
    Socket(AsyncFd<Socket>),
    Failed,
    Simulated(SimulatedReplies),
}

pub struct IcmpProbe {
    identifier: u16,
    next_sequence: u16,
    backend: Backend,
    recv_buffer: Box<[u8; RECV_BUFFER_LEN]>,
}

impl IcmpProbe {
    /// Open a raw ICMP socket. Must be called within a Tokio runtime.
    ///
    /// Missing privileges or a missing runtime are not an error: the probe is created in
    /// [`ProbeState::SocketFailed`].
    pub fn new() -> Self {
        Self::with_config(&ProbeConfig::default())
    }

    pub fn simulated() -> Self {
        Self::with_config(&ProbeConfig { simulate: true, ..Default::default() })
    }

    pub fn with_config(config: &ProbeConfig) -> Self {
        let backend = if let Err(error) = tokio::runtime::Handle::try_current() {
            // Both the reactor and the timer wheel belong to the runtime.
            tracing::warn!(message_id = "Ue4jNc7h", ?error, simulate = config.simulate, "no runtime for ICMP probe");
            Backend::Failed
        } else if config.simulate {
            Backend::Simulated(SimulatedReplies::new(config))
        } else {
            match open_socket() {
                Ok(socket) => Backend::Socket(socket),
                Err(error) => {
                    tracing::warn!(message_id = "Bq0nXa5r", ?error, "failed to open ICMP socket");
                    Backend::Failed
                }
            }
        };
        let probe = Self { identifier: rand::random(), next_sequence: 0, backend, recv_buffer: Box::new([0; RECV_BUFFER_LEN]) };
        tracing::info!(
            message_id = "Wc2fUo7j",
            identifier = probe.identifier,
            state = <&'static str>::from(probe.state()),
            "created ICMP probe"
        );
        probe
    }

    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    /// Sequence number the next echo request will carry.
    pub fn next_sequence(&self) -> u16 {
        self.next_sequence
    }

    pub fn state(&self) -> ProbeState {
        match self.backend {
            Backend::Socket(_) => ProbeState::SocketOpen,
            Backend::Failed => ProbeState::SocketFailed,
            Backend::Simulated(_) => ProbeState::Simulated,
        }
    }

    /// Send one echo request without blocking. Failures are logged and reported as `false`, the caller may
    /// retry later.
    ///
    /// With `allow_fragment` unset the datagram is never fragmented, which path MTU probing relies on.
    pub fn send_echo_request(&mut self, address: Ipv4Addr, payload_size: usize, allow_fragment: bool) -> bool {
        match self.try_send_echo_request(address, payload_size, allow_fragment) {
            Ok(()) => true,
            // Logged when the socket failed to open.
            Err(EchoSendError::NoSocket) => false,
            Err(EchoSendError::WouldBlock) => {
                tracing::warn!(message_id = "Hs8dLq3v", %address, "failed to ping, would have blocked");
                false
            }
            Err(error) => {
                tracing::warn!(message_id = "Ny5cEw0p", ?error, %address, payload_size, "failed to ping");
                false
            }
        }
    }

    fn try_send_echo_request(&mut self, address: Ipv4Addr, payload_size: usize, allow_fragment: bool) -> Result<(), EchoSendError> {
        if let Backend::Failed = self.backend {
            return Err(EchoSendError::NoSocket);
        }
        let request = EchoRequest {
            destination: address,
            identifier: self.identifier,
            sequence: self.next_sequence,
            payload_size,
            dont_fragment: !allow_fragment,
        };
        let packet = request.encode(SystemTime::now())?;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        match &mut self.backend {
            Backend::Socket(socket) => send_packet(socket.get_ref(), &packet, address, allow_fragment),
            Backend::Simulated(simulated) => {
                simulated.schedule(address);
                Ok(())
            }
            Backend::Failed => Err(EchoSendError::NoSocket),
        }
    }

    /// Poll for the next echo reply addressed to this probe, yielding the replying address.
    ///
    /// Drains the socket while it is readable. Anything that isn't a valid reply carrying our identifier is
    /// dropped. Never ready for a probe whose socket failed to open.
    pub fn poll_reply(&mut self, cx: &mut Context<'_>) -> Poll<Ipv4Addr> {
        let Self { identifier, backend, recv_buffer, .. } = self;
        let socket = match backend {
            Backend::Socket(socket) => socket,
            Backend::Simulated(simulated) => return simulated.poll_reply(cx),
            Backend::Failed => return Poll::Pending,
        };
        loop {
            let mut guard = match socket.poll_read_ready(cx) {
                Poll::Ready(Ok(guard)) => guard,
                Poll::Ready(Err(error)) => {
                    tracing::error!(message_id = "Vf3pJm9t", ?error, "failed to wait for ICMP socket readiness");
                    return Poll::Pending;
                }
                Poll::Pending => return Poll::Pending,
            };
            match guard.try_io(|inner| {
                let mut raw: &Socket = inner.get_ref();
                raw.read(&mut recv_buffer[..])
            }) {
                Ok(Ok(read)) => {
                    if let Some(source) = on_datagram(*identifier, &recv_buffer[..read]) {
                        return Poll::Ready(source);
                    }
                }
                Ok(Err(error)) => {
                    tracing::warn!(message_id = "Kt7gRz2e", ?error, "failed to read from ICMP socket");
                    guard.clear_ready();
                }
                Err(_would_block) => {}
            }
        }
    }

    /// Wait for the next echo reply. Cancel safe.
    pub async fn next_reply(&mut self) -> Ipv4Addr {
        poll_fn(|cx| self.poll_reply(cx)).await
    }
}

impl Default for IcmpProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Endless stream of replying addresses.
impl Stream for IcmpProbe {
    type Item = Ipv4Addr;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_reply(cx).map(Some)
    }
}

fn open_socket() -> io::Result<AsyncFd<Socket>> {
    let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
    // We supply our own IP header to control DF and the identification field.
    socket.set_header_included(true)?;
    socket.set_nonblocking(true)?;
    AsyncFd::new(socket)
}

fn send_packet(socket: &Socket, packet: &[u8], address: Ipv4Addr, allow_fragment: bool) -> Result<(), EchoSendError> {
    if !allow_fragment {
        platform::enforce_dont_fragment(socket).map_err(EchoSendError::DontFragment)?;
    }
    // ICMP has no ports.
    let to = SockAddr::from(SocketAddrV4::new(address, 0));
    match socket.send_to(packet, &to) {
        Ok(sent) if sent == packet.len() => Ok(()),
        Ok(sent) => Err(EchoSendError::ShortWrite { sent, expected: packet.len() }),
        Err(error) if error.kind() == WouldBlock => Err(EchoSendError::WouldBlock),
        Err(error) => Err(EchoSendError::Send(error)),
    }
}

/// Validate one inbound datagram, returning the source address if it is an echo reply to `identifier`.
fn on_datagram(identifier: u16, datagram: &[u8]) -> Option<Ipv4Addr> {
    let reply = match EchoReply::parse(datagram) {
        Ok(reply) => reply,
        Err(error) => {
            tracing::warn!(
                message_id = "Dp6yTb1c",
                reason = <&'static str>::from(&error),
                %error,
                "discarding malformed ICMP packet"
            );
            return None;
        }
    };
    // Corruption is only reported. Type and identifier still decide whether the reply is ours.
    if !reply.checksum_valid {
        tracing::warn!(message_id = "Rg4hMx8s", source = %reply.source, "received corrupt ICMP packet");
    }
    // Replies to other pingers on this host are common, don't log them.
    reply.is_reply_to(identifier).then_some(reply.source)
}
