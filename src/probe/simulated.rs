use std::net::Ipv4Addr;
use std::task::{Context, Poll};
use std::time::Duration;

use ipnetwork::Ipv4Network;
use tokio_util::time::DelayQueue;

use crate::config::ProbeConfig;

/// Stand-in for the raw socket where ICMP is not available, e.g. unprivileged test runs.
///
/// Every ping is answered after a fixed delay, except pings into `unreachable`, which never are.
pub(super) struct SimulatedReplies {
    delay: Duration,
    unreachable: Ipv4Network,
    queue: DelayQueue<Ipv4Addr>,
}

impl SimulatedReplies {
    pub fn new(config: &ProbeConfig) -> Self {
        Self { delay: config.simulated_reply_delay(), unreachable: config.simulated_unreachable, queue: DelayQueue::new() }
    }

    pub fn schedule(&mut self, address: Ipv4Addr) {
        if self.unreachable.contains(address) {
            tracing::debug!(message_id = "Zr4kVb8n", %address, "simulating ping without reply");
            return;
        }
        tracing::debug!(message_id = "Tm1sHc6w", %address, delay_ms = self.delay.as_millis(), "simulating ping");
        self.queue.insert(address, self.delay);
    }

    pub fn poll_reply(&mut self, cx: &mut Context<'_>) -> Poll<Ipv4Addr> {
        match self.queue.poll_expired(cx) {
            Poll::Ready(Some(expired)) => Poll::Ready(expired.into_inner()),
            // An empty queue is not the end of the stream, more pings may follow.
            Poll::Ready(None) | Poll::Pending => Poll::Pending,
        }
    }
}
