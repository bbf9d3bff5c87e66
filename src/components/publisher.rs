//! UDP Publisher
//!
//! Sends every decoded sample as one datagram to the configured destination.
//! Sending is fire-and-forget; a failed send is reported to the caller and
//! never retried.
use crate::api::controller::PublisherApi;
use crate::core::error::BridgeResult;
use crate::model::sample::Sample;
use crate::model::wire::{self, WireFormat};
use async_trait::async_trait;
use log::trace;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use time::OffsetDateTime;
use tokio::net::UdpSocket;

/// Publishes samples over an unconnected UDP socket.
#[derive(Debug)]
pub struct UdpPublisher {
    socket: UdpSocket,
    target: SocketAddr,
    format: WireFormat,
    sequence: u32,
}

impl UdpPublisher {
    /// Binds an ephemeral local port in the address family of `target`.
    ///
    /// # Arguments
    /// - `target`: Destination of all datagrams.
    /// - `format`: Encoding of the datagrams.
    /// - `broadcast`: Whether to allow sending to broadcast addresses.
    pub async fn bind(
        target: SocketAddr,
        format: WireFormat,
        broadcast: bool,
    ) -> BridgeResult<Self> {
        let local: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        if broadcast {
            socket.set_broadcast(true)?;
        }
        trace!(
            "publishing {} datagrams from {} to {}",
            format,
            socket.local_addr()?,
            target
        );
        Ok(Self {
            socket,
            target,
            format,
            sequence: 0,
        })
    }
}

#[async_trait]
impl PublisherApi for UdpPublisher {
    async fn publish(&mut self, received_at: OffsetDateTime, sample: &Sample) -> BridgeResult<usize> {
        let datagram = wire::encode(self.format, self.sequence, received_at, sample)?;
        self.sequence = self.sequence.wrapping_add(1);
        let sent = self.socket.send_to(&datagram, self.target).await?;
        trace!("sent {} datagram of {} bytes", sample.kind(), sent);
        Ok(sent)
    }

    fn target(&self) -> SocketAddr {
        self.target
    }
}
