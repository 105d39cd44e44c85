//! The socket/interface boundary.
//!
//! Per spec, the socket backend and interface bring-up are thin
//! collaborators named only for their contract: `send(iface, proto, dst_ip,
//! dst_port, bytes)` plus an inbound delivery path and link up/down
//! notifications. This module defines that contract without binding a real
//! UDP socket; the host application owns the socket and feeds datagrams and
//! interface events into the engine's [`Handle`](crate::engine::Handle).

use std::net::IpAddr;
use std::sync::Mutex;

use smol_str::SmolStr;
use triomphe::Arc;

/// Identifies one of the node's network interfaces. Opaque to the engine;
/// the host application assigns these however it indexes its own
/// interfaces (ifindex, adapter GUID, whatever is stable for its lifetime).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IfaceId(pub u32);

/// IPv4 or IPv6, the two protocol families mDNS runs multicast groups on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpProto {
  /// 224.0.0.251:5353
  V4,
  /// [ff02::fb]:5353
  V6,
}

/// A link up/down transition the host application observed, fed into the
/// engine via [`Handle::netif_event`](crate::engine::Handle::netif_event).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetifEvent {
  /// The interface (and protocol family) came up; the PCB moves from Off
  /// to Init and begins probing.
  Up(IfaceId, IpProto),
  /// The interface went down; the PCB moves to Off and the scheduler
  /// purges every packet queued for this (iface, proto) pair.
  Down(IfaceId, IpProto),
}

/// A single inbound datagram, as delivered by the host application's
/// socket layer.
#[derive(Debug, Clone)]
pub struct Inbound {
  /// The interface the datagram arrived on.
  pub iface: IfaceId,
  /// The protocol family the datagram arrived on.
  pub proto: IpProto,
  /// The sender's address.
  pub src_ip: IpAddr,
  /// The sender's UDP source port. Per spec §4.8, packets with an
  /// authoritative flag but a source port other than 5353 are dropped as
  /// spoofing attempts; non-5353 source ports otherwise mark a legacy
  /// unicast query.
  pub src_port: u16,
  /// The datagram's destination address, used to detect whether delivery
  /// was multicast or unicast.
  pub dst_ip: IpAddr,
  /// Whether `dst_ip` was one of the mDNS multicast groups.
  pub multicast: bool,
  /// The raw datagram payload.
  pub bytes: Arc<[u8]>,
}

/// The core's only outbound dependency: send a datagram on a given
/// interface and protocol family.
///
/// Grounded on the contract the teacher's `utils.rs` socket helpers
/// exposed (bind/send-to per interface); this trait is the same shape with
/// the actual socket plumbing left to the host application.
pub trait Transport: Send + Sync + 'static {
  /// Sends `bytes` from `iface`/`proto` to `dst_ip:dst_port`. Errors are
  /// logged by the engine at `warn` level and otherwise swallowed: a send
  /// failure on one interface must not stall the action loop or other
  /// interfaces.
  fn send(
    &self,
    iface: IfaceId,
    proto: IpProto,
    dst_ip: IpAddr,
    dst_port: u16,
    bytes: &[u8],
  ) -> std::io::Result<()>;
}

/// A single packet recorded by [`MockTransport`].
#[derive(Debug, Clone)]
pub struct SentPacket {
  /// See [`Transport::send`].
  pub iface: IfaceId,
  /// See [`Transport::send`].
  pub proto: IpProto,
  /// See [`Transport::send`].
  pub dst_ip: IpAddr,
  /// See [`Transport::send`].
  pub dst_port: u16,
  /// See [`Transport::send`].
  pub bytes: Vec<u8>,
}

/// A [`Transport`] that records every send instead of touching a socket.
/// Used by the crate's own tests and exported so downstream crates can
/// drive the engine end-to-end in their own tests.
#[derive(Debug, Default)]
pub struct MockTransport {
  sent: Mutex<Vec<SentPacket>>,
}

impl MockTransport {
  /// Creates an empty mock transport.
  #[inline]
  pub fn new() -> Self {
    Self::default()
  }

  /// Drains and returns every packet sent so far.
  pub fn drain(&self) -> Vec<SentPacket> {
    core::mem::take(&mut self.sent.lock().unwrap_or_else(|e| e.into_inner()))
  }

  /// Returns a snapshot of every packet sent so far without clearing it.
  pub fn sent(&self) -> Vec<SentPacket> {
    self
      .sent
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .clone()
  }
}

impl Clone for SentPacket {
  fn clone(&self) -> Self {
    Self {
      iface: self.iface,
      proto: self.proto,
      dst_ip: self.dst_ip,
      dst_port: self.dst_port,
      bytes: self.bytes.clone(),
    }
  }
}

impl Transport for MockTransport {
  fn send(
    &self,
    iface: IfaceId,
    proto: IpProto,
    dst_ip: IpAddr,
    dst_port: u16,
    bytes: &[u8],
  ) -> std::io::Result<()> {
    self
      .sent
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .push(SentPacket {
        iface,
        proto,
        dst_ip,
        dst_port,
        bytes: bytes.to_vec(),
      });
    Ok(())
  }
}

/// Formats an interface/protocol pair for log lines, matching the density
/// of the teacher's `tracing::trace!(iface = ?..., ...)` call sites.
pub(crate) fn iface_label(iface: IfaceId, proto: IpProto) -> SmolStr {
  match proto {
    IpProto::V4 => smol_str::format_smolstr!("{}/v4", iface.0),
    IpProto::V6 => smol_str::format_smolstr!("{}/v6", iface.0),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::net::Ipv4Addr;

  #[test]
  fn mock_transport_records_sends() {
    let t = MockTransport::new();
    t.send(
      IfaceId(0),
      IpProto::V4,
      IpAddr::V4(Ipv4Addr::new(224, 0, 0, 251)),
      5353,
      b"hello",
    )
    .unwrap();
    let sent = t.drain();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].bytes, b"hello");
    assert!(t.drain().is_empty());
  }
}
