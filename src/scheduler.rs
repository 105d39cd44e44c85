//! The transmit scheduler: a time-ordered outbound packet queue.
//!
//! Grounded on `mdns_send.c`'s timer-ordered queue (the teacher crate has
//! no scheduler of its own — `client.rs`/`server.rs` send immediately). The
//! design note calls for "an explicit singly-linked owning structure or an
//! index-into-arena design"; a `Vec` kept sorted by `send_at` is that
//! structure's idiomatic Rust shape and is what is used here.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::model::ServiceId;
use crate::transport::{IfaceId, IpProto};
use crate::types::{Query, Record, RecordType};

/// One answer record queued inside a [`TxPacket`], tagged with the service
/// it was synthesised for (if any) so [`Scheduler::cancel_service`] and
/// [`Scheduler::remove_scheduled_answer`] can find it again.
#[derive(Debug, Clone)]
pub(crate) struct ScheduledAnswer {
  pub(crate) record: Record,
  pub(crate) service: Option<ServiceId>,
}

impl ScheduledAnswer {
  #[inline]
  pub(crate) fn new(record: Record, service: Option<ServiceId>) -> Self {
    Self { record, service }
  }
}

/// A queued outbound packet: target, sections, and a deadline.
///
/// `queued` mirrors the design note's "FSM detects whether the scheduler
/// still owns the packet": set once [`Scheduler::pop_due`] hands the
/// packet to the action loop, so a concurrent cancel knows not to touch it
/// again.
#[derive(Debug, Clone)]
pub(crate) struct TxPacket {
  pub(crate) iface: IfaceId,
  pub(crate) proto: IpProto,
  pub(crate) dst_ip: IpAddr,
  pub(crate) dst_port: u16,
  pub(crate) id: u16,
  pub(crate) questions: Vec<Query>,
  pub(crate) answers: Vec<ScheduledAnswer>,
  pub(crate) authorities: Vec<ScheduledAnswer>,
  pub(crate) additionals: Vec<ScheduledAnswer>,
  pub(crate) send_at: Instant,
  pub(crate) queued: bool,
}

impl TxPacket {
  #[inline]
  pub(crate) fn is_empty(&self) -> bool {
    self.answers.is_empty() && self.authorities.is_empty() && self.additionals.is_empty()
  }

  fn references_service(&self, id: ServiceId) -> bool {
    [&self.answers, &self.authorities, &self.additionals]
      .into_iter()
      .any(|section| section.iter().any(|a| a.service == Some(id)))
  }

  fn strip_service(&mut self, id: ServiceId) {
    self
      .answers
      .retain(|a| a.service != Some(id));
    self
      .authorities
      .retain(|a| a.service != Some(id));
    self
      .additionals
      .retain(|a| a.service != Some(id));
  }
}

/// The time-ordered queue itself, plus the handful of targeted operations
/// the PCB FSM and responder need to cancel or prune entries.
#[derive(Debug, Default)]
pub(crate) struct Scheduler {
  queue: Vec<TxPacket>,
}

impl Scheduler {
  #[inline]
  pub(crate) fn new() -> Self {
    Self { queue: Vec::new() }
  }

  /// Sets `send_at = now + delay_ms` and inserts, keeping the queue sorted
  /// ascending by deadline.
  pub(crate) fn schedule(&mut self, mut packet: TxPacket, delay: Duration) {
    packet.send_at = Instant::now() + delay;
    packet.queued = true;
    let pos = self
      .queue
      .partition_point(|p| p.send_at <= packet.send_at);
    self.queue.insert(pos, packet);
  }

  /// Removes and returns every packet whose deadline has passed. Called by
  /// the engine's periodic tick.
  pub(crate) fn pop_due(&mut self, now: Instant) -> Vec<TxPacket> {
    let split = self.queue.partition_point(|p| p.send_at <= now);
    self.queue.drain(..split).collect()
  }

  /// Drops every packet targeting `(iface, proto)` — used when the
  /// interface goes down.
  pub(crate) fn cancel_iface(&mut self, iface: IfaceId, proto: IpProto) {
    self
      .queue
      .retain(|p| !(p.iface == iface && p.proto == proto));
  }

  /// Removes `service` from every section of every queued packet; a
  /// packet left with no answers/authorities/additionals is dropped
  /// entirely. Returns the ids of packets that still carried an ANY
  /// question for the service being probed, so the PCB can also purge
  /// that question (the scheduler does not know which question belongs
  /// to which probed service — the caller passes that in).
  pub(crate) fn cancel_service(&mut self, service: ServiceId) {
    for packet in &mut self.queue {
      if packet.references_service(service) {
        packet.strip_service(service);
      }
    }
    self.queue.retain(|p| !p.is_empty() || !p.questions.is_empty());
  }

  /// Targeted removal used during conflict resolution: drops every
  /// scheduled answer of `ty` for `service` on `(iface, proto)`, e.g. when
  /// a peer already published an equivalent record with a healthy TTL.
  pub(crate) fn remove_scheduled_answer(
    &mut self,
    iface: IfaceId,
    proto: IpProto,
    ty: RecordType,
    service: Option<ServiceId>,
  ) {
    for packet in &mut self.queue {
      if packet.iface != iface || packet.proto != proto {
        continue;
      }
      let matches = |a: &ScheduledAnswer| a.record.header().ty() == ty && a.service == service;
      packet.answers.retain(|a| !matches(a));
      packet.authorities.retain(|a| !matches(a));
      packet.additionals.retain(|a| !matches(a));
    }
    self.queue.retain(|p| !p.is_empty() || !p.questions.is_empty());
  }

  #[cfg(test)]
  pub(crate) fn len(&self) -> usize {
    self.queue.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{Name, RecordData};
  use std::net::Ipv4Addr;

  fn packet(send_at: Instant, service: Option<ServiceId>) -> TxPacket {
    let name = Name::new("alpha.local.");
    let record = Record::new(name, 120, true, RecordData::A(Ipv4Addr::new(10, 0, 0, 1)));
    TxPacket {
      iface: IfaceId(0),
      proto: IpProto::V4,
      dst_ip: IpAddr::V4(Ipv4Addr::new(224, 0, 0, 251)),
      dst_port: 5353,
      id: 0,
      questions: Vec::new(),
      answers: vec![ScheduledAnswer::new(record, service)],
      authorities: Vec::new(),
      additionals: Vec::new(),
      send_at,
      queued: false,
    }
  }

  #[test]
  fn pop_due_returns_only_expired_packets() {
    let mut s = Scheduler::new();
    let now = Instant::now();
    s.schedule(packet(now, None), Duration::from_millis(0));
    s.schedule(packet(now, None), Duration::from_secs(10));
    assert_eq!(s.len(), 2);
    let due = s.pop_due(Instant::now());
    assert_eq!(due.len(), 1);
    assert_eq!(s.len(), 1);
  }

  #[test]
  fn cancel_service_drops_emptied_packets() {
    let mut s = Scheduler::new();
    let now = Instant::now();
    s.schedule(packet(now, Some(ServiceId(1))), Duration::from_secs(10));
    s.cancel_service(ServiceId(1));
    assert_eq!(s.len(), 0);
  }

  #[test]
  fn cancel_iface_drops_matching_only() {
    let mut s = Scheduler::new();
    let now = Instant::now();
    s.schedule(packet(now, None), Duration::from_secs(10));
    s.cancel_iface(IfaceId(1), IpProto::V4);
    assert_eq!(s.len(), 1);
    s.cancel_iface(IfaceId(0), IpProto::V4);
    assert_eq!(s.len(), 0);
  }
}
