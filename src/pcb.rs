//! The per-(interface, protocol) PCB state machine.
//!
//! Grounded on `mdns_pcb.c`/`mdns_netif.c`: one state machine per network
//! interface and address family, stepping through probing into announcing
//! and then steady-state running, with conflict detection kicking it back
//! to probing and duplicate-subnet detection parking it in `Duplicate`.

use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::EngineConfig;
use crate::model::{HostId, ServiceId};
use crate::transport::{IfaceId, IpProto};

/// The PCB's state, per spec §4.4's transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PcbState {
  Off,
  Init,
  Probe1,
  Probe2,
  Probe3,
  Announce1,
  Announce2,
  Announce3,
  /// The third announcement was just sent; the only thing left to do is
  /// surface [`PcbEvent::EnteredRunning`] on the next tick.
  AnnounceDone,
  Running,
  Duplicate,
}

/// What the PCB wants the responder to do right now, returned by
/// [`Pcb::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PcbEvent {
  /// Assemble and send a probe packet (first probe sets `qu` on every
  /// question; later ones do not).
  SendProbe { first: bool },
  /// Assemble and send an announcement packet.
  SendAnnounce,
  /// The PCB just reached steady state; probing/announcing is over.
  EnteredRunning,
}

/// One PCB: the state plus the set of hosts/services currently being
/// probed or announced, and the conflict-failure counter spec's Open
/// Question #1 resolves as per-PCB (see DESIGN.md).
#[derive(Debug)]
pub(crate) struct Pcb {
  iface: IfaceId,
  proto: IpProto,
  state: PcbState,
  probing_hosts: Vec<HostId>,
  probing_services: Vec<ServiceId>,
  probe_ip: bool,
  probe_failures: u32,
  next_deadline: Option<Instant>,
  duplicate_of: Option<IfaceId>,
}

impl Pcb {
  #[inline]
  pub(crate) fn new(iface: IfaceId, proto: IpProto) -> Self {
    Self {
      iface,
      proto,
      state: PcbState::Off,
      probing_hosts: Vec::new(),
      probing_services: Vec::new(),
      probe_ip: false,
      probe_failures: 0,
      next_deadline: None,
      duplicate_of: None,
    }
  }

  #[inline]
  pub(crate) fn iface(&self) -> IfaceId {
    self.iface
  }

  #[inline]
  pub(crate) fn proto(&self) -> IpProto {
    self.proto
  }

  #[inline]
  pub(crate) fn state(&self) -> PcbState {
    self.state
  }

  #[inline]
  pub(crate) fn is_running(&self) -> bool {
    self.state == PcbState::Running
  }

  #[inline]
  pub(crate) fn probing_services(&self) -> &[ServiceId] {
    &self.probing_services
  }

  #[inline]
  pub(crate) fn probing_hosts(&self) -> &[HostId] {
    &self.probing_hosts
  }

  /// Interface came up: `Off -> Init`, unless it was just marked a
  /// duplicate of another PCB.
  pub(crate) fn iface_up(&mut self) {
    if self.state == PcbState::Off {
      self.state = PcbState::Init;
    }
  }

  /// Interface went down: any state `-> Off`. Caller is responsible for
  /// purging the scheduler for this `(iface, proto)`.
  pub(crate) fn iface_down(&mut self) {
    self.state = PcbState::Off;
    self.probing_hosts.clear();
    self.probing_services.clear();
    self.next_deadline = None;
  }

  /// Begins probing a fresh set of hosts/services. Always purges whatever
  /// was previously queued for this PCB (spec §4.4: "entering Probe1
  /// always purges the PCB's queued packets" — the caller does the actual
  /// scheduler purge; this just resets the PCB's own bookkeeping).
  pub(crate) fn start_probe(
    &mut self,
    hosts: Vec<HostId>,
    services: Vec<ServiceId>,
    probe_ip: bool,
    config: &EngineConfig,
  ) {
    self.probing_hosts = hosts;
    self.probing_services = services;
    self.probe_ip = probe_ip;
    self.state = PcbState::Probe1;
    self.next_deadline = Some(Instant::now() + self.initial_probe_delay(config));
  }

  /// The delay before the first probe: `120ms + rand(0..127)ms` normally,
  /// or a flat `1000ms` back-off once `probe_failures` exceeds the
  /// configured threshold. See DESIGN.md for the resolution of spec's Open
  /// Question #1 (per-PCB, not per-service).
  fn initial_probe_delay(&self, config: &EngineConfig) -> Duration {
    if self.probe_failures > config.probe_backoff_threshold {
      config.probe_backoff_delay
    } else {
      let jitter = rand::thread_rng().gen_range(0..=config.probe_initial_delay_jitter.as_millis() as u64);
      config.probe_initial_delay_min + Duration::from_millis(jitter)
    }
  }

  /// A conflict was detected while `Running`: go back to `Probe1` for a
  /// (possibly already-mangled) name, bumping the failure counter.
  pub(crate) fn conflict_detected(&mut self, config: &EngineConfig) {
    self.probe_failures = self.probe_failures.saturating_add(1);
    self.state = PcbState::Probe1;
    self.next_deadline = Some(Instant::now() + self.initial_probe_delay(config));
  }

  /// Marks this PCB as the duplicate of `other`: it stops transmitting,
  /// `other` remains `Running` and speaks for both.
  pub(crate) fn mark_duplicate(&mut self, other: IfaceId) {
    self.state = PcbState::Duplicate;
    self.duplicate_of = Some(other);
  }

  #[inline]
  pub(crate) fn duplicate_of(&self) -> Option<IfaceId> {
    self.duplicate_of
  }

  /// Advances the state machine if its deadline has passed, returning what
  /// the responder should transmit. Called by the engine's periodic tick
  /// for every PCB.
  pub(crate) fn tick(&mut self, now: Instant, config: &EngineConfig) -> Option<PcbEvent> {
    let deadline = self.next_deadline?;
    if now < deadline {
      return None;
    }

    match self.state {
      PcbState::Probe1 => {
        self.state = PcbState::Probe2;
        self.next_deadline = Some(now + config.probe_interval);
        Some(PcbEvent::SendProbe { first: true })
      }
      PcbState::Probe2 => {
        self.state = PcbState::Probe3;
        self.next_deadline = Some(now + config.probe_interval);
        Some(PcbEvent::SendProbe { first: false })
      }
      PcbState::Probe3 => {
        // Probing succeeded unopposed: reset the failure counter, send the
        // third and final probe, and move into the announcement sequence
        // (the first announcement goes out on the next tick).
        self.probe_failures = 0;
        self.state = PcbState::Announce1;
        self.next_deadline = Some(now + config.announce_interval);
        Some(PcbEvent::SendProbe { first: false })
      }
      PcbState::Announce1 => {
        self.state = PcbState::Announce2;
        self.next_deadline = Some(now + config.announce_interval);
        Some(PcbEvent::SendAnnounce)
      }
      PcbState::Announce2 => {
        self.state = PcbState::Announce3;
        self.next_deadline = Some(now + config.announce_interval);
        Some(PcbEvent::SendAnnounce)
      }
      PcbState::Announce3 => {
        self.state = PcbState::AnnounceDone;
        self.next_deadline = Some(now);
        Some(PcbEvent::SendAnnounce)
      }
      PcbState::AnnounceDone => {
        self.state = PcbState::Running;
        self.next_deadline = None;
        Some(PcbEvent::EnteredRunning)
      }
      PcbState::Off | PcbState::Init | PcbState::Running | PcbState::Duplicate => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn full_probe_then_announce_cycle_reaches_running() {
    let config = EngineConfig::new();
    let mut pcb = Pcb::new(IfaceId(0), IpProto::V4);
    pcb.iface_up();
    assert_eq!(pcb.state(), PcbState::Init);

    pcb.start_probe(vec![], vec![ServiceId(1)], false, &config);
    assert_eq!(pcb.state(), PcbState::Probe1);

    // Each call passes a `now` far past whatever deadline the previous
    // transition just set, so the sequence advances one step per tick.
    let mut now = Instant::now() + Duration::from_secs(1);
    let mut events = Vec::new();
    for _ in 0..7 {
      if let Some(ev) = pcb.tick(now, &config) {
        events.push(ev);
      }
      now += Duration::from_secs(10);
    }
    assert_eq!(
      events,
      vec![
        PcbEvent::SendProbe { first: true },
        PcbEvent::SendProbe { first: false },
        PcbEvent::SendProbe { first: false },
        PcbEvent::SendAnnounce,
        PcbEvent::SendAnnounce,
        PcbEvent::SendAnnounce,
        PcbEvent::EnteredRunning,
      ]
    );
    assert!(pcb.is_running());
  }

  #[test]
  fn conflict_while_running_returns_to_probe1_with_backoff() {
    let config = EngineConfig::new();
    let mut pcb = Pcb::new(IfaceId(0), IpProto::V4);
    pcb.iface_up();
    pcb.start_probe(vec![], vec![], false, &config);
    let mut now = Instant::now() + Duration::from_secs(1);
    for _ in 0..7 {
      pcb.tick(now, &config);
      now += Duration::from_secs(10);
    }
    assert!(pcb.is_running());

    pcb.conflict_detected(&config);
    assert_eq!(pcb.state(), PcbState::Probe1);
    assert_eq!(pcb.probe_failures, 1);
  }

  #[test]
  fn iface_down_resets_probing_sets() {
    let config = EngineConfig::new();
    let mut pcb = Pcb::new(IfaceId(0), IpProto::V4);
    pcb.iface_up();
    pcb.start_probe(vec![HostId(0)], vec![ServiceId(0)], true, &config);
    pcb.iface_down();
    assert_eq!(pcb.state(), PcbState::Off);
    assert!(pcb.probing_hosts().is_empty());
    assert!(pcb.probing_services().is_empty());
  }
}
