//! The engine's owned data model: hosts and services.
//!
//! Grounded on the teacher's `zone::{Service, ServiceBuilder}`, generalised
//! from a single read-only `Zone` impl into an owned, mutable table the
//! action loop adds to, removes from, and mangles on collision. The
//! underlying storage is a `slab::Slab` per entity kind — the same crate
//! used for connection tables in the pack's `microsoft-openvmm` example —
//! giving every host/service a stable integer handle cheap to copy into a
//! [`crate::scheduler::ScheduledAnswer`].

mod host;
mod service;

pub use host::{Host, HostId};
pub use service::{Service, ServiceId, ServiceKey, Subtype, TxtItem};

use slab::Slab;
use smol_str::SmolStr;

use crate::error::{Error, Result};

/// The process-wide table of hosts and services. Per spec §5, exactly one
/// `Model` exists per engine and only the action-loop worker mutates it.
#[derive(Debug, Default)]
pub(crate) struct Model {
  hosts: Slab<Host>,
  services: Slab<Service>,
  self_host: Option<HostId>,
  default_instance: Option<SmolStr>,
}

impl Model {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub(crate) fn self_host(&self) -> Option<HostId> {
    self.self_host
  }

  #[inline]
  pub(crate) fn default_instance(&self) -> Option<&str> {
    self.default_instance.as_deref()
  }

  #[inline]
  pub(crate) fn set_default_instance(&mut self, instance: SmolStr) {
    self.default_instance = Some(instance);
  }

  /// Creates the self-host if it does not exist yet, or renames it.
  /// Returns the host's id either way.
  pub(crate) fn set_self_hostname(&mut self, hostname: SmolStr) -> HostId {
    match self.self_host {
      Some(id) => {
        self.hosts[id.0].set_hostname(hostname);
        id
      }
      None => {
        let key = self.hosts.insert(Host::new(hostname, false));
        let id = HostId(key);
        self.self_host = Some(id);
        id
      }
    }
  }

  pub(crate) fn host(&self, id: HostId) -> Option<&Host> {
    self.hosts.get(id.0)
  }

  pub(crate) fn host_mut(&mut self, id: HostId) -> Option<&mut Host> {
    self.hosts.get_mut(id.0)
  }

  pub(crate) fn hosts(&self) -> impl Iterator<Item = (HostId, &Host)> {
    self.hosts.iter().map(|(k, h)| (HostId(k), h))
  }

  pub(crate) fn find_host_by_name(&self, hostname: &str) -> Option<HostId> {
    self
      .hosts
      .iter()
      .find(|(_, h)| h.hostname().eq_ignore_ascii_case(hostname))
      .map(|(k, _)| HostId(k))
  }

  pub(crate) fn add_delegated_host(&mut self, hostname: SmolStr) -> Result<HostId> {
    if self.find_host_by_name(&hostname).is_some() {
      return Err(Error::InvalidArg(smol_str::format_smolstr!(
        "host {hostname} already exists"
      )));
    }
    let key = self.hosts.insert(Host::new(hostname, true));
    Ok(HostId(key))
  }

  /// Removes a host and every service that pointed at it. Returns the
  /// removed service ids so the caller can emit goodbyes for them.
  pub(crate) fn remove_host(&mut self, id: HostId) -> Result<Vec<ServiceId>> {
    if !self.hosts.contains(id.0) {
      return Err(Error::NotFound(smol_str::format_smolstr!("host {}", id.0)));
    }
    let orphaned: Vec<ServiceId> = self
      .services
      .iter()
      .filter(|(_, s)| s.host() == id)
      .map(|(k, _)| ServiceId(k))
      .collect();
    for sid in &orphaned {
      self.services.remove(sid.0);
    }
    self.hosts.remove(id.0);
    Ok(orphaned)
  }

  pub(crate) fn service(&self, id: ServiceId) -> Option<&Service> {
    self.services.get(id.0)
  }

  pub(crate) fn service_mut(&mut self, id: ServiceId) -> Option<&mut Service> {
    self.services.get_mut(id.0)
  }

  pub(crate) fn services(&self) -> impl Iterator<Item = (ServiceId, &Service)> {
    self.services.iter().map(|(k, s)| (ServiceId(k), s))
  }

  pub(crate) fn find_service(&self, key: &ServiceKey) -> Option<ServiceId> {
    self
      .services
      .iter()
      .find(|(_, s)| s.key() == key)
      .map(|(k, _)| ServiceId(k))
  }

  /// Inserts a new service after checking the `(service, proto, hostname,
  /// instance)` uniqueness invariant (spec §3) and that `host` is known.
  #[allow(clippy::too_many_arguments)]
  pub(crate) fn add_service(
    &mut self,
    service: SmolStr,
    proto: SmolStr,
    instance: Option<SmolStr>,
    hostname: SmolStr,
    domain: SmolStr,
    host: HostId,
    port: u16,
    ttl: u32,
  ) -> Result<ServiceId> {
    if !self.hosts.contains(host.0) {
      return Err(Error::InvalidArg(SmolStr::new("host does not exist")));
    }
    let key = ServiceKey {
      service: service.clone(),
      proto: proto.clone(),
      hostname: hostname.clone(),
      instance: instance.clone(),
    };
    if self.find_service(&key).is_some() {
      return Err(Error::InvalidArg(SmolStr::new(
        "service already registered under this (service, proto, hostname, instance)",
      )));
    }
    let svc = Service::new(service, proto, instance, hostname, domain, host, port, ttl);
    let k = self.services.insert(svc);
    Ok(ServiceId(k))
  }

  /// Removes a service, returning it so the caller can emit a goodbye.
  pub(crate) fn remove_service(&mut self, id: ServiceId) -> Result<Service> {
    if !self.services.contains(id.0) {
      return Err(Error::NotFound(smol_str::format_smolstr!(
        "service {}",
        id.0
      )));
    }
    Ok(self.services.remove(id.0))
  }
}
