use std::net::IpAddr;

use smol_str::SmolStr;
use smallvec_wrapper::TinyVec;

/// Internal identifier for a host currently registered with the engine.
///
/// Grounded on the teacher's `endpoint::ConnectionHandle`: a bare newtype
/// index into a slab, handed back to callers as an opaque reference.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct HostId(pub(crate) usize);

impl From<HostId> for usize {
  #[inline]
  fn from(id: HostId) -> Self {
    id.0
  }
}

/// A host: an immutable `hostname` label plus a set of addresses.
///
/// The engine owns exactly one *self-host* (the node's own hostname,
/// addresses gathered from the network interfaces it is bound to) and zero
/// or more *delegated hosts* (addresses the application vouches for on the
/// node's behalf — a proxy answering on behalf of another device, for
/// instance).
#[derive(Debug, Clone)]
pub struct Host {
  hostname: SmolStr,
  addrs: TinyVec<IpAddr>,
  delegated: bool,
}

impl Host {
  #[inline]
  pub(crate) fn new(hostname: SmolStr, delegated: bool) -> Self {
    Self {
      hostname,
      addrs: TinyVec::new(),
      delegated,
    }
  }

  /// The host's label, without the trailing `.local.` suffix.
  #[inline]
  pub fn hostname(&self) -> &str {
    &self.hostname
  }

  #[inline]
  pub(crate) fn set_hostname(&mut self, hostname: SmolStr) {
    self.hostname = hostname;
  }

  /// The addresses currently published for this host.
  #[inline]
  pub fn addrs(&self) -> &[IpAddr] {
    &self.addrs
  }

  /// The published addresses, restricted to IPv4.
  #[inline]
  pub fn ipv4s(&self) -> impl Iterator<Item = std::net::Ipv4Addr> + '_ {
    self.addrs.iter().filter_map(|a| match a {
      IpAddr::V4(v4) => Some(*v4),
      IpAddr::V6(_) => None,
    })
  }

  /// The published addresses, restricted to IPv6.
  #[inline]
  pub fn ipv6s(&self) -> impl Iterator<Item = std::net::Ipv6Addr> + '_ {
    self.addrs.iter().filter_map(|a| match a {
      IpAddr::V6(v6) => Some(*v6),
      IpAddr::V4(_) => None,
    })
  }

  /// Whether this host is a delegated host (as opposed to the self-host).
  #[inline]
  pub fn is_delegated(&self) -> bool {
    self.delegated
  }

  /// Adds an address if not already present. Returns `true` if the set of
  /// addresses changed, which callers use to decide whether a re-probe or
  /// re-announce is owed.
  pub(crate) fn add_addr(&mut self, addr: IpAddr) -> bool {
    if self.addrs.contains(&addr) {
      return false;
    }
    self.addrs.push(addr);
    true
  }

  /// Removes an address. Returns `true` if present and removed.
  pub(crate) fn remove_addr(&mut self, addr: &IpAddr) -> bool {
    if let Some(pos) = self.addrs.iter().position(|a| a == addr) {
      self.addrs.remove(pos);
      true
    } else {
      false
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::net::Ipv4Addr;

  #[test]
  fn add_addr_is_idempotent() {
    let mut h = Host::new(SmolStr::new("box1"), false);
    let a = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5));
    assert!(h.add_addr(a));
    assert!(!h.add_addr(a));
    assert_eq!(h.addrs().len(), 1);
  }

  #[test]
  fn remove_addr_reports_presence() {
    let mut h = Host::new(SmolStr::new("box1"), false);
    let a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    assert!(!h.remove_addr(&a));
    h.add_addr(a);
    assert!(h.remove_addr(&a));
    assert!(h.addrs().is_empty());
  }
}
