use smol_str::SmolStr;
use smallvec_wrapper::TinyVec;

use super::HostId;

/// Internal identifier for a service currently registered with the engine.
///
/// See [`HostId`] for the grounding of this handle shape.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ServiceId(pub(crate) usize);

impl From<ServiceId> for usize {
  #[inline]
  fn from(id: ServiceId) -> Self {
    id.0
  }
}

/// One entry of a service's linked list of TXT key/value items.
///
/// `value == None` means the key appeared bare (`key`, no `=`); this is
/// distinct from `Some("")`, which means `key=` with an empty value. Both
/// forms are legal RFC 6763 §6.4 TXT items and must round-trip distinctly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxtItem {
  key: SmolStr,
  value: Option<SmolStr>,
}

impl TxtItem {
  /// Builds a TXT item from a key and an optional value.
  #[inline]
  pub fn new(key: impl Into<SmolStr>, value: Option<SmolStr>) -> Self {
    Self {
      key: key.into(),
      value,
    }
  }

  /// The item's key.
  #[inline]
  pub fn key(&self) -> &str {
    &self.key
  }

  /// The item's value, or `None` if the key appeared bare.
  #[inline]
  pub fn value(&self) -> Option<&str> {
    self.value.as_deref()
  }

  /// Renders as the wire character-string, e.g. `"key=value"` or `"key"`.
  pub(crate) fn to_wire_string(&self) -> SmolStr {
    match &self.value {
      Some(v) => SmolStr::new(format!("{}={}", self.key, v)),
      None => self.key.clone(),
    }
  }

  /// Parses a decoded wire character-string back into a `TxtItem`.
  pub(crate) fn from_wire_string(s: &str) -> Self {
    match s.split_once('=') {
      Some((k, v)) => Self::new(k, Some(SmolStr::new(v))),
      None => Self::new(s, None),
    }
  }
}

/// A DNS-SD subtype label (`_printer._sub._http._tcp.local.`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subtype(SmolStr);

impl Subtype {
  /// Builds a subtype label from its string form.
  #[inline]
  pub fn new(label: impl Into<SmolStr>) -> Self {
    Self(label.into())
  }

  /// The subtype label as a plain string.
  #[inline]
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

/// The tuple that uniquely identifies a service: `(service, proto,
/// hostname, instance)`. Attempts to register a duplicate of an existing
/// key fail rather than silently overwrite.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
  /// The service label, e.g. `_http`.
  pub service: SmolStr,
  /// The protocol label, e.g. `_tcp`.
  pub proto: SmolStr,
  /// The hostname this service instance is hosted on.
  pub hostname: SmolStr,
  /// The instance label, if one was set.
  pub instance: Option<SmolStr>,
}

/// A registered service.
///
/// Grounded on the teacher's `zone::{Service, ServiceBuilder}`: the field
/// set (instance/service/proto/domain/hostname/port/priority/weight/txt)
/// is the same, generalised from a single standalone `Service<R>` value
/// plus a read-only `Zone` impl into a plain data row the engine keeps in
/// an owned table and mutates (subtype and TXT item list, mangled
/// instance) over the life of the registration.
#[derive(Debug, Clone)]
pub struct Service {
  key: ServiceKey,
  domain: SmolStr,
  host: HostId,
  port: u16,
  priority: u16,
  weight: u16,
  ttl: u32,
  txt: TinyVec<TxtItem>,
  subtypes: TinyVec<Subtype>,
}

impl Service {
  #[allow(clippy::too_many_arguments)]
  #[inline]
  pub(crate) fn new(
    service: SmolStr,
    proto: SmolStr,
    instance: Option<SmolStr>,
    hostname: SmolStr,
    domain: SmolStr,
    host: HostId,
    port: u16,
    ttl: u32,
  ) -> Self {
    Self {
      key: ServiceKey {
        service,
        proto,
        hostname,
        instance,
      },
      domain,
      host,
      port,
      priority: 0,
      weight: 0,
      ttl,
      txt: TinyVec::new(),
      subtypes: TinyVec::new(),
    }
  }

  /// This service's uniqueness key.
  #[inline]
  pub fn key(&self) -> &ServiceKey {
    &self.key
  }

  /// The service label, e.g. `_http`.
  #[inline]
  pub fn service(&self) -> &str {
    &self.key.service
  }

  /// The protocol label, e.g. `_tcp`.
  #[inline]
  pub fn proto(&self) -> &str {
    &self.key.proto
  }

  /// The instance label, if one was set (mangled on collision).
  #[inline]
  pub fn instance(&self) -> Option<&str> {
    self.key.instance.as_deref()
  }

  /// The hostname this service is hosted on.
  #[inline]
  pub fn hostname(&self) -> &str {
    &self.key.hostname
  }

  /// The domain this service is registered under, usually `local`.
  #[inline]
  pub fn domain(&self) -> &str {
    &self.domain
  }

  /// The [`HostId`] this service is hosted on.
  #[inline]
  pub fn host(&self) -> HostId {
    self.host
  }

  /// The service's port.
  #[inline]
  pub fn port(&self) -> u16 {
    self.port
  }

  /// The service's SRV priority.
  #[inline]
  pub fn priority(&self) -> u16 {
    self.priority
  }

  /// The service's SRV weight.
  #[inline]
  pub fn weight(&self) -> u16 {
    self.weight
  }

  /// The record TTL, in seconds.
  #[inline]
  pub fn ttl(&self) -> u32 {
    self.ttl
  }

  /// The service's TXT items.
  #[inline]
  pub fn txt(&self) -> &[TxtItem] {
    &self.txt
  }

  /// The service's DNS-SD subtypes.
  #[inline]
  pub fn subtypes(&self) -> &[Subtype] {
    &self.subtypes
  }

  #[inline]
  pub(crate) fn set_priority(&mut self, priority: u16) {
    self.priority = priority;
  }

  #[inline]
  pub(crate) fn set_weight(&mut self, weight: u16) {
    self.weight = weight;
  }

  #[inline]
  pub(crate) fn set_instance(&mut self, instance: SmolStr) {
    self.key.instance = Some(instance);
  }

  #[inline]
  pub(crate) fn set_port(&mut self, port: u16) {
    self.port = port;
  }

  /// Appends a TXT item, rejecting a key that is already present so that
  /// `set_txt`-by-key semantics stay deterministic.
  pub(crate) fn push_txt(&mut self, item: TxtItem) -> bool {
    if self.txt.iter().any(|t| t.key() == item.key()) {
      return false;
    }
    self.txt.push(item);
    true
  }

  pub(crate) fn remove_txt(&mut self, key: &str) -> bool {
    if let Some(pos) = self.txt.iter().position(|t| t.key() == key) {
      self.txt.remove(pos);
      true
    } else {
      false
    }
  }

  /// Adds a subtype label. Returns `false` if already present (the label
  /// is then included in the next probe/announce the PCB runs, with no
  /// separate deferred-addition queue).
  pub(crate) fn push_subtype(&mut self, subtype: Subtype) -> bool {
    if self.subtypes.iter().any(|s| s.as_str() == subtype.as_str()) {
      return false;
    }
    self.subtypes.push(subtype);
    true
  }

  /// Removes a subtype label, returning `true` if it was present.
  pub(crate) fn remove_subtype(&mut self, subtype: &str) -> bool {
    if let Some(pos) = self.subtypes.iter().position(|s| s.as_str() == subtype) {
      self.subtypes.remove(pos);
      true
    } else {
      false
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> Service {
    Service::new(
      SmolStr::new("_http"),
      SmolStr::new("_tcp"),
      Some(SmolStr::new("My Printer")),
      SmolStr::new("box1"),
      SmolStr::new("local"),
      HostId(0),
      8080,
      120,
    )
  }

  #[test]
  fn txt_item_round_trips_bare_and_valued_forms() {
    let bare = TxtItem::from_wire_string("nokey");
    assert_eq!(bare.key(), "nokey");
    assert_eq!(bare.value(), None);

    let valued = TxtItem::from_wire_string("path=/");
    assert_eq!(valued.key(), "path");
    assert_eq!(valued.value(), Some("/"));

    let empty = TxtItem::from_wire_string("flag=");
    assert_eq!(empty.value(), Some(""));
    assert_ne!(empty, bare);
  }

  #[test]
  fn push_txt_rejects_duplicate_keys() {
    let mut svc = sample();
    assert!(svc.push_txt(TxtItem::new("path", Some(SmolStr::new("/")))));
    assert!(!svc.push_txt(TxtItem::new("path", Some(SmolStr::new("/other")))));
    assert_eq!(svc.txt().len(), 1);
  }

  #[test]
  fn push_subtype_is_idempotent() {
    let mut svc = sample();
    assert!(svc.push_subtype(Subtype::new("_printer")));
    assert!(!svc.push_subtype(Subtype::new("_printer")));
    assert_eq!(svc.subtypes().len(), 1);
  }

  #[test]
  fn remove_txt_drops_only_the_matching_key() {
    let mut svc = sample();
    svc.push_txt(TxtItem::new("path", Some(SmolStr::new("/"))));
    svc.push_txt(TxtItem::new("tls", None));
    assert!(svc.remove_txt("path"));
    assert!(!svc.remove_txt("path"));
    assert_eq!(svc.txt().len(), 1);
    assert_eq!(svc.txt()[0].key(), "tls");
  }

  #[test]
  fn remove_subtype_drops_only_the_matching_label() {
    let mut svc = sample();
    svc.push_subtype(Subtype::new("_printer"));
    svc.push_subtype(Subtype::new("_universal"));
    assert!(svc.remove_subtype("_printer"));
    assert!(!svc.remove_subtype("_printer"));
    assert_eq!(svc.subtypes().len(), 1);
    assert_eq!(svc.subtypes()[0].as_str(), "_universal");
  }

  #[test]
  fn set_port_updates_in_place() {
    let mut svc = sample();
    svc.set_port(9090);
    assert_eq!(svc.port(), 9090);
  }
}
