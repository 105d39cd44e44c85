//! The query engine: one-shot searches and continuous browses.
//!
//! Grounded on the teacher's `client::{ServiceEntry, ServiceEntryBuilder,
//! Client::query_in}` (a single in-flight query accumulating fields across
//! several inbound packets), generalised into the engine-owned `Search`/
//! `Browse` registry `mdns_querier.c`/`mdns_browser.c` describe: many
//! concurrent searches, a persistent browse result table plus a transient
//! per-packet sync delta.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use smallvec_wrapper::TinyVec;
use smol_str::SmolStr;
use triomphe::Arc;

use crate::model::TxtItem;
use crate::types::{Record, RecordData, RecordType};

/// Internal identifier for a registered search or browse.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct QueryId(pub(crate) usize);

/// A one-shot or continuous search's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueryState {
  Init,
  Running,
  Off,
}

/// The filter a [`Search`]/[`Browse`] matches inbound records against.
#[derive(Debug, Clone)]
pub struct QueryFilter {
  /// Restricts matches to this instance label, if set.
  pub instance: Option<SmolStr>,
  /// Restricts matches to this service label (e.g. `_http`), if set.
  pub service: Option<SmolStr>,
  /// Restricts matches to this protocol label (e.g. `_tcp`), if set.
  pub proto: Option<SmolStr>,
  /// The record type the search question asks for.
  pub ty: RecordType,
  /// Whether the outbound question sets the unicast-response bit.
  pub unicast: bool,
}

/// One aggregated result, built up from PTR/SRV/TXT/A/AAAA answers that
/// may arrive across several inbound packets (spec §3 "Result").
#[derive(Debug, Clone)]
pub struct QueryResult {
  hostname: Option<SmolStr>,
  instance: Option<SmolStr>,
  service_type: Option<SmolStr>,
  proto_label: Option<SmolStr>,
  port: Option<u16>,
  txt: TinyVec<TxtItem>,
  addrs: TinyVec<IpAddr>,
  ttl: u32,
}

impl QueryResult {
  fn new(instance: Option<SmolStr>) -> Self {
    Self {
      hostname: None,
      instance,
      service_type: None,
      proto_label: None,
      port: None,
      txt: TinyVec::new(),
      addrs: TinyVec::new(),
      ttl: TTL_UNSET,
    }
  }

  /// The resolved instance name, if a PTR/SRV/TXT answer has named one.
  #[inline]
  pub fn instance(&self) -> Option<&str> {
    self.instance.as_deref()
  }

  /// The target hostname, once an SRV answer has supplied one.
  #[inline]
  pub fn hostname(&self) -> Option<&str> {
    self.hostname.as_deref()
  }

  /// The service label, e.g. `_http`.
  #[inline]
  pub fn service_type(&self) -> Option<&str> {
    self.service_type.as_deref()
  }

  /// The protocol label, e.g. `_tcp`.
  #[inline]
  pub fn proto_label(&self) -> Option<&str> {
    self.proto_label.as_deref()
  }

  /// The service port, once an SRV answer has supplied one.
  #[inline]
  pub fn port(&self) -> Option<u16> {
    self.port
  }

  /// The TXT items attached to this result, if any TXT answer matched.
  #[inline]
  pub fn txt(&self) -> &[TxtItem] {
    &self.txt
  }

  /// Every address observed for this result so far.
  #[inline]
  pub fn addrs(&self) -> &[IpAddr] {
    &self.addrs
  }

  /// The reconciled TTL. `0` means the result is a pending goodbye and is
  /// removed from the owning [`Browse`] after the current sync
  /// notification.
  #[inline]
  pub fn ttl(&self) -> u32 {
    self.ttl
  }

  /// Applies the TTL-reconciliation rule from spec §3: `ttl <- min(old,
  /// new)`, except the one-shot replace `0 -> non-zero`.
  fn reconcile_ttl(&mut self, new_ttl: u32) {
    self.ttl = if self.ttl == 0 {
      new_ttl
    } else if self.ttl == TTL_UNSET {
      new_ttl
    } else {
      self.ttl.min(new_ttl)
    };
  }
}

const TTL_UNSET: u32 = u32::MAX;

/// A one-shot query bounded by a timeout and an optional result cap (spec
/// §3/§4.7).
#[derive(Debug)]
pub(crate) struct Search {
  filter: QueryFilter,
  state: QueryState,
  started_at: Instant,
  timeout: Duration,
  max_results: Option<usize>,
  next_retransmit: Instant,
  results: Vec<QueryResult>,
}

impl Search {
  pub(crate) fn new(filter: QueryFilter, timeout: Duration, max_results: Option<usize>) -> Self {
    let now = Instant::now();
    Self {
      filter,
      state: QueryState::Init,
      started_at: now,
      timeout,
      max_results,
      next_retransmit: now,
      results: Vec::new(),
    }
  }

  #[inline]
  pub(crate) fn filter(&self) -> &QueryFilter {
    &self.filter
  }

  #[inline]
  pub(crate) fn results(&self) -> &[QueryResult] {
    &self.results
  }

  #[inline]
  pub(crate) fn is_complete(&self, now: Instant) -> bool {
    now.duration_since(self.started_at) >= self.timeout
      || self
        .max_results
        .is_some_and(|max| self.results.len() >= max)
  }

  /// Whether the periodic tick owes this search a retransmit of its
  /// question (spec §4.7: "re-sends its question every ~1000 ms").
  pub(crate) fn due_for_retransmit(&self, now: Instant, interval: Duration) -> bool {
    self.state != QueryState::Off && now >= self.next_retransmit && {
      let _ = interval;
      true
    }
  }

  pub(crate) fn mark_sent(&mut self, now: Instant, interval: Duration) {
    self.state = QueryState::Running;
    self.next_retransmit = now + interval;
  }

  /// Applies one inbound record to this search's result set, per the
  /// matching rules of spec §4.7. Returns `true` if a result was created
  /// or mutated.
  pub(crate) fn apply_record(&mut self, record: &Record) -> bool {
    apply_record_to_results(&self.filter, &mut self.results, record, self.max_results).is_some()
  }
}

/// A continuous PTR subscription to a `(service, proto)` pair (spec §3
/// "Browse"). Keeps a persistent result table plus a transient per-packet
/// sync delta, per `mdns_browser.c`.
#[derive(Debug)]
pub(crate) struct Browse {
  filter: QueryFilter,
  results: Vec<QueryResult>,
  pending_sync: Vec<QueryResult>,
  next_retransmit: Instant,
}

impl Browse {
  pub(crate) fn new(service: SmolStr, proto: SmolStr) -> Self {
    Self {
      filter: QueryFilter {
        instance: None,
        service: Some(service),
        proto: Some(proto),
        ty: RecordType::PTR,
        unicast: false,
      },
      results: Vec::new(),
      pending_sync: Vec::new(),
      next_retransmit: Instant::now(),
    }
  }

  #[inline]
  pub(crate) fn filter(&self) -> &QueryFilter {
    &self.filter
  }

  #[inline]
  pub(crate) fn results(&self) -> &[QueryResult] {
    &self.results
  }

  pub(crate) fn due_for_retransmit(&self, now: Instant) -> bool {
    now >= self.next_retransmit
  }

  pub(crate) fn mark_sent(&mut self, now: Instant, interval: Duration) {
    self.next_retransmit = now + interval;
  }

  /// Applies one inbound record, recording the change in `pending_sync`
  /// for the caller to hand to the notifier once the whole packet has
  /// been parsed.
  pub(crate) fn apply_record(&mut self, record: &Record) {
    if let Some(instance) = apply_record_to_results(&self.filter, &mut self.results, record, None) {
      if let Some(r) = self
        .results
        .iter()
        .find(|r| r.instance.as_deref() == Some(instance.as_str()))
      {
        self.pending_sync.push(r.clone());
      }
    }
  }

  /// Drains the per-packet delta, removing any result whose TTL reached
  /// zero from the permanent table (spec §4.7's "out-sync" semantics).
  pub(crate) fn drain_sync(&mut self) -> Vec<QueryResult> {
    let synced = core::mem::take(&mut self.pending_sync);
    self.results.retain(|r| r.ttl != 0);
    synced
  }
}

fn key_matches(filter: &QueryFilter, instance: Option<&str>, service: &str, proto: &str) -> bool {
  filter.service.as_deref().is_none_or(|s| s == service)
    && filter.proto.as_deref().is_none_or(|p| p == proto)
    && filter
      .instance
      .as_deref()
      .is_none_or(|want| Some(want) == instance)
}

fn find_or_create<'a>(
  results: &'a mut Vec<QueryResult>,
  instance: &str,
) -> &'a mut QueryResult {
  if let Some(pos) = results
    .iter()
    .position(|r| r.instance.as_deref() == Some(instance))
  {
    &mut results[pos]
  } else {
    results.push(QueryResult::new(Some(SmolStr::new(instance))));
    results.last_mut().unwrap()
  }
}

/// Shared result-matching logic behind both [`Search::apply_record`] and
/// [`Browse::apply_record`], per spec §4.7's bullet list.
fn apply_record_to_results(
  filter: &QueryFilter,
  results: &mut Vec<QueryResult>,
  record: &Record,
  max_results: Option<usize>,
) -> Option<SmolStr> {
  let classified = record.header().name().classify().ok()?;

  match record.data() {
    RecordData::PTR(target) => {
      let target_classified = target.classify().ok()?;
      let service = classified.service.as_deref().unwrap_or_default();
      let proto = classified.proto.as_deref().unwrap_or_default();
      if !key_matches(filter, None, service, proto) {
        return None;
      }
      let instance = target_classified.host.as_deref().unwrap_or_default();
      if max_results.is_some_and(|max| {
        results.len() >= max && !results.iter().any(|r| r.instance.as_deref() == Some(instance))
      }) {
        return None;
      }
      let result = find_or_create(results, instance);
      result.service_type = Some(SmolStr::new(service));
      result.proto_label = Some(SmolStr::new(proto));
      result.reconcile_ttl(record.header().ttl());
      Some(SmolStr::new(instance))
    }
    RecordData::SRV(srv) => {
      let service = classified.service.as_deref().unwrap_or_default();
      let proto = classified.proto.as_deref().unwrap_or_default();
      let instance = classified.host.as_deref().unwrap_or_default();
      if !key_matches(filter, Some(instance), service, proto) {
        return None;
      }
      let result = find_or_create(results, instance);
      result.hostname = Some(SmolStr::new(
        srv.target().as_str().trim_end_matches('.').to_string(),
      ));
      result.port = Some(srv.port());
      result.reconcile_ttl(record.header().ttl());
      Some(SmolStr::new(instance))
    }
    RecordData::TXT(items) => {
      let service = classified.service.as_deref().unwrap_or_default();
      let proto = classified.proto.as_deref().unwrap_or_default();
      let instance = classified.host.as_deref().unwrap_or_default();
      if !key_matches(filter, Some(instance), service, proto) {
        return None;
      }
      let result = find_or_create(results, instance);
      let new_txt: TinyVec<TxtItem> = items.iter().map(|s| TxtItem::from_wire_string(s)).collect();
      if new_txt.iter().collect::<Vec<_>>() != result.txt.iter().collect::<Vec<_>>() {
        result.txt = new_txt;
      }
      result.reconcile_ttl(record.header().ttl());
      Some(SmolStr::new(instance))
    }
    RecordData::A(ip) => apply_address(filter, results, classified.host.as_deref(), IpAddr::V4(*ip), record.header().ttl()),
    RecordData::AAAA(ip) => apply_address(filter, results, classified.host.as_deref(), IpAddr::V6(*ip), record.header().ttl()),
    RecordData::OPT(_) | RecordData::NSEC(_) => None,
  }
}

fn apply_address(
  filter: &QueryFilter,
  results: &mut Vec<QueryResult>,
  hostname: Option<&str>,
  addr: IpAddr,
  ttl: u32,
) -> Option<SmolStr> {
  if !matches!(filter.ty, RecordType::ANY | RecordType::A | RecordType::AAAA | RecordType::SRV | RecordType::PTR) {
    return None;
  }
  let hostname = hostname?;
  let mut matched = None;
  for result in results
    .iter_mut()
    .filter(|r| r.hostname.as_deref() == Some(hostname))
  {
    if !result.addrs.contains(&addr) {
      result.addrs.push(addr);
    }
    result.reconcile_ttl(ttl);
    matched = result.instance.clone();
  }
  matched
}

/// Records sent by the crate as multicast questions for an active search
/// or browse; exposed so the engine can build the outbound `TxPacket`.
pub(crate) fn query_name(filter: &QueryFilter) -> SmolStr {
  match (&filter.instance, &filter.service, &filter.proto) {
    (Some(inst), Some(svc), Some(proto)) => {
      smol_str::format_smolstr!("{inst}.{svc}.{proto}.local.")
    }
    (None, Some(svc), Some(proto)) => smol_str::format_smolstr!("{svc}.{proto}.local."),
    _ => SmolStr::new("_services._dns-sd._udp.local."),
  }
}

#[allow(unused)]
pub(crate) type SharedBytes = Arc<[u8]>;

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::Name;

  fn ptr_record(service: &str, proto: &str, instance: &str, ttl: u32) -> Record {
    Record::new(
      Name::new(smol_str::format_smolstr!("{service}.{proto}.local.")),
      ttl,
      false,
      RecordData::PTR(Name::new(smol_str::format_smolstr!(
        "{instance}.{service}.{proto}.local."
      ))),
    )
  }

  #[test]
  fn search_matches_ptr_and_creates_result() {
    let mut search = Search::new(
      QueryFilter {
        instance: None,
        service: Some(SmolStr::new("_http")),
        proto: Some(SmolStr::new("_tcp")),
        ty: RecordType::PTR,
        unicast: false,
      },
      Duration::from_secs(3),
      Some(2),
    );
    let rec = ptr_record("_http", "_tcp", "srv1", 4500);
    assert!(search.apply_record(&rec));
    assert_eq!(search.results().len(), 1);
    assert_eq!(search.results()[0].instance(), Some("srv1"));
  }

  #[test]
  fn search_respects_max_results() {
    let mut search = Search::new(
      QueryFilter {
        instance: None,
        service: Some(SmolStr::new("_http")),
        proto: Some(SmolStr::new("_tcp")),
        ty: RecordType::PTR,
        unicast: false,
      },
      Duration::from_secs(3),
      Some(1),
    );
    assert!(search.apply_record(&ptr_record("_http", "_tcp", "srv1", 4500)));
    assert!(!search.apply_record(&ptr_record("_http", "_tcp", "srv2", 4500)));
    assert_eq!(search.results().len(), 1);
  }

  #[test]
  fn ttl_reconciliation_is_monotone_non_increasing_except_zero_replace() {
    let mut r = QueryResult::new(Some(SmolStr::new("srv1")));
    r.reconcile_ttl(120);
    r.reconcile_ttl(60);
    assert_eq!(r.ttl(), 60);
    r.reconcile_ttl(90);
    assert_eq!(r.ttl(), 60);
    r.reconcile_ttl(0);
    assert_eq!(r.ttl(), 0);
    r.reconcile_ttl(120);
    assert_eq!(r.ttl(), 120);
  }

  #[test]
  fn browse_sync_drains_and_removes_zero_ttl_results() {
    let mut browse = Browse::new(SmolStr::new("_http"), SmolStr::new("_tcp"));
    browse.apply_record(&ptr_record("_http", "_tcp", "srv1", 4500));
    let synced = browse.drain_sync();
    assert_eq!(synced.len(), 1);
    assert_eq!(browse.results().len(), 1);

    browse.apply_record(&ptr_record("_http", "_tcp", "srv1", 0));
    let synced = browse.drain_sync();
    assert_eq!(synced.len(), 1);
    assert_eq!(synced[0].ttl(), 0);
    assert!(browse.results().is_empty());
  }
}
