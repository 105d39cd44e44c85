//! Conflict detection/remediation and answer synthesis.
//!
//! Grounded on the teacher's `zone::Service::records`/`server.rs`'s
//! `handle_query_message` (which built PTR/SRV/TXT/A/AAAA answer sets for
//! one owned `Service`), generalised to the full multi-service,
//! multi-host [`Model`] and to the collision/mangling rules of
//! `mdns_responder.c`/`mdns_send.c`.

use smol_str::{format_smolstr, SmolStr};
use triomphe::Arc;

use crate::model::{Host, HostId, Model, Service, ServiceId};
use crate::types::{Name, Query, Record, RecordData, RecordType};

/// Default TTLs, spec §6.
pub(crate) const TTL_ADDRESS: u32 = 120;
pub(crate) const TTL_SRV: u32 = 120;
pub(crate) const TTL_TXT: u32 = 4500;
pub(crate) const TTL_PTR: u32 = 4500;
pub(crate) const TTL_GOODBYE: u32 = 0;

const SERVICE_ENUM_NAME: &str = "_services._dns-sd._udp.local.";

/// Outcome of comparing our tentative record bytes against a peer's,
/// per spec §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Collision {
  /// Our bytes are lexicographically greater: the peer is ignored.
  WeWin,
  /// Our bytes are lexicographically smaller: we must mangle and re-probe.
  WeLose,
  /// Byte-identical: no-op.
  Tie,
}

/// Lexicographic big-endian byte comparison, the single primitive every
/// §4.5 collision rule reduces to.
pub(crate) fn compare_bytes(ours: &[u8], theirs: &[u8]) -> Collision {
  match ours.cmp(theirs) {
    core::cmp::Ordering::Greater => Collision::WeWin,
    core::cmp::Ordering::Less => Collision::WeLose,
    core::cmp::Ordering::Equal => Collision::Tie,
  }
}

/// Serialises an SRV's priority/weight/port/target into the byte string
/// §4.5 compares as a whole, without going through the wire codec's name
/// compression (target is compared in its textual form, which is stable).
pub(crate) fn srv_comparison_bytes(priority: u16, weight: u16, port: u16, target: &Name) -> Vec<u8> {
  let mut out = Vec::with_capacity(6 + target.as_str().len());
  out.extend_from_slice(&priority.to_be_bytes());
  out.extend_from_slice(&weight.to_be_bytes());
  out.extend_from_slice(&port.to_be_bytes());
  out.extend_from_slice(target.as_str().as_bytes());
  out
}

/// Concatenates a TXT item list into the byte string §4.5 compares as a
/// whole for TXT collisions.
pub(crate) fn txt_comparison_bytes(service: &Service) -> Vec<u8> {
  let mut out = Vec::new();
  for item in service.txt() {
    out.extend_from_slice(item.to_wire_string().as_bytes());
    out.push(0);
  }
  out
}

/// Same framing as [`txt_comparison_bytes`], for a peer's decoded TXT
/// character-strings rather than our own model.
pub(crate) fn txt_strings_comparison_bytes(items: &[SmolStr]) -> Vec<u8> {
  let mut out = Vec::new();
  for item in items {
    out.extend_from_slice(item.as_bytes());
    out.push(0);
  }
  out
}

/// Mangles `name` per spec §4.5: `name` becomes `name-2`; if `name`
/// already ends in `-<n>` for decimal `n`, increments `n`.
pub(crate) fn mangle(name: &str) -> SmolStr {
  if let Some(pos) = name.rfind('-') {
    let (base, suffix) = name.split_at(pos);
    let digits = &suffix[1..];
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
      if let Ok(n) = digits.parse::<u64>() {
        return format_smolstr!("{base}-{}", n + 1);
      }
    }
  }
  format_smolstr!("{name}-2")
}

/// Builds the PTR/SRV/TXT records owned by one service, flagged
/// cache-flush or not depending on whether this is a probe/announce
/// (flush) versus a direct question reply outside of a probe context.
pub(crate) fn service_records(model: &Model, id: ServiceId, flush: bool, bye: bool) -> Vec<Record> {
  let Some(svc) = model.service(id) else {
    return Vec::new();
  };
  let Some(host) = model.host(svc.host()) else {
    return Vec::new();
  };
  let instance = instance_name(model, svc);
  let service_fqdn = format_smolstr!("{}.{}.local.", svc.service(), svc.proto());
  let instance_fqdn = format_smolstr!("{}.{}", instance, service_fqdn);
  let hostname_fqdn = format_smolstr!("{}.local.", host.hostname());

  let ptr_ttl = if bye { TTL_GOODBYE } else { TTL_PTR };
  let srv_ttl = if bye { TTL_GOODBYE } else { TTL_SRV };
  let txt_ttl = if bye { TTL_GOODBYE } else { TTL_TXT };

  let mut out = vec![Record::new(
    Name::new(service_fqdn.clone()),
    ptr_ttl,
    // RFC 6763 §10.1: PTR answers are never flagged cache-flush, even
    // during announce, since the set of PTRs pointing at a service type
    // is additive, not a singleton fact to overwrite.
    false,
    RecordData::PTR(Name::new(instance_fqdn.clone())),
  )];

  out.push(Record::new(
    Name::new(instance_fqdn.clone()),
    srv_ttl,
    flush,
    RecordData::SRV(crate::types::SRV::new(
      svc.priority(),
      svc.weight(),
      svc.port(),
      Name::new(hostname_fqdn.clone()),
    )),
  ));

  let txt_items: Arc<[SmolStr]> = Arc::from_iter(svc.txt().iter().map(|t| t.to_wire_string()));
  out.push(Record::new(
    Name::new(instance_fqdn),
    txt_ttl,
    flush,
    RecordData::TXT(txt_items),
  ));

  for subtype in svc.subtypes() {
    let sub_fqdn = format_smolstr!("{}._sub.{}", subtype.as_str(), service_fqdn);
    out.push(Record::new(
      Name::new(sub_fqdn),
      ptr_ttl,
      false,
      RecordData::PTR(Name::new(format_smolstr!(
        "{}.{}",
        instance,
        service_fqdn
      ))),
    ));
  }

  out
}

/// Builds A/AAAA records for a host's current address set.
pub(crate) fn host_address_records(host: &Host, flush: bool, bye: bool) -> Vec<Record> {
  let fqdn = format_smolstr!("{}.local.", host.hostname());
  let ttl = if bye { TTL_GOODBYE } else { TTL_ADDRESS };
  let mut out = Vec::new();
  for ip in host.ipv4s() {
    out.push(Record::new(Name::new(fqdn.clone()), ttl, flush, RecordData::A(ip)));
  }
  for ip in host.ipv6s() {
    out.push(Record::new(Name::new(fqdn.clone()), ttl, flush, RecordData::AAAA(ip)));
  }
  out
}

/// Builds one SDPTR meta-record per distinct `(service, proto)` pair
/// currently registered, per RFC 6763 §9 / spec's "service enumeration
/// meta-record".
pub(crate) fn service_enum_records(model: &Model) -> Vec<Record> {
  let mut seen: Vec<(SmolStr, SmolStr)> = Vec::new();
  let mut out = Vec::new();
  for (_, svc) in model.services() {
    let pair = (SmolStr::new(svc.service()), SmolStr::new(svc.proto()));
    if seen.contains(&pair) {
      continue;
    }
    seen.push(pair.clone());
    let target = format_smolstr!("{}.{}.local.", pair.0, pair.1);
    out.push(Record::new(
      Name::new(SERVICE_ENUM_NAME),
      TTL_PTR,
      false,
      RecordData::PTR(Name::new(target)),
    ));
  }
  out
}

/// The resolved instance label for a service: its own override, or the
/// model's default instance, or its hostname as a last resort.
pub(crate) fn instance_name<'a>(model: &'a Model, svc: &'a Service) -> SmolStr {
  if let Some(inst) = svc.instance() {
    return SmolStr::new(inst);
  }
  if let Some(default) = model.default_instance() {
    return SmolStr::new(default);
  }
  SmolStr::new(svc.hostname())
}

/// The synthesised answer to one inbound question, per spec §4.6's
/// dispatch table. `additionals` carries the records mDNS convention
/// places there (SRV/TXT/addresses alongside a PTR answer, addresses
/// alongside an SRV answer).
#[derive(Debug, Default)]
pub(crate) struct Answer {
  pub(crate) answers: Vec<Record>,
  pub(crate) additionals: Vec<Record>,
}

/// Matches `question` against everything the model owns and synthesises
/// the records spec §4.6 calls for. `flush` should be `true` for ordinary
/// multicast replies (`src_port == 5353`) and `false` for unicast replies
/// to the `unicast` bit or to a legacy (non-5353-source-port) query.
pub(crate) fn synthesize_answer(model: &Model, question: &Query, flush: bool) -> Answer {
  let mut answer = Answer::default();
  let name = question.name();
  let Ok(classified) = name.classify() else {
    return answer;
  };

  if name.as_str().trim_end_matches('.') == SERVICE_ENUM_NAME.trim_end_matches('.') {
    answer.answers = service_enum_records(model);
    return answer;
  }

  // Host-only question: `<hostname>.local` with ANY/A/AAAA.
  if classified.service.is_none() {
    if let Some(host_label) = classified.host.as_deref() {
      if let Some(hid) = model.find_host_by_name(host_label) {
        if matches!(
          question.query_type(),
          RecordType::ANY | RecordType::A | RecordType::AAAA
        ) {
          if let Some(host) = model.host(hid) {
            answer.answers = host_address_records(host, flush, false);
          }
        }
      }
    }
    return answer;
  }

  // Service-type or instance question.
  let matching: Vec<ServiceId> = model
    .services()
    .filter(|(_, s)| {
      Some(s.service()) == classified.service.as_deref().map(|x| x.trim_start_matches('_'))
        || Some(s.service()) == classified.service.as_deref()
    })
    .filter(|(_, s)| classified.proto.as_deref().is_none_or(|p| p == s.proto()))
    .filter(|(_, s)| {
      classified.host.is_none()
        || classified.host.as_deref() == Some(instance_name(model, s).as_str())
    })
    .map(|(id, _)| id)
    .collect();

  match question.query_type() {
    RecordType::PTR | RecordType::SDPTR | RecordType::ANY => {
      for id in &matching {
        let mut recs = service_records(model, *id, flush, false);
        // PTR answer, the rest additional.
        if let Some(ptr_pos) = recs.iter().position(|r| r.header().ty() == RecordType::PTR) {
          answer.answers.push(recs.remove(ptr_pos));
        }
        answer.additionals.append(&mut recs);
        if let Some(svc) = model.service(*id) {
          if let Some(host) = model.host(svc.host()) {
            answer
              .additionals
              .append(&mut host_address_records(host, flush, false));
          }
        }
      }
    }
    RecordType::SRV => {
      for id in &matching {
        let mut recs = service_records(model, *id, flush, false);
        recs.retain(|r| r.header().ty() == RecordType::SRV);
        answer.answers.append(&mut recs);
        if let Some(svc) = model.service(*id) {
          if let Some(host) = model.host(svc.host()) {
            answer
              .additionals
              .append(&mut host_address_records(host, flush, false));
          }
        }
      }
    }
    RecordType::TXT => {
      for id in &matching {
        let mut recs = service_records(model, *id, flush, false);
        recs.retain(|r| r.header().ty() == RecordType::TXT);
        answer.answers.append(&mut recs);
      }
    }
    _ => {}
  }

  answer
}

/// Answer-suppression rule (spec §4.5): a peer's unsolicited announcement
/// already carries a record we had queued, with at least half our TTL.
/// `our_full_ttl` is the TTL we would send; `peer_ttl` is what the peer
/// just announced for byte-identical rdata of the same type+name.
pub(crate) fn peer_announcement_suppresses_our_tx(peer_ttl: u32, our_full_ttl: u32) -> bool {
  peer_ttl >= our_full_ttl / 2
}

/// Known-answer suppression, forward direction (spec §4.6): an inbound
/// PTR question whose answer section already carries a healthy-TTL PTR
/// for the same instance means we should not answer it again.
pub(crate) fn known_answer_suppresses_ptr(
  known_answers: &[Record],
  instance_fqdn: &str,
  full_ttl: u32,
) -> bool {
  known_answers.iter().any(|r| {
    r.header().ty() == RecordType::PTR
      && matches!(r.data(), RecordData::PTR(target) if target.as_str().trim_end_matches('.') == instance_fqdn.trim_end_matches('.'))
      && r.header().ttl() >= full_ttl / 2
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn mangle_appends_suffix_first_time() {
    assert_eq!(mangle("alpha").as_str(), "alpha-2");
  }

  #[test]
  fn mangle_increments_existing_suffix() {
    assert_eq!(mangle("alpha-2").as_str(), "alpha-3");
    assert_eq!(mangle("alpha-9").as_str(), "alpha-10");
  }

  #[test]
  fn mangle_does_not_misparse_non_numeric_suffix() {
    assert_eq!(mangle("foo-bar").as_str(), "foo-bar-2");
  }

  #[test]
  fn compare_bytes_orders_lexicographically() {
    assert_eq!(compare_bytes(&[2], &[1]), Collision::WeWin);
    assert_eq!(compare_bytes(&[1], &[2]), Collision::WeLose);
    assert_eq!(compare_bytes(&[1, 2], &[1, 2]), Collision::Tie);
  }

  #[test]
  fn suppression_requires_half_ttl() {
    assert!(peer_announcement_suppresses_our_tx(60, 120));
    assert!(!peer_announcement_suppresses_our_tx(59, 120));
  }

  #[test]
  fn known_answer_suppression_matches_name_and_ttl() {
    let rec = Record::new(
      Name::new("_http._tcp.local."),
      4500,
      false,
      RecordData::PTR(Name::new("inst._http._tcp.local.")),
    );
    assert!(known_answer_suppresses_ptr(
      &[rec.clone()],
      "inst._http._tcp.local.",
      4500
    ));
    assert!(!known_answer_suppresses_ptr(&[], "inst._http._tcp.local.", 4500));
  }
}
