//! The packet parser: validates an inbound datagram and classifies it for
//! dispatch to the responder or query engine.
//!
//! Grounded on the teacher's `server.rs::handle_query` (which called into
//! a `todo!()` `Message::decode`) and `mdns_receive.c`'s header-flag and
//! off-port checks. The actual responder/query-engine dispatch lives in
//! `responder.rs`/`query.rs`; this module only decodes and filters.

use std::net::IpAddr;

use crate::transport::{IfaceId, Inbound, IpProto};
use crate::types::{Message, ProtoError, Query, Record};

const MDNS_PORT: u16 = 5353;
const FLAG_QR_AA: u16 = 0x8400;

/// A decoded, filtered inbound packet, ready for the responder/query
/// engine to walk.
pub(crate) struct ParsedPacket {
  pub(crate) iface: IfaceId,
  pub(crate) proto: IpProto,
  pub(crate) src_ip: IpAddr,
  pub(crate) src_port: u16,
  pub(crate) multicast: bool,
  pub(crate) id: u16,
  pub(crate) is_response: bool,
  pub(crate) questions: Vec<Query>,
  pub(crate) answers: Vec<Record>,
  pub(crate) authorities: Vec<Record>,
  pub(crate) additionals: Vec<Record>,
}

impl ParsedPacket {
  /// All records the packet carried in any section, per spec §4.8's "for
  /// each record dispatch" language (questions excluded — those are
  /// walked separately for answer synthesis).
  pub(crate) fn all_records(&self) -> impl Iterator<Item = &Record> {
    self
      .answers
      .iter()
      .chain(self.authorities.iter())
      .chain(self.additionals.iter())
  }

  /// A legacy (non-5353-source-port) query keeps its id in the reply and
  /// is always answered unicast with no flush bit (spec §4.6).
  #[inline]
  pub(crate) fn is_legacy(&self) -> bool {
    self.src_port != MDNS_PORT
  }
}

/// Why a datagram was not handed to the responder/query engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum Rejected {
  /// Flags claimed an authoritative answer but the source port was not
  /// 5353 — spec §4.8's anti-spoofing check.
  #[error("off-port authoritative packet")]
  OffPortAuthoritative,
  /// The datagram's source matches one of this node's own addresses and
  /// `check_response_src_port`-style self-filtering is enabled.
  #[error("packet originated from this node")]
  SelfOriginated,
  /// The wire codec rejected the packet outright (bad length, premature
  /// EOF, pointer loop). Per spec §4.8 this aborts parsing of the current
  /// packet without touching any already-accumulated state.
  #[error(transparent)]
  Malformed(#[from] ProtoError),
}

/// Parses and filters one inbound datagram. Returns `Err(Rejected::..)`
/// for every drop rule spec §4.8 names; a malformed packet is rolled back
/// entirely (the caller receives no partial `ParsedPacket`).
pub(crate) fn parse(
  inbound: &Inbound,
  own_addrs: &[IpAddr],
  suppress_self_filter: bool,
) -> Result<ParsedPacket, Rejected> {
  if !suppress_self_filter && own_addrs.contains(&inbound.src_ip) {
    return Err(Rejected::SelfOriginated);
  }

  let msg = Message::decode(&inbound.bytes)?;

  // RFC 6762 §11 / spec §4.8: reject a packet carrying an authoritative
  // response header when it did not arrive on port 5353 — this shape is
  // otherwise indistinguishable from a spoofed announcement.
  let flags_raw = header_flags(&inbound.bytes)?;
  if flags_raw & FLAG_QR_AA == FLAG_QR_AA && inbound.src_port != MDNS_PORT {
    return Err(Rejected::OffPortAuthoritative);
  }

  Ok(ParsedPacket {
    iface: inbound.iface,
    proto: inbound.proto,
    src_ip: inbound.src_ip,
    src_port: inbound.src_port,
    multicast: inbound.multicast,
    id: msg.id(),
    is_response: msg.all_records().next().is_some() && flags_qr(flags_raw),
    questions: msg.questions().to_vec(),
    answers: msg.answers().to_vec(),
    authorities: msg.authorities().to_vec(),
    additionals: msg.additionals().to_vec(),
  })
}

fn header_flags(bytes: &[u8]) -> Result<u16, ProtoError> {
  if bytes.len() < 4 {
    return Err(ProtoError::BufferTooSmall);
  }
  Ok(u16::from_be_bytes([bytes[2], bytes[3]]))
}

fn flags_qr(flags: u16) -> bool {
  flags & 0x8000 != 0
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{Message as WireMessage, Query as WireQuery, RecordType};
  use crate::types::Name;
  use triomphe::Arc as TArc;

  fn inbound(bytes: Vec<u8>, src_port: u16) -> Inbound {
    Inbound {
      iface: IfaceId(0),
      proto: IpProto::V4,
      src_ip: IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 5)),
      src_port,
      dst_ip: IpAddr::V4(std::net::Ipv4Addr::new(224, 0, 0, 251)),
      multicast: true,
      bytes: TArc::from(bytes.as_slice()),
    }
  }

  #[test]
  fn rejects_off_port_authoritative_packet() {
    let bytes = WireMessage::encode_response(1, &[], &[]).unwrap();
    let in_pkt = inbound(bytes, 9999);
    let err = parse(&in_pkt, &[], true).unwrap_err();
    assert_eq!(err, Rejected::OffPortAuthoritative);
  }

  #[test]
  fn accepts_ordinary_multicast_query() {
    let q = WireQuery::new(Name::new("_http._tcp.local."), RecordType::PTR, false);
    let bytes = WireMessage::encode_query(7, &[q], &[]).unwrap();
    let in_pkt = inbound(bytes, 5353);
    let parsed = parse(&in_pkt, &[], true).unwrap();
    assert_eq!(parsed.id, 7);
    assert_eq!(parsed.questions.len(), 1);
    assert!(!parsed.is_response);
  }

  #[test]
  fn rejects_self_originated_packet() {
    let bytes = WireMessage::encode_query(1, &[], &[]).unwrap();
    let src = IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 5));
    let in_pkt = inbound(bytes, 5353);
    let err = parse(&in_pkt, &[src], false).unwrap_err();
    assert_eq!(err, Rejected::SelfOriginated);
  }
}
