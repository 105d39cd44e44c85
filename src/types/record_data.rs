use std::net::{Ipv4Addr, Ipv6Addr};

use smol_str::SmolStr;
use triomphe::Arc;

use super::{CompressionMap, Name, ProtoError, RecordType, SRV};

const IPV4_LEN: usize = 4;
const IPV6_LEN: usize = 16;
const U16_SIZE: usize = 2;

/// The data of an mDNS resource record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RecordData {
  /// ```text
  /// -- RFC 1035 -- Domain Implementation and Specification    November 1987
  ///
  /// 3.4. Internet specific RRs
  ///
  /// 3.4.1. A RDATA format
  ///
  ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
  ///     |                    ADDRESS                    |
  ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
  ///
  /// where:
  ///
  /// ADDRESS         A 32 bit Internet address.
  ///
  /// Hosts that have multiple Internet addresses will have multiple A
  /// records.
  /// ```
  A(Ipv4Addr),
  /// ```text
  /// -- RFC 1886 -- IPv6 DNS Extensions              December 1995
  ///
  /// 2.2 AAAA data format
  ///
  ///    A 128 bit IPv6 address is encoded in the data portion of an AAAA
  ///    resource record in network byte order (high-order byte first).
  /// ```
  AAAA(Ipv6Addr),
  /// ```text
  /// 3.3.12. PTR RDATA format
  ///
  ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
  ///     /                   PTRDNAME                    /
  ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
  ///
  /// PTR records cause no additional section processing. These RRs are used
  /// to point to some other location in the domain space.
  /// ```
  PTR(Name),
  /// ```text
  /// RFC 2782                       DNS SRV RR                  February 2000
  ///
  ///  _Service._Proto.Name TTL Class SRV Priority Weight Port Target
  /// ```
  SRV(SRV),
  /// ```text
  /// 3.3.14. TXT RDATA format
  ///
  ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
  ///     /                   TXT-DATA                    /
  ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
  ///
  /// TXT RRs are used to hold descriptive text, here a sequence of
  /// `key[=value]` character-strings.
  /// ```
  TXT(Arc<[SmolStr]>),
  /// RFC 6891 EDNS0 pseudo-record. Only the raw option payload is kept;
  /// nothing in this crate synthesises OPT answers.
  OPT(Arc<[u8]>),
  /// RFC 4034 NSEC record, kept verbatim. Never synthesised by the
  /// responder.
  NSEC(Arc<[u8]>),
}

impl From<Ipv4Addr> for RecordData {
  #[inline]
  fn from(value: Ipv4Addr) -> Self {
    Self::A(value)
  }
}

impl From<Ipv6Addr> for RecordData {
  #[inline]
  fn from(value: Ipv6Addr) -> Self {
    Self::AAAA(value)
  }
}

impl From<SRV> for RecordData {
  #[inline]
  fn from(value: SRV) -> Self {
    Self::SRV(value)
  }
}

impl RecordData {
  /// Returns the type of the record data.
  #[inline]
  pub const fn ty(&self) -> RecordType {
    match self {
      Self::A(_) => RecordType::A,
      Self::AAAA(_) => RecordType::AAAA,
      Self::PTR(_) => RecordType::PTR,
      Self::SRV(_) => RecordType::SRV,
      Self::TXT(_) => RecordType::TXT,
      Self::OPT(_) => RecordType::OPT,
      Self::NSEC(_) => RecordType::NSEC,
    }
  }

  pub(crate) fn decode(
    src: &[u8],
    mut off: usize,
    rdlen: usize,
    ty: RecordType,
  ) -> Result<Self, ProtoError> {
    let end = off + rdlen;
    if end > src.len() {
      return Err(ProtoError::Overflow);
    }

    Ok(match ty {
      RecordType::A => {
        if rdlen != IPV4_LEN {
          return Err(ProtoError::InvalidRdata);
        }
        let octets: [u8; IPV4_LEN] = src[off..off + IPV4_LEN].try_into().unwrap();
        Self::A(Ipv4Addr::from(octets))
      }
      RecordType::AAAA => {
        if rdlen != IPV6_LEN {
          return Err(ProtoError::InvalidRdata);
        }
        let octets: [u8; IPV6_LEN] = src[off..off + IPV6_LEN].try_into().unwrap();
        Self::AAAA(Ipv6Addr::from(octets))
      }
      RecordType::PTR | RecordType::SDPTR => {
        let (name, _) = Name::decode(src, off)?;
        Self::PTR(name)
      }
      RecordType::SRV => {
        if rdlen < 6 {
          return Err(ProtoError::NotEnoughData);
        }
        let priority = u16::from_be_bytes([src[off], src[off + 1]]);
        off += U16_SIZE;
        let weight = u16::from_be_bytes([src[off], src[off + 1]]);
        off += U16_SIZE;
        let port = u16::from_be_bytes([src[off], src[off + 1]]);
        off += U16_SIZE;
        let (target, _) = Name::decode(src, off)?;
        Self::SRV(SRV::new(priority, weight, port, target))
      }
      RecordType::TXT => {
        let items = decode_txt(&src[off..end])?;
        Self::TXT(Arc::from_iter(items))
      }
      RecordType::OPT => Self::OPT(Arc::from(&src[off..end])),
      RecordType::NSEC => Self::NSEC(Arc::from(&src[off..end])),
      RecordType::ANY => return Err(ProtoError::InvalidRdata),
    })
  }

  pub(crate) fn encode(
    &self,
    buf: &mut Vec<u8>,
    off: usize,
    cmap: &mut Option<CompressionMap>,
  ) -> Result<usize, ProtoError> {
    let mut off = off;
    match self {
      Self::A(addr) => {
        buf.extend_from_slice(&addr.octets());
        off += IPV4_LEN;
      }
      Self::AAAA(addr) => {
        buf.extend_from_slice(&addr.octets());
        off += IPV6_LEN;
      }
      Self::PTR(name) => {
        off = name.encode(buf, off, cmap, true)?;
      }
      Self::SRV(srv) => {
        buf.extend_from_slice(&srv.priority().to_be_bytes());
        buf.extend_from_slice(&srv.weight().to_be_bytes());
        buf.extend_from_slice(&srv.port().to_be_bytes());
        off += 6;
        // RFC 2782: SRV targets are not compressed.
        off = srv.target().encode(buf, off, &mut None, false)?;
      }
      Self::TXT(items) => {
        off += encode_txt(items, buf)?;
      }
      Self::OPT(raw) | Self::NSEC(raw) => {
        buf.extend_from_slice(raw);
        off += raw.len();
      }
    }
    Ok(off)
  }

  pub(crate) fn encoded_len(&self, off: usize, cmap: &mut Option<CompressionMap>) -> usize {
    match self {
      Self::A(_) => off + IPV4_LEN,
      Self::AAAA(_) => off + IPV6_LEN,
      Self::PTR(name) => name.encoded_len(off, cmap, true),
      Self::SRV(srv) => {
        let l = off + 6;
        srv.target().encoded_len(l, &mut None, false)
      }
      Self::TXT(items) => {
        let mut l = off;
        for s in items.iter() {
          l += s.len() + 1;
        }
        l
      }
      Self::OPT(raw) | Self::NSEC(raw) => off + raw.len(),
    }
  }
}

/// Decodes the `<len><bytes>` character-strings that make up TXT rdata
/// into `key[=value]` smol strings, one per string.
fn decode_txt(data: &[u8]) -> Result<Vec<SmolStr>, ProtoError> {
  let mut out = Vec::new();
  let mut i = 0;
  while i < data.len() {
    let len = data[i] as usize;
    i += 1;
    if i + len > data.len() {
      return Err(ProtoError::BufferTooSmall);
    }
    let s = core::str::from_utf8(&data[i..i + len])?;
    out.push(SmolStr::new(s));
    i += len;
  }
  Ok(out)
}

fn encode_txt(items: &[SmolStr], buf: &mut Vec<u8>) -> Result<usize, ProtoError> {
  let mut written = 0;
  for item in items {
    if item.len() > 255 {
      return Err(ProtoError::TxtDataTooLong);
    }
    buf.push(item.len() as u8);
    buf.extend_from_slice(item.as_bytes());
    written += 1 + item.len();
  }
  Ok(written)
}
