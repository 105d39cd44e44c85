use smol_str::{format_smolstr, SmolStr};

use super::{
  escape_byte, unescape_leading, CompressionMap, ProtoError, SlicableSmolStr,
  MAX_COMPRESSION_POINTERS, MAX_DOMAIN_NAME_WIRE_OCTETS,
};

/// A fully- or partially-qualified domain name, stored in its printable,
/// escaped form (the same representation `dig`/`tcpdump` use: non-printable
/// or syntactically special bytes appear as `\DDD`, dots as label
/// separators).
///
/// `Name` owns the string; encoding and decoding operate on this
/// representation rather than on raw label bytes directly, matching the
/// escaping rules the decoder already applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(SmolStr);

/// The four logical slots an mDNS name decomposes into per RFC 6763.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Classified {
  /// The instance name, or a subtype label if `is_subtype` is set.
  pub host: Option<SmolStr>,
  /// `true` if `host` names a subtype (the label preceding it was `_sub`).
  pub is_subtype: bool,
  /// The service label, e.g. `_http`.
  pub service: Option<SmolStr>,
  /// The protocol label, e.g. `_tcp`.
  pub proto: Option<SmolStr>,
  /// The trailing domain label, usually `local`.
  pub domain: Option<SmolStr>,
}

impl Name {
  /// Wraps an already-escaped, dot-separated name.
  #[inline]
  pub fn new(s: impl Into<SmolStr>) -> Self {
    Self(s.into())
  }

  /// The name's printable, escaped string form.
  #[inline]
  pub fn as_str(&self) -> &str {
    self.0.as_str()
  }

  /// The `local` domain, unqualified.
  #[inline]
  pub fn local() -> Self {
    Self(SmolStr::new("local"))
  }

  /// The `local` domain, fully qualified (trailing dot).
  #[inline]
  pub fn local_fqdn() -> Self {
    Self(SmolStr::new("local."))
  }

  /// Appends `other` onto `self`, separated by a dot.
  #[inline]
  pub fn append(&self, other: &str) -> Self {
    Self(format_smolstr!("{}.{}", self.0.trim_end_matches('.'), other))
  }

  /// Appends `other` onto `self`, producing a fully-qualified (trailing-dot)
  /// name.
  #[inline]
  pub fn append_fqdn(&self, other: &str) -> Self {
    Self(format_smolstr!(
      "{}.{}.",
      self.0.trim_matches('.'),
      other.trim_matches('.')
    ))
  }

  /// Whether the name ends in a trailing dot.
  #[inline]
  pub fn is_fqdn(&self) -> bool {
    self.0.ends_with('.')
  }

  /// Splits the name into the host/service/proto/domain slots the responder
  /// and query engine key off of.
  ///
  /// mDNS/DNS-SD names take the shape
  /// `[<subtype>._sub.]<instance>._service._proto.domain` (services) or
  /// simply `<label...>.domain` (plain hostnames, where every non-`_`
  /// label before `domain` is folded into `host`, dot-joined). Names that
  /// decompose into more than four logical parts are rejected by the
  /// caller via [`ProtoError::TooManyParts`], matching §4.1's "skip, don't
  /// fail the packet" rule.
  pub fn classify(&self) -> Result<Classified, ProtoError> {
    let labels = self.labels();
    if labels.is_empty() {
      return Ok(Classified::default());
    }

    let mut out = Classified::default();
    let domain = labels.last().unwrap();
    out.domain = Some((*domain).into());

    let mut rest = &labels[..labels.len() - 1];
    let mut host_parts: Vec<&str> = Vec::new();
    let mut saw_sub = false;
    let mut parts_used = 1; // domain already counted

    // proto (_tcp/_udp) immediately precedes the domain, service precedes
    // proto, per `<instance>._service._proto.domain`.
    if let Some((&last, init)) = rest.split_last() {
      if last.starts_with('_') {
        out.proto = Some(last.into());
        rest = init;
        parts_used += 1;
      }
    }
    if let Some((&last, init)) = rest.split_last() {
      if last.starts_with('_') {
        out.service = Some(last.into());
        rest = init;
        parts_used += 1;
      }
    }

    for label in rest {
      if *label == "_sub" {
        saw_sub = true;
        continue;
      }
      host_parts.push(label);
      parts_used += 1;
    }
    out.is_subtype = saw_sub;

    if !host_parts.is_empty() {
      out.host = Some(host_parts.join(".").into());
    }

    if parts_used > 4 {
      return Err(ProtoError::TooManyParts);
    }

    Ok(out)
  }

  /// Splits the escaped textual form into labels on unescaped dots,
  /// dropping a trailing empty label produced by a trailing dot.
  fn labels(&self) -> Vec<&str> {
    let s = self.0.as_str();
    let mut labels = Vec::new();
    let bytes = s.as_bytes();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
      match bytes[i] {
        b'\\' => {
          let (_, consumed) = unescape_leading(&bytes[i..]);
          i += consumed;
        }
        b'.' => {
          labels.push(&s[start..i]);
          i += 1;
          start = i;
        }
        _ => i += 1,
      }
    }
    if start < s.len() {
      labels.push(&s[start..]);
    }
    labels
  }

  /// Unescapes a single label's textual form back into raw wire bytes.
  fn label_bytes(label: &str) -> Result<Vec<u8>, ProtoError> {
    let bytes = label.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
      if bytes[i] == b'\\' {
        let (b, consumed) = unescape_leading(&bytes[i..]);
        out.push(b);
        i += consumed;
      } else {
        out.push(bytes[i]);
        i += 1;
      }
    }
    if out.len() > 63 {
      return Err(ProtoError::NameTooLong);
    }
    Ok(out)
  }

  /// Decodes a name in DNS wire format starting at `off`, returning the
  /// escaped textual form and the offset just past the name (after the
  /// first compression pointer followed, if any).
  pub(crate) fn decode(msg: &[u8], off: usize) -> Result<(Self, usize), ProtoError> {
    let (s, off) = Self::decode_str(msg, off)?;
    Ok((Self(s), off))
  }

  pub(super) fn decode_str(msg: &[u8], mut off: usize) -> Result<(SmolStr, usize), ProtoError> {
    let mut s: Vec<u8> = Vec::with_capacity(23);
    let mut off1 = 0;
    let lenmsg = msg.len();
    let mut budget = MAX_DOMAIN_NAME_WIRE_OCTETS as isize;
    let mut ptr = 0;

    loop {
      if off >= lenmsg {
        return Err(ProtoError::BufferTooSmall);
      }

      let c = msg[off];
      off += 1;

      match c & 0xC0 {
        0x00 => {
          if c == 0x00 {
            break;
          }

          let label_len = c as usize;
          if off + label_len > lenmsg {
            return Err(ProtoError::BufferTooSmall);
          }

          budget -= (label_len as isize) + 1;
          if budget <= 0 {
            return Err(ProtoError::NameTooLong);
          }

          for &b in msg[off..off + label_len].iter() {
            if is_domain_name_label_special(b) {
              s.extend_from_slice(&[b'\\', b]);
            } else if !(b' '..=b'~').contains(&b) {
              s.extend_from_slice(&escape_byte(b));
            } else {
              s.push(b);
            }
          }
          s.push(b'.');
          off += label_len;
        }
        0xC0 => {
          if off >= lenmsg {
            return Err(ProtoError::NotEnoughData);
          }

          let c1 = msg[off];
          off += 1;

          if ptr == 0 {
            off1 = off;
          }

          ptr += 1;
          if ptr > MAX_COMPRESSION_POINTERS {
            return Err(ProtoError::TooManyPointers);
          }

          let target = ((c as usize ^ 0xC0) << 8) | c1 as usize;
          if target >= off - 2 {
            return Err(ProtoError::PointerLoop);
          }
          off = target;
        }
        _ => return Err(ProtoError::InvalidRdata),
      }
    }

    if ptr == 0 {
      off1 = off;
    }

    if s.is_empty() {
      Ok((SmolStr::from("."), off1))
    } else {
      let s = core::str::from_utf8(&s)?;
      Ok((SmolStr::new(s), off1))
    }
  }

  pub(crate) fn skip_decode(msg: &[u8], mut off: usize) -> Result<usize, ProtoError> {
    let mut off1 = 0;
    let lenmsg = msg.len();
    let mut budget = MAX_DOMAIN_NAME_WIRE_OCTETS as isize;
    let mut ptr = 0;

    loop {
      if off >= lenmsg {
        return Err(ProtoError::BufferTooSmall);
      }

      let c = msg[off];
      off += 1;

      match c & 0xC0 {
        0x00 => {
          if c == 0x00 {
            break;
          }

          let label_len = c as usize;
          if off + label_len > lenmsg {
            return Err(ProtoError::BufferTooSmall);
          }

          budget -= (label_len as isize) + 1;
          if budget <= 0 {
            return Err(ProtoError::NameTooLong);
          }

          off += label_len;
        }
        0xC0 => {
          if off >= lenmsg {
            return Err(ProtoError::NotEnoughData);
          }

          let c1 = msg[off];
          off += 1;

          if ptr == 0 {
            off1 = off;
          }

          ptr += 1;
          if ptr > MAX_COMPRESSION_POINTERS {
            return Err(ProtoError::TooManyPointers);
          }

          let target = ((c as usize ^ 0xC0) << 8) | c1 as usize;
          if target >= off - 2 {
            return Err(ProtoError::PointerLoop);
          }
          off = target;
        }
        _ => return Err(ProtoError::InvalidRdata),
      }
    }

    if ptr == 0 {
      off1 = off;
    }

    Ok(off1)
  }

  /// Encodes the name into `buf` starting at `off`, compressing against
  /// `cmap` when `compress` is set. Returns the offset just past the
  /// written name.
  pub(crate) fn encode(
    &self,
    buf: &mut Vec<u8>,
    off: usize,
    cmap: &mut Option<CompressionMap>,
    compress: bool,
  ) -> Result<usize, ProtoError> {
    let labels = self.labels();
    let mut off = off;

    for (idx, _) in labels.iter().enumerate() {
      let suffix = Self::suffix_str(self.0.as_str(), &labels, idx);

      if compress {
        if let Some(ptr) = cmap.as_ref().and_then(|c| c.find(suffix)) {
          buf.extend_from_slice(&(super::COMPRESSION_POINTER_MASK | ptr).to_be_bytes());
          return Ok(off + 2);
        }
      }

      if let Some(cmap) = cmap.as_mut() {
        cmap.insert(SlicableSmolStr::from(SmolStr::new(suffix)), off as u16);
      }

      let bytes = Self::label_bytes(labels[idx])?;
      buf.push(bytes.len() as u8);
      buf.extend_from_slice(&bytes);
      off += 1 + bytes.len();
    }

    buf.push(0);
    off += 1;
    Ok(off)
  }

  /// Computes how many bytes [`Self::encode`] would write, simulating the
  /// same compression decisions.
  pub(crate) fn encoded_len(
    &self,
    off: usize,
    cmap: &mut Option<CompressionMap>,
    compress: bool,
  ) -> usize {
    let labels = self.labels();
    let mut off = off;

    for (idx, _) in labels.iter().enumerate() {
      let suffix = Self::suffix_str(self.0.as_str(), &labels, idx);

      if compress {
        if let Some(cmap) = cmap.as_ref() {
          if cmap.find(suffix).is_some() {
            return off + 2;
          }
        }
      }

      if let Some(cmap) = cmap.as_mut() {
        cmap.insert(SlicableSmolStr::from(SmolStr::new(suffix)), off as u16);
      }

      let len = Self::label_bytes(labels[idx]).map(|b| b.len()).unwrap_or(0);
      off += 1 + len;
    }

    off + 1
  }

  fn suffix_str<'a>(full: &'a str, labels: &[&str], idx: usize) -> &'a str {
    let start = labels[idx].as_ptr() as usize - full.as_ptr() as usize;
    &full[start..]
  }
}

impl core::fmt::Display for Name {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.write_str(self.0.as_str())
  }
}

impl From<SmolStr> for Name {
  #[inline]
  fn from(s: SmolStr) -> Self {
    Self(s)
  }
}

impl From<&str> for Name {
  #[inline]
  fn from(s: &str) -> Self {
    Self(SmolStr::new(s))
  }
}

// Returns true if a domain name label byte should be prefixed with an
// escaping backslash.
#[inline]
const fn is_domain_name_label_special(b: u8) -> bool {
  matches!(
    b,
    b'.' | b' ' | b'\'' | b'@' | b';' | b'(' | b')' | b'"' | b'\\'
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  const MAX_PRINTABLE_LABEL: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789x";

  #[test]
  fn empty_domain() {
    let input = [0];
    let (name, _) = Name::decode(&input, 0).unwrap();
    assert_eq!(name.as_str(), ".");
  }

  #[test]
  fn long_label() {
    let s = [b"?".as_slice(), MAX_PRINTABLE_LABEL.as_bytes(), b"\x00"].concat();
    let exp = [MAX_PRINTABLE_LABEL, "."].concat();
    let (name, _) = Name::decode(&s, 0).unwrap();
    assert_eq!(name.as_str(), exp);
  }

  #[test]
  fn compression_pointer() {
    let input = [
      3, b'f', b'o', b'o', 5, 3, b'c', b'o', b'm', 0, 7, b'e', b'x', b'a', b'm', b'p', b'l', b'e',
      0xC0, 5,
    ];

    let exp = "foo.\\003com\\000.example.com.";
    let (name, _) = Name::decode(&input, 0).unwrap();
    assert_eq!(name.as_str(), exp);
  }

  #[test]
  fn too_long_domain() {
    let input = b"6xabcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ01abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVW1abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVW1abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVW1abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVW";

    let err = Name::decode(input, 0).unwrap_err();
    assert_eq!(err, ProtoError::NameTooLong);
  }

  #[test]
  fn truncated_name() {
    let input = [7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 3];
    let err = Name::decode(&input, 0).unwrap_err();
    assert_eq!(err, ProtoError::BufferTooSmall);
  }

  #[test]
  fn compression_pointer_cycle_too_many() {
    let input = [0xC0, 0x00];
    let err = Name::decode(&input, 0).unwrap_err();
    assert_eq!(err, ProtoError::PointerLoop);
  }

  #[test]
  fn reserved_compression_pointer_0b10() {
    let input = [7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 0x80];
    let err = Name::decode(&input, 0).unwrap_err();
    assert_eq!(err, ProtoError::InvalidRdata);
  }

  #[test]
  fn round_trip_no_compression() {
    let name = Name::new("inst._http._tcp.local.");
    let mut buf = Vec::new();
    let mut cmap = None;
    name.encode(&mut buf, 0, &mut cmap, false).unwrap();
    let (decoded, _) = Name::decode(&buf, 0).unwrap();
    assert_eq!(decoded.as_str(), "inst._http._tcp.local.");
  }

  #[test]
  fn classify_service_instance() {
    let name = Name::new("inst._http._tcp.local");
    let c = name.classify().unwrap();
    assert_eq!(c.host.as_deref(), Some("inst"));
    assert_eq!(c.service.as_deref(), Some("_http"));
    assert_eq!(c.proto.as_deref(), Some("_tcp"));
    assert_eq!(c.domain.as_deref(), Some("local"));
    assert!(!c.is_subtype);
  }

  #[test]
  fn classify_subtype() {
    let name = Name::new("printer._sub._http._tcp.local");
    let c = name.classify().unwrap();
    assert_eq!(c.host.as_deref(), Some("printer"));
    assert!(c.is_subtype);
  }

  #[test]
  fn classify_plain_host() {
    let name = Name::new("alpha.local");
    let c = name.classify().unwrap();
    assert_eq!(c.host.as_deref(), Some("alpha"));
    assert_eq!(c.service, None);
    assert_eq!(c.domain.as_deref(), Some("local"));
  }
}
