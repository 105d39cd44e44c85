use super::{CompressionMap, DNSClass, Name, ProtoError, RecordType, CACHE_FLUSH_BIT};

/// A single question-section entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Query {
  name: Name,
  ty: RecordType,
  class: DNSClass,
  want_unicast_response: bool,
}

impl Query {
  #[inline]
  pub(crate) fn new(name: Name, ty: RecordType, want_unicast_response: bool) -> Self {
    Self {
      name,
      ty,
      class: DNSClass::IN,
      want_unicast_response,
    }
  }

  #[inline]
  pub(crate) fn name(&self) -> &Name {
    &self.name
  }

  #[inline]
  pub(crate) fn query_class(&self) -> DNSClass {
    self.class
  }

  #[inline]
  pub(crate) fn query_type(&self) -> RecordType {
    self.ty
  }

  #[inline]
  pub(crate) fn want_unicast_response(&self) -> bool {
    self.want_unicast_response
  }

  /// Decodes a question in DNS message wire format.
  pub(crate) fn decode(src: &[u8], off: usize) -> Result<(Self, usize), ProtoError> {
    let (name, mut off) = Name::decode(src, off)?;
    let len = src.len();
    if len < off + 4 {
      return Err(ProtoError::NotEnoughData);
    }

    let ty = RecordType::try_from(u16::from_be_bytes([src[off], src[off + 1]]))
      .unwrap_or(RecordType::ANY);
    off += 2;

    let bclass = u16::from_be_bytes([src[off], src[off + 1]]);
    let class = DNSClass::from(bclass);
    off += 2;
    Ok((
      Self {
        name,
        ty,
        class,
        want_unicast_response: bclass & CACHE_FLUSH_BIT != 0,
      },
      off,
    ))
  }

  /// Encodes `<name><type:2><class:2>` into `buf`, returning the offset
  /// past the written question.
  pub(crate) fn encode(
    &self,
    buf: &mut Vec<u8>,
    off: usize,
    cmap: &mut Option<CompressionMap>,
  ) -> Result<usize, ProtoError> {
    let mut off = self.name.encode(buf, off, cmap, true)?;
    buf.extend_from_slice(&u16::from(self.ty).to_be_bytes());

    // RFC 6762 §18.12: top bit of qclass requests a unicast response.
    let qclass: u16 = self.class.into();
    let qclass = if self.want_unicast_response {
      qclass | CACHE_FLUSH_BIT
    } else {
      qclass
    };
    buf.extend_from_slice(&qclass.to_be_bytes());
    off += 4;
    Ok(off)
  }

  pub(crate) fn encoded_len(&self, off: usize, cmap: &mut Option<CompressionMap>) -> usize {
    self.name.encoded_len(off, cmap, true) + 4
  }
}
