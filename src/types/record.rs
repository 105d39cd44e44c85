use super::{
  CompressionMap, DNSClass, Name, ProtoError, RecordData, RecordType, CACHE_FLUSH_BIT,
};

const RECORD_HEADER_ENCODED_WITHOUT_NAME_SIZE: usize = 10; // ty(2) + class(2) + ttl(4) + rdlen(2)

/// The header all mDNS resource records share.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordHeader {
  name: Name,
  ty: RecordType,
  class: DNSClass,
  ttl: u32,
  flush: bool,
}

impl RecordHeader {
  /// Builds a header with `DNSClass::IN`.
  #[inline]
  pub fn new(name: Name, ty: RecordType, ttl: u32, flush: bool) -> Self {
    Self {
      name,
      ty,
      class: DNSClass::IN,
      ttl,
      flush,
    }
  }

  /// Returns the name of the record.
  #[inline]
  pub const fn name(&self) -> &Name {
    &self.name
  }

  /// Returns the type of the record.
  #[inline]
  pub const fn ty(&self) -> RecordType {
    self.ty
  }

  /// Returns the class of the record.
  #[inline]
  pub const fn class(&self) -> DNSClass {
    self.class
  }

  /// Returns the time-to-live of the record. `0` means goodbye.
  #[inline]
  pub const fn ttl(&self) -> u32 {
    self.ttl
  }

  /// Whether the cache-flush bit (RFC 6762 §10.2) is set on this answer.
  #[inline]
  pub const fn flush(&self) -> bool {
    self.flush
  }

  /// A goodbye record retracts a previously claimed name: `ttl == 0`.
  #[inline]
  pub const fn is_goodbye(&self) -> bool {
    self.ttl == 0
  }
}

/// A fully owned mDNS resource record: header plus rdata.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
  header: RecordHeader,
  data: RecordData,
}

impl Record {
  /// Builds a record, deriving the header's type from `data`.
  #[inline]
  pub fn new(name: Name, ttl: u32, flush: bool, data: RecordData) -> Self {
    Self {
      header: RecordHeader::new(name, data.ty(), ttl, flush),
      data,
    }
  }

  /// The record's header.
  #[inline]
  pub const fn header(&self) -> &RecordHeader {
    &self.header
  }

  /// The record's rdata.
  #[inline]
  pub const fn data(&self) -> &RecordData {
    &self.data
  }

  /// Consumes the record, returning just its rdata.
  #[inline]
  pub fn into_data(self) -> RecordData {
    self.data
  }

  /// Decodes one resource record starting at `off`. When `consume` is
  /// `true` only the offset past the record is computed — used by the
  /// packet parser to skip question-section entries and records whose
  /// type the responder has no interest in.
  pub(crate) fn decode(
    src: &[u8],
    off: usize,
    consume: bool,
  ) -> Result<(Option<Self>, usize), ProtoError> {
    let (name, mut off) = Name::decode(src, off)?;
    let len = src.len();
    if len < off + RECORD_HEADER_ENCODED_WITHOUT_NAME_SIZE {
      return Err(ProtoError::BufferTooSmall);
    }

    let ty_raw = u16::from_be_bytes([src[off], src[off + 1]]);
    off += 2;
    let class_raw = u16::from_be_bytes([src[off], src[off + 1]]);
    off += 2;
    let flush = class_raw & CACHE_FLUSH_BIT != 0;
    let class = DNSClass::from(class_raw);
    let ttl = u32::from_be_bytes(src[off..off + 4].try_into().unwrap());
    off += 4;
    let rdlen = u16::from_be_bytes([src[off], src[off + 1]]) as usize;
    off += 2;
    if off + rdlen > len {
      return Err(ProtoError::Overflow);
    }

    if consume {
      return Ok((None, off + rdlen));
    }

    let ty = match RecordType::try_from(ty_raw) {
      Ok(ty) => ty,
      // Unknown record type: skip it, it is not fatal to the packet.
      Err(_) => return Ok((None, off + rdlen)),
    };

    let data = RecordData::decode(src, off, rdlen, ty)?;
    let mut header = RecordHeader::new(name, ty, ttl, flush);
    header.class = class;
    Ok((Some(Self { header, data }), off + rdlen))
  }

  pub(crate) fn encode(
    &self,
    buf: &mut Vec<u8>,
    off: usize,
    cmap: &mut Option<CompressionMap>,
    compress: bool,
  ) -> Result<usize, ProtoError> {
    let mut off = self.header.name.encode(buf, off, cmap, compress)?;

    let class: u16 = self.header.class.into();
    let class = if self.header.flush {
      class | CACHE_FLUSH_BIT
    } else {
      class
    };

    buf.extend_from_slice(&u16::from(self.header.ty).to_be_bytes());
    buf.extend_from_slice(&class.to_be_bytes());
    buf.extend_from_slice(&self.header.ttl.to_be_bytes());
    let rdlen_pos = buf.len();
    buf.extend_from_slice(&0u16.to_be_bytes()); // patched below
    off += RECORD_HEADER_ENCODED_WITHOUT_NAME_SIZE;

    let heoff = off;
    let off1 = self.data.encode(buf, off, cmap)?;
    let rdlen = off1 - heoff;
    if rdlen > u16::MAX as usize {
      return Err(ProtoError::InvalidRdata);
    }
    buf[rdlen_pos..rdlen_pos + 2].copy_from_slice(&(rdlen as u16).to_be_bytes());

    Ok(off1)
  }

  pub(crate) fn encoded_len(&self, off: usize, cmap: &mut Option<CompressionMap>) -> usize {
    let off = self.header.name.encoded_len(off, cmap, true) + RECORD_HEADER_ENCODED_WITHOUT_NAME_SIZE;
    self.data.encoded_len(off, cmap)
  }
}
