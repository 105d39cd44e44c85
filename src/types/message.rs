use super::{
  CompressionMap, ProtoError, Query, Record, ANCOUNT_OFFSET, ARCOUNT_OFFSET, FLAG_AA, FLAG_QR,
  MESSAGE_HEADER_SIZE, NSCOUNT_OFFSET, OP_CODE_QUERY, QDCOUNT_OFFSET, RESPONSE_CODE_NO_ERROR,
};

/// The 12-byte DNS message header (RFC 1035 §4.1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
  pub(crate) id: u16,
  pub(crate) flags: u16,
  pub(crate) qdcount: u16,
  pub(crate) ancount: u16,
  pub(crate) nscount: u16,
  pub(crate) arcount: u16,
}

impl Header {
  #[inline]
  pub(crate) fn is_response(&self) -> bool {
    self.flags & FLAG_QR != 0
  }

  #[inline]
  pub(crate) fn is_authoritative(&self) -> bool {
    self.flags & FLAG_AA != 0
  }

  fn decode(src: &[u8]) -> Result<Self, ProtoError> {
    if src.len() < MESSAGE_HEADER_SIZE {
      return Err(ProtoError::BufferTooSmall);
    }
    Ok(Self {
      id: u16::from_be_bytes([src[0], src[1]]),
      flags: u16::from_be_bytes([src[2], src[3]]),
      qdcount: u16::from_be_bytes([src[4], src[5]]),
      ancount: u16::from_be_bytes([src[6], src[7]]),
      nscount: u16::from_be_bytes([src[8], src[9]]),
      arcount: u16::from_be_bytes([src[10], src[11]]),
    })
  }
}

/// A fully decoded (or to-be-encoded) mDNS message.
///
/// Grounded on the teacher's `Message`/`Header`, which carried the same four
/// sections but left `decode` unimplemented; the decode/encode pair here is
/// the full implementation.
#[derive(Debug, Clone)]
pub(crate) struct Message {
  pub(crate) header: Header,
  pub(crate) questions: Vec<Query>,
  pub(crate) answers: Vec<Record>,
  pub(crate) authorities: Vec<Record>,
  pub(crate) additionals: Vec<Record>,
}

impl Message {
  #[inline]
  pub(crate) fn id(&self) -> u16 {
    self.header.id
  }

  #[inline]
  pub(crate) fn questions(&self) -> &[Query] {
    &self.questions
  }

  #[inline]
  pub(crate) fn answers(&self) -> &[Record] {
    &self.answers
  }

  #[inline]
  pub(crate) fn authorities(&self) -> &[Record] {
    &self.authorities
  }

  #[inline]
  pub(crate) fn additionals(&self) -> &[Record] {
    &self.additionals
  }

  #[inline]
  pub(crate) fn all_records(&self) -> impl Iterator<Item = &Record> {
    self
      .answers
      .iter()
      .chain(self.authorities.iter())
      .chain(self.additionals.iter())
  }

  /// Decodes a full mDNS message. Malformed input (bad length, premature
  /// EOF, pointer loops) aborts decoding and returns an error; no partial
  /// `Message` is handed back, matching the parser's rollback requirement.
  pub(crate) fn decode(src: &[u8]) -> Result<Self, ProtoError> {
    let header = Header::decode(src)?;
    let mut off = MESSAGE_HEADER_SIZE;

    let mut questions = Vec::with_capacity(header.qdcount as usize);
    for _ in 0..header.qdcount {
      let (q, noff) = Query::decode(src, off)?;
      questions.push(q);
      off = noff;
    }

    let mut decode_records = |count: u16, off: &mut usize| -> Result<Vec<Record>, ProtoError> {
      let mut records = Vec::with_capacity(count as usize);
      for _ in 0..count {
        let (rec, noff) = Record::decode(src, *off, false)?;
        *off = noff;
        if let Some(rec) = rec {
          records.push(rec);
        }
      }
      Ok(records)
    };

    let answers = decode_records(header.ancount, &mut off)?;
    let authorities = decode_records(header.nscount, &mut off)?;
    let additionals = decode_records(header.arcount, &mut off)?;

    Ok(Self {
      header,
      questions,
      answers,
      authorities,
      additionals,
    })
  }

  /// Encodes a query message: a question section plus optional
  /// known-answer records in the answer section, no authorities, no
  /// additionals beyond what the caller pushed.
  pub(crate) fn encode_query(
    id: u16,
    questions: &[Query],
    known_answers: &[Record],
  ) -> Result<Vec<u8>, ProtoError> {
    let header = Header {
      id,
      flags: 0,
      qdcount: questions.len() as u16,
      ancount: known_answers.len() as u16,
      nscount: 0,
      arcount: 0,
    };
    encode_sections(header, questions, known_answers, &[], &[])
  }

  /// Encodes an unsolicited/responsive message: QR + AA set, questions
  /// empty (probes are the exception and build their own via
  /// [`Message::encode_probe`]).
  pub(crate) fn encode_response(
    id: u16,
    answers: &[Record],
    additionals: &[Record],
  ) -> Result<Vec<u8>, ProtoError> {
    let header = Header {
      id,
      flags: FLAG_QR | FLAG_AA,
      qdcount: 0,
      ancount: answers.len() as u16,
      nscount: 0,
      arcount: additionals.len() as u16,
    };
    encode_sections(header, &[], answers, &[], additionals)
  }

  /// Encodes a probe: questions plus authority records carrying the
  /// tentative data being defended.
  pub(crate) fn encode_probe(
    id: u16,
    questions: &[Query],
    authorities: &[Record],
  ) -> Result<Vec<u8>, ProtoError> {
    let header = Header {
      id,
      flags: OP_CODE_QUERY | RESPONSE_CODE_NO_ERROR,
      qdcount: questions.len() as u16,
      ancount: 0,
      nscount: authorities.len() as u16,
      arcount: 0,
    };
    encode_sections(header, questions, &[], authorities, &[])
  }
}

fn encode_sections(
  header: Header,
  questions: &[Query],
  answers: &[Record],
  authorities: &[Record],
  additionals: &[Record],
) -> Result<Vec<u8>, ProtoError> {
  let mut buf = Vec::with_capacity(MESSAGE_HEADER_SIZE + 64);
  let mut hbuf = [0u8; MESSAGE_HEADER_SIZE];
  hbuf[0..2].copy_from_slice(&header.id.to_be_bytes());
  hbuf[2..4].copy_from_slice(&header.flags.to_be_bytes());
  hbuf[QDCOUNT_OFFSET..QDCOUNT_OFFSET + 2].copy_from_slice(&header.qdcount.to_be_bytes());
  hbuf[ANCOUNT_OFFSET..ANCOUNT_OFFSET + 2].copy_from_slice(&header.ancount.to_be_bytes());
  hbuf[NSCOUNT_OFFSET..NSCOUNT_OFFSET + 2].copy_from_slice(&header.nscount.to_be_bytes());
  hbuf[ARCOUNT_OFFSET..ARCOUNT_OFFSET + 2].copy_from_slice(&header.arcount.to_be_bytes());
  buf.extend_from_slice(&hbuf);

  let mut off = MESSAGE_HEADER_SIZE;
  let mut cmap = Some(CompressionMap::new());

  for q in questions {
    off = q.encode(&mut buf, off, &mut cmap)?;
  }
  for r in answers {
    off = r.encode(&mut buf, off, &mut cmap, true)?;
  }
  for r in authorities {
    off = r.encode(&mut buf, off, &mut cmap, true)?;
  }
  for r in additionals {
    off = r.encode(&mut buf, off, &mut cmap, true)?;
  }
  let _ = off;

  Ok(buf)
}
