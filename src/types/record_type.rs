use std::str::FromStr;

use smol_str::SmolStr;

const AVALUE: u16 = 1;
const PTRVALUE: u16 = 12;
const TXTVALUE: u16 = 16;
const AAAAVALUE: u16 = 28;
const SRVVALUE: u16 = 33;
const OPTVALUE: u16 = 41;
const NSECVALUE: u16 = 47;
const ANYVALUE: u16 = 255;
/// Not a real wire value; used internally to tag the
/// `_services._dns-sd._udp.local` meta-service PTR so the responder can
/// distinguish it from an ordinary service PTR answer. Always encoded on
/// the wire as [`RecordType::PTR`].
const SDPTRVALUE: u16 = 0xFF01;

/// A record-type mnemonic (e.g. `"SRV"`) that does not match any
/// [`RecordType`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error("unknown record type string: {0}")]
pub struct UnknownRecordTypeStr(pub SmolStr);

/// A wire record-type value that does not match any [`RecordType`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error("unknown record type: {0}")]
pub struct UnknownRecordType(pub u16);

/// A subset of the DNS record types, which only contains the types that
/// are relevant to mDNS.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u16)]
#[non_exhaustive]
#[allow(clippy::upper_case_acronyms)]
pub enum RecordType {
  /// [RFC 1035](https://tools.ietf.org/html/rfc1035) IPv4 Address record
  A = AVALUE,
  /// [RFC 3596](https://tools.ietf.org/html/rfc3596) IPv6 address record
  AAAA = AAAAVALUE,
  /// [RFC 1035](https://tools.ietf.org/html/rfc1035) All cached records, aka ANY
  ANY = ANYVALUE,
  /// [RFC 1035](https://tools.ietf.org/html/rfc1035) Pointer record
  PTR = PTRVALUE,
  /// [RFC 2782](https://tools.ietf.org/html/rfc2782) Service locator
  SRV = SRVVALUE,
  /// [RFC 1035](https://tools.ietf.org/html/rfc1035) Text record
  TXT = TXTVALUE,
  /// [RFC 6891](https://tools.ietf.org/html/rfc6891) EDNS0 pseudo-record.
  /// Decoded for its class-encoded UDP payload size; never drives answer
  /// synthesis.
  OPT = OPTVALUE,
  /// [RFC 4034](https://tools.ietf.org/html/rfc4034) Next-secure record.
  /// Decoded and otherwise inert.
  NSEC = NSECVALUE,
  /// Internal tag for `_services._dns-sd._udp.local` meta-service PTR
  /// answers (RFC 6763 §9).
  SDPTR = SDPTRVALUE,
}

impl RecordType {
  /// Returns the string representation of the record type.
  #[inline]
  pub const fn as_str(&self) -> &'static str {
    match self {
      Self::A => "A",
      Self::AAAA => "AAAA",
      Self::ANY => "ANY",
      Self::PTR => "PTR",
      Self::SRV => "SRV",
      Self::TXT => "TXT",
      Self::OPT => "OPT",
      Self::NSEC => "NSEC",
      Self::SDPTR => "SDPTR",
    }
  }

  /// The value written on the wire for this type. [`RecordType::SDPTR`]
  /// encodes as [`RecordType::PTR`].
  #[inline]
  pub const fn wire_value(&self) -> u16 {
    match self {
      Self::SDPTR => PTRVALUE,
      other => *other as u16,
    }
  }
}

impl From<RecordType> for u16 {
  #[inline]
  fn from(value: RecordType) -> u16 {
    value.wire_value()
  }
}

impl From<RecordType> for &'static str {
  #[inline]
  fn from(value: RecordType) -> &'static str {
    value.as_str()
  }
}

impl TryFrom<&str> for RecordType {
  type Error = UnknownRecordTypeStr;

  #[inline]
  fn try_from(value: &str) -> Result<Self, Self::Error> {
    Ok(match value.trim() {
      "A" | "a" => RecordType::A,
      "AAAA" | "aaaa" => RecordType::AAAA,
      "ANY" | "any" => RecordType::ANY,
      "PTR" | "ptr" => RecordType::PTR,
      "SRV" | "srv" => RecordType::SRV,
      "TXT" | "txt" => RecordType::TXT,
      "OPT" | "opt" => RecordType::OPT,
      "NSEC" | "nsec" => RecordType::NSEC,
      _ => return Err(UnknownRecordTypeStr(value.into())),
    })
  }
}

impl FromStr for RecordType {
  type Err = UnknownRecordTypeStr;

  #[inline]
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    RecordType::try_from(s)
  }
}

impl TryFrom<u16> for RecordType {
  type Error = UnknownRecordType;

  #[inline]
  fn try_from(value: u16) -> Result<Self, Self::Error> {
    Ok(match value {
      AVALUE => Self::A,
      AAAAVALUE => Self::AAAA,
      ANYVALUE => Self::ANY,
      PTRVALUE => Self::PTR,
      SRVVALUE => Self::SRV,
      TXTVALUE => Self::TXT,
      OPTVALUE => Self::OPT,
      NSECVALUE => Self::NSEC,
      _ => return Err(UnknownRecordType(value)),
    })
  }
}
