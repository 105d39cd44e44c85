use smol_str::SmolStr;

use crate::types::ProtoError;

/// The error taxonomy exposed by the engine's public API.
///
/// Mirrors the `OK | NO_MEM | INVALID_ARG | INVALID_STATE | NOT_FOUND |
/// TIMEOUT | NOT_SUPPORTED` result codes: every fallible entry point returns
/// one of these variants, never a bare string.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The engine could not allocate the resources an operation needed.
  #[error("out of resources")]
  NoMem,
  /// An argument was malformed: an oversize label, an invalid TXT key, a
  /// service add that collides with an existing `(service, proto, hostname,
  /// instance)` tuple, and the like.
  #[error("invalid argument: {0}")]
  InvalidArg(SmolStr),
  /// The call is not valid for the engine's current state (e.g. a second
  /// `service_add` for the same tuple, or a call after the engine has
  /// been shut down).
  #[error("invalid state: {0}")]
  InvalidState(SmolStr),
  /// The referenced host, service, search, or browse does not exist.
  #[error("not found: {0}")]
  NotFound(SmolStr),
  /// A synchronous call did not complete before its deadline.
  #[error("operation timed out")]
  Timeout,
  /// The requested behaviour is outside the core's contract (e.g. DNSSEC,
  /// SRV-over-TCP).
  #[error("not supported")]
  NotSupported,
  /// A wire-format error surfaced while encoding an outbound packet.
  #[error(transparent)]
  Proto(#[from] ProtoError),
  /// The action channel's receiving half was dropped; the engine has shut
  /// down.
  #[error("engine is shut down")]
  EngineStopped,
}

/// Convenience alias used throughout the crate's public surface.
pub type Result<T> = core::result::Result<T, Error>;
