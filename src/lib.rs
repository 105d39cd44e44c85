#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![allow(unexpected_cfgs)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, allow(unused_attributes))]

//! Runtime-agnostic, transport-agnostic mDNS responder/querier core
//! (RFC 6762/6763).
//!
//! The crate owns the protocol state machine — probing, announcing,
//! conflict detection and mangling, goodbye, known-answer suppression,
//! one-shot search and continuous browse — behind a single [`engine::Handle`].
//! It does not bind a UDP socket or discover network interfaces: the host
//! application feeds inbound datagrams and link up/down events in through
//! the [`transport::Transport`] boundary and gets outbound datagrams back
//! out through the same trait.

#[cfg(test)]
mod tests;

mod config;
mod engine;
mod error;
mod model;
mod parser;
mod pcb;
mod query;
mod responder;
mod scheduler;
mod transport;
mod types;

pub use config::EngineConfig;
pub use engine::{Engine, Handle, NewService};
pub use error::{Error, Result};
pub use model::{HostId, ServiceId, TxtItem};
pub use query::{QueryFilter, QueryId, QueryResult};
pub use transport::{IfaceId, Inbound, IpProto, MockTransport, NetifEvent, SentPacket, Transport};
pub use types::{ProtoError, RecordType, SRV};

pub use smallvec_wrapper::TinyVec;
pub use smol_str::SmolStr;

/// Types bound to the `tokio` runtime.
#[cfg(feature = "tokio")]
#[cfg_attr(docsrs, doc(cfg(feature = "tokio")))]
pub mod tokio {
  pub use agnostic::tokio::TokioRuntime as Runtime;

  /// Spawns an [`Engine`](crate::Engine) driven by the `tokio` runtime.
  #[inline]
  pub fn spawn(
    config: crate::EngineConfig,
    transport: triomphe::Arc<dyn crate::Transport>,
  ) -> crate::Handle {
    crate::Engine::spawn::<Runtime>(config, transport)
  }
}

/// Types bound to the `smol` runtime.
#[cfg(feature = "smol")]
#[cfg_attr(docsrs, doc(cfg(feature = "smol")))]
pub mod smol {
  pub use agnostic::smol::SmolRuntime as Runtime;

  /// Spawns an [`Engine`](crate::Engine) driven by the `smol` runtime.
  #[inline]
  pub fn spawn(
    config: crate::EngineConfig,
    transport: triomphe::Arc<dyn crate::Transport>,
  ) -> crate::Handle {
    crate::Engine::spawn::<Runtime>(config, transport)
  }
}

/// Types bound to the `async-std` runtime.
#[cfg(feature = "async-std")]
#[cfg_attr(docsrs, doc(cfg(feature = "async-std")))]
pub mod async_std {
  pub use agnostic::async_std::AsyncStdRuntime as Runtime;

  /// Spawns an [`Engine`](crate::Engine) driven by the `async-std` runtime.
  #[inline]
  pub fn spawn(
    config: crate::EngineConfig,
    transport: triomphe::Arc<dyn crate::Transport>,
  ) -> crate::Handle {
    crate::Engine::spawn::<Runtime>(config, transport)
  }
}
