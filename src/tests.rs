//! Multi-runtime test harness.
//!
//! Grounded on the teacher's `test_suites!` macro: each scenario is written
//! once and run once per enabled runtime feature via `paste`.

use core::future::Future;
use core::time::Duration;

use crate::config::EngineConfig;
use crate::engine::{Engine, NewService};
use crate::query::QueryFilter;
use crate::transport::{IfaceId, IpProto, MockTransport, NetifEvent};
use crate::types::RecordType;

macro_rules! test_suites {
  ($runtime:ident {
    $($name:ident),+$(,)?
  }) => {
    $(
      paste::paste! {
        #[test]
        fn [< $runtime _ $name >]() {
          $crate::tests::[< $runtime _run >]($name::<agnostic::[< $runtime >]::[< $runtime:camel Runtime >]>());
        }
      }
    )*
  }
}

/// Initialize the tracing for the unit tests.
pub fn initialize_tests_tracing() {
  use std::sync::Once;
  static TRACE: Once = Once::new();
  TRACE.call_once(|| {
    let filter = std::env::var("MDNS_CORE_TESTING_LOG").unwrap_or_else(|_| "trace".to_owned());
    let _ = tracing::subscriber::set_global_default(
      tracing_subscriber::fmt::fmt()
        .without_time()
        .with_line_number(true)
        .with_env_filter(filter)
        .with_file(false)
        .with_target(true)
        .with_ansi(true)
        .finish(),
    );
  });
}

#[cfg(feature = "tokio")]
fn tokio_run<F>(f: F)
where
  F: Future<Output = ()>,
{
  initialize_tests_tracing();

  tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .unwrap()
    .block_on(f);
}

#[cfg(feature = "smol")]
fn smol_run<F>(f: F)
where
  F: Future<Output = ()>,
{
  initialize_tests_tracing();
  smol::block_on(f);
}

#[cfg(feature = "async-std")]
fn async_std_run<F>(f: F)
where
  F: Future<Output = ()>,
{
  initialize_tests_tracing();
  async_std::task::block_on(f);
}

async fn registers_service_and_answers_browse<R: agnostic::RuntimeLite>() {
  let transport = triomphe::Arc::new(MockTransport::new());
  let handle = Engine::spawn::<R>(EngineConfig::new(), transport.clone());

  let host = handle.hostname_set("box1").await.unwrap();
  handle.netif_event(NetifEvent::Up(IfaceId(0), IpProto::V4)).await.unwrap();
  let svc = handle
    .service_add(NewService {
      service: "_http".into(),
      proto: "_tcp".into(),
      instance: None,
      host,
      port: 8080,
      ttl: 120,
    })
    .await
    .unwrap();

  // Nothing answers a mock-transport search with no loopback path, but the
  // search must still complete at its timeout rather than hang.
  let results = handle
    .query(
      QueryFilter {
        instance: None,
        service: Some("_http".into()),
        proto: Some("_tcp".into()),
        ty: RecordType::PTR,
        unicast: false,
      },
      Duration::from_millis(50),
      None,
    )
    .await
    .unwrap();
  assert!(results.is_empty());

  R::sleep(Duration::from_millis(20)).await;
  assert!(!transport.sent().is_empty(), "probe/query traffic should have been sent");

  handle.service_remove(svc).await.unwrap();
  handle.shutdown().await.unwrap();
}

test_suites!(tokio {
  registers_service_and_answers_browse,
});

test_suites!(smol {
  registers_service_and_answers_browse,
});

test_suites!(async_std {
  registers_service_and_answers_browse,
});
