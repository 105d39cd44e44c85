use core::time::Duration;

/// Tuning knobs for an [`Engine`](crate::engine::Engine).
///
/// Grounded on the teacher's `ServerOptions`: a plain builder struct with
/// `with_*` setters, constructed once and handed to the engine at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
  pub(crate) probe_interval: Duration,
  pub(crate) probe_initial_delay_min: Duration,
  pub(crate) probe_initial_delay_jitter: Duration,
  pub(crate) probe_backoff_threshold: u32,
  pub(crate) probe_backoff_delay: Duration,
  pub(crate) announce_interval: Duration,
  pub(crate) scheduler_tick: Duration,
  pub(crate) shared_answer_delay_min: Duration,
  pub(crate) shared_answer_delay_jitter: Duration,
  pub(crate) search_retransmit_interval: Duration,
  pub(crate) max_payload_size: usize,
  pub(crate) log_empty_responses: bool,
  pub(crate) check_response_src_port: bool,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      probe_interval: Duration::from_millis(250),
      probe_initial_delay_min: Duration::from_millis(120),
      probe_initial_delay_jitter: Duration::from_millis(127),
      probe_backoff_threshold: 5,
      probe_backoff_delay: Duration::from_millis(1000),
      announce_interval: Duration::from_millis(250),
      scheduler_tick: Duration::from_millis(50),
      shared_answer_delay_min: Duration::from_millis(25),
      shared_answer_delay_jitter: Duration::from_millis(75),
      search_retransmit_interval: Duration::from_millis(1000),
      // RFC 6762 section 17 single-fragment assumption; not the teacher's
      // 9000-byte jumbogram-era default (see DESIGN.md).
      max_payload_size: 1460,
      log_empty_responses: false,
      check_response_src_port: true,
    }
  }
}

impl EngineConfig {
  /// Creates a configuration with the engine's defaults.
  #[inline]
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the 250 ms spacing between probe and announcement packets.
  #[inline]
  pub const fn with_probe_interval(mut self, d: Duration) -> Self {
    self.probe_interval = d;
    self
  }

  /// Sets the announcement inter-packet spacing.
  #[inline]
  pub const fn with_announce_interval(mut self, d: Duration) -> Self {
    self.announce_interval = d;
    self
  }

  /// Sets the scheduler's due-packet poll period.
  #[inline]
  pub const fn with_scheduler_tick(mut self, d: Duration) -> Self {
    self.scheduler_tick = d;
    self
  }

  /// Sets the maximum bytes of a single outbound packet.
  #[inline]
  pub const fn with_max_payload_size(mut self, n: usize) -> Self {
    self.max_payload_size = n;
    self
  }

  /// Sets the retransmit period used by active searches.
  #[inline]
  pub const fn with_search_retransmit_interval(mut self, d: Duration) -> Self {
    self.search_retransmit_interval = d;
    self
  }

  /// Controls whether empty responses are logged at `trace` level.
  #[inline]
  pub const fn with_log_empty_responses(mut self, yes: bool) -> Self {
    self.log_empty_responses = yes;
    self
  }

  /// Controls the RFC 6762 §11 off-port authoritative-packet check.
  #[inline]
  pub const fn with_check_response_src_port(mut self, yes: bool) -> Self {
    self.check_response_src_port = yes;
    self
  }
}
