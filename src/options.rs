use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// When a batch must have reached its terminal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
  /// Relative to the start of each exec call.
  After(Duration),
  /// A fixed point in time shared by every exec call.
  At(Instant),
}

impl Deadline {
  /// Resolves this deadline for an exec call starting at `start`.
  pub fn resolve(&self, start: Instant) -> Instant {
    match *self {
      Deadline::After(timeout) => start + timeout,
      Deadline::At(at) => at,
    }
  }
}

/// Configuration shared by every alloter flavour.
#[derive(Debug, Clone, Default)]
pub struct AllotOptions {
  pub(crate) deadline: Option<Deadline>,
  pub(crate) name: Option<Arc<String>>,
}

impl AllotOptions {
  pub fn new() -> Self {
    Self::default()
  }

  /// Each exec call must finish within `timeout`. A zero timeout means no deadline.
  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.deadline = if timeout.is_zero() {
      None
    } else {
      Some(Deadline::After(timeout))
    };
    self
  }

  /// Every exec call must finish by `at`.
  pub fn deadline(mut self, at: Instant) -> Self {
    self.deadline = Some(Deadline::At(at));
    self
  }

  /// Name used in tracing spans.
  pub fn name(mut self, name: &str) -> Self {
    self.name = Some(Arc::new(name.to_string()));
    self
  }

  pub(crate) fn name_or(&self, fallback: &str) -> Arc<String> {
    self
      .name
      .clone()
      .unwrap_or_else(|| Arc::new(fallback.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_timeout_means_no_deadline() {
    let opts = AllotOptions::new().timeout(Duration::ZERO);
    assert_eq!(opts.deadline, None);
  }

  #[tokio::test]
  async fn relative_deadline_resolves_per_call() {
    let opts = AllotOptions::new().timeout(Duration::from_millis(50));
    let start = Instant::now();
    let later = start + Duration::from_secs(1);
    let d = opts.deadline.unwrap();
    assert_eq!(d.resolve(start), start + Duration::from_millis(50));
    assert_eq!(d.resolve(later), later + Duration::from_millis(50));
  }

  #[tokio::test]
  async fn absolute_deadline_is_fixed() {
    let at = Instant::now() + Duration::from_millis(10);
    let d = AllotOptions::new().deadline(at).deadline.unwrap();
    assert_eq!(d.resolve(Instant::now() + Duration::from_secs(5)), at);
  }
}
