//! Per-request deadlines.
//!
//! Each request carries one deadline; every suspension point checks it and
//! clamps its own step timeout to the time left, so a single budget
//! propagates through the pipeline. An expired deadline yields a single
//! `Cancelled` error and never a partial result.

use std::time::{Duration, Instant};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    /// Time left, zero once passed.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Fail fast at a suspension point.
    pub fn check(&self) -> Result<()> {
        if self.expired() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Clamp a per-step timeout to the remaining request budget.
    pub fn clamp(&self, step: Duration) -> Duration {
        step.min(self.remaining())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_expiry() {
        let d = Deadline::after(Duration::ZERO);
        assert!(d.expired());
        assert!(matches!(d.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_clamp_to_remaining() {
        let d = Deadline::after(Duration::from_secs(1));
        assert!(d.clamp(Duration::from_secs(60)) <= Duration::from_secs(1));
        assert!(!d.expired());
        assert!(d.check().is_ok());
    }
}
