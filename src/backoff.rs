//! Delay shapes and jitter for [`RetryPolicy`](crate::RetryPolicy).
//!
//! Retry numbering is 1-based: `delay(1)` is the wait before the first retry. Computations that
//! would overflow saturate to [`MAX_BACKOFF`].
//!
//! ```rust
//! use hedgerow::Backoff;
//! use std::time::Duration;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(100))
//!     .with_max(Duration::from_secs(1))
//!     .unwrap();
//! assert_eq!(backoff.delay(1), Duration::from_millis(100));
//! assert_eq!(backoff.delay(3), Duration::from_millis(400));
//! assert_eq!(backoff.delay(8), Duration::from_secs(1));
//! ```

use rand::{rng, Rng};
use std::time::Duration;

/// Upper bound for any computed delay (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    #[error("a cap only applies to linear or exponential backoff")]
    CapOnConstant,
    #[error("cap must be greater than zero")]
    ZeroCap,
    #[error("cap ({max:?}) must be >= base ({base:?})")]
    CapBelowBase { base: Duration, max: Duration },
}

/// How the wait grows from one retry to the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backoff {
    Constant(Duration),
    Linear { base: Duration, max: Option<Duration> },
    Exponential { base: Duration, max: Option<Duration> },
}

impl Backoff {
    pub fn constant(delay: Duration) -> Self {
        Backoff::Constant(delay)
    }

    pub fn linear(base: Duration) -> Self {
        Backoff::Linear { base, max: None }
    }

    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential { base, max: None }
    }

    /// Cap a growing backoff.
    pub fn with_max(self, cap: Duration) -> Result<Self, BackoffError> {
        if cap.is_zero() {
            return Err(BackoffError::ZeroCap);
        }
        match self {
            Backoff::Constant(_) => Err(BackoffError::CapOnConstant),
            Backoff::Linear { base, .. } if cap < base => {
                Err(BackoffError::CapBelowBase { base, max: cap })
            }
            Backoff::Exponential { base, .. } if cap < base => {
                Err(BackoffError::CapBelowBase { base, max: cap })
            }
            Backoff::Linear { base, .. } => Ok(Backoff::Linear { base, max: Some(cap) }),
            Backoff::Exponential { base, .. } => Ok(Backoff::Exponential { base, max: Some(cap) }),
        }
    }

    /// Wait before retry number `retry` (1-based); `delay(0)` is always zero.
    pub fn delay(&self, retry: usize) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let raw = match self {
            Backoff::Constant(d) => *d,
            Backoff::Linear { base, max } => {
                let n = u32::try_from(retry).unwrap_or(u32::MAX);
                cap(base.checked_mul(n).unwrap_or(MAX_BACKOFF), *max)
            }
            Backoff::Exponential { base, max } => {
                let exp = u32::try_from(retry - 1).unwrap_or(u32::MAX);
                let nanos = base.as_nanos().saturating_mul(2u128.saturating_pow(exp));
                let grown = u64::try_from(nanos.min(MAX_BACKOFF.as_nanos()))
                    .map(Duration::from_nanos)
                    .unwrap_or(MAX_BACKOFF);
                cap(grown, *max)
            }
        };
        raw.min(MAX_BACKOFF)
    }
}

fn cap(d: Duration, max: Option<Duration>) -> Duration {
    max.map_or(d, |m| d.min(m))
}

/// Randomization applied on top of a backoff delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Jitter {
    /// Use the backoff delay as-is.
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// Uniform in `[delay/2, delay]`.
    Equal,
}

impl Jitter {
    pub fn apply(self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rng())
    }

    /// Apply with a caller-provided RNG (deterministic tests).
    pub fn apply_with_rng<R: Rng>(self, delay: Duration, rng: &mut R) -> Duration {
        let nanos = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
        if nanos == 0 {
            return Duration::ZERO;
        }
        match self {
            Jitter::None => delay,
            Jitter::Full => Duration::from_nanos(rng.random_range(0..=nanos)),
            Jitter::Equal => Duration::from_nanos(rng.random_range(nanos / 2..=nanos)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn constant_ignores_retry_number() {
        let backoff = Backoff::constant(Duration::from_millis(30));
        assert_eq!(backoff.delay(0), Duration::ZERO);
        assert_eq!(backoff.delay(1), Duration::from_millis(30));
        assert_eq!(backoff.delay(50), Duration::from_millis(30));
    }

    #[test]
    fn linear_grows_and_caps() {
        let backoff =
            Backoff::linear(Duration::from_secs(10)).with_max(Duration::from_secs(25)).unwrap();
        assert_eq!(backoff.delay(1), Duration::from_secs(10));
        assert_eq!(backoff.delay(2), Duration::from_secs(20));
        assert_eq!(backoff.delay(3), Duration::from_secs(25));
    }

    #[test]
    fn exponential_doubles() {
        let backoff = Backoff::exponential(Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(4), Duration::from_millis(800));
    }

    #[test]
    fn overflow_saturates() {
        assert_eq!(Backoff::exponential(Duration::from_secs(1)).delay(1_000_000), MAX_BACKOFF);
        assert_eq!(Backoff::linear(Duration::from_secs(u64::MAX / 2)).delay(1_000), MAX_BACKOFF);
    }

    #[test]
    fn cap_validation() {
        assert_eq!(
            Backoff::constant(Duration::from_secs(1)).with_max(Duration::from_secs(2)),
            Err(BackoffError::CapOnConstant)
        );
        assert_eq!(
            Backoff::linear(Duration::from_secs(1)).with_max(Duration::ZERO),
            Err(BackoffError::ZeroCap)
        );
        assert!(matches!(
            Backoff::exponential(Duration::from_secs(5)).with_max(Duration::from_secs(1)),
            Err(BackoffError::CapBelowBase { .. })
        ));
    }

    #[test]
    fn jitter_bounds() {
        let delay = Duration::from_millis(200);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            assert!(Jitter::Full.apply_with_rng(delay, &mut rng) <= delay);
            let eq = Jitter::Equal.apply_with_rng(delay, &mut rng);
            assert!(eq >= delay / 2 && eq <= delay);
        }
        assert_eq!(Jitter::None.apply(delay), delay);
        assert_eq!(Jitter::Full.apply(Duration::ZERO), Duration::ZERO);
    }
}
