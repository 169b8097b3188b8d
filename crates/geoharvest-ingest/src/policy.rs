//! Failure policy
//!
//! Every failed request is turned into exactly one [`Step`]. The fetcher asks
//! [`FailurePolicy::after_attempt`] whether to back off and try again; the
//! pager asks [`FailurePolicy::after_page`] what to do once the fetcher has
//! given up on a page. Keeping both decisions here makes the backoff, shrink
//! and skip rules testable without a network.
//!
//! ```text
//!  attempt fails ──▶ retryable and attempt < max_retries ──▶ Retry(base * 2^attempt)
//!                 └▶ otherwise ─────────────────────────────▶ Fatal
//!
//!  page fails ─────▶ page_size > 1 ─────────────────────────▶ Shrink(page_size / 2)
//!                 ├▶ skipped + 1 < skip_ceiling ────────────▶ Skip(position)
//!                 └▶ otherwise ─────────────────────────────▶ Fatal
//! ```

use std::time::Duration;

use crate::config::{FetchConfig, PagingConfig};
use crate::error::FetchFailure;

/// Outcome of one failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Sleep, then repeat the same request
    Retry(Duration),
    /// Repeat the same position with a smaller page
    Shrink(u32),
    /// Give up on the record at this position and move past it
    Skip(u64),
    /// Stop; the error surfaces to the caller
    Fatal,
}

/// Retry, shrink and skip limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub skip_ceiling: usize,
}

impl FailurePolicy {
    pub fn new(fetch: &FetchConfig, paging: &PagingConfig) -> Self {
        Self {
            max_retries: fetch.max_retries,
            backoff_base: fetch.backoff_base(),
            skip_ceiling: paging.skip_ceiling,
        }
    }

    /// Delay before retry number `attempt + 1`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor)
    }

    /// Decide after attempt number `attempt` (0-based) of a request failed
    pub fn after_attempt(&self, attempt: u32, failure: &FetchFailure) -> Step {
        if failure.is_retryable() && attempt < self.max_retries {
            Step::Retry(self.backoff(attempt))
        } else {
            Step::Fatal
        }
    }

    /// Decide after a page request at `position` with `page_size` failed
    /// for good, with `skipped` positions already abandoned in this run
    pub fn after_page(&self, position: u64, page_size: u32, skipped: usize) -> Step {
        if page_size > 1 {
            Step::Shrink((page_size / 2).max(1))
        } else if skipped + 1 < self.skip_ceiling {
            Step::Skip(position)
        } else {
            Step::Fatal
        }
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::new(&FetchConfig::default(), &PagingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32, skip_ceiling: usize) -> FailurePolicy {
        FailurePolicy {
            max_retries,
            backoff_base: Duration::from_millis(100),
            skip_ceiling,
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let p = policy(5, 50);
        assert_eq!(p.backoff(0), Duration::from_millis(100));
        assert_eq!(p.backoff(1), Duration::from_millis(200));
        assert_eq!(p.backoff(4), Duration::from_millis(1600));
    }

    #[test]
    fn test_backoff_saturates() {
        let p = policy(5, 50);
        assert!(p.backoff(200) >= p.backoff(31));
    }

    #[test]
    fn test_retry_until_ceiling() {
        let p = policy(2, 50);
        let failure = FetchFailure::Decode("EOF while parsing a value".into());

        assert_eq!(p.after_attempt(0, &failure), Step::Retry(Duration::from_millis(100)));
        assert_eq!(p.after_attempt(1, &failure), Step::Retry(Duration::from_millis(200)));
        assert_eq!(p.after_attempt(2, &failure), Step::Fatal);
    }

    #[test]
    fn test_non_retryable_status_is_fatal_immediately() {
        let p = policy(5, 50);
        assert_eq!(p.after_attempt(0, &FetchFailure::Status(404)), Step::Fatal);
        assert_eq!(
            p.after_attempt(0, &FetchFailure::Status(503)),
            Step::Retry(Duration::from_millis(100))
        );
    }

    #[test]
    fn test_shrink_sequence_halves_to_one() {
        let p = policy(0, 50);
        let mut size = 50;
        let mut seen = vec![size];
        while let Step::Shrink(next) = p.after_page(10, size, 0) {
            assert!(next < size && next >= 1);
            size = next;
            seen.push(size);
        }
        assert_eq!(seen, vec![50, 25, 12, 6, 3, 1]);
        assert_eq!(p.after_page(10, 1, 0), Step::Skip(10));
    }

    #[test]
    fn test_skip_ceiling() {
        let p = policy(0, 3);
        assert_eq!(p.after_page(7, 1, 0), Step::Skip(7));
        assert_eq!(p.after_page(8, 1, 1), Step::Skip(8));
        assert_eq!(p.after_page(9, 1, 2), Step::Fatal);
    }
}
