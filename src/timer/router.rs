//! Delay bucket routing.
//!
//! A timer event is placed into the coarsest bucket whose threshold does not exceed
//! its remaining time, so far-future events are polled rarely and near-future events
//! are polled often. An event re-read from a bucket before it is due is routed again
//! and moves down into a finer bucket.

use std::time::Duration;

use crate::config::{ConfigResult, ConfigurationError, TimerConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayBucketRouter {
    thresholds: Vec<u64>,
    poll_interval_multiplier: u64,
    min_poll_interval_seconds: u64,
}

impl DelayBucketRouter {
    /// Build a router over thresholds in seconds, in any order
    pub fn new(thresholds: &[u64]) -> ConfigResult<Self> {
        let defaults = TimerConfig::default();
        Self::with_poll_tolerance(
            thresholds,
            defaults.max_poll_interval_multiplier,
            defaults.min_max_poll_interval_seconds,
        )
    }

    pub fn from_config(config: &TimerConfig) -> ConfigResult<Self> {
        Self::with_poll_tolerance(
            &config.delay_buckets_seconds,
            config.max_poll_interval_multiplier,
            config.min_max_poll_interval_seconds,
        )
    }

    fn with_poll_tolerance(
        thresholds: &[u64],
        poll_interval_multiplier: u64,
        min_poll_interval_seconds: u64,
    ) -> ConfigResult<Self> {
        let mut thresholds = thresholds.to_vec();
        thresholds.sort_unstable();
        thresholds.dedup();

        if thresholds.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "delay_buckets_seconds",
                "timer configuration",
            ));
        }

        Ok(Self {
            thresholds,
            poll_interval_multiplier,
            min_poll_interval_seconds,
        })
    }

    /// Threshold of the bucket for an event due in `remaining_ms`.
    ///
    /// Returns the largest threshold not above the remaining time, or the smallest
    /// threshold when every threshold exceeds it (including overdue events).
    pub fn route(&self, remaining_ms: i64) -> u64 {
        let smallest = self.smallest();
        if remaining_ms <= 0 {
            return smallest;
        }
        let remaining_ms = remaining_ms as u64;

        self.thresholds
            .iter()
            .rev()
            .find(|threshold| threshold.saturating_mul(1000) <= remaining_ms)
            .copied()
            .unwrap_or(smallest)
    }

    /// Ascending, de-duplicated thresholds in seconds
    pub fn thresholds(&self) -> &[u64] {
        &self.thresholds
    }

    pub fn smallest(&self) -> u64 {
        self.thresholds[0]
    }

    /// Longest gap between polls a bucket consumer tolerates
    pub fn max_poll_interval(&self, threshold: u64) -> Duration {
        let seconds = threshold
            .saturating_mul(self.poll_interval_multiplier)
            .max(self.min_poll_interval_seconds);
        Duration::from_secs(seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> DelayBucketRouter {
        DelayBucketRouter::new(&[5, 15, 60, 300, 1800]).unwrap()
    }

    #[test]
    fn test_routes_to_largest_threshold_not_above_remaining() {
        let router = router();
        assert_eq!(router.route(200_000), 60);
        assert_eq!(router.route(300_000), 300);
        assert_eq!(router.route(15_000), 15);
        assert_eq!(router.route(14_999), 5);
        assert_eq!(router.route(7_200_000), 1800);
    }

    #[test]
    fn test_below_smallest_routes_to_smallest() {
        let router = router();
        assert_eq!(router.route(3_000), 5);
        assert_eq!(router.route(0), 5);
        assert_eq!(router.route(-42_000), 5);
    }

    #[test]
    fn test_thresholds_sorted_and_deduplicated() {
        let router = DelayBucketRouter::new(&[60, 5, 15, 5]).unwrap();
        assert_eq!(router.thresholds(), &[5, 15, 60]);
        assert_eq!(router.smallest(), 5);
    }

    #[test]
    fn test_empty_thresholds_rejected() {
        let result = DelayBucketRouter::new(&[]);
        assert!(matches!(
            result,
            Err(ConfigurationError::MissingRequiredField { .. })
        ));
    }

    #[test]
    fn test_max_poll_interval() {
        let router = router();
        assert_eq!(router.max_poll_interval(5), Duration::from_secs(30));
        assert_eq!(router.max_poll_interval(60), Duration::from_secs(300));
        assert_eq!(router.max_poll_interval(1800), Duration::from_secs(9000));
    }

    #[test]
    fn test_from_config_uses_poll_tolerance() {
        let config = TimerConfig {
            delay_buckets_seconds: vec![10],
            max_poll_interval_multiplier: 2,
            min_max_poll_interval_seconds: 1,
            ..TimerConfig::default()
        };
        let router = DelayBucketRouter::from_config(&config).unwrap();
        assert_eq!(router.max_poll_interval(10), Duration::from_secs(20));
    }
}
