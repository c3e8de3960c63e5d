use crate::config::ReconnectConfig;
use crate::error::RetryClass;
use std::time::Duration;

/// Reconnect delay policy: constant below a retry threshold, then linear
/// escalation with an optional ceiling.
#[derive(Debug)]
pub struct ReconnectBackoff {
    delay: Duration,
    increment: Duration,
    max_retries: u32,
    max_delay: Option<Duration>,
    auth_fail_delay: Duration,
    attempts: u32,
}

impl ReconnectBackoff {
    /// Creates a new `ReconnectBackoff` with the given parameters.
    ///
    /// # Examples
    ///
    /// ```
    /// use silentc::backoff::ReconnectBackoff;
    /// use silentc::error::RetryClass;
    /// use std::time::Duration;
    /// let mut backoff = ReconnectBackoff::new(
    ///     Duration::from_millis(5000),
    ///     Duration::from_millis(2000),
    ///     1,
    ///     None,
    ///     Duration::from_millis(1000),
    /// );
    /// assert_eq!(backoff.next_delay(RetryClass::Counted), Duration::from_millis(5000));
    /// assert_eq!(backoff.next_delay(RetryClass::Counted), Duration::from_millis(7000));
    /// assert_eq!(backoff.next_delay(RetryClass::AuthRejected), Duration::from_millis(1000));
    /// ```
    #[must_use]
    pub const fn new(
        delay: Duration,
        increment: Duration,
        max_retries: u32,
        max_delay: Option<Duration>,
        auth_fail_delay: Duration,
    ) -> Self {
        Self {
            delay,
            increment,
            max_retries,
            max_delay,
            auth_fail_delay,
            attempts: 0,
        }
    }

    /// Builds the policy from the `[reconnect]` config section.
    #[must_use]
    pub const fn from_config(config: &ReconnectConfig) -> Self {
        let max_delay = if config.max_delay_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(config.max_delay_ms))
        };
        Self::new(
            Duration::from_millis(config.delay_ms),
            Duration::from_millis(config.backoff_increment_ms),
            config.max_retries,
            max_delay,
            Duration::from_millis(config.auth_fail_delay_ms),
        )
    }

    /// Records a failed attempt and returns how long to wait before the next one.
    ///
    /// Credential rejections use the fixed auth-failure delay and leave the
    /// attempt counter alone.
    pub fn next_delay(&mut self, class: RetryClass) -> Duration {
        if class == RetryClass::AuthRejected {
            return self.auth_fail_delay;
        }

        self.attempts = self.attempts.saturating_add(1);
        if self.attempts < self.max_retries {
            return self.delay;
        }

        let steps = self.attempts - self.max_retries;
        let escalated = self.delay.saturating_add(self.increment.saturating_mul(steps));
        match self.max_delay {
            Some(cap) => escalated.min(cap),
            None => escalated,
        }
    }

    /// Delay used after a session that was established ends with an error.
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        self.delay
    }

    /// Consecutive counted failures since the last successful connection.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Threshold after which delays start escalating.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Reset the counter after a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn counted_delay_matches_closed_form(
            delay_ms in 1u64..10_000,
            increment_ms in 0u64..10_000,
            max_retries in 0u32..10,
            failures in 1u32..40,
        ) {
            let mut backoff = ReconnectBackoff::new(
                Duration::from_millis(delay_ms),
                Duration::from_millis(increment_ms),
                max_retries,
                None,
                Duration::from_millis(1),
            );

            let mut last = Duration::ZERO;
            for _ in 0..failures {
                last = backoff.next_delay(RetryClass::Counted);
            }

            let steps = u64::from(failures.saturating_sub(max_retries));
            let expected = if failures < max_retries {
                delay_ms
            } else {
                delay_ms + increment_ms * steps
            };
            prop_assert_eq!(last, Duration::from_millis(expected));
        }

        #[test]
        fn interleaved_rejections_never_move_the_counter(
            pattern in proptest::collection::vec(any::<bool>(), 0..50),
        ) {
            let mut backoff = ReconnectBackoff::new(
                Duration::from_millis(100),
                Duration::from_millis(10),
                3,
                Some(Duration::from_millis(150)),
                Duration::from_millis(7),
            );

            let mut counted = 0u32;
            for rejected in pattern {
                let class = if rejected { RetryClass::AuthRejected } else { RetryClass::Counted };
                let delay = backoff.next_delay(class);
                if rejected {
                    prop_assert_eq!(delay, Duration::from_millis(7));
                } else {
                    counted += 1;
                    prop_assert!(delay <= Duration::from_millis(150));
                }
                prop_assert_eq!(backoff.attempts(), counted);
            }
        }
    }
}
