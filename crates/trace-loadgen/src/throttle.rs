// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Paces one generator: each [`Throttle::pulse`] completes once per elapsed
/// period. Every generator owns exactly one throttle; sharing one across
/// generators would couple their rates.
///
/// The throttle holds nothing but a timer, so abandoning it mid-stream is
/// safe.
pub struct Throttle {
    interval: Interval,
}

impl Throttle {
    /// Must be called from within a tokio runtime. Zero periods are clamped
    /// to one nanosecond, which in practice means "as fast as the scheduler
    /// allows". The first pulse completes one full period after construction.
    pub fn new(period: Duration) -> Throttle {
        let period = period.max(Duration::from_nanos(1));
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
        Throttle { interval }
    }

    pub async fn pulse(&mut self) {
        self.interval.tick().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_one_pulse_per_period() {
        let start = Instant::now();
        let mut throttle = Throttle::new(Duration::from_secs(1));
        throttle.pulse().await;
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        throttle.pulse().await;
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_zero_period_is_clamped() {
        let mut throttle = Throttle::new(Duration::ZERO);
        for _ in 0..3 {
            throttle.pulse().await;
        }
    }
}
