// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2025 Meridian Contributors. All rights reserved.
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Reconnect delay policy for the RPC engine supervisor.
//!
//! Delays grow exponentially from an initial value up to a cap, with random jitter so
//! that many clients dropped by the same node do not reconnect in lockstep. The first
//! attempt after every reset is immediate, and an optional attempt budget bounds how
//! long the supervisor keeps trying.

use std::time::Duration;

use rand::Rng;

use crate::error::TransportError;

/// Exponential reconnect backoff with jitter, immediate first attempt and optional
/// attempt budget.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    delay_initial: Duration,
    delay_max: Duration,
    delay_current: Duration,
    factor: f64,
    /// Upper bound (milliseconds) of the random jitter added to each delay.
    jitter_ms: u64,
    immediate_first: bool,
    /// Whether the next call is the first one since construction or [`Self::reset`].
    fresh: bool,
    max_attempts: Option<u32>,
    attempts: u32,
}

impl ExponentialBackoff {
    /// Creates a new [`ExponentialBackoff`] instance.
    ///
    /// # Errors
    ///
    /// Returns an error if `delay_initial` is zero or exceeds `delay_max`, or if
    /// `factor` is not a finite value of at least 1.0.
    pub fn new(
        delay_initial: Duration,
        delay_max: Duration,
        factor: f64,
        jitter_ms: u64,
        immediate_first: bool,
    ) -> Result<Self, TransportError> {
        if delay_initial.is_zero() {
            return Err(TransportError::InvalidConfig(
                "backoff initial delay must be non-zero".to_string(),
            ));
        }
        if delay_initial > delay_max {
            return Err(TransportError::InvalidConfig(format!(
                "backoff initial delay {delay_initial:?} exceeds max delay {delay_max:?}"
            )));
        }
        if !factor.is_finite() || factor < 1.0 {
            return Err(TransportError::InvalidConfig(format!(
                "backoff factor must be finite and >= 1.0, was {factor}"
            )));
        }

        Ok(Self {
            delay_initial,
            delay_max,
            delay_current: delay_initial,
            factor,
            jitter_ms,
            immediate_first,
            fresh: true,
            max_attempts: None,
            attempts: 0,
        })
    }

    /// Limits the number of delays handed out between resets.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Returns the delay to wait before the next attempt, or `None` once the attempt
    /// budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.max_attempts
            && self.attempts >= max
        {
            return None;
        }
        self.attempts += 1;

        if self.fresh {
            self.fresh = false;
            if self.immediate_first {
                return Some(Duration::ZERO);
            }
        }

        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=self.jitter_ms)
        };
        let delay = self.delay_current + Duration::from_millis(jitter);

        let next_nanos = (self.delay_current.as_nanos() as f64 * self.factor) as u128;
        let capped = next_nanos.min(self.delay_max.as_nanos());
        self.delay_current = Duration::from_nanos(u64::try_from(capped).unwrap_or(u64::MAX));

        Some(delay)
    }

    /// Resets the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.delay_current = self.delay_initial;
        self.fresh = true;
        self.attempts = 0;
    }

    /// Returns the base delay (without jitter) the next non-immediate attempt will use.
    #[must_use]
    pub const fn current_delay(&self) -> Duration {
        self.delay_current
    }

    /// Returns the number of delays handed out since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }
}
