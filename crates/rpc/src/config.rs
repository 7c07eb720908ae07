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

//! Configuration for the RPC engine.

use std::time::Duration;

use meridian_network::backoff::ExponentialBackoff;
use serde::Deserialize;

use crate::error::{RpcError, RpcResult};

/// Configuration for an [`crate::client::RpcClient`].
///
/// All durations are in milliseconds.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RpcClientConfig {
    /// Whether to reconnect after a drop the caller did not ask for.
    pub auto_reconnect: bool,
    /// Default per-call reply timeout.
    pub call_timeout_ms: u64,
    /// Timeout for the acknowledgement of a subscribe call.
    pub subscription_ack_timeout_ms: u64,
    /// How long a call submitted while disconnected waits for a reconnect.
    pub reconnect_wait_timeout_ms: u64,
    /// Interval of the timeout sweep.
    pub sweep_interval_ms: u64,
    /// Initial reconnect backoff delay.
    pub reconnect_delay_initial_ms: u64,
    /// Maximum reconnect backoff delay.
    pub reconnect_delay_max_ms: u64,
    /// Reconnect backoff growth factor.
    pub reconnect_backoff_factor: f64,
    /// Maximum random jitter added to each reconnect delay.
    pub reconnect_jitter_ms: u64,
    /// Reconnect attempts before giving up, unlimited when `None`.
    pub reconnect_max_attempts: Option<u32>,
    /// Largest request id before wrapping back to 1.
    pub max_request_id: u64,
    /// Runtime that handler-style subscriptions run on, the current one when `None`.
    #[serde(skip)]
    pub response_runtime: Option<tokio::runtime::Handle>,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            call_timeout_ms: 60_000,
            subscription_ack_timeout_ms: 10_000,
            reconnect_wait_timeout_ms: 40_000,
            sweep_interval_ms: 1_000,
            reconnect_delay_initial_ms: 1_000,
            reconnect_delay_max_ms: 30_000,
            reconnect_backoff_factor: 2.0,
            reconnect_jitter_ms: 500,
            reconnect_max_attempts: None,
            max_request_id: u64::from(u32::MAX),
            response_runtime: None,
        }
    }
}

impl RpcClientConfig {
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    #[must_use]
    pub const fn subscription_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.subscription_ack_timeout_ms)
    }

    #[must_use]
    pub const fn reconnect_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect_wait_timeout_ms)
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Builds the reconnect backoff policy described by this config.
    ///
    /// # Errors
    ///
    /// Returns an error if the backoff parameters are invalid.
    pub fn reconnect_backoff(&self) -> RpcResult<ExponentialBackoff> {
        let backoff = ExponentialBackoff::new(
            Duration::from_millis(self.reconnect_delay_initial_ms),
            Duration::from_millis(self.reconnect_delay_max_ms),
            self.reconnect_backoff_factor,
            self.reconnect_jitter_ms,
            true,
        )
        .map_err(|e| RpcError::InvalidConfig(e.to_string()))?;

        Ok(backoff.with_max_attempts(self.reconnect_max_attempts))
    }

    /// Checks the config for values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value found.
    pub fn validate(&self) -> RpcResult<()> {
        if self.sweep_interval_ms == 0 {
            return Err(RpcError::InvalidConfig(
                "sweep_interval_ms must be positive".to_string(),
            ));
        }
        if self.max_request_id == 0 {
            return Err(RpcError::InvalidConfig(
                "max_request_id must be positive".to_string(),
            ));
        }
        self.reconnect_backoff().map(|_| ())
    }
}
