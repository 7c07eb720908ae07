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

//! Error types for the RPC engine.

use meridian_network::error::TransportError;
use thiserror::Error;

use crate::messages::{RequestId, RpcErrorObject, SubscriptionId};

/// Result alias used throughout the engine.
pub type RpcResult<T> = Result<T, RpcError>;

/// Which deadline elapsed for a timed out call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum TimeoutKind {
    /// The per-call reply deadline.
    Call,
    /// The deadline for waiting on a reconnect while queued.
    ReconnectWait,
}

/// Errors raised by the payload codec.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Encode error: {0}")]
    Encode(String),
    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for CodecError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decode(error.to_string())
    }
}

/// A typed failure delivered to callers and subscribers.
///
/// Cloneable so a single failure can be fanned out to every waiter, as happens when a
/// connection drops.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RpcError {
    /// The transport failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A single-shot request returned a non-success HTTP status.
    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The request could not be serialized.
    #[error("Encode error: {0}")]
    Encode(String),

    /// A reply or notification could not be parsed.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The server answered with an explicit error.
    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<String>,
    },

    /// A deadline elapsed before the call resolved.
    #[error("Request {id} timed out ({kind})")]
    Timeout { id: RequestId, kind: TimeoutKind },

    /// The connection dropped while the call or subscription was outstanding.
    #[error("Disconnected (code {code:?})")]
    Disconnected { code: Option<u16> },

    /// The server returned a subscription id that is already registered.
    #[error("Duplicate subscription: {0}")]
    DuplicateSubscription(SubscriptionId),

    /// The server replied to an id with no outstanding call.
    #[error("Unknown request id: {0}")]
    UnknownRequestId(RequestId),

    /// The server pushed a notification for an unregistered subscription.
    #[error("Unknown subscription: {0}")]
    UnknownSubscription(SubscriptionId),

    /// The server rejected an unsubscribe request.
    #[error("Unsubscribe failed: {0}")]
    UnsubscribeFailed(SubscriptionId),

    /// Every request id in the configured space is outstanding.
    #[error("Request id space exhausted")]
    IdSpaceExhausted,

    /// The reconnect attempt budget was spent without reconnecting.
    #[error("Reconnect gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// Invalid configuration was supplied.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The engine has shut down.
    #[error("Client closed")]
    Closed,
}

impl RpcError {
    /// Returns whether this is a timeout failure.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns whether this is a disconnected failure.
    #[must_use]
    pub const fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }
}

impl From<CodecError> for RpcError {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::Encode(msg) => Self::Encode(msg),
            CodecError::Decode(msg) => Self::Decode(msg),
        }
    }
}

impl From<RpcErrorObject> for RpcError {
    fn from(error: RpcErrorObject) -> Self {
        Self::Rpc {
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }
}
