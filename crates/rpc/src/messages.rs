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

//! Envelope types shared by the codec and the engine.
//!
//! Payloads are kept as raw codec bytes at this level; typed decoding happens later
//! through [`crate::codec::RpcCodec::decode_payload`].

use std::fmt::Display;

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Identifier of an outgoing call, unique among outstanding calls.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned subscription identifier.
///
/// Nodes return either strings or integers here. Integers are normalized to their
/// decimal form, and serialize back as strings.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriptionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Serialize for SubscriptionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SubscriptionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Unsigned(u64),
            Signed(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Self(s),
            Raw::Unsigned(n) => Self(n.to_string()),
            Raw::Signed(n) => Self(n.to_string()),
        })
    }
}

/// An outgoing call envelope: `{id, method, params}`.
#[derive(Clone, Copy, Debug)]
pub struct RequestFrame<'a> {
    pub id: RequestId,
    pub method: &'a str,
    /// Params already encoded by the codec.
    pub params: &'a [u8],
}

/// A protocol-level error returned by the server in place of a result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    /// Optional extra detail, in the codec's textual form.
    pub data: Option<String>,
}

/// An inbound frame classified by its header, with payloads left undecoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundFrame {
    /// A reply to a call, carrying exactly one of result or error.
    Reply {
        id: RequestId,
        outcome: Result<Bytes, RpcErrorObject>,
    },
    /// A server push for an active subscription.
    Notification {
        method: String,
        subscription: SubscriptionId,
        result: Bytes,
    },
}
