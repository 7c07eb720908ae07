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

//! Payload codec boundary and the stock JSON-RPC 2.0 codec.
//!
//! Inbound frames are decoded in two phases. [`RpcCodec::decode_frame`] reads only
//! enough of the envelope to tell a reply from a notification and to extract the ids,
//! leaving the payload raw. [`RpcCodec::decode_payload`] later turns that raw payload
//! into the caller's type.

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::value::RawValue;

use crate::{
    error::CodecError,
    messages::{InboundFrame, RequestFrame, RequestId, RpcErrorObject, SubscriptionId},
};

/// Translates between typed values and wire frames.
pub trait RpcCodec: Send + Sync + 'static {
    /// Encodes call parameters into a raw payload.
    ///
    /// # Errors
    ///
    /// Returns an error if `params` cannot be serialized.
    fn encode_params<P: Serialize + ?Sized>(&self, params: &P) -> Result<Bytes, CodecError>;

    /// Wraps already encoded params into a complete request frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope cannot be serialized.
    fn encode_request(&self, frame: &RequestFrame<'_>) -> Result<Bytes, CodecError>;

    /// Classifies an inbound frame from its header.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is neither a well formed reply nor a notification.
    fn decode_frame(&self, frame: &[u8]) -> Result<InboundFrame, CodecError>;

    /// Decodes a raw payload into `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not match `T`.
    fn decode_payload<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, CodecError>;
}

const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 codec.
///
/// Unit params (`()`) are sent as an empty array.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonRpcCodec;

impl JsonRpcCodec {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[derive(Serialize)]
struct JsonRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a RawValue,
}

// A field that is present, even as `null`, must decode to `Some`
fn present<'de, D>(deserializer: D) -> Result<Option<Box<RawValue>>, D::Error>
where
    D: Deserializer<'de>,
{
    Box::<RawValue>::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
struct JsonErrorObject {
    code: i64,
    message: String,
    #[serde(default, deserialize_with = "present")]
    data: Option<Box<RawValue>>,
}

#[derive(Deserialize)]
struct JsonNotificationParams {
    subscription: SubscriptionId,
    #[serde(default, deserialize_with = "present")]
    result: Option<Box<RawValue>>,
}

#[derive(Deserialize)]
struct JsonInbound {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<JsonNotificationParams>,
    #[serde(default, deserialize_with = "present")]
    result: Option<Box<RawValue>>,
    #[serde(default)]
    error: Option<JsonErrorObject>,
}

fn raw_bytes(raw: &RawValue) -> Bytes {
    Bytes::copy_from_slice(raw.get().as_bytes())
}

impl RpcCodec for JsonRpcCodec {
    fn encode_params<P: Serialize + ?Sized>(&self, params: &P) -> Result<Bytes, CodecError> {
        let encoded =
            serde_json::to_vec(params).map_err(|e| CodecError::Encode(e.to_string()))?;

        if encoded == b"null" {
            return Ok(Bytes::from_static(b"[]"));
        }
        Ok(Bytes::from(encoded))
    }

    fn encode_request(&self, frame: &RequestFrame<'_>) -> Result<Bytes, CodecError> {
        let params = std::str::from_utf8(frame.params)
            .map_err(|e| CodecError::Encode(format!("params are not UTF-8: {e}")))?;
        let params = RawValue::from_string(params.to_owned())
            .map_err(|e| CodecError::Encode(format!("params are not valid JSON: {e}")))?;

        let request = JsonRequest {
            jsonrpc: JSONRPC_VERSION,
            id: frame.id.value(),
            method: frame.method,
            params: &params,
        };

        serde_json::to_vec(&request)
            .map(Bytes::from)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode_frame(&self, frame: &[u8]) -> Result<InboundFrame, CodecError> {
        let inbound: JsonInbound = serde_json::from_slice(frame)?;

        if let Some(id) = inbound.id {
            let outcome = match (inbound.result, inbound.error) {
                (Some(result), None) => Ok(raw_bytes(&result)),
                (None, Some(error)) => Err(RpcErrorObject {
                    code: error.code,
                    message: error.message,
                    data: error.data.map(|d| d.get().to_string()),
                }),
                (Some(_), Some(_)) => {
                    return Err(CodecError::Decode(format!(
                        "reply {id} carries both result and error"
                    )));
                }
                (None, None) => {
                    return Err(CodecError::Decode(format!(
                        "reply {id} carries neither result nor error"
                    )));
                }
            };

            return Ok(InboundFrame::Reply {
                id: RequestId::new(id),
                outcome,
            });
        }

        match (inbound.method, inbound.params) {
            (Some(method), Some(params)) => {
                let result = params.result.ok_or_else(|| {
                    CodecError::Decode(format!("notification '{method}' has no result"))
                })?;

                Ok(InboundFrame::Notification {
                    method,
                    subscription: params.subscription,
                    result: raw_bytes(&result),
                })
            }
            _ => Err(CodecError::Decode(
                "frame is neither a reply nor a notification".to_string(),
            )),
        }
    }

    fn decode_payload<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(payload).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
