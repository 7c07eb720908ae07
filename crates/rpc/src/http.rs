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

//! Single-shot RPC client: one request per exchange over a [`RequestTransport`].

use std::{
    fmt::Debug,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use meridian_network::{error::TransportError, transport::RequestTransport};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    codec::{JsonRpcCodec, RpcCodec},
    error::{RpcError, RpcResult, TimeoutKind},
    messages::{InboundFrame, RequestFrame, RequestId},
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_ERROR_BODY_LEN: usize = 500;

/// RPC client for single-shot transports.
///
/// Each call owns its own round trip, so request ids only need to be unique enough to
/// read well in logs.
pub struct HttpRpcClient<C: RpcCodec = JsonRpcCodec> {
    transport: Arc<dyn RequestTransport>,
    codec: C,
    next_id: AtomicU64,
    timeout: Duration,
}

impl<C: RpcCodec> Debug for HttpRpcClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(HttpRpcClient))
            .field("transport", &self.transport)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= MAX_ERROR_BODY_LEN {
        return text.into_owned();
    }

    let mut end = MAX_ERROR_BODY_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} bytes total)", &text[..end], text.len())
}

impl<C: RpcCodec> HttpRpcClient<C> {
    /// Creates a new [`HttpRpcClient`] with a default timeout of 60 seconds.
    #[must_use]
    pub fn new(transport: Arc<dyn RequestTransport>, codec: C) -> Self {
        Self {
            transport,
            codec,
            next_id: AtomicU64::new(1),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the default per-call timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn next_id(&self) -> RequestId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        // Never hand out 0 after wrapping
        if id == 0 {
            return RequestId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        }
        RequestId::new(id)
    }

    /// Calls `method` with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails, see [`Self::call_with_timeout`].
    pub async fn call<P, R>(&self, method: &str, params: &P) -> RpcResult<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.call_with_timeout(method, params, self.timeout).await
    }

    /// Calls `method` and decodes the result.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails, the transport fails or times out, the
    /// status is not 2xx, the reply cannot be decoded, or the server returns an error.
    pub async fn call_with_timeout<P, R>(
        &self,
        method: &str,
        params: &P,
        timeout: Duration,
    ) -> RpcResult<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let id = self.next_id();
        let params = self.codec.encode_params(params)?;
        let body = self.codec.encode_request(&RequestFrame {
            id,
            method,
            params: &params,
        })?;

        tracing::trace!("Request {id} '{method}'");
        let response = self
            .transport
            .request(body, timeout)
            .await
            .map_err(|e| match e {
                TransportError::RequestTimeout(_) => RpcError::Timeout {
                    id,
                    kind: TimeoutKind::Call,
                },
                other => RpcError::Transport(other),
            })?;

        if !response.is_success() {
            return Err(RpcError::HttpStatus {
                status: response.status,
                body: truncate_body(&response.body),
            });
        }

        match self.codec.decode_frame(&response.body)? {
            InboundFrame::Reply {
                id: reply_id,
                outcome,
            } => {
                if reply_id != id {
                    tracing::debug!("Reply id {reply_id} does not match request id {id}");
                }
                let payload = outcome.map_err(RpcError::from)?;
                Ok(self.codec.decode_payload(&payload)?)
            }
            InboundFrame::Notification { method, .. } => Err(RpcError::Decode(format!(
                "expected a reply, received notification '{method}'"
            ))),
        }
    }
}
