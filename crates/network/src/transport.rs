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

//! The transport boundary the RPC engine is written against.
//!
//! A persistent transport is driven through three commands (connect, disconnect, send)
//! and reports back through [`TransportEvent`]s. A single-shot transport instead exposes
//! one request/reply round trip per call.

use std::{collections::HashMap, fmt::Debug, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::error::TransportError;

/// Close code reported for an orderly shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code reported when the connection ended without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Event raised by a persistent transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connection was established.
    Connected,
    /// The established connection ended. Raised exactly once per connection.
    Disconnected { code: u16 },
    /// A complete frame was received.
    Data(Bytes),
    /// A transport level failure that does not by itself end the connection.
    Error(TransportError),
}

/// Sending half used by transports to report [`TransportEvent`]s.
pub type TransportEventSender = UnboundedSender<TransportEvent>;

/// Receiving half consumed by the engine.
pub type TransportEventReceiver = UnboundedReceiver<TransportEvent>;

/// Creates a channel for transport events.
#[must_use]
pub fn transport_event_channel() -> (TransportEventSender, TransportEventReceiver) {
    unbounded_channel()
}

/// A persistent, bidirectional transport multiplexing many calls over one connection.
#[async_trait]
pub trait Transport: Debug + Send + Sync + 'static {
    /// Opens a connection, reporting its lifecycle and inbound frames on `events`.
    ///
    /// On success `Connected` has been emitted before this returns. `send` must
    /// already succeed by the time `Connected` is observed, and no `Data` frame may
    /// precede it. On failure no events are emitted for the attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    async fn connect(&self, events: TransportEventSender) -> Result<(), TransportError>;

    /// Closes the active connection, if any.
    async fn disconnect(&self);

    /// Queues a frame for delivery on the active connection.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] when no connection is open.
    fn send(&self, frame: Bytes) -> Result<(), TransportError>;
}

/// Reply to a single-shot request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    /// The HTTP status code.
    pub status: u16,
    /// The response headers.
    pub headers: HashMap<String, String>,
    /// The raw response body.
    pub body: Bytes,
}

impl HttpResponse {
    /// Returns whether the status is in the 2xx range.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// A one-shot transport: every request owns its own round trip.
#[async_trait]
pub trait RequestTransport: Debug + Send + Sync + 'static {
    /// Sends `body` and waits for the reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be delivered or does not complete within
    /// `timeout`.
    async fn request(&self, body: Bytes, timeout: Duration) -> Result<HttpResponse, TransportError>;
}
