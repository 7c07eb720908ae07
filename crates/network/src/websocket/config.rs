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

//! Configuration for the WebSocket transport.

/// Configuration for [`crate::websocket::WebSocketTransport`].
#[derive(Clone, Debug)]
pub struct WebSocketTransportConfig {
    /// The URL to connect to.
    pub url: String,
    /// Extra headers sent with the handshake request.
    pub headers: Vec<(String, String)>,
    /// The optional heartbeat interval (seconds).
    pub heartbeat: Option<u64>,
    /// The optional heartbeat text message, a ping frame is sent when absent.
    pub heartbeat_msg: Option<String>,
    /// The timeout (milliseconds) for establishing a connection.
    pub connect_timeout_ms: Option<u64>,
    /// How long (milliseconds) a caller-initiated close waits for the close handshake.
    pub close_timeout_ms: Option<u64>,
}

impl WebSocketTransportConfig {
    /// Creates a config for `url` with default settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            heartbeat: None,
            heartbeat_msg: None,
            connect_timeout_ms: None,
            close_timeout_ms: None,
        }
    }
}
