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

//! Error types for transport operations.

use thiserror::Error;

/// Error type for transport failures.
///
/// Errors are cloneable so a single failure can be fanned out to every caller waiting
/// on the affected connection.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// No connection is currently open.
    #[error("Transport not connected")]
    NotConnected,

    /// Opening the connection failed.
    #[error("Connect failed: {0}")]
    Connect(String),

    /// Opening the connection did not complete in time.
    #[error("Connect timed out after {0}ms")]
    ConnectTimeout(u64),

    /// Writing a frame to the connection failed.
    #[error("Send failed: {0}")]
    Send(String),

    /// Reading from the connection failed.
    #[error("Receive failed: {0}")]
    Receive(String),

    /// A single-shot request did not complete in time.
    #[error("Request timed out after {0}ms")]
    RequestTimeout(u64),

    /// A single-shot request failed below the HTTP layer.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Invalid configuration was supplied.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connect(error.to_string())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        Self::Http(error.to_string())
    }
}
