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

//! Transport machinery for the Meridian RPC engine.
//!
//! The `meridian-network` crate provides the connection layer the RPC engine sits on:
//!
//! - The [`transport::Transport`] trait for bidirectional streaming connections.
//! - The [`transport::RequestTransport`] trait for single-shot request/response exchanges.
//! - A WebSocket implementation with heartbeats and a single disconnect report per connection.
//! - An HTTP implementation on top of reqwest.
//! - Exponential backoff with jitter for reconnect scheduling.
//! - Connection state modelling shared with the engine supervisor.

#![warn(rustc::all)]
#![deny(unsafe_code)]
#![deny(nonstandard_style)]
#![deny(missing_debug_implementations)]
#![deny(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod backoff;
pub mod error;
pub mod http;
pub mod mode;
pub mod tls;
pub mod transport;
pub mod websocket;
