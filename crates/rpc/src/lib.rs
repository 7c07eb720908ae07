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

//! Multiplexed call correlation and subscription engine for blockchain node RPC.
//!
//! The `meridian-rpc` crate turns a transport from `meridian-network` into a client
//! that many tasks can share:
//!
//! - Concurrent calls over one connection, matched to replies by request id.
//! - Subscriptions as cancellable streams of decoded notifications.
//! - Timeouts, a reconnect queue and automatic reconnection with backoff.
//! - A pluggable payload codec, with JSON-RPC 2.0 as the stock implementation.
//! - A single-shot client for request-per-exchange transports such as HTTP.
//!
//! All mutable engine state lives in one task; callers only exchange messages with it.

#![warn(rustc::all)]
#![deny(unsafe_code)]
#![deny(nonstandard_style)]
#![deny(missing_debug_implementations)]
#![deny(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod client;
pub mod codec;
pub mod config;
pub mod correlator;
mod engine;
pub mod error;
pub mod http;
pub mod messages;
pub mod stream;
pub mod subscription;
pub mod testing;

pub use crate::{
    client::{CallMode, CallOptions, RpcClient},
    codec::{JsonRpcCodec, RpcCodec},
    config::RpcClientConfig,
    error::{RpcError, RpcResult},
    http::HttpRpcClient,
    stream::{Subscription, SubscriptionHandle},
};
