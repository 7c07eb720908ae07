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

//! The public client over a persistent transport.

use std::{fmt::Debug, sync::Arc, time::Duration};

use meridian_network::{mode::ConnectionState, transport::Transport};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use ustr::Ustr;

use crate::{
    codec::{JsonRpcCodec, RpcCodec},
    config::RpcClientConfig,
    engine::{EngineCommand, spawn_engine},
    error::{RpcError, RpcResult},
    stream::{Subscription, SubscriptionHandle},
};

/// What a call does when submitted while not connected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum CallMode {
    /// Queue the call until reconnected or the reconnect-wait deadline elapses.
    #[default]
    WaitForReconnect,
    /// Fail immediately with [`RpcError::Disconnected`].
    FailFast,
}

/// Per-call options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Reply timeout, the configured default when `None`.
    pub timeout: Option<Duration>,
    pub mode: CallMode,
}

impl CallOptions {
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub const fn with_mode(mut self, mode: CallMode) -> Self {
        self.mode = mode;
        self
    }
}

struct ClientInner<C> {
    commands: mpsc::UnboundedSender<EngineCommand>,
    state: watch::Receiver<ConnectionState>,
    errors: broadcast::Sender<RpcError>,
    codec: Arc<C>,
    config: RpcClientConfig,
}

/// Multiplexed RPC client over a persistent [`Transport`].
///
/// Cheap to clone; all clones share one engine task. The engine shuts down once every
/// clone has been dropped, failing outstanding calls with [`RpcError::Closed`].
pub struct RpcClient<C: RpcCodec = JsonRpcCodec> {
    inner: Arc<ClientInner<C>>,
}

impl<C: RpcCodec> Clone for RpcClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: RpcCodec> Debug for RpcClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(RpcClient))
            .field("state", &*self.inner.state.borrow())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl<C: RpcCodec> RpcClient<C> {
    /// Creates a new [`RpcClient`] and spawns its engine on the current tokio runtime.
    ///
    /// The client starts disconnected, call [`Self::connect`] to open the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid.
    pub fn new(
        config: RpcClientConfig,
        transport: Arc<dyn Transport>,
        codec: C,
    ) -> RpcResult<Self> {
        let codec = Arc::new(codec);
        let engine = spawn_engine(config.clone(), transport, codec.clone())?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                commands: engine.commands,
                state: engine.state,
                errors: engine.errors,
                codec,
                config,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &RpcClientConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn codec(&self) -> &C {
        &self.inner.codec
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Returns whether the client is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    /// Waits until the connection reaches `state`, returning whether it did within
    /// `timeout`.
    pub async fn wait_for_state(&self, state: ConnectionState, timeout: Duration) -> bool {
        let mut rx = self.inner.state.clone();
        matches!(
            tokio::time::timeout(timeout, rx.wait_for(|current| *current == state)).await,
            Ok(Ok(_))
        )
    }

    /// Subscribes to failures that have no addressable caller: replies to unknown
    /// request ids, notifications for unknown subscriptions, malformed frames,
    /// transport errors and exhausted reconnects.
    #[must_use]
    pub fn errors(&self) -> broadcast::Receiver<RpcError> {
        self.inner.errors.subscribe()
    }

    fn send_command(&self, command: EngineCommand) -> RpcResult<()> {
        self.inner
            .commands
            .send(command)
            .map_err(|_| RpcError::Closed)
    }

    /// Opens the transport, resolving once connected.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the connection cannot be established. A failed
    /// explicit connect is not retried.
    pub async fn connect(&self) -> RpcResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send_command(EngineCommand::Connect { reply: tx })?;
        rx.await.map_err(|_| RpcError::Closed)?
    }

    /// Closes the transport, resolving once disconnected. Does not trigger a reconnect.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine has shut down.
    pub async fn disconnect(&self) -> RpcResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send_command(EngineCommand::Disconnect { reply: tx })?;
        rx.await.map_err(|_| RpcError::Closed)
    }

    /// Calls `method` with the default options.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails, see [`Self::call_with`].
    pub async fn call<P, R>(&self, method: &str, params: &P) -> RpcResult<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.call_with(method, params, CallOptions::default()).await
    }

    /// Calls `method` and decodes the result.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails, the server replies with an error, the
    /// result cannot be decoded, the call times out or the connection drops.
    pub async fn call_with<P, R>(
        &self,
        method: &str,
        params: &P,
        options: CallOptions,
    ) -> RpcResult<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = self.inner.codec.encode_params(params)?;
        let (tx, rx) = oneshot::channel();

        self.send_command(EngineCommand::Call {
            method: Ustr::from(method),
            params,
            options,
            reply: tx,
        })?;

        let payload = rx.await.map_err(|_| RpcError::Closed)??;
        Ok(self.inner.codec.decode_payload(&payload)?)
    }

    /// Subscribes with the default options, see [`Self::subscribe_with`].
    ///
    /// # Errors
    ///
    /// Returns an error if the subscribe call fails.
    pub async fn subscribe<P, T>(
        &self,
        method: &str,
        params: &P,
        unsubscribe_method: &str,
    ) -> RpcResult<Subscription<T, C>>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.subscribe_with(method, params, unsubscribe_method, CallOptions::default())
            .await
    }

    /// Issues a subscribe call and resolves once the server acknowledges it.
    ///
    /// The timeout defaults to the subscription acknowledgement timeout. Dropping the
    /// returned future before the acknowledgement cancels the subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscribe call fails, including
    /// [`RpcError::DuplicateSubscription`] when the server hands out an id that is
    /// already registered.
    pub async fn subscribe_with<P, T>(
        &self,
        method: &str,
        params: &P,
        unsubscribe_method: &str,
        options: CallOptions,
    ) -> RpcResult<Subscription<T, C>>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let params = self.inner.codec.encode_params(params)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (tx, rx) = oneshot::channel();

        self.send_command(EngineCommand::Subscribe {
            method: Ustr::from(method),
            params,
            unsubscribe_method: Ustr::from(unsubscribe_method),
            options,
            events: events_tx,
            reply: tx,
        })?;

        let ack = rx.await.map_err(|_| RpcError::Closed)??;

        Ok(Subscription::new(
            ack,
            events_rx,
            self.inner.codec.clone(),
            self.inner.commands.downgrade(),
        ))
    }

    /// Subscribes and invokes `handler` for every item on the response runtime.
    ///
    /// The handler sees decoded notifications and, last, the error that ended the
    /// subscription (if any). Dropping the returned handle tears the subscription
    /// down.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscribe call fails.
    pub async fn subscribe_with_handler<P, T, F>(
        &self,
        method: &str,
        params: &P,
        unsubscribe_method: &str,
        handler: F,
    ) -> RpcResult<SubscriptionHandle>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned + Send + 'static,
        F: FnMut(RpcResult<T>) + Send + 'static,
    {
        let subscription = self
            .subscribe::<P, T>(method, params, unsubscribe_method)
            .await?;

        let runtime = self
            .inner
            .config
            .response_runtime
            .clone()
            .unwrap_or_else(tokio::runtime::Handle::current);

        Ok(SubscriptionHandle::spawn(subscription, &runtime, handler))
    }
}
