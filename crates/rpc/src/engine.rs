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

//! The engine task: the single owner of all correlation, subscription and connection
//! state.
//!
//! **Design**:
//! - Callers talk to the engine over a command channel and wait on oneshot replies.
//! - Transport events arrive on their own channel, supervisor timers on a third.
//! - A sweep interval enforces per-call and reconnect-wait deadlines.
//! - Nothing blocks inside the loop: connects and disconnects run in spawned tasks
//!   that report back through the channels.

use std::{sync::Arc, time::Duration};

use ahash::AHashSet;
use bytes::Bytes;
use meridian_network::{
    backoff::ExponentialBackoff,
    error::TransportError,
    mode::ConnectionState,
    transport::{
        CLOSE_NORMAL, Transport, TransportEvent, TransportEventReceiver, TransportEventSender,
        transport_event_channel,
    },
};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use ustr::Ustr;

use crate::{
    client::{CallMode, CallOptions},
    codec::RpcCodec,
    config::RpcClientConfig,
    correlator::{CallCorrelator, CallKind, PendingCall, QueuedCall, RequestIdAllocator},
    error::{RpcError, RpcResult, TimeoutKind},
    messages::{InboundFrame, RequestFrame, RequestId, RpcErrorObject, SubscriptionId},
    subscription::{
        AckOutcome, CancelOutcome, DispatchOutcome, Registration, SubscriptionAck,
        SubscriptionEventSender, SubscriptionTable,
    },
};

const ERROR_CHANNEL_CAPACITY: usize = 256;

/// Requests from client handles to the engine.
#[derive(Debug)]
pub(crate) enum EngineCommand {
    Call {
        method: Ustr,
        params: Bytes,
        options: CallOptions,
        reply: oneshot::Sender<RpcResult<Bytes>>,
    },
    Subscribe {
        method: Ustr,
        params: Bytes,
        unsubscribe_method: Ustr,
        options: CallOptions,
        events: SubscriptionEventSender,
        reply: oneshot::Sender<RpcResult<SubscriptionAck>>,
    },
    Unsubscribe {
        call_id: RequestId,
        reply: Option<oneshot::Sender<RpcResult<()>>>,
    },
    Connect {
        reply: oneshot::Sender<RpcResult<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// Reports from tasks the engine spawned. `attempt` discards reports from attempts
/// that have since been superseded or aborted.
#[derive(Debug)]
enum SupervisorEvent {
    ConnectFailed { attempt: u64, error: TransportError },
    RetryConnect { attempt: u64 },
    DisconnectComplete,
}

/// Channels a client uses to reach a running engine.
#[derive(Debug)]
pub(crate) struct EngineHandle {
    pub commands: mpsc::UnboundedSender<EngineCommand>,
    pub state: watch::Receiver<ConnectionState>,
    pub errors: broadcast::Sender<RpcError>,
}

/// Spawns the engine task on the current runtime.
pub(crate) fn spawn_engine<C: RpcCodec>(
    config: RpcClientConfig,
    transport: Arc<dyn Transport>,
    codec: Arc<C>,
) -> RpcResult<EngineHandle> {
    config.validate()?;

    let backoff = config.reconnect_backoff()?;
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let (errors_tx, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
    let (events_tx, events_rx) = transport_event_channel();
    let (supervisor_tx, supervisor_rx) = mpsc::unbounded_channel();

    let engine = RpcEngine {
        ids: RequestIdAllocator::new(config.max_request_id),
        config,
        transport,
        codec,
        state: ConnectionState::Disconnected,
        state_tx,
        errors: errors_tx.clone(),
        correlator: CallCorrelator::new(),
        subscriptions: SubscriptionTable::new(),
        backoff,
        events_tx,
        supervisor_tx,
        connect_waiters: Vec::new(),
        disconnect_waiters: Vec::new(),
        attempt: 0,
        explicit_connect: false,
        suppress_reconnect: false,
        connect_requested: false,
        connect_task: None,
        retry_task: None,
    };

    tokio::spawn(engine.run(command_rx, events_rx, supervisor_rx));

    Ok(EngineHandle {
        commands: command_tx,
        state: state_rx,
        errors: errors_tx,
    })
}

struct RpcEngine<C: RpcCodec> {
    config: RpcClientConfig,
    transport: Arc<dyn Transport>,
    codec: Arc<C>,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    errors: broadcast::Sender<RpcError>,
    ids: RequestIdAllocator,
    correlator: CallCorrelator,
    subscriptions: SubscriptionTable,
    backoff: ExponentialBackoff,
    events_tx: TransportEventSender,
    supervisor_tx: mpsc::UnboundedSender<SupervisorEvent>,
    connect_waiters: Vec<oneshot::Sender<RpcResult<()>>>,
    disconnect_waiters: Vec<oneshot::Sender<()>>,
    attempt: u64,
    /// Whether the current connect attempt was asked for by a caller.
    explicit_connect: bool,
    /// Set by a caller-initiated disconnect, consumed by the next drop.
    suppress_reconnect: bool,
    /// A connect arrived while disconnecting, start it once the drop completes.
    connect_requested: bool,
    connect_task: Option<JoinHandle<()>>,
    retry_task: Option<JoinHandle<()>>,
}

impl<C: RpcCodec> RpcEngine<C> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<EngineCommand>,
        mut events: TransportEventReceiver,
        mut supervisor: mpsc::UnboundedReceiver<SupervisorEvent>,
    ) {
        tracing::debug!("Started task 'engine'");

        let mut sweep = tokio::time::interval(self.config.sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                // Transport events go first so a drop is always observed before the
                // supervisor report of the disconnect that caused it
                Some(event) = events.recv() => self.handle_transport_event(event),
                Some(event) = supervisor.recv() => self.handle_supervisor_event(event),
                command = commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    self.handle_command(command);
                }
                _ = sweep.tick() => self.sweep(Instant::now()),
            }
        }

        self.shutdown().await;
        tracing::debug!("Completed task 'engine'");
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::debug!("Connection state {} -> {state}", self.state);
        }
        self.state = state;
        self.state_tx.send_replace(state);
    }

    /// Surfaces a failure with no addressable caller.
    fn report(&self, error: RpcError) {
        tracing::warn!("{error}");
        // No subscribers is fine, the log line above is the record
        let _ = self.errors.send(error);
    }

    /// Allocates an id not used by any outstanding call or live subscription, since
    /// subscriptions are addressed by their subscribe call id for their whole life.
    fn allocate_id(&mut self) -> RpcResult<RequestId> {
        let correlator = &self.correlator;
        let subscriptions = &self.subscriptions;
        self.ids
            .allocate(|id| correlator.contains(id) || subscriptions.holds_call(id))
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Call {
                method,
                params,
                options,
                reply,
            } => {
                let id = match self.allocate_id() {
                    Ok(id) => id,
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        return;
                    }
                };
                let timeout = options.timeout.unwrap_or(self.config.call_timeout());
                self.submit(
                    id,
                    method,
                    &params,
                    timeout,
                    options.mode,
                    CallKind::Call { reply },
                );
            }
            EngineCommand::Subscribe {
                method,
                params,
                unsubscribe_method,
                options,
                events,
                reply,
            } => self.handle_subscribe(method, &params, unsubscribe_method, options, events, reply),
            EngineCommand::Unsubscribe { call_id, reply } => {
                self.handle_unsubscribe(call_id, reply);
            }
            EngineCommand::Connect { reply } => self.handle_connect(reply),
            EngineCommand::Disconnect { reply } => self.handle_disconnect(reply),
        }
    }

    /// Encodes and either sends or queues a call. Returns whether the call is now
    /// outstanding; when it is not, `kind` has already been resolved.
    fn submit(
        &mut self,
        id: RequestId,
        method: Ustr,
        params: &[u8],
        timeout: Duration,
        mode: CallMode,
        kind: CallKind,
    ) -> bool {
        let frame = match self.codec.encode_request(&RequestFrame {
            id,
            method: method.as_str(),
            params,
        }) {
            Ok(frame) => frame,
            Err(e) => {
                kind.fail(e.into());
                return false;
            }
        };

        let now = Instant::now();

        if self.state.is_connected() {
            let call = PendingCall {
                id,
                method,
                kind,
                deadline: now + timeout,
            };
            if let Err(call) = self.correlator.register_pending(call) {
                call.kind.fail(RpcError::IdSpaceExhausted);
                return false;
            }

            tracing::trace!("Sending request {id} '{method}'");
            if let Err(e) = self.transport.send(frame) {
                tracing::warn!("Failed to send request {id} '{method}': {e}");
                if let Some(call) = self.correlator.resolve(id) {
                    self.fail_call(call.id, call.kind, RpcError::Transport(e));
                }
                return false;
            }
            return true;
        }

        match mode {
            CallMode::WaitForReconnect => {
                let call = QueuedCall {
                    id,
                    method,
                    frame,
                    kind,
                    timeout,
                    deadline: now + self.config.reconnect_wait_timeout(),
                };
                if let Err(call) = self.correlator.enqueue(call) {
                    call.kind.fail(RpcError::IdSpaceExhausted);
                    return false;
                }
                tracing::debug!("Queued request {id} '{method}' until connected");
                true
            }
            CallMode::FailFast => {
                tracing::debug!("Rejected request {id} '{method}' while {}", self.state);
                kind.fail(RpcError::Disconnected { code: None });
                false
            }
        }
    }

    fn fail_call(&mut self, id: RequestId, kind: CallKind, error: RpcError) {
        if matches!(kind, CallKind::Subscribe { .. }) {
            self.subscriptions.remove_provisional(id);
        }
        kind.fail(error);
    }

    fn handle_subscribe(
        &mut self,
        method: Ustr,
        params: &[u8],
        unsubscribe_method: Ustr,
        options: CallOptions,
        events: SubscriptionEventSender,
        reply: oneshot::Sender<RpcResult<SubscriptionAck>>,
    ) {
        let id = match self.allocate_id() {
            Ok(id) => id,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        let registration = Registration::new(id, method, unsubscribe_method, events);
        if self.subscriptions.register(registration).is_err() {
            let _ = reply.send(Err(RpcError::IdSpaceExhausted));
            return;
        }

        let timeout = options
            .timeout
            .unwrap_or(self.config.subscription_ack_timeout());
        let kind = CallKind::Subscribe { reply };
        if !self.submit(id, method, params, timeout, options.mode, kind) {
            self.subscriptions.remove_provisional(id);
        }
    }

    fn handle_unsubscribe(
        &mut self,
        call_id: RequestId,
        reply: Option<oneshot::Sender<RpcResult<()>>>,
    ) {
        match self.subscriptions.cancel(call_id) {
            CancelOutcome::Removed(registration) => self.send_unsubscribe(registration, reply),
            CancelOutcome::Deferred => {
                tracing::debug!("Subscription {call_id} cancelled before acknowledgement");
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
            }
            CancelOutcome::NotFound => {
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
            }
        }
    }

    fn send_unsubscribe(
        &mut self,
        registration: Registration,
        reply: Option<oneshot::Sender<RpcResult<()>>>,
    ) {
        let Some(subscription) = registration.subscription.clone() else {
            if let Some(reply) = reply {
                let _ = reply.send(Ok(()));
            }
            return;
        };

        let params = match self.codec.encode_params(&[subscription.as_str()]) {
            Ok(params) => params,
            Err(e) => {
                CallKind::Unsubscribe {
                    subscription,
                    reply,
                }
                .fail(e.into());
                return;
            }
        };

        let id = match self.allocate_id() {
            Ok(id) => id,
            Err(e) => {
                CallKind::Unsubscribe {
                    subscription,
                    reply,
                }
                .fail(e);
                return;
            }
        };

        tracing::debug!(
            "Unsubscribing {subscription} via '{}'",
            registration.unsubscribe_method
        );

        // The server drops its subscriptions with the connection, so never queue
        let timeout = self.config.call_timeout();
        self.submit(
            id,
            registration.unsubscribe_method,
            &params,
            timeout,
            CallMode::FailFast,
            CallKind::Unsubscribe {
                subscription,
                reply,
            },
        );
    }

    fn handle_connect(&mut self, reply: oneshot::Sender<RpcResult<()>>) {
        match self.state {
            ConnectionState::Connected => {
                let _ = reply.send(Ok(()));
            }
            ConnectionState::Connecting => self.connect_waiters.push(reply),
            ConnectionState::Disconnecting => {
                self.connect_waiters.push(reply);
                self.connect_requested = true;
            }
            ConnectionState::Disconnected => {
                self.connect_waiters.push(reply);
                self.explicit_connect = true;
                self.set_state(ConnectionState::Connecting);
                self.start_connect();
            }
        }
    }

    fn handle_disconnect(&mut self, reply: oneshot::Sender<()>) {
        match self.state {
            ConnectionState::Disconnected => {
                let _ = reply.send(());
            }
            ConnectionState::Disconnecting => self.disconnect_waiters.push(reply),
            ConnectionState::Connecting => {
                tracing::debug!("Disconnect requested while connecting, aborting attempt");
                self.abort_connect();
                self.explicit_connect = false;
                self.set_state(ConnectionState::Disconnected);
                self.fail_connect_waiters(&RpcError::Disconnected { code: None });
                let _ = reply.send(());
            }
            ConnectionState::Connected => {
                self.suppress_reconnect = true;
                self.set_state(ConnectionState::Disconnecting);
                self.disconnect_waiters.push(reply);

                let transport = self.transport.clone();
                let supervisor = self.supervisor_tx.clone();
                tokio::spawn(async move {
                    transport.disconnect().await;
                    let _ = supervisor.send(SupervisorEvent::DisconnectComplete);
                });
            }
        }
    }

    fn start_connect(&mut self) {
        self.attempt += 1;
        let attempt = self.attempt;
        let transport = self.transport.clone();
        let events = self.events_tx.clone();
        let supervisor = self.supervisor_tx.clone();

        tracing::debug!("Connect attempt {attempt}");
        self.connect_task = Some(tokio::spawn(async move {
            if let Err(error) = transport.connect(events).await {
                let _ = supervisor.send(SupervisorEvent::ConnectFailed { attempt, error });
            }
        }));
    }

    fn schedule_reconnect(&mut self) {
        match self.backoff.next_delay() {
            Some(delay) if delay.is_zero() => self.start_connect(),
            Some(delay) => {
                self.attempt += 1;
                let attempt = self.attempt;
                let supervisor = self.supervisor_tx.clone();

                tracing::warn!("Reconnecting in {delay:?}");
                self.retry_task = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = supervisor.send(SupervisorEvent::RetryConnect { attempt });
                }));
            }
            None => {
                let attempts = self.backoff.attempts();
                tracing::error!("Reconnect gave up after {attempts} attempts");
                self.set_state(ConnectionState::Disconnected);
                let error = RpcError::ReconnectExhausted { attempts };
                self.fail_connect_waiters(&error);
                self.report(error);
            }
        }
    }

    fn abort_connect(&mut self) {
        // Reports already in flight carry the old attempt and are discarded
        self.attempt += 1;

        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        if let Some(task) = self.retry_task.take() {
            task.abort();
        }
    }

    fn fail_connect_waiters(&mut self, error: &RpcError) {
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
    }

    fn handle_supervisor_event(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::ConnectFailed { attempt, error } => {
                if attempt != self.attempt || !self.state.is_connecting() {
                    tracing::debug!("Ignoring stale connect failure: {error}");
                    return;
                }
                self.connect_task = None;
                tracing::warn!("Connect attempt {attempt} failed: {error}");

                let error = RpcError::Transport(error);
                self.fail_connect_waiters(&error);

                if self.explicit_connect || !self.config.auto_reconnect {
                    self.explicit_connect = false;
                    self.set_state(ConnectionState::Disconnected);
                } else {
                    self.report(error);
                    self.schedule_reconnect();
                }
            }
            SupervisorEvent::RetryConnect { attempt } => {
                self.retry_task = None;
                if attempt == self.attempt && self.state.is_connecting() {
                    self.start_connect();
                }
            }
            SupervisorEvent::DisconnectComplete => {
                // The transport always reports the drop first, this only covers
                // transports that close without reporting
                if self.state.is_disconnecting() {
                    self.handle_disconnected(CLOSE_NORMAL);
                }
            }
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.handle_connected(),
            TransportEvent::Disconnected { code } => self.handle_disconnected(code),
            TransportEvent::Data(frame) => self.handle_frame(&frame),
            TransportEvent::Error(e) => self.report(RpcError::Transport(e)),
        }
    }

    fn handle_connected(&mut self) {
        match self.state {
            ConnectionState::Connecting => {
                self.connect_task = None;
                self.explicit_connect = false;
                self.backoff.reset();
                self.set_state(ConnectionState::Connected);
                tracing::info!("Connected");

                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
                self.flush_queue();
            }
            ConnectionState::Disconnected => {
                // An aborted attempt got through, nobody wants this connection
                tracing::debug!("Closing connection from an aborted attempt");
                let transport = self.transport.clone();
                tokio::spawn(async move {
                    transport.disconnect().await;
                });
            }
            state => tracing::warn!("Unexpected connect event while {state}"),
        }
    }

    fn flush_queue(&mut self) {
        let frames = self.correlator.flush_queue(Instant::now());
        if frames.is_empty() {
            return;
        }

        tracing::debug!("Flushing {} queued requests", frames.len());
        for (id, frame) in frames {
            if let Err(e) = self.transport.send(frame) {
                tracing::warn!("Failed to send queued request {id}: {e}");
                if let Some(call) = self.correlator.resolve(id) {
                    self.fail_call(call.id, call.kind, RpcError::Transport(e));
                }
            }
        }
    }

    fn handle_disconnected(&mut self, code: u16) {
        if !(self.state.is_connected() || self.state.is_disconnecting()) {
            tracing::debug!("Ignoring disconnect (code {code}) while {}", self.state);
            return;
        }

        tracing::info!(code, "Disconnected");
        let error = RpcError::Disconnected { code: Some(code) };

        // Queued subscribes have not reached the server yet and keep waiting
        let queued: AHashSet<RequestId> = self.correlator.queued_ids().collect();
        for registration in self.subscriptions.drain(&queued) {
            registration.terminate(error.clone());
        }
        for call in self.correlator.drain_pending() {
            self.fail_call(call.id, call.kind, error.clone());
        }

        self.set_state(ConnectionState::Disconnected);
        for waiter in self.disconnect_waiters.drain(..) {
            let _ = waiter.send(());
        }

        let suppressed = std::mem::take(&mut self.suppress_reconnect);

        if std::mem::take(&mut self.connect_requested) {
            self.explicit_connect = true;
            self.set_state(ConnectionState::Connecting);
            self.start_connect();
        } else if suppressed {
            tracing::debug!("Caller-initiated disconnect, not reconnecting");
        } else if self.config.auto_reconnect {
            self.explicit_connect = false;
            self.set_state(ConnectionState::Connecting);
            self.schedule_reconnect();
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        match self.codec.decode_frame(frame) {
            Ok(InboundFrame::Reply { id, outcome }) => self.handle_reply(id, outcome),
            Ok(InboundFrame::Notification {
                method,
                subscription,
                result,
            }) => self.handle_notification(&method, &subscription, result),
            Err(e) => self.report(e.into()),
        }
    }

    fn handle_reply(&mut self, id: RequestId, outcome: Result<Bytes, RpcErrorObject>) {
        let Some(call) = self.correlator.resolve(id) else {
            self.report(RpcError::UnknownRequestId(id));
            return;
        };
        tracing::trace!("Received reply {id} for '{}'", call.method);

        match call.kind {
            CallKind::Call { reply } => {
                let _ = reply.send(outcome.map_err(RpcError::from));
            }
            CallKind::Subscribe { reply } => self.complete_subscribe(id, outcome, reply),
            CallKind::Unsubscribe {
                subscription,
                reply,
            } => {
                let result = outcome
                    .map_err(RpcError::from)
                    .and_then(|payload| {
                        self.codec
                            .decode_payload::<bool>(&payload)
                            .map_err(RpcError::from)
                    })
                    .and_then(|accepted| {
                        if accepted {
                            Ok(())
                        } else {
                            Err(RpcError::UnsubscribeFailed(subscription.clone()))
                        }
                    });

                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => match result {
                        Ok(()) => tracing::debug!("Unsubscribed {subscription}"),
                        Err(e) => tracing::warn!("Unsubscribe of {subscription} failed: {e}"),
                    },
                }
            }
        }
    }

    fn complete_subscribe(
        &mut self,
        id: RequestId,
        outcome: Result<Bytes, RpcErrorObject>,
        reply: oneshot::Sender<RpcResult<SubscriptionAck>>,
    ) {
        let subscription = match outcome.map_err(RpcError::from).and_then(|payload| {
            self.codec
                .decode_payload::<SubscriptionId>(&payload)
                .map_err(RpcError::from)
        }) {
            Ok(subscription) => subscription,
            Err(e) => {
                self.subscriptions.remove_provisional(id);
                let _ = reply.send(Err(e));
                return;
            }
        };

        // Nobody is waiting for the ack any more, same as cancelling before it
        if reply.is_closed() {
            let _ = self.subscriptions.cancel(id);
        }

        match self.subscriptions.acknowledge(id, subscription.clone()) {
            AckOutcome::Active => {
                tracing::debug!("Subscribed {subscription} (request {id})");
                let ack = SubscriptionAck {
                    call_id: id,
                    subscription,
                };
                if reply.send(Ok(ack)).is_err()
                    && let CancelOutcome::Removed(registration) = self.subscriptions.cancel(id)
                {
                    self.send_unsubscribe(registration, None);
                }
            }
            AckOutcome::CancelledBeforeAck(registration) => {
                tracing::debug!("Subscription {subscription} was cancelled before its ack");
                self.send_unsubscribe(registration, None);
            }
            AckOutcome::Duplicate(_) => {
                tracing::error!("Server returned duplicate subscription id {subscription}");
                let _ = reply.send(Err(RpcError::DuplicateSubscription(subscription)));
            }
            AckOutcome::Missing => {
                tracing::warn!("No registration for subscribe request {id}");
                let _ = reply.send(Err(RpcError::UnknownRequestId(id)));
            }
        }
    }

    fn handle_notification(&mut self, method: &str, subscription: &SubscriptionId, result: Bytes) {
        tracing::trace!("Received notification '{method}' for {subscription}");

        match self.subscriptions.dispatch(subscription, result) {
            DispatchOutcome::Delivered => {}
            DispatchOutcome::ConsumerGone(registration) => {
                tracing::debug!("Consumer of {subscription} went away, unsubscribing");
                self.send_unsubscribe(registration, None);
            }
            DispatchOutcome::Unknown => {
                self.report(RpcError::UnknownSubscription(subscription.clone()));
            }
        }
    }

    fn sweep(&mut self, now: Instant) {
        for call in self.correlator.take_expired_queued(now) {
            tracing::warn!(
                "Request {} '{}' timed out waiting for reconnect",
                call.id,
                call.method
            );
            let error = RpcError::Timeout {
                id: call.id,
                kind: TimeoutKind::ReconnectWait,
            };
            self.fail_call(call.id, call.kind, error);
        }

        for call in self.correlator.take_expired_pending(now) {
            tracing::warn!("Request {} '{}' timed out", call.id, call.method);
            let error = RpcError::Timeout {
                id: call.id,
                kind: TimeoutKind::Call,
            };
            self.fail_call(call.id, call.kind, error);
        }
    }

    async fn shutdown(mut self) {
        tracing::debug!("All client handles dropped, shutting down");
        self.abort_connect();

        let (pending, queued) = self.correlator.drain_all();
        for call in pending {
            call.kind.fail(RpcError::Closed);
        }
        for call in queued {
            call.kind.fail(RpcError::Closed);
        }
        for registration in self.subscriptions.drain(&AHashSet::new()) {
            registration.terminate(RpcError::Closed);
        }

        self.fail_connect_waiters(&RpcError::Closed);
        for waiter in self.disconnect_waiters.drain(..) {
            let _ = waiter.send(());
        }

        if !self.state.is_disconnected() {
            self.transport.disconnect().await;
        }
        self.set_state(ConnectionState::Disconnected);
    }
}
