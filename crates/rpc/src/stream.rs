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

//! Subscriptions as cancellable streams of decoded events.

use std::{
    fmt::Debug,
    marker::PhantomData,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll},
};

use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    codec::{JsonRpcCodec, RpcCodec},
    engine::EngineCommand,
    error::{RpcError, RpcResult},
    messages::{RequestId, SubscriptionId},
    subscription::{SubscriptionAck, SubscriptionEvent, SubscriptionEventReceiver},
};

/// Lookup-by-id link from a subscription back to the engine.
///
/// Holds the engine's command channel weakly so that live subscriptions do not keep
/// a dropped client's engine running.
#[derive(Clone, Debug)]
struct EngineLink {
    call_id: RequestId,
    subscription: SubscriptionId,
    commands: mpsc::WeakUnboundedSender<EngineCommand>,
    cancelled: Arc<AtomicBool>,
}

impl EngineLink {
    /// Claims the single teardown. Returns false if already torn down.
    fn claim(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn send_unsubscribe(&self, reply: Option<oneshot::Sender<RpcResult<()>>>) -> bool {
        let Some(commands) = self.commands.upgrade() else {
            tracing::debug!("Engine gone, nothing to unsubscribe for {}", self.subscription);
            return false;
        };

        commands
            .send(EngineCommand::Unsubscribe {
                call_id: self.call_id,
                reply,
            })
            .is_ok()
    }

    /// Best-effort teardown, at most once.
    fn release(&self) {
        if self.claim() {
            self.send_unsubscribe(None);
        }
    }

    async fn cancel(&self) -> RpcResult<()> {
        if !self.claim() {
            return Ok(());
        }

        let (tx, rx) = oneshot::channel();
        if !self.send_unsubscribe(Some(tx)) {
            return Ok(());
        }
        rx.await.map_err(|_| RpcError::Closed)?
    }
}

/// A live subscription yielding decoded notifications.
///
/// The stream ends after an error (decode failure, disconnect) or after
/// [`Self::cancel`]. It is not restartable, subscribe again to resume. Dropping an
/// uncancelled subscription sends one best-effort unsubscribe.
pub struct Subscription<T, C: RpcCodec = JsonRpcCodec> {
    link: EngineLink,
    events: SubscriptionEventReceiver,
    codec: Arc<C>,
    finished: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T, C: RpcCodec> Debug for Subscription<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(Subscription))
            .field("call_id", &self.link.call_id)
            .field("subscription", &self.link.subscription)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<T, C: RpcCodec> Subscription<T, C> {
    pub(crate) fn new(
        ack: SubscriptionAck,
        events: SubscriptionEventReceiver,
        codec: Arc<C>,
        commands: mpsc::WeakUnboundedSender<EngineCommand>,
    ) -> Self {
        Self {
            link: EngineLink {
                call_id: ack.call_id,
                subscription: ack.subscription,
                commands,
                cancelled: Arc::new(AtomicBool::new(false)),
            },
            events,
            codec,
            finished: false,
            _marker: PhantomData,
        }
    }

    /// Returns the server-assigned subscription id.
    #[must_use]
    pub fn subscription_id(&self) -> &SubscriptionId {
        &self.link.subscription
    }

    /// Returns whether the subscription has been cancelled or torn down.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.link.is_cancelled()
    }

    /// Unsubscribes. Notifications stop immediately whatever the server answers.
    ///
    /// Calling this more than once is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::UnsubscribeFailed`] if the server rejects the unsubscribe,
    /// or the error that failed the unsubscribe call.
    pub async fn cancel(&self) -> RpcResult<()> {
        self.link.cancel().await
    }
}

impl<T: DeserializeOwned, C: RpcCodec> Stream for Subscription<T, C> {
    type Item = RpcResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        // Buffered notifications are not delivered after a cancel
        if this.finished || this.link.is_cancelled() {
            this.finished = true;
            return Poll::Ready(None);
        }

        match this.events.poll_recv(cx) {
            Poll::Ready(Some(SubscriptionEvent::Notification(payload))) => {
                match this.codec.decode_payload::<T>(&payload) {
                    Ok(value) => Poll::Ready(Some(Ok(value))),
                    Err(e) => {
                        tracing::warn!(
                            "Failed to decode notification for {}: {e}",
                            this.link.subscription
                        );
                        this.finished = true;
                        this.link.release();
                        Poll::Ready(Some(Err(e.into())))
                    }
                }
            }
            Poll::Ready(Some(SubscriptionEvent::Terminated(error))) => {
                this.finished = true;
                this.link.release();
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                this.finished = true;
                this.link.release();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T, C: RpcCodec> Drop for Subscription<T, C> {
    fn drop(&mut self) {
        self.link.release();
    }
}

/// Handle to a subscription driven by a handler task.
///
/// Dropping the handle stops the task and tears the subscription down.
#[derive(Debug)]
pub struct SubscriptionHandle {
    link: EngineLink,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub(crate) fn spawn<T, C, F>(
        mut subscription: Subscription<T, C>,
        runtime: &tokio::runtime::Handle,
        mut handler: F,
    ) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        C: RpcCodec,
        F: FnMut(RpcResult<T>) + Send + 'static,
    {
        let link = subscription.link.clone();
        let task = runtime.spawn(async move {
            while let Some(item) = subscription.next().await {
                handler(item);
            }
            tracing::debug!(
                "Handler for {} completed",
                subscription.subscription_id()
            );
        });

        Self { link, task }
    }

    /// Returns the server-assigned subscription id.
    #[must_use]
    pub fn subscription_id(&self) -> &SubscriptionId {
        &self.link.subscription
    }

    /// Returns whether the handler task has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Unsubscribes, the handler task then completes on its own.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::UnsubscribeFailed`] if the server rejects the unsubscribe,
    /// or the error that failed the unsubscribe call.
    pub async fn cancel(&self) -> RpcResult<()> {
        self.link.cancel().await
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.link.release();
        self.task.abort();
    }
}
