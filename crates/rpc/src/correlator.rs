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

//! Call correlation: request id allocation and the pending/queued call tables.
//!
//! These types are plain data structures owned by the engine task. They never touch
//! the transport; the engine decides when frames are written.

use std::{collections::VecDeque, time::Duration};

use ahash::AHashMap;
use bytes::Bytes;
use tokio::{sync::oneshot, time::Instant};
use ustr::Ustr;

use crate::{
    error::{RpcError, RpcResult},
    messages::{RequestId, SubscriptionId},
    subscription::SubscriptionAck,
};

/// Allocates request ids, wrapping past a maximum back to 1 and skipping ids that
/// are still outstanding.
#[derive(Clone, Debug)]
pub struct RequestIdAllocator {
    next: u64,
    max: u64,
}

impl RequestIdAllocator {
    /// Creates a new allocator yielding ids in `1..=max`.
    #[must_use]
    pub fn new(max: u64) -> Self {
        Self {
            next: 1,
            max: max.max(1),
        }
    }

    /// Returns the next id for which `in_use` is false.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::IdSpaceExhausted`] if every id in the space is in use.
    pub fn allocate(&mut self, in_use: impl Fn(RequestId) -> bool) -> RpcResult<RequestId> {
        for _ in 0..self.max {
            let candidate = RequestId::new(self.next);
            self.next = if self.next >= self.max {
                1
            } else {
                self.next + 1
            };

            if !in_use(candidate) {
                return Ok(candidate);
            }
            tracing::warn!("Request id {candidate} still outstanding after wraparound, skipping");
        }

        Err(RpcError::IdSpaceExhausted)
    }
}

/// What a correlated call resolves to, holding the caller's completion channel.
#[derive(Debug)]
pub enum CallKind {
    /// A plain call resolving to the raw result payload.
    Call {
        reply: oneshot::Sender<RpcResult<Bytes>>,
    },
    /// A subscribe call resolving to the server-assigned subscription id.
    Subscribe {
        reply: oneshot::Sender<RpcResult<SubscriptionAck>>,
    },
    /// An unsubscribe call. `reply` is absent for best-effort cleanup.
    Unsubscribe {
        subscription: SubscriptionId,
        reply: Option<oneshot::Sender<RpcResult<()>>>,
    },
}

impl CallKind {
    /// Resolves the call with `error`.
    pub fn fail(self, error: RpcError) {
        // The caller may have stopped waiting, nothing to report then
        match self {
            Self::Call { reply } => {
                let _ = reply.send(Err(error));
            }
            Self::Subscribe { reply } => {
                let _ = reply.send(Err(error));
            }
            Self::Unsubscribe { subscription, reply } => match reply {
                Some(reply) => {
                    let _ = reply.send(Err(error));
                }
                None => tracing::debug!("Unsubscribe for {subscription} failed: {error}"),
            },
        }
    }
}

/// A call written to the transport and awaiting its reply.
#[derive(Debug)]
pub struct PendingCall {
    pub id: RequestId,
    pub method: Ustr,
    pub kind: CallKind,
    pub deadline: Instant,
}

/// A call submitted while disconnected, waiting for a reconnect.
#[derive(Debug)]
pub struct QueuedCall {
    pub id: RequestId,
    pub method: Ustr,
    /// The complete encoded request.
    pub frame: Bytes,
    pub kind: CallKind,
    /// Reply timeout applied once the call is flushed.
    pub timeout: Duration,
    /// Deadline for the reconnect to happen.
    pub deadline: Instant,
}

/// The pending call table and the reconnect queue.
#[derive(Debug, Default)]
pub struct CallCorrelator {
    pending: AHashMap<RequestId, PendingCall>,
    queued: VecDeque<QueuedCall>,
}

impl CallCorrelator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether `id` denotes an outstanding pending or queued call.
    #[must_use]
    pub fn contains(&self, id: RequestId) -> bool {
        self.pending.contains_key(&id) || self.queued.iter().any(|call| call.id == id)
    }

    #[cfg(test)]
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    #[cfg(test)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.queued.is_empty()
    }

    /// Registers a call awaiting its reply.
    ///
    /// # Errors
    ///
    /// Returns the call back if its id is already outstanding.
    pub fn register_pending(&mut self, call: PendingCall) -> Result<(), PendingCall> {
        if self.contains(call.id) {
            return Err(call);
        }
        self.pending.insert(call.id, call);
        Ok(())
    }

    /// Queues a call until the connection is (re-)established.
    ///
    /// # Errors
    ///
    /// Returns the call back if its id is already outstanding.
    pub fn enqueue(&mut self, call: QueuedCall) -> Result<(), QueuedCall> {
        if self.contains(call.id) {
            return Err(call);
        }
        self.queued.push_back(call);
        Ok(())
    }

    /// Removes and returns the pending call for `id`, `None` if unknown or already resolved.
    pub fn resolve(&mut self, id: RequestId) -> Option<PendingCall> {
        self.pending.remove(&id)
    }

    /// Removes and returns pending calls whose deadline is at or before `now`, oldest
    /// deadline first.
    pub fn take_expired_pending(&mut self, now: Instant) -> Vec<PendingCall> {
        let mut expired_ids: Vec<(Instant, RequestId)> = self
            .pending
            .values()
            .filter(|call| call.deadline <= now)
            .map(|call| (call.deadline, call.id))
            .collect();
        expired_ids.sort_unstable();

        expired_ids
            .into_iter()
            .filter_map(|(_, id)| self.pending.remove(&id))
            .collect()
    }

    /// Removes and returns queued calls whose reconnect deadline is at or before `now`.
    pub fn take_expired_queued(&mut self, now: Instant) -> Vec<QueuedCall> {
        let (expired, waiting): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut self.queued)
            .into_iter()
            .partition(|call| call.deadline <= now);
        self.queued = waiting;
        expired.into_iter().collect()
    }

    /// Moves every queued call into the pending table in submission order, with a
    /// reply deadline of `now` plus its own timeout.
    ///
    /// Returns the frames to write, in the same order.
    pub fn flush_queue(&mut self, now: Instant) -> Vec<(RequestId, Bytes)> {
        let mut frames = Vec::with_capacity(self.queued.len());

        while let Some(queued) = self.queued.pop_front() {
            frames.push((queued.id, queued.frame));
            self.pending.insert(
                queued.id,
                PendingCall {
                    id: queued.id,
                    method: queued.method,
                    kind: queued.kind,
                    deadline: now + queued.timeout,
                },
            );
        }

        frames
    }

    /// Ids of queued calls, in submission order.
    pub fn queued_ids(&self) -> impl Iterator<Item = RequestId> + '_ {
        self.queued.iter().map(|call| call.id)
    }

    /// Removes and returns every pending call, ordered by id.
    pub fn drain_pending(&mut self) -> Vec<PendingCall> {
        let mut drained: Vec<PendingCall> = self.pending.drain().map(|(_, call)| call).collect();
        drained.sort_unstable_by_key(|call| call.id);
        drained
    }

    /// Removes and returns every pending and queued call.
    pub fn drain_all(&mut self) -> (Vec<PendingCall>, Vec<QueuedCall>) {
        let pending = self.drain_pending();
        let queued = self.queued.drain(..).collect();
        (pending, queued)
    }
}
