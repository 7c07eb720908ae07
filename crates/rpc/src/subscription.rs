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

//! Subscription registrations, keyed provisionally by the subscribe call id until
//! the server acknowledges with its own subscription id.

use ahash::{AHashMap, AHashSet};
use bytes::Bytes;
use tokio::sync::mpsc;
use ustr::Ustr;

use crate::{
    error::RpcError,
    messages::{RequestId, SubscriptionId},
};

/// An event delivered to a subscription consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// A raw notification payload.
    Notification(Bytes),
    /// The subscription ended with an error. No further events follow.
    Terminated(RpcError),
}

/// Acknowledgement of a subscribe call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionAck {
    /// Id of the subscribe call, used to address the registration afterwards.
    pub call_id: RequestId,
    /// Server-assigned subscription id.
    pub subscription: SubscriptionId,
}

pub type SubscriptionEventSender = mpsc::UnboundedSender<SubscriptionEvent>;
pub type SubscriptionEventReceiver = mpsc::UnboundedReceiver<SubscriptionEvent>;

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum SubscriptionKey {
    /// Keyed by the subscribe call id, before acknowledgement.
    Provisional(RequestId),
    /// Keyed by the server-assigned id, after acknowledgement.
    Server(SubscriptionId),
}

/// Live bookkeeping for one subscription.
#[derive(Debug)]
pub struct Registration {
    pub call_id: RequestId,
    pub method: Ustr,
    pub unsubscribe_method: Ustr,
    pub subscription: Option<SubscriptionId>,
    pub sender: SubscriptionEventSender,
    pub subscribed: bool,
    pub cancelled: bool,
}

impl Registration {
    #[must_use]
    pub const fn new(
        call_id: RequestId,
        method: Ustr,
        unsubscribe_method: Ustr,
        sender: SubscriptionEventSender,
    ) -> Self {
        Self {
            call_id,
            method,
            unsubscribe_method,
            subscription: None,
            sender,
            subscribed: false,
            cancelled: false,
        }
    }

    /// Ends the subscription with `error`, consuming the registration.
    pub fn terminate(self, error: RpcError) {
        if self.sender.send(SubscriptionEvent::Terminated(error)).is_err() {
            tracing::trace!("Consumer of subscription {} already gone", self.call_id);
        }
    }

    fn consumer_gone(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Outcome of acknowledging a subscribe call.
#[derive(Debug)]
pub enum AckOutcome {
    /// Registration re-keyed under the server id.
    Active,
    /// Cancelled before the ack arrived. The registration was removed and the server
    /// subscription must be torn down.
    CancelledBeforeAck(Registration),
    /// The server id is already registered. The new registration was removed.
    Duplicate(Registration),
    /// No provisional registration exists for the call.
    Missing,
}

/// Outcome of cancelling a subscription.
#[derive(Debug)]
pub enum CancelOutcome {
    /// Not yet acknowledged, teardown happens on ack.
    Deferred,
    /// Removed, the caller must send the unsubscribe call.
    Removed(Registration),
    /// Nothing registered for the call, already cancelled or torn down.
    NotFound,
}

/// Outcome of routing a notification.
#[derive(Debug)]
pub enum DispatchOutcome {
    Delivered,
    /// The consumer has gone away. The registration was removed and the server
    /// subscription must be torn down.
    ConsumerGone(Registration),
    Unknown,
}

/// The registration table.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    registrations: AHashMap<SubscriptionKey, Registration>,
    server_ids: AHashMap<RequestId, SubscriptionId>,
}

impl SubscriptionTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    #[cfg(test)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Returns whether `subscription` is an active registration.
    #[cfg(test)]
    #[must_use]
    pub fn is_active(&self, subscription: &SubscriptionId) -> bool {
        self.registrations
            .contains_key(&SubscriptionKey::Server(subscription.clone()))
    }

    /// Returns whether `call_id` still addresses a live registration, provisional or
    /// acknowledged. Such ids must not be handed out again.
    #[must_use]
    pub fn holds_call(&self, call_id: RequestId) -> bool {
        self.server_ids.contains_key(&call_id)
            || self
                .registrations
                .contains_key(&SubscriptionKey::Provisional(call_id))
    }

    /// Adds a provisional registration keyed by its call id.
    ///
    /// # Errors
    ///
    /// Returns the registration back if its call id already addresses a live
    /// registration.
    pub fn register(&mut self, registration: Registration) -> Result<(), Registration> {
        if self.holds_call(registration.call_id) {
            tracing::error!(
                "Subscribe call id {} still addresses a live subscription",
                registration.call_id
            );
            return Err(registration);
        }
        let key = SubscriptionKey::Provisional(registration.call_id);
        self.registrations.insert(key, registration);
        Ok(())
    }

    /// Promotes the provisional registration for `call_id` to `subscription`.
    pub fn acknowledge(&mut self, call_id: RequestId, subscription: SubscriptionId) -> AckOutcome {
        let Some(mut registration) = self
            .registrations
            .remove(&SubscriptionKey::Provisional(call_id))
        else {
            return AckOutcome::Missing;
        };
        registration.subscription = Some(subscription.clone());

        let key = SubscriptionKey::Server(subscription.clone());
        if self.registrations.contains_key(&key) {
            return AckOutcome::Duplicate(registration);
        }

        if registration.cancelled || registration.consumer_gone() {
            registration.cancelled = true;
            return AckOutcome::CancelledBeforeAck(registration);
        }

        registration.subscribed = true;
        self.registrations.insert(key, registration);
        let previous = self.server_ids.insert(call_id, subscription);
        debug_assert!(
            previous.is_none(),
            "call id {call_id} already addressed a live subscription"
        );
        AckOutcome::Active
    }

    /// Removes a provisional registration whose subscribe call failed.
    pub fn remove_provisional(&mut self, call_id: RequestId) -> Option<Registration> {
        self.registrations
            .remove(&SubscriptionKey::Provisional(call_id))
    }

    /// Cancels the subscription created by the subscribe call `call_id`.
    ///
    /// Removal of an acknowledged registration is immediate, so no further
    /// notifications are delivered whatever the server does with the unsubscribe.
    pub fn cancel(&mut self, call_id: RequestId) -> CancelOutcome {
        if let Some(registration) = self
            .registrations
            .get_mut(&SubscriptionKey::Provisional(call_id))
        {
            if registration.cancelled {
                return CancelOutcome::NotFound;
            }
            registration.cancelled = true;
            return CancelOutcome::Deferred;
        }

        let Some(subscription) = self.server_ids.remove(&call_id) else {
            return CancelOutcome::NotFound;
        };

        match self
            .registrations
            .remove(&SubscriptionKey::Server(subscription))
        {
            Some(mut registration) => {
                registration.cancelled = true;
                CancelOutcome::Removed(registration)
            }
            None => CancelOutcome::NotFound,
        }
    }

    /// Routes a notification payload to the registration for `subscription`.
    pub fn dispatch(&mut self, subscription: &SubscriptionId, payload: Bytes) -> DispatchOutcome {
        let key = SubscriptionKey::Server(subscription.clone());
        let Some(registration) = self.registrations.get(&key) else {
            return DispatchOutcome::Unknown;
        };

        if registration
            .sender
            .send(SubscriptionEvent::Notification(payload))
            .is_ok()
        {
            return DispatchOutcome::Delivered;
        }

        match self.registrations.remove(&key) {
            Some(mut registration) => {
                self.server_ids.remove(&registration.call_id);
                registration.cancelled = true;
                DispatchOutcome::ConsumerGone(registration)
            }
            None => DispatchOutcome::Unknown,
        }
    }

    /// Removes every registration except provisional ones whose call id is in `keep`.
    pub fn drain(&mut self, keep: &AHashSet<RequestId>) -> Vec<Registration> {
        let keys: Vec<SubscriptionKey> = self
            .registrations
            .keys()
            .filter(|key| !matches!(key, SubscriptionKey::Provisional(id) if keep.contains(id)))
            .cloned()
            .collect();

        let mut drained: Vec<Registration> = keys
            .into_iter()
            .filter_map(|key| self.registrations.remove(&key))
            .collect();
        drained.sort_unstable_by_key(|registration| registration.call_id);

        self.server_ids.clear();
        drained
    }
}
