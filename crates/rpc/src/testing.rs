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

//! Test harness: an in-memory transport and polling helpers.

use std::{
    collections::VecDeque,
    future::Future,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use meridian_network::{
    error::TransportError,
    transport::{CLOSE_NORMAL, Transport, TransportEvent, TransportEventSender},
};

#[derive(Debug, Default)]
struct MockState {
    events: Option<TransportEventSender>,
    connected: bool,
    sent: Vec<Bytes>,
    connect_failures: VecDeque<TransportError>,
    connect_count: usize,
}

/// An in-memory [`Transport`] that records sent frames and lets tests inject events.
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Makes the next connect attempt fail with `error`.
    pub fn fail_next_connect(&self, error: TransportError) {
        self.lock().connect_failures.push_back(error);
    }

    /// Number of connect attempts made, successful or not.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.lock().connect_count
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Frames sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Bytes> {
        self.lock().sent.clone()
    }

    /// Frames sent so far, parsed as JSON.
    ///
    /// # Panics
    ///
    /// Panics if a frame is not valid JSON.
    #[must_use]
    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent()
            .iter()
            .map(|frame| serde_json::from_slice(frame).expect("sent frame is not JSON"))
            .collect()
    }

    /// Delivers `frame` as if received from the server.
    pub fn push(&self, frame: &str) {
        self.emit(TransportEvent::Data(Bytes::from(frame.to_string())));
    }

    /// Drops the connection as if the server closed it with `code`.
    pub fn drop_connection(&self, code: u16) {
        let mut state = self.lock();
        if !state.connected {
            return;
        }
        state.connected = false;
        if let Some(events) = &state.events {
            let _ = events.send(TransportEvent::Disconnected { code });
        }
    }

    /// Delivers an arbitrary event.
    pub fn emit(&self, event: TransportEvent) {
        if let Some(events) = &self.lock().events {
            let _ = events.send(event);
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, events: TransportEventSender) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.connect_count += 1;

        if let Some(error) = state.connect_failures.pop_front() {
            return Err(error);
        }

        state.connected = true;
        let _ = events.send(TransportEvent::Connected);
        state.events = Some(events);
        Ok(())
    }

    async fn disconnect(&self) {
        self.drop_connection(CLOSE_NORMAL);
    }

    fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        let mut state = self.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.sent.push(frame);
        Ok(())
    }
}

/// Repeatedly evaluates a condition until it becomes true or `timeout` elapses.
///
/// Uses tokio time, so it also works with a paused clock.
///
/// # Panics
///
/// Panics if the timeout elapses without the condition being met.
pub async fn wait_until_async<F, Fut>(mut condition: F, timeout: Duration)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();

    loop {
        if condition().await {
            break;
        }

        assert!(
            start.elapsed() <= timeout,
            "Timeout waiting for condition"
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
