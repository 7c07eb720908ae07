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

//! WebSocket transport built on tokio-tungstenite.
//!
//! **Design**:
//! - One connection at a time, split into read and write halves.
//! - Read half runs in a dedicated task that turns frames into [`TransportEvent`]s.
//! - Write half runs in a dedicated task fed by a command channel, so `send` never blocks.
//! - Optional heartbeat task keeps idle connections alive.
//! - Exactly one `Disconnected` event is reported per connection, whichever task notices first.
//!
//! Reconnection policy is not decided here: the engine supervisor reacts to
//! `Disconnected` and calls [`Transport::connect`] again.

pub mod config;
pub mod types;

use std::{
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::HeaderName;
use tokio::{
    sync::{
        mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
        oneshot,
    },
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Message, client::IntoClientRequest, http::HeaderValue},
};

pub use self::config::WebSocketTransportConfig;
use self::types::{MessageReader, MessageWriter, WriterCommand};
use crate::{
    error::TransportError,
    tls::install_crypto_provider,
    transport::{CLOSE_ABNORMAL, CLOSE_NORMAL, Transport, TransportEvent, TransportEventSender},
};

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 1_000;

/// Reports the end of a connection, at most once.
fn report_disconnect(reported: &AtomicBool, events: &TransportEventSender, code: u16) {
    if reported.swap(true, Ordering::SeqCst) {
        return;
    }

    tracing::debug!(code, "Connection closed");
    if let Err(e) = events.send(TransportEvent::Disconnected { code }) {
        tracing::debug!("Failed to report disconnect: {e}");
    }
}

/// Tasks and channels belonging to one established connection.
#[derive(Debug)]
struct ActiveConnection {
    writer_tx: UnboundedSender<WriterCommand>,
    read_task: JoinHandle<()>,
    write_task: JoinHandle<()>,
    heartbeat_task: Option<JoinHandle<()>>,
    disconnect_reported: Arc<AtomicBool>,
    /// Set once a caller-initiated close is underway.
    closing: Arc<AtomicBool>,
    events: TransportEventSender,
}

impl ActiveConnection {
    fn abort_tasks(&self) {
        if !self.read_task.is_finished() {
            self.read_task.abort();
            tracing::debug!("Aborted task 'read'");
        }

        if !self.write_task.is_finished() {
            self.write_task.abort();
            tracing::debug!("Aborted task 'write'");
        }

        if let Some(handle) = &self.heartbeat_task
            && !handle.is_finished()
        {
            handle.abort();
            tracing::debug!("Aborted task 'heartbeat'");
        }
    }
}

/// A [`Transport`] over a single WebSocket connection.
///
/// Text frames are used for UTF-8 payloads and binary frames otherwise.
#[derive(Debug)]
pub struct WebSocketTransport {
    config: WebSocketTransportConfig,
    connection: Mutex<Option<ActiveConnection>>,
}

impl WebSocketTransport {
    /// Creates a new, unconnected [`WebSocketTransport`].
    #[must_use]
    pub const fn new(config: WebSocketTransportConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
        }
    }

    /// Returns the transport configuration.
    #[must_use]
    pub const fn config(&self) -> &WebSocketTransportConfig {
        &self.config
    }

    fn slot(&self) -> MutexGuard<'_, Option<ActiveConnection>> {
        match self.connection.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Connects with the server creating a tokio-tungstenite websocket stream.
    async fn connect_with_server(
        url: &str,
        headers: &[(String, String)],
    ) -> Result<(MessageWriter, MessageReader), TransportError> {
        let mut request = url.into_client_request()?;
        let req_headers = request.headers_mut();

        for (key, val) in headers {
            let header_value = HeaderValue::from_str(val)
                .map_err(|e| TransportError::InvalidConfig(format!("header '{key}': {e}")))?;
            let header_name: HeaderName = key
                .parse()
                .map_err(|e| TransportError::InvalidConfig(format!("header '{key}': {e}")))?;
            req_headers.insert(header_name, header_value);
        }

        let (stream, _response) = connect_async(request).await?;
        Ok(stream.split())
    }

    fn spawn_read_task(
        mut reader: MessageReader,
        ready: oneshot::Receiver<()>,
        events: TransportEventSender,
        writer_tx: UnboundedSender<WriterCommand>,
        disconnect_reported: Arc<AtomicBool>,
        closing: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        tracing::debug!("Started task 'read'");

        tokio::task::spawn(async move {
            // Frames must not overtake the `Connected` event
            if ready.await.is_err() {
                tracing::debug!("Connection abandoned before it was announced");
                return;
            }

            let code = loop {
                match reader.next().await {
                    Some(Ok(Message::Text(text))) => {
                        tracing::trace!("Received message: {}", text.as_str());
                        let frame = Bytes::copy_from_slice(text.as_bytes());
                        if events.send(TransportEvent::Data(frame)).is_err() {
                            break CLOSE_NORMAL;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        tracing::trace!("Received message <binary> {} bytes", data.len());
                        if events.send(TransportEvent::Data(data)).is_err() {
                            break CLOSE_NORMAL;
                        }
                    }
                    Some(Ok(Message::Ping(_))) => tracing::trace!("Received ping"),
                    Some(Ok(Message::Pong(_))) => tracing::trace!("Received pong"),
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!("Received close message - terminating: {frame:?}");
                        break frame.map_or(CLOSE_NORMAL, |frame| u16::from(frame.code));
                    }
                    Some(Ok(Message::Frame(_))) => (),
                    Some(Err(e)) if closing.load(Ordering::SeqCst) => {
                        tracing::debug!("Read ended during close: {e}");
                        break CLOSE_NORMAL;
                    }
                    Some(Err(e)) => {
                        tracing::error!("Received error message - terminating: {e}");
                        let _ = events.send(TransportEvent::Error(TransportError::Receive(
                            e.to_string(),
                        )));
                        break CLOSE_ABNORMAL;
                    }
                    // Internally tungstenite considers the connection closed when polling
                    // for the next message in the stream returns None.
                    None => {
                        tracing::debug!("No message received - terminating");
                        break CLOSE_ABNORMAL;
                    }
                }
            };

            let _ = writer_tx.send(WriterCommand::Close);

            // A close we asked for is a normal closure whatever the peer did with it
            let code = if closing.load(Ordering::SeqCst) {
                CLOSE_NORMAL
            } else {
                code
            };
            report_disconnect(&disconnect_reported, &events, code);
            tracing::debug!("Completed task 'read'");
        })
    }

    fn spawn_write_task(
        mut writer: MessageWriter,
        mut writer_rx: UnboundedReceiver<WriterCommand>,
        events: TransportEventSender,
        disconnect_reported: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        tracing::debug!("Started task 'write'");

        tokio::task::spawn(async move {
            while let Some(command) = writer_rx.recv().await {
                match command {
                    WriterCommand::Send(msg) => {
                        if let Err(e) = writer.send(msg).await {
                            tracing::error!("Failed to send message: {e}");
                            let _ = events.send(TransportEvent::Error(TransportError::Send(
                                e.to_string(),
                            )));
                            report_disconnect(&disconnect_reported, &events, CLOSE_ABNORMAL);
                            break;
                        }
                    }
                    WriterCommand::Close => break,
                }
            }

            // Attempt to close the writer gracefully before exiting,
            // we ignore any error as the writer may already be closed.
            _ = writer.close().await;

            tracing::debug!("Completed task 'write'");
        })
    }

    fn spawn_heartbeat_task(
        heartbeat_secs: u64,
        message: Option<String>,
        writer_tx: UnboundedSender<WriterCommand>,
    ) -> JoinHandle<()> {
        tracing::debug!("Started task 'heartbeat'");

        tokio::task::spawn(async move {
            let interval = Duration::from_secs(heartbeat_secs);

            loop {
                tokio::time::sleep(interval).await;

                let msg = match &message {
                    Some(text) => Message::Text(text.clone().into()),
                    None => Message::Ping(Bytes::new()),
                };

                if writer_tx.send(WriterCommand::Send(msg)).is_err() {
                    break;
                }
                tracing::trace!("Sent heartbeat to writer task");
            }

            tracing::debug!("Completed task 'heartbeat'");
        })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, events: TransportEventSender) -> Result<(), TransportError> {
        install_crypto_provider();

        if let Some(stale) = self.slot().take() {
            tracing::warn!("Replacing stale connection");
            stale.abort_tasks();
            report_disconnect(&stale.disconnect_reported, &stale.events, CLOSE_ABNORMAL);
        }

        let timeout_ms = self
            .config
            .connect_timeout_ms
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);

        tracing::debug!("Connecting to {}", self.config.url);
        let (writer, reader) = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            Self::connect_with_server(&self.config.url, &self.config.headers),
        )
        .await
        .map_err(|_| TransportError::ConnectTimeout(timeout_ms))??;

        let disconnect_reported = Arc::new(AtomicBool::new(false));
        let closing = Arc::new(AtomicBool::new(false));
        let (writer_tx, writer_rx) = unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let read_task = Self::spawn_read_task(
            reader,
            ready_rx,
            events.clone(),
            writer_tx.clone(),
            disconnect_reported.clone(),
            closing.clone(),
        );
        let write_task = Self::spawn_write_task(
            writer,
            writer_rx,
            events.clone(),
            disconnect_reported.clone(),
        );
        let heartbeat_task = self.config.heartbeat.map(|secs| {
            Self::spawn_heartbeat_task(secs, self.config.heartbeat_msg.clone(), writer_tx.clone())
        });

        // The writer is reachable through `send` before anyone learns of the connection
        *self.slot() = Some(ActiveConnection {
            writer_tx,
            read_task,
            write_task,
            heartbeat_task,
            disconnect_reported,
            closing,
            events: events.clone(),
        });

        if events.send(TransportEvent::Connected).is_err() {
            if let Some(connection) = self.slot().take() {
                connection.abort_tasks();
            }
            return Err(TransportError::Connect(
                "event receiver dropped".to_string(),
            ));
        }
        let _ = ready_tx.send(());

        tracing::debug!("Connected to {}", self.config.url);
        Ok(())
    }

    async fn disconnect(&self) {
        let Some(mut connection) = self.slot().take() else {
            return;
        };

        tracing::debug!("Disconnecting");
        connection.closing.store(true, Ordering::SeqCst);
        let _ = connection.writer_tx.send(WriterCommand::Close);

        let close_timeout = Duration::from_millis(
            self.config
                .close_timeout_ms
                .unwrap_or(DEFAULT_CLOSE_TIMEOUT_MS),
        );

        // Give the reader a chance to observe the close handshake
        if tokio::time::timeout(close_timeout, &mut connection.read_task)
            .await
            .is_err()
        {
            tracing::debug!("Close handshake timed out after {close_timeout:?}");
        }

        connection.abort_tasks();
        report_disconnect(
            &connection.disconnect_reported,
            &connection.events,
            CLOSE_NORMAL,
        );
    }

    fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        let guard = self.slot();
        let Some(connection) = guard.as_ref() else {
            return Err(TransportError::NotConnected);
        };

        if connection.disconnect_reported.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }

        let msg = match std::str::from_utf8(&frame) {
            Ok(text) => Message::Text(text.to_owned().into()),
            Err(_) => Message::Binary(frame),
        };

        connection
            .writer_tx
            .send(WriterCommand::Send(msg))
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(connection) = self.slot().take() {
            connection.abort_tasks();
        }
    }
}
