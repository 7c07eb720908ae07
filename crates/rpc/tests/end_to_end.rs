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

//! End-to-end tests: the client over a real WebSocket against an axum JSON-RPC server.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    response::Response,
    routing::get,
};
use futures::StreamExt;
use meridian_network::{
    mode::ConnectionState,
    websocket::{WebSocketTransport, WebSocketTransportConfig},
};
use meridian_rpc::{JsonRpcCodec, RpcClient, RpcClientConfig, RpcError, RpcResult};
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::{Value, json};

const DROP_CLOSE_CODE: u16 = 4001;
const SUBSCRIPTION_ID: &str = "0x9cef478923ff08bf67fde6c64013158d";

async fn handle_websocket(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(handle_socket)
}

async fn send_json(socket: &mut WebSocket, value: Value) -> bool {
    socket
        .send(Message::Text(value.to_string().into()))
        .await
        .is_ok()
}

// A tiny node: chain id, failing method, subscriptions that emit three heads, and a
// method that makes the server hang up
async fn handle_socket(mut socket: WebSocket) {
    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(text) = msg else {
            if matches!(msg, Message::Close(_)) {
                return;
            }
            continue;
        };
        let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };
        let id = request["id"].clone();

        let ok = match request["method"].as_str().unwrap_or_default() {
            "eth_chainId" => {
                send_json(&mut socket, json!({"jsonrpc": "2.0", "id": id, "result": "0x1"})).await
            }
            "eth_subscribe" => {
                let mut ok = send_json(
                    &mut socket,
                    json!({"jsonrpc": "2.0", "id": id, "result": SUBSCRIPTION_ID}),
                )
                .await;
                for number in 1..=3u64 {
                    ok &= send_json(
                        &mut socket,
                        json!({
                            "jsonrpc": "2.0",
                            "method": "eth_subscription",
                            "params": {"subscription": SUBSCRIPTION_ID, "result": number}
                        }),
                    )
                    .await;
                }
                ok
            }
            "eth_unsubscribe" => {
                let known = request["params"][0] == json!(SUBSCRIPTION_ID);
                send_json(&mut socket, json!({"jsonrpc": "2.0", "id": id, "result": known})).await
            }
            "drop_me" => {
                let frame = CloseFrame {
                    code: DROP_CLOSE_CODE,
                    reason: "dropped".into(),
                };
                let _ = socket.send(Message::Close(Some(frame))).await;
                return;
            }
            method => {
                send_json(
                    &mut socket,
                    json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32601, "message": format!("Method {method} not found")}
                    }),
                )
                .await
            }
        };

        if !ok {
            return;
        }
    }
}

async fn start_test_server() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = Router::new().route("/ws", get(handle_websocket));

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    addr
}

async fn connected_client(addr: SocketAddr, config: RpcClientConfig) -> RpcClient {
    let transport = Arc::new(WebSocketTransport::new(WebSocketTransportConfig::new(
        format!("ws://{addr}/ws"),
    )));
    let client = RpcClient::new(config, transport, JsonRpcCodec::new()).unwrap();
    client.connect().await.unwrap();
    client
}

#[rstest]
#[tokio::test]
async fn test_call_over_websocket() {
    let addr = start_test_server().await;
    let client = connected_client(addr, RpcClientConfig::default()).await;

    let chain_id: String = client.call("eth_chainId", &()).await.unwrap();
    assert_eq!(chain_id, "0x1");

    let error = client
        .call::<_, Value>("eth_nothing", &["x"])
        .await
        .unwrap_err();
    assert_eq!(
        error,
        RpcError::Rpc {
            code: -32601,
            message: "Method eth_nothing not found".to_string(),
            data: None,
        }
    );

    client.disconnect().await.unwrap();
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
}

#[rstest]
#[tokio::test]
async fn test_subscription_over_websocket() {
    let addr = start_test_server().await;
    let client = connected_client(addr, RpcClientConfig::default()).await;

    let mut heads = client
        .subscribe::<_, u64>("eth_subscribe", &["newHeads"], "eth_unsubscribe")
        .await
        .unwrap();
    assert_eq!(heads.subscription_id().as_str(), SUBSCRIPTION_ID);

    let mut received = Vec::new();
    while received.len() < 3 {
        let item = tokio::time::timeout(Duration::from_secs(5), heads.next())
            .await
            .expect("timed out waiting for notification")
            .expect("stream ended early");
        received.push(item.unwrap());
    }
    assert_eq!(received, vec![1, 2, 3]);

    heads.cancel().await.unwrap();
    assert!(heads.next().await.is_none());
}

#[rstest]
#[tokio::test]
async fn test_server_drop_fails_call_and_reconnects() {
    let addr = start_test_server().await;
    let config = RpcClientConfig {
        reconnect_jitter_ms: 0,
        ..Default::default()
    };
    let client = connected_client(addr, config).await;

    let result = client.call::<_, Value>("drop_me", &()).await;
    assert_eq!(
        result,
        Err(RpcError::Disconnected {
            code: Some(DROP_CLOSE_CODE)
        })
    );

    assert!(
        client
            .wait_for_state(ConnectionState::Connected, Duration::from_secs(5))
            .await
    );
    let chain_id: String = client.call("eth_chainId", &()).await.unwrap();
    assert_eq!(chain_id, "0x1");
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queued_call_replays_on_connect_multi_thread() {
    let addr = start_test_server().await;
    let transport = Arc::new(WebSocketTransport::new(WebSocketTransportConfig::new(
        format!("ws://{addr}/ws"),
    )));
    let client = RpcClient::new(RpcClientConfig::default(), transport, JsonRpcCodec::new()).unwrap();

    for _ in 0..100 {
        let queued = tokio::spawn({
            let client = client.clone();
            async move { client.call::<_, String>("eth_chainId", &()).await }
        });
        // Let the call reach the engine queue before connecting
        tokio::time::sleep(Duration::from_millis(1)).await;

        client.connect().await.unwrap();
        let immediate: RpcResult<String> = client.call("eth_chainId", &()).await;

        assert_eq!(queued.await.unwrap(), Ok("0x1".to_string()));
        assert_eq!(immediate, Ok("0x1".to_string()));

        client.disconnect().await.unwrap();
    }
}
