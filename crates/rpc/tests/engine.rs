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

//! Engine scenarios driven through the public client over an in-memory transport.

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use meridian_network::{error::TransportError, mode::ConnectionState};
use meridian_rpc::{
    CallMode, CallOptions, JsonRpcCodec, RpcClient, RpcClientConfig, RpcError,
    error::TimeoutKind,
    messages::{RequestId, SubscriptionId},
    testing::{MockTransport, wait_until_async},
};
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::json;
use tokio::{sync::broadcast, time::Instant};

fn test_config() -> RpcClientConfig {
    RpcClientConfig {
        reconnect_jitter_ms: 0,
        ..Default::default()
    }
}

fn new_client(config: RpcClientConfig) -> (RpcClient, Arc<MockTransport>) {
    let mock = MockTransport::new();
    let client = RpcClient::new(config, mock.clone(), JsonRpcCodec::new()).unwrap();
    (client, mock)
}

async fn connected_client(config: RpcClientConfig) -> (RpcClient, Arc<MockTransport>) {
    let (client, mock) = new_client(config);
    client.connect().await.unwrap();
    (client, mock)
}

async fn wait_for_sent(mock: &MockTransport, count: usize) {
    wait_until_async(
        || async move { mock.sent().len() >= count },
        Duration::from_secs(5),
    )
    .await;
}

async fn next_error(errors: &mut broadcast::Receiver<RpcError>) -> RpcError {
    tokio::time::timeout(Duration::from_secs(5), errors.recv())
        .await
        .expect("timed out waiting for error")
        .expect("error channel closed")
}

fn ack(id: u64, subscription: &str) -> String {
    json!({"jsonrpc": "2.0", "id": id, "result": subscription}).to_string()
}

fn notification(subscription: &str, result: &serde_json::Value) -> String {
    json!({
        "jsonrpc": "2.0",
        "method": "sub_x",
        "params": {"subscription": subscription, "result": result}
    })
    .to_string()
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_round_trip() {
    let (client, mock) = connected_client(test_config()).await;

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.call::<_, String>("foo", &()).await }
    });

    wait_for_sent(&mock, 1).await;
    assert_eq!(
        mock.sent_json()[0],
        json!({"jsonrpc": "2.0", "id": 1, "method": "foo", "params": []})
    );

    mock.push(r#"{"jsonrpc":"2.0","id":1,"result":"bar"}"#);

    assert_eq!(call.await.unwrap().unwrap(), "bar");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_replies_resolve_out_of_order() {
    let (client, mock) = connected_client(test_config()).await;

    let first = tokio::spawn({
        let client = client.clone();
        async move { client.call::<_, u64>("first", &()).await }
    });
    wait_for_sent(&mock, 1).await;
    let second = tokio::spawn({
        let client = client.clone();
        async move { client.call::<_, u64>("second", &()).await }
    });
    wait_for_sent(&mock, 2).await;

    mock.push(r#"{"id":2,"result":20}"#);
    assert_eq!(second.await.unwrap().unwrap(), 20);
    assert!(!first.is_finished());

    mock.push(r#"{"id":1,"result":10}"#);
    assert_eq!(first.await.unwrap().unwrap(), 10);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_server_error_reply() {
    let (client, mock) = connected_client(test_config()).await;

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.call::<_, String>("nope", &()).await }
    });
    wait_for_sent(&mock, 1).await;
    mock.push(r#"{"id":1,"error":{"code":-32601,"message":"Method not found"}}"#);

    assert_eq!(
        call.await.unwrap(),
        Err(RpcError::Rpc {
            code: -32601,
            message: "Method not found".to_string(),
            data: None,
        })
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_subscription_scenario() {
    let (client, mock) = connected_client(test_config()).await;

    // Burn id 1 on a plain call
    let call = tokio::spawn({
        let client = client.clone();
        async move { client.call::<_, String>("foo", &()).await }
    });
    wait_for_sent(&mock, 1).await;
    mock.push(r#"{"id":1,"result":"bar"}"#);
    call.await.unwrap().unwrap();

    let (subscription, ()) = tokio::join!(
        client.subscribe::<_, u64>("sub_x", &(), "unsub_x"),
        async {
            wait_for_sent(&mock, 2).await;
            mock.push(&ack(2, "S1"));
        }
    );
    let mut subscription = subscription.unwrap();

    assert_eq!(
        mock.sent_json()[1],
        json!({"jsonrpc": "2.0", "id": 2, "method": "sub_x", "params": []})
    );
    assert_eq!(subscription.subscription_id(), &SubscriptionId::new("S1"));

    mock.push(&notification("S1", &json!(42)));
    assert_eq!(subscription.next().await, Some(Ok(42)));

    let (cancelled, ()) = tokio::join!(subscription.cancel(), async {
        wait_for_sent(&mock, 3).await;
        mock.push(r#"{"id":3,"result":true}"#);
    });
    cancelled.unwrap();

    assert_eq!(
        mock.sent_json()[2],
        json!({"jsonrpc": "2.0", "id": 3, "method": "unsub_x", "params": ["S1"]})
    );

    // Nothing is delivered after the unsubscribe
    let mut errors = client.errors();
    mock.push(&notification("S1", &json!(43)));
    assert_eq!(subscription.next().await, None);
    assert_eq!(
        next_error(&mut errors).await,
        RpcError::UnknownSubscription(SubscriptionId::new("S1"))
    );

    // Cancelling again is a no-op
    subscription.cancel().await.unwrap();
    assert_eq!(mock.sent().len(), 3);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_unsubscribe_rejected_by_server() {
    let (client, mock) = connected_client(test_config()).await;

    let (subscription, ()) = tokio::join!(
        client.subscribe::<_, u64>("sub_x", &(), "unsub_x"),
        async {
            wait_for_sent(&mock, 1).await;
            mock.push(&ack(1, "S1"));
        }
    );
    let mut subscription = subscription.unwrap();

    let (cancelled, ()) = tokio::join!(subscription.cancel(), async {
        wait_for_sent(&mock, 2).await;
        mock.push(r#"{"id":2,"result":false}"#);
    });

    assert_eq!(
        cancelled,
        Err(RpcError::UnsubscribeFailed(SubscriptionId::new("S1")))
    );
    // Torn down locally regardless
    assert_eq!(subscription.next().await, None);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_call_timeout_then_late_reply_is_anomaly() {
    let (client, mock) = connected_client(test_config()).await;
    let mut errors = client.errors();
    let started = Instant::now();

    let call = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .call_with::<_, String>(
                    "foo",
                    &(),
                    CallOptions::default().with_timeout(Duration::from_secs(1)),
                )
                .await
        }
    });

    assert_eq!(
        call.await.unwrap(),
        Err(RpcError::Timeout {
            id: RequestId::new(1),
            kind: TimeoutKind::Call,
        })
    );
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(1), "{elapsed:?}");
    assert!(elapsed <= Duration::from_millis(2100), "{elapsed:?}");

    mock.push(r#"{"id":1,"result":"too late"}"#);
    assert_eq!(
        next_error(&mut errors).await,
        RpcError::UnknownRequestId(RequestId::new(1))
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_malformed_frame_is_anomaly() {
    let (client, mock) = connected_client(test_config()).await;
    let mut errors = client.errors();

    mock.push("garbage");

    assert!(matches!(next_error(&mut errors).await, RpcError::Decode(_)));
    assert!(client.is_connected());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_duplicate_subscription_id_rejected() {
    let (client, mock) = connected_client(test_config()).await;

    let (first, second, ()) = tokio::join!(
        client.subscribe::<_, u64>("sub_x", &(), "unsub_x"),
        client.subscribe::<_, u64>("sub_x", &(), "unsub_x"),
        async {
            wait_for_sent(&mock, 2).await;
            mock.push(&ack(1, "S1"));
            mock.push(&ack(2, "S1"));
        }
    );

    let mut first = first.unwrap();
    assert_eq!(
        second.unwrap_err(),
        RpcError::DuplicateSubscription(SubscriptionId::new("S1"))
    );

    // The original registration is untouched
    mock.push(&notification("S1", &json!(7)));
    assert_eq!(first.next().await, Some(Ok(7)));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_id_wraparound_skips_live_subscription() {
    let config = RpcClientConfig {
        max_request_id: 3,
        ..test_config()
    };
    let (client, mock) = connected_client(config).await;

    let (first, ()) = tokio::join!(
        client.subscribe::<_, u64>("sub_x", &(), "unsub_x"),
        async {
            wait_for_sent(&mock, 1).await;
            mock.push(&ack(1, "A"));
        }
    );
    let first = first.unwrap();

    for id in 2..=3u64 {
        let call = tokio::spawn({
            let client = client.clone();
            async move { client.call::<_, String>("foo", &()).await }
        });
        wait_for_sent(&mock, id as usize).await;
        mock.push(&json!({"id": id, "result": "ok"}).to_string());
        call.await.unwrap().unwrap();
    }

    // Ids wrap here, 1 still addresses the first subscription
    let (second, ()) = tokio::join!(
        client.subscribe::<_, u64>("sub_x", &(), "unsub_x"),
        async {
            wait_for_sent(&mock, 4).await;
            mock.push(&ack(2, "B"));
        }
    );
    let mut second = second.unwrap();
    assert_eq!(mock.sent_json()[3]["id"], json!(2));

    let (cancelled, ()) = tokio::join!(first.cancel(), async {
        wait_for_sent(&mock, 5).await;
        mock.push(r#"{"id":3,"result":true}"#);
    });
    cancelled.unwrap();

    assert_eq!(
        mock.sent_json()[4],
        json!({"jsonrpc": "2.0", "id": 3, "method": "unsub_x", "params": ["A"]})
    );

    mock.push(&notification("B", &json!(7)));
    assert_eq!(second.next().await, Some(Ok(7)));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_subscribe_fails_when_live_ids_fill_the_space() {
    let config = RpcClientConfig {
        max_request_id: 2,
        ..test_config()
    };
    let (client, mock) = connected_client(config).await;

    let (first, ()) = tokio::join!(
        client.subscribe::<_, u64>("sub_x", &(), "unsub_x"),
        async {
            wait_for_sent(&mock, 1).await;
            mock.push(&ack(1, "A"));
        }
    );
    let mut first = first.unwrap();

    let _pending = tokio::spawn({
        let client = client.clone();
        async move { client.call::<_, String>("foo", &()).await }
    });
    wait_for_sent(&mock, 2).await;

    let result = client.subscribe::<_, u64>("sub_x", &(), "unsub_x").await;

    assert_eq!(result.unwrap_err(), RpcError::IdSpaceExhausted);
    assert_eq!(mock.sent().len(), 2);

    mock.push(&notification("A", &json!(1)));
    assert_eq!(first.next().await, Some(Ok(1)));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_cancel_before_ack_unsubscribes_on_ack() {
    let (client, mock) = connected_client(test_config()).await;
    let mut errors = client.errors();

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.subscribe::<_, u64>("sub_x", &(), "unsub_x").await }
    });
    wait_for_sent(&mock, 1).await;

    // Caller gives up before the server acknowledges
    pending.abort();
    let _ = pending.await;

    mock.push(&ack(1, "S1"));
    wait_for_sent(&mock, 2).await;
    assert_eq!(
        mock.sent_json()[1],
        json!({"jsonrpc": "2.0", "id": 2, "method": "unsub_x", "params": ["S1"]})
    );

    // No handler ever sees a notification
    mock.push(&notification("S1", &json!(1)));
    assert_eq!(
        next_error(&mut errors).await,
        RpcError::UnknownSubscription(SubscriptionId::new("S1"))
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_drop_sends_single_unsubscribe() {
    let (client, mock) = connected_client(test_config()).await;

    let (subscription, ()) = tokio::join!(
        client.subscribe::<_, u64>("sub_x", &(), "unsub_x"),
        async {
            wait_for_sent(&mock, 1).await;
            mock.push(&ack(1, "0xab"));
        }
    );
    drop(subscription.unwrap());

    wait_for_sent(&mock, 2).await;
    assert_eq!(mock.sent_json()[1]["method"], json!("unsub_x"));
    assert_eq!(mock.sent_json()[1]["params"], json!(["0xab"]));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(mock.sent().len(), 2);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_decode_failure_ends_stream_and_unsubscribes() {
    let (client, mock) = connected_client(test_config()).await;

    let (subscription, ()) = tokio::join!(
        client.subscribe::<_, u64>("sub_x", &(), "unsub_x"),
        async {
            wait_for_sent(&mock, 1).await;
            mock.push(&ack(1, "S1"));
        }
    );
    let mut subscription = subscription.unwrap();

    mock.push(&notification("S1", &json!("not a number")));

    assert!(matches!(
        subscription.next().await,
        Some(Err(RpcError::Decode(_)))
    ));
    assert_eq!(subscription.next().await, None);

    wait_for_sent(&mock, 2).await;
    assert_eq!(mock.sent_json()[1]["method"], json!("unsub_x"));

    drop(subscription);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(mock.sent().len(), 2);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_disconnect_drains_calls_and_subscriptions() {
    let config = RpcClientConfig {
        auto_reconnect: false,
        ..test_config()
    };
    let (client, mock) = connected_client(config).await;

    let (subscription, ()) = tokio::join!(
        client.subscribe::<_, u64>("sub_x", &(), "unsub_x"),
        async {
            wait_for_sent(&mock, 1).await;
            mock.push(&ack(1, "S1"));
        }
    );
    let mut subscription = subscription.unwrap();

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.call::<_, String>("foo", &()).await }
    });
    wait_for_sent(&mock, 2).await;

    mock.drop_connection(1006);

    let expected = RpcError::Disconnected { code: Some(1006) };
    assert_eq!(call.await.unwrap(), Err(expected.clone()));
    assert_eq!(subscription.next().await, Some(Err(expected)));
    assert_eq!(subscription.next().await, None);
    assert!(
        client
            .wait_for_state(ConnectionState::Disconnected, Duration::from_secs(1))
            .await
    );

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(mock.connect_count(), 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_unexpected_drop_reconnects_after_draining() {
    let (client, mock) = connected_client(test_config()).await;

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.call::<_, String>("foo", &()).await }
    });
    wait_for_sent(&mock, 1).await;

    mock.drop_connection(1006);

    assert_eq!(
        call.await.unwrap(),
        Err(RpcError::Disconnected { code: Some(1006) })
    );
    assert!(
        client
            .wait_for_state(ConnectionState::Connected, Duration::from_secs(5))
            .await
    );
    assert_eq!(mock.connect_count(), 2);

    // Fresh calls work on the new connection
    let call = tokio::spawn({
        let client = client.clone();
        async move { client.call::<_, String>("foo", &()).await }
    });
    wait_for_sent(&mock, 2).await;
    mock.push(r#"{"id":2,"result":"again"}"#);
    assert_eq!(call.await.unwrap().unwrap(), "again");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_reconnect_backs_off_and_gives_up() {
    let config = RpcClientConfig {
        reconnect_max_attempts: Some(2),
        ..test_config()
    };
    let (client, mock) = connected_client(config).await;
    let mut errors = client.errors();

    mock.fail_next_connect(TransportError::Connect("refused".to_string()));
    mock.fail_next_connect(TransportError::Connect("refused".to_string()));
    mock.drop_connection(1006);

    let exhausted = loop {
        match next_error(&mut errors).await {
            error @ RpcError::ReconnectExhausted { .. } => break error,
            RpcError::Transport(_) => {}
            other => panic!("unexpected error {other:?}"),
        }
    };

    assert_eq!(exhausted, RpcError::ReconnectExhausted { attempts: 2 });
    assert_eq!(mock.connect_count(), 3);
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    // An explicit connect still works afterwards
    client.connect().await.unwrap();
    assert!(client.is_connected());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_failed_explicit_connect_is_not_retried() {
    let (client, mock) = new_client(test_config());
    mock.fail_next_connect(TransportError::Connect("refused".to_string()));

    let result = client.connect().await;

    assert_eq!(
        result,
        Err(RpcError::Transport(TransportError::Connect(
            "refused".to_string()
        )))
    );
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(mock.connect_count(), 1);
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_caller_disconnect_suppresses_reconnect() {
    let (client, mock) = connected_client(test_config()).await;

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.call::<_, String>("foo", &()).await }
    });
    wait_for_sent(&mock, 1).await;

    client.disconnect().await.unwrap();

    assert_eq!(
        call.await.unwrap(),
        Err(RpcError::Disconnected { code: Some(1000) })
    );
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(mock.connect_count(), 1);
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    // Suppression applies once, the next connection reconnects on drops again
    client.connect().await.unwrap();
    mock.drop_connection(1006);
    assert!(
        client
            .wait_for_state(ConnectionState::Connected, Duration::from_secs(5))
            .await
    );
    assert_eq!(mock.connect_count(), 3);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_fail_fast_while_disconnected() {
    let (client, mock) = new_client(test_config());

    let result = client
        .call_with::<_, String>(
            "foo",
            &(),
            CallOptions::default().with_mode(CallMode::FailFast),
        )
        .await;

    assert_eq!(result, Err(RpcError::Disconnected { code: None }));
    assert!(mock.sent().is_empty());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_queued_call_replays_with_fresh_timeout() {
    let (client, mock) = new_client(test_config());

    let call = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .call_with::<_, String>(
                    "foo",
                    &(),
                    CallOptions::default().with_timeout(Duration::from_secs(2)),
                )
                .await
        }
    });

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(mock.sent().is_empty());
    assert!(!call.is_finished());

    client.connect().await.unwrap();
    wait_for_sent(&mock, 1).await;
    assert_eq!(mock.sent_json()[0]["method"], json!("foo"));

    // Well past the submission time plus timeout, still inside the budget from flush
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!call.is_finished());

    mock.push(r#"{"id":1,"result":"replayed"}"#);
    assert_eq!(call.await.unwrap().unwrap(), "replayed");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_queued_call_times_out_from_flush() {
    let (client, mock) = new_client(test_config());

    let call = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .call_with::<_, String>(
                    "foo",
                    &(),
                    CallOptions::default().with_timeout(Duration::from_secs(2)),
                )
                .await
        }
    });

    tokio::time::sleep(Duration::from_secs(5)).await;
    client.connect().await.unwrap();
    let flushed = Instant::now();
    wait_for_sent(&mock, 1).await;

    assert_eq!(
        call.await.unwrap(),
        Err(RpcError::Timeout {
            id: RequestId::new(1),
            kind: TimeoutKind::Call,
        })
    );
    let elapsed = flushed.elapsed();
    assert!(elapsed >= Duration::from_secs(2), "{elapsed:?}");
    assert!(elapsed <= Duration::from_millis(3100), "{elapsed:?}");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_queued_call_gives_up_waiting_for_reconnect() {
    let config = RpcClientConfig {
        reconnect_wait_timeout_ms: 2_000,
        ..test_config()
    };
    let (client, mock) = new_client(config);

    let result = client.call::<_, String>("foo", &()).await;

    assert_eq!(
        result,
        Err(RpcError::Timeout {
            id: RequestId::new(1),
            kind: TimeoutKind::ReconnectWait,
        })
    );
    assert!(mock.sent().is_empty());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_handler_subscription() {
    let (client, mock) = connected_client(test_config()).await;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let (handle, ()) = tokio::join!(
        client.subscribe_with_handler::<_, u64, _>("sub_x", &(), "unsub_x", move |item| {
            let _ = tx.send(item);
        }),
        async {
            wait_for_sent(&mock, 1).await;
            mock.push(&ack(1, "S1"));
        }
    );
    let handle = handle.unwrap();
    assert_eq!(handle.subscription_id(), &SubscriptionId::new("S1"));

    mock.push(&notification("S1", &json!(1)));
    mock.push(&notification("S1", &json!(2)));
    assert_eq!(rx.recv().await, Some(Ok(1)));
    assert_eq!(rx.recv().await, Some(Ok(2)));

    let (cancelled, ()) = tokio::join!(handle.cancel(), async {
        wait_for_sent(&mock, 2).await;
        mock.push(r#"{"id":2,"result":true}"#);
    });
    cancelled.unwrap();

    // The handler task ends once the registration is gone
    assert_eq!(rx.recv().await, None);
    let handle = &handle;
    wait_until_async(|| async move { handle.is_finished() }, Duration::from_secs(1)).await;
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_dropping_client_terminates_subscriptions() {
    let (client, mock) = connected_client(test_config()).await;

    let (subscription, ()) = tokio::join!(
        client.subscribe::<_, u64>("sub_x", &(), "unsub_x"),
        async {
            wait_for_sent(&mock, 1).await;
            mock.push(&ack(1, "S1"));
        }
    );
    let mut subscription = subscription.unwrap();

    drop(client);

    assert_eq!(subscription.next().await, Some(Err(RpcError::Closed)));
    assert_eq!(subscription.next().await, None);
    let mock: &MockTransport = &mock;
    wait_until_async(
        || async move { !mock.is_connected() },
        Duration::from_secs(5),
    )
    .await;
}
