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

//! Subscribes to a node over WebSocket and logs every notification until CTRL+C.
//!
//! ```text
//! RPC_WSS_URL=wss://node.example/ws cargo run --bin rpc-subscribe -- \
//!     --method eth_subscribe --params '["newHeads"]'
//! ```

use std::{sync::Arc, time::Duration};

use clap::Parser;
use futures::StreamExt;
use meridian_network::websocket::{WebSocketTransport, WebSocketTransportConfig};
use meridian_rpc::{JsonRpcCodec, RpcClient, RpcClientConfig};
use tokio::{pin, signal};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[clap(version, about)]
struct Args {
    /// WebSocket endpoint of the node.
    #[arg(long, env = "RPC_WSS_URL")]
    url: String,
    /// Subscribe method.
    #[arg(long, default_value = "eth_subscribe")]
    method: String,
    /// Unsubscribe method.
    #[arg(long, default_value = "eth_unsubscribe")]
    unsubscribe_method: String,
    /// Subscribe params as JSON.
    #[arg(long, default_value = r#"["newHeads"]"#)]
    params: String,
    /// Heartbeat ping interval in seconds.
    #[arg(long)]
    heartbeat: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let params: serde_json::Value = serde_json::from_str(&args.params)?;

    let mut transport_config = WebSocketTransportConfig::new(args.url.clone());
    transport_config.heartbeat = args.heartbeat;
    let transport = Arc::new(WebSocketTransport::new(transport_config));

    let client = RpcClient::new(RpcClientConfig::default(), transport, JsonRpcCodec::new())?;
    client.connect().await?;
    tracing::info!("Connected to {}", args.url);

    let mut anomalies = client.errors();
    let mut subscription = client
        .subscribe::<_, serde_json::Value>(&args.method, &params, &args.unsubscribe_method)
        .await?;
    tracing::info!("Subscribed {}", subscription.subscription_id());
    tracing::info!("Press CTRL+C to stop");

    let sigint = signal::ctrl_c();
    pin!(sigint);

    let mut count = 0u64;

    loop {
        tokio::select! {
            item = subscription.next() => match item {
                Some(Ok(value)) => {
                    count += 1;
                    tracing::info!("[#{count}] {value}");
                }
                Some(Err(e)) => {
                    tracing::error!("Subscription ended: {e}");
                    break;
                }
                None => break,
            },
            Ok(error) = anomalies.recv() => tracing::warn!("{error}"),
            _ = &mut sigint => {
                tracing::info!("Received SIGINT, unsubscribing");
                if let Err(e) = subscription.cancel().await {
                    tracing::warn!("Unsubscribe failed: {e}");
                }
                break;
            }
        }
    }

    client.disconnect().await?;
    // Let the close handshake finish before the runtime goes away
    tokio::time::sleep(Duration::from_millis(100)).await;
    tracing::info!("Received {count} notifications");

    Ok(())
}
