mod common;

use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use alloy::primitives::{Address, U256};
use serde_json::{json, Value};
use tiny_http::{Response, Server, StatusCode};

use connext_sdk_adapters::{RpcChainAdapter, SdkConfig};
use connext_sdk_core::{ChainPort, PortError};

use common::{asset, recording_notifier};

/// JSON-RPC node stub: answers by method and records what was asked.
struct Node {
    url: String,
    head: Arc<AtomicU64>,
    calls: Arc<Mutex<Vec<Value>>>,
}

fn spawn_node(max_requests: usize) -> Node {
    let server = Server::http("127.0.0.1:0").expect("start server");
    let url = format!("http://{}", server.server_addr());
    let head = Arc::new(AtomicU64::new(0x10));
    let calls = Arc::new(Mutex::new(Vec::new()));

    let node_head = Arc::clone(&head);
    let node_calls = Arc::clone(&calls);
    thread::spawn(move || {
        for _ in 0..max_requests {
            let mut req = match server.recv() {
                Ok(r) => r,
                Err(_) => break,
            };
            let mut body = String::new();
            let _ = req.as_reader().read_to_string(&mut body);
            let call: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
            if let Ok(mut g) = node_calls.lock() {
                g.push(call.clone());
            }

            let result = match call["method"].as_str().unwrap_or_default() {
                "eth_blockNumber" => {
                    json!(format!("0x{:x}", node_head.load(Ordering::SeqCst)))
                }
                "eth_getBalance" => json!("0xde0b6b3a7640000"),
                "eth_call" => json!(format!("0x{:064x}", 2_500u64)),
                _ => Value::Null,
            };
            let payload = if result.is_null() {
                json!({ "jsonrpc": "2.0", "id": call["id"], "error": { "code": -32601, "message": "method not found" } })
            } else {
                json!({ "jsonrpc": "2.0", "id": call["id"], "result": result })
            };
            let response =
                Response::from_string(payload.to_string()).with_status_code(StatusCode(200));
            let _ = req.respond(response);
        }
    });

    Node { url, head, calls }
}

fn adapter(node: &Node) -> RpcChainAdapter {
    let config = SdkConfig {
        eth_provider_url: Some(node.url.clone()),
        block_poll_interval_ms: 250,
        ..SdkConfig::default()
    };
    RpcChainAdapter::from_config(&config).expect("adapter")
}

#[tokio::test]
async fn balances_are_read_over_json_rpc() {
    let node = spawn_node(8);
    let chain = adapter(&node);
    let owner = Address::repeat_byte(0x4d);

    assert_eq!(
        chain.native_balance(owner).await.expect("native"),
        U256::from(1_000_000_000_000_000_000u64)
    );
    assert_eq!(
        chain.token_balance(owner, asset()).await.expect("token"),
        U256::from(2_500u64)
    );
    // The zero asset is the native coin.
    assert_eq!(
        chain.token_balance(owner, Address::ZERO).await.expect("zero asset"),
        U256::from(1_000_000_000_000_000_000u64)
    );

    let calls = node.calls.lock().expect("calls");
    let eth_call = calls
        .iter()
        .find(|c| c["method"] == "eth_call")
        .expect("eth_call sent");
    assert_eq!(eth_call["params"][0]["to"], json!(asset()));
    let data = eth_call["params"][0]["data"].as_str().expect("data");
    assert!(data.starts_with("0x70a08231"));
    assert!(data.ends_with(&"4d".repeat(20)));
}

#[tokio::test]
async fn polling_notifies_only_on_a_new_head() {
    let node = spawn_node(8);
    let chain = adapter(&node);
    assert_eq!(chain.poll_interval_ms(), Some(250));

    // Nothing is fetched until a watcher is attached.
    assert_eq!(chain.poll().await.expect("idle poll"), None);
    assert!(node.calls.lock().expect("calls").is_empty());

    let (notifier, blocks) = recording_notifier();
    chain.watch_blocks(notifier).expect("watch");
    assert_eq!(chain.poll().await.expect("first poll"), Some(0x10));
    assert_eq!(chain.poll().await.expect("same head"), None);
    node.head.store(0x11, Ordering::SeqCst);
    chain.poll_head().await.expect("advanced head");
    assert_eq!(*blocks.lock().expect("blocks"), vec![0x10, 0x11]);

    chain.unwatch_blocks().expect("unwatch");
    assert!(!chain.is_watching());
}

#[tokio::test]
async fn unreachable_node_is_a_transport_error() {
    let chain = RpcChainAdapter::new("http://127.0.0.1:9", 500, 1_000).expect("adapter");
    let err = chain
        .native_balance(Address::ZERO)
        .await
        .expect_err("nothing listens on the discard port");
    assert!(matches!(err, PortError::Transport(_)));
}

#[test]
fn missing_provider_url_is_a_config_error() {
    let err = RpcChainAdapter::from_config(&SdkConfig::default()).expect_err("no url");
    assert!(matches!(err, PortError::Validation(_)));
}
