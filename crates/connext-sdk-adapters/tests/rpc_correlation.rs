mod common;

use std::sync::Arc;

use serde_json::json;

use connext_sdk_adapters::ScriptedWallet;
use connext_sdk_core::{JsonRpcRequest, PortError};

use common::{bare_transport, connection, open_connection, wallet_transport, FRAME_ORIGIN};

#[tokio::test]
async fn responses_settle_by_id_even_when_reordered() {
    let transport = bare_transport();
    let conn = open_connection(&transport).await;

    let deliver = async {
        tokio::task::yield_now().await;
        let requests = transport.posted_requests();
        assert_eq!(requests.len(), 2, "both requests posted before any answer");
        for request in requests.iter().rev() {
            let reply = json!({ "id": request.id, "jsonrpc": "2.0", "result": request.method });
            assert!(transport.deliver_from_frame(&reply.to_string()));
        }
    };
    let (first, second, ()) = tokio::join!(
        conn.send("connext_first", json!({})),
        conn.send("connext_second", json!({})),
        deliver
    );

    assert_eq!(first.expect("first"), json!("connext_first"));
    assert_eq!(second.expect("second"), json!("connext_second"));
    assert_eq!(conn.pending_count(), 0);
}

#[tokio::test]
async fn request_payload_carries_version_and_defaults_params() {
    let transport = bare_transport().with_responder(Arc::new(|req: &JsonRpcRequest| {
        vec![json!({ "id": req.id, "result": null }).to_string()]
    }))
    .expect("responder");
    let conn = open_connection(&transport).await;

    let result = conn
        .send("connext_getBalance", serde_json::Value::Null)
        .await
        .expect("null result resolves");
    assert_eq!(result, serde_json::Value::Null);

    let raw: serde_json::Value =
        serde_json::from_str(&transport.posted()[0]).expect("posted json");
    assert_eq!(raw["jsonrpc"], "2.0");
    assert_eq!(raw["method"], "connext_getBalance");
    assert_eq!(raw["params"], json!({}));
    assert!(raw["id"].as_u64().expect("numeric id") > 1_000_000_000_000_000);
}

#[tokio::test]
async fn send_before_open_fails_without_posting() {
    let transport = bare_transport();
    let conn = connection(&transport);

    let err = conn
        .send("connext_getBalance", json!({}))
        .await
        .expect_err("not rendered");
    assert!(matches!(err, PortError::Transport(_)));

    // Rendered by someone else, but this connection never opened.
    use connext_sdk_core::FrameTransport;
    transport.render().await.expect("render");
    let err = conn
        .send("connext_getBalance", json!({}))
        .await
        .expect_err("not connected");
    assert!(err.to_string().contains("connection not open"));
    assert!(transport.posted().is_empty());
    assert_eq!(conn.pending_count(), 0);
}

#[tokio::test]
async fn empty_method_is_rejected() {
    let transport = bare_transport();
    let conn = open_connection(&transport).await;
    let err = conn.send("  ", json!({})).await.expect_err("empty method");
    assert!(matches!(err, PortError::Protocol { .. }));
    assert!(transport.posted().is_empty());
}

#[tokio::test]
async fn duplicate_responses_settle_once() {
    let transport = bare_transport().with_responder(Arc::new(|req: &JsonRpcRequest| {
        vec![
            json!({ "id": req.id, "result": "first" }).to_string(),
            json!({ "id": req.id, "result": "second" }).to_string(),
        ]
    }))
    .expect("responder");
    let conn = open_connection(&transport).await;

    let result = conn.send("connext_ping", json!({})).await.expect("ping");
    assert_eq!(result, json!("first"));
    assert_eq!(conn.pending_count(), 0);
}

#[tokio::test]
async fn response_without_result_or_error_names_the_method() {
    let transport = bare_transport().with_responder(Arc::new(|req: &JsonRpcRequest| {
        vec![json!({ "id": req.id, "jsonrpc": "2.0" }).to_string()]
    }))
    .expect("responder");
    let conn = open_connection(&transport).await;

    let err = conn
        .send("connext_withdraw", json!({}))
        .await
        .expect_err("malformed");
    assert_eq!(err.to_string(), "failed request for method: connext_withdraw");
}

#[tokio::test]
async fn remote_errors_surface_verbatim() {
    let wallet = ScriptedWallet::default();
    wallet.fail_method("connext_getBalance", "node unreachable");
    let transport = wallet_transport(&wallet);
    let conn = open_connection(&transport).await;

    let err = conn
        .send("connext_getBalance", json!({}))
        .await
        .expect_err("remote error");
    assert_eq!(err, PortError::Remote("node unreachable".to_owned()));
    assert_eq!(err.to_string(), "node unreachable");
}

#[tokio::test]
async fn foreign_origin_cannot_settle_calls() {
    let transport = bare_transport();
    let conn = open_connection(&transport).await;

    let deliver = async {
        tokio::task::yield_now().await;
        let id = transport.posted_requests()[0].id;
        let spoof = json!({ "id": id, "result": "spoofed" }).to_string();
        assert!(!transport.deliver("https://evil.example", &spoof));
        assert!(!transport.deliver("http://localhost:3031", &spoof));
        assert_eq!(conn.pending_count(), 1);
        assert!(transport.deliver(FRAME_ORIGIN, &json!({ "id": id, "result": "real" }).to_string()));
    };
    let (result, ()) = tokio::join!(conn.send("connext_ping", json!({})), deliver);
    assert_eq!(result.expect("real answer"), json!("real"));
}

#[tokio::test]
async fn deadline_expiry_drops_the_pending_entry() {
    let wallet = ScriptedWallet::default();
    wallet.ignore_method("connext_ping");
    let transport = wallet_transport(&wallet);
    let conn = open_connection(&transport).await;

    let err = conn
        .send_with_deadline("connext_ping", json!({}), 250)
        .await
        .expect_err("deadline");
    assert_eq!(
        err,
        PortError::Timeout {
            method: "connext_ping".to_owned(),
            after_ms: 250
        }
    );
    assert_eq!(conn.pending_count(), 0);
    assert_eq!(conn.clock().slept_ms(), 250);

    // A late answer for the abandoned id is dropped quietly.
    let id = transport.posted_requests()[0].id;
    assert!(transport.deliver_from_frame(&json!({ "id": id, "result": 1 }).to_string()));
    assert_eq!(conn.pending_count(), 0);
}

#[tokio::test]
async fn close_fails_every_pending_call() {
    let transport = bare_transport();
    let conn = open_connection(&transport).await;

    let closer = async {
        tokio::task::yield_now().await;
        assert_eq!(conn.pending_count(), 2);
        conn.close().await.expect("close");
    };
    let (a, b, ()) = tokio::join!(
        conn.send("connext_a", json!({})),
        conn.send("connext_b", json!({})),
        closer
    );
    assert_eq!(
        a.expect_err("cancelled"),
        PortError::Cancelled {
            method: "connext_a".to_owned()
        }
    );
    assert!(matches!(b, Err(PortError::Cancelled { .. })));
    assert!(!conn.is_connected());
    assert_eq!(transport.remove_count(), 1);
}

#[tokio::test]
async fn cancel_settles_a_single_call() {
    let transport = bare_transport();
    let conn = open_connection(&transport).await;

    let canceller = async {
        tokio::task::yield_now().await;
        let (id, method) = conn.pending_calls()[0].clone();
        assert_eq!(method, "connext_slow");
        assert!(conn.cancel(id).expect("cancel"));
        assert!(!conn.cancel(id).expect("second cancel"));
    };
    let (result, ()) = tokio::join!(conn.send("connext_slow", json!({})), canceller);
    assert!(matches!(result, Err(PortError::Cancelled { .. })));
}

#[tokio::test]
async fn open_waits_for_the_init_marker() {
    let transport = connext_sdk_adapters::LoopbackTransport::manual(common::FRAME_SRC)
        .expect("manual transport");
    let conn = connection(&transport);

    let init = async {
        tokio::task::yield_now().await;
        assert!(!conn.is_connected());
        // Unrelated chatter before the marker is ignored.
        transport.deliver_from_frame("event:something-else");
        transport.deliver_from_frame("not json");
        assert!(transport.signal_initialized());
    };
    let (opened, ()) = tokio::join!(conn.open(), init);
    opened.expect("open");
    assert!(conn.is_connected());
    assert_eq!(transport.render_count(), 1);
}
