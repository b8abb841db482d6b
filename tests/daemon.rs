#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use common::{fixture, index};
use viberag::config::socket_path;
use viberag::daemon::{run_daemon_with_engine, DaemonOptions};

struct DaemonClient {
    lines: tokio::io::Lines<BufReader<tokio::net::unix::OwnedReadHalf>>,
    write: tokio::net::unix::OwnedWriteHalf,
    next_id: i64,
}

impl DaemonClient {
    async fn connect(sock: &std::path::Path) -> Self {
        // The daemon task needs a moment to bind the socket.
        let mut attempts = 0;
        let stream = loop {
            match UnixStream::connect(sock).await {
                Ok(stream) => break stream,
                Err(_) if attempts < 100 => {
                    attempts += 1;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Err(e) => panic!("could not connect to daemon socket: {}", e),
            }
        };
        let (read, write) = stream.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            write,
            next_id: 1,
        }
    }

    async fn call(&mut self, method: &str, params: Value) -> Value {
        let id = self.next_id;
        self.next_id += 1;
        let frame = serde_json::to_string(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))
        .unwrap();
        self.write
            .write_all(format!("{}\n", frame).as_bytes())
            .await
            .unwrap();

        let line = tokio::time::timeout(Duration::from_secs(30), self.lines.next_line())
            .await
            .expect("daemon response within timeout")
            .unwrap()
            .expect("connection open");
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["id"], json!(id), "response id echoes request id");
        value
    }
}

#[tokio::test]
async fn daemon_serves_the_full_method_surface() {
    let (tmp, engine) = fixture(&[
        ("math.py", "def add(a, b):\n    \"\"\"Add two numbers.\"\"\"\n    return a + b\n"),
        ("app.py", "from math import add\n\ntotal = add(1, 2)\n"),
    ])
    .await;
    index(&engine).await;

    let root = tmp.path().to_path_buf();
    let sock = socket_path(&root);
    let daemon = tokio::spawn(run_daemon_with_engine(
        root.clone(),
        Arc::new(engine),
        DaemonOptions {
            warmup: false,
            watch: false,
            ..Default::default()
        },
    ));

    let mut client = DaemonClient::connect(&sock).await;

    // ping and health expose the protocol version and state.
    let pong = client.call("ping", json!({})).await;
    assert_eq!(pong["result"]["pong"], json!(true));
    assert_eq!(pong["result"]["protocolVersion"], json!(1));

    let health = client.call("health", json!({})).await;
    assert_eq!(health["result"]["ok"], json!(true));
    assert_eq!(health["result"]["state"], json!("ready"));

    // status reflects the prior index run.
    let status = client.call("status", json!({})).await;
    assert_eq!(status["result"]["indexed"], json!(true));

    // watchStatus works even when the watcher is off.
    let watch = client.call("watchStatus", json!({})).await;
    assert_eq!(watch["result"]["watching"], json!(false));

    // search over the wire.
    let search = client
        .call("search", json!({"query": "add", "intent": "definition", "k": 5}))
        .await;
    let defs = search["result"]["groups"]["definitions"]
        .as_array()
        .unwrap();
    assert!(!defs.is_empty());
    let symbol_id = defs[0]["id"].as_str().unwrap().to_string();

    // getSymbol echoes the row.
    let symbol = client.call("getSymbol", json!({"id": symbol_id})).await;
    assert_eq!(symbol["result"]["symbol"]["symbol_name"], json!("add"));

    // findUsages sees the call in app.py.
    let usages = client
        .call("findUsages", json!({"symbol_name": "add", "k": 20}))
        .await;
    assert!(usages["result"]["total_refs"].as_u64().unwrap() > 0);

    // expandContext on the definition.
    let expanded = client
        .call(
            "expandContext",
            json!({"table": "symbols", "id": symbol_id, "limit": 5}),
        )
        .await;
    assert_eq!(expanded["result"]["file_path"], json!("math.py"));

    // index over the wire (no changes).
    let reindex = client.call("index", json!({})).await;
    assert_eq!(reindex["result"]["filesNew"], json!(0));

    // Parameter validation failures use the stable code.
    let bad = client.call("search", json!({"query": "x", "intent": "telepathy"})).await;
    assert_eq!(bad["error"]["code"], json!("invalid_params"));
    let unknown = client.call("mystery", json!({})).await;
    assert_eq!(unknown["error"]["code"], json!("invalid_params"));

    // cancel with nothing in flight signals nothing.
    let cancelled = client.call("cancel", json!({"target": "all"})).await;
    assert_eq!(cancelled["result"]["signalled"], json!([]));

    // eval runs end to end.
    let eval = client.call("eval", json!({"k": 5, "max_queries": 5})).await;
    assert!(eval["result"]["queries"].as_u64().unwrap() > 0);

    // shutdown acknowledges, then the daemon exits and removes the socket.
    let bye = client.call("shutdown", json!({})).await;
    assert_eq!(bye["result"]["ok"], json!(true));

    tokio::time::timeout(Duration::from_secs(10), daemon)
        .await
        .expect("daemon exits after shutdown")
        .unwrap()
        .unwrap();
    assert!(!sock.exists(), "socket file removed on shutdown");
}

#[tokio::test]
async fn index_async_refuses_concurrent_runs() {
    let (tmp, engine) = fixture(&[("math.py", "def add(a, b):\n    return a + b\n")]).await;
    index(&engine).await;

    let root = tmp.path().to_path_buf();
    let sock = socket_path(&root);
    let daemon = tokio::spawn(run_daemon_with_engine(
        root,
        Arc::new(engine),
        DaemonOptions {
            warmup: false,
            watch: false,
            ..Default::default()
        },
    ));

    let mut client = DaemonClient::connect(&sock).await;

    let first = client.call("indexAsync", json!({})).await;
    assert_eq!(first["result"]["started"], json!(true));

    // Immediately after: either still running (refused) or already done
    // (accepted); both are legal. When refused, the reason is stable.
    let second = client.call("indexAsync", json!({})).await;
    if second["result"]["started"] == json!(false) {
        assert_eq!(second["result"]["reason"], json!("in_progress"));
    }

    // Wait for the run to settle, then shut down.
    for _ in 0..100 {
        let health = client.call("health", json!({})).await;
        if health["result"]["state"] == json!("ready") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    client.call("shutdown", json!({})).await;
    let _ = tokio::time::timeout(Duration::from_secs(10), daemon).await;
}

#[tokio::test]
async fn malformed_frames_get_invalid_params_with_null_id() {
    let (tmp, engine) = fixture(&[("math.py", "def add(a, b):\n    return a + b\n")]).await;
    index(&engine).await;

    let root = tmp.path().to_path_buf();
    let sock = socket_path(&root);
    let daemon = tokio::spawn(run_daemon_with_engine(
        root,
        Arc::new(engine),
        DaemonOptions {
            warmup: false,
            watch: false,
            ..Default::default()
        },
    ));

    let mut attempts = 0;
    let stream = loop {
        match UnixStream::connect(&sock).await {
            Ok(s) => break s,
            Err(_) if attempts < 100 => {
                attempts += 1;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(e) => panic!("connect: {}", e),
        }
    };
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    write.write_all(b"this is not json\n").await.unwrap();
    let line = tokio::time::timeout(Duration::from_secs(10), lines.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let value: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["error"]["code"], json!("invalid_params"));
    assert_eq!(value["id"], Value::Null);

    write
        .write_all(b"{\"id\":1,\"method\":\"shutdown\",\"params\":{}}\n")
        .await
        .unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(10), daemon).await;
}
