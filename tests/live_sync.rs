//! End-to-end tests against an in-process WebSocket server.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use esav_live::stores::LogEntryKind;
use esav_live::{ConnectionStatus, LiveClient, LiveConfig, ReconnectConfig};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{accept_async, tungstenite::Message};

const WAIT: Duration = Duration::from_secs(5);

/// One accepted client connection, from the server's side.
struct ServerConn {
    push: mpsc::UnboundedSender<Option<String>>,
    closed: oneshot::Receiver<()>,
}

impl ServerConn {
    fn send(&self, frame: Value) {
        self.push.send(Some(frame.to_string())).unwrap();
    }

    /// Close the connection from the server side.
    fn close(&self) {
        self.push.send(None).unwrap();
    }
}

struct TestServer {
    addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<ServerConn>,
    frames: mpsc::UnboundedReceiver<Value>,
    /// When each TCP connection was accepted, handshake or not.
    accepts: mpsc::UnboundedReceiver<Instant>,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_rejecting(0).await
    }

    /// Drop the first `rejected` connections before the WebSocket handshake.
    async fn start_rejecting(mut rejected: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (conn_tx, connections) = mpsc::unbounded_channel();
        let (frame_tx, frames) = mpsc::unbounded_channel();
        let (accept_tx, accepts) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let _ = accept_tx.send(Instant::now());
                if rejected > 0 {
                    rejected -= 1;
                    drop(stream);
                    continue;
                }
                let Ok(ws) = accept_async(stream).await else {
                    continue;
                };
                let (mut write, mut read) = ws.split();
                let (push, mut push_rx) = mpsc::unbounded_channel::<Option<String>>();
                let (closed_tx, closed) = oneshot::channel();
                if conn_tx.send(ServerConn { push, closed }).is_err() {
                    break;
                }

                let frame_tx = frame_tx.clone();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    let value: Value = serde_json::from_str(text.as_str()).unwrap();
                                    let _ = frame_tx.send(value);
                                }
                                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                                Some(Ok(_)) => {}
                            },
                            push = push_rx.recv() => match push {
                                Some(Some(text)) => {
                                    if write.send(Message::text(text)).await.is_err() {
                                        break;
                                    }
                                }
                                Some(None) | None => {
                                    let _ = write.send(Message::Close(None)).await;
                                    break;
                                }
                            },
                        }
                    }
                    let _ = closed_tx.send(());
                });
            }
        });

        Self {
            addr,
            connections,
            frames,
            accepts,
        }
    }

    async fn next_accept(&mut self) -> Instant {
        timeout(WAIT, self.accepts.recv())
            .await
            .expect("no connect attempt")
            .unwrap()
    }

    fn url(&self) -> String {
        format!("ws://{}/live", self.addr)
    }

    async fn next_connection(&mut self) -> ServerConn {
        timeout(WAIT, self.connections.recv())
            .await
            .expect("no connection")
            .unwrap()
    }

    async fn next_frame(&mut self) -> Value {
        timeout(WAIT, self.frames.recv())
            .await
            .expect("no frame from client")
            .unwrap()
    }

    /// Frames that arrive within `window`.
    async fn frames_within(&mut self, window: Duration) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(Some(frame)) = timeout(window, self.frames.recv()).await {
            out.push(frame);
        }
        out
    }
}

fn fast_config(server: &TestServer) -> LiveConfig {
    config_with_backoff(server, 20)
}

fn config_with_backoff(server: &TestServer, initial_delay_ms: u64) -> LiveConfig {
    LiveConfig::new(&server.url())
        .unwrap()
        .with_reconnect(ReconnectConfig {
            initial_delay_ms,
            max_delay_ms: initial_delay_ms * 5,
        })
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

#[tokio::test]
async fn shared_query_subscribes_once_and_hydrates() {
    let mut server = TestServer::start().await;
    let mut client = LiveClient::connect(fast_config(&server));
    let conn = server.next_connection().await;
    wait_until(|| client.status() == ConnectionStatus::Open).await;
    assert_eq!(client.banner(), None);

    let descriptor = json!({"term": {"x": 1}});
    let mut a = client.query("Q1", descriptor.clone());
    assert_eq!(
        server.next_frame().await,
        json!({"type": "subscribe", "queryId": "Q1", "esquery": {"term": {"x": 1}}})
    );

    let b = client.query("Q1", descriptor);
    conn.send(json!({
        "type": "query-delta",
        "documents": {"at://x/1": {"cid": "c1", "doc": {"title": "hi"}}},
        "queries": {"Q1": {"ecid": "e1", "result": ["at://x/1"]}}
    }));

    timeout(WAIT, async {
        while a.snapshot().is_loading {
            a.changed().await;
        }
    })
    .await
    .unwrap();

    let result = a.snapshot();
    assert_eq!(result.ecid.as_deref(), Some("e1"));
    assert_eq!(result.data.len(), 1);
    assert_eq!(result.data[0].doc.get_str("title"), Some("hi"));
    assert_eq!(b.snapshot().data, result.data);
    assert_eq!(client.document("at://x/1").unwrap().cid, "c1");

    drop(a);
    assert!(server.frames_within(Duration::from_millis(100)).await.is_empty());
    drop(b);
    assert_eq!(
        server.next_frame().await,
        json!({"type": "unsubscribe", "queryId": "Q1"})
    );

    client.shutdown().await;
}

#[tokio::test]
async fn ping_is_answered_and_errors_keep_connection() {
    let mut server = TestServer::start().await;
    let mut client = LiveClient::connect(fast_config(&server));
    let conn = server.next_connection().await;
    wait_until(|| client.status() == ConnectionStatus::Open).await;

    conn.send(json!({"type": "ping"}));
    assert_eq!(server.next_frame().await, json!({"type": "pong"}));

    conn.send(json!({"type": "error", "error": "bad query"}));
    conn.send(json!({"type": "mystery"}));
    conn.send(json!({"type": "ping"}));
    assert_eq!(server.next_frame().await, json!({"type": "pong"}));
    assert_eq!(client.status(), ConnectionStatus::Open);

    let entries = client.log_entries();
    assert!(entries
        .iter()
        .any(|e| e.payload.get("error") == Some(&json!("bad query"))));
    assert_eq!(
        entries
            .iter()
            .filter(|e| e.kind == LogEntryKind::Outgoing && e.payload == json!({"type": "pong"}))
            .count(),
        2
    );

    client.shutdown().await;
}

#[tokio::test]
async fn reconnect_resubscribes_once_with_last_token() {
    let mut server = TestServer::start().await;
    // Long enough to observe the closed state before the reconnect.
    let mut client = LiveClient::connect(config_with_backoff(&server, 300));
    let first = server.next_connection().await;
    wait_until(|| client.status() == ConnectionStatus::Open).await;

    let descriptor = json!({"term": {"x": 1}});
    let a = client.query("Q1", descriptor.clone());
    let b = client.query("Q1", descriptor.clone());
    assert_eq!(server.next_frame().await["type"], "subscribe");

    first.send(json!({
        "type": "query-delta",
        "documents": {"at://x/1": {"cid": "c1", "doc": {"title": "hi"}}},
        "queries": {"Q1": {"ecid": "e1", "result": ["at://x/1"]}}
    }));
    wait_until(|| !a.snapshot().is_loading).await;

    let mut status = client.watch_status();
    first.close();
    timeout(WAIT, status.wait_for(|s| *s != ConnectionStatus::Open))
        .await
        .unwrap()
        .unwrap();
    assert!(client.banner().is_some());
    // Results stay on screen while disconnected.
    assert_eq!(b.snapshot().ecid.as_deref(), Some("e1"));

    let _second = server.next_connection().await;
    wait_until(|| client.status() == ConnectionStatus::Open).await;

    assert_eq!(
        server.next_frame().await,
        json!({"type": "subscribe", "queryId": "Q1", "esquery": descriptor, "ecid": "e1"})
    );
    assert!(server.frames_within(Duration::from_millis(150)).await.is_empty());

    drop(a);
    drop(b);
    client.shutdown().await;
}

#[tokio::test]
async fn interest_registered_before_open_is_sent_on_open() {
    let mut server = TestServer::start().await;
    let mut client = LiveClient::connect(fast_config(&server));
    let query = client.query("forum:bsky.app", json!({"match_all": {}}));

    let _conn = server.next_connection().await;
    assert_eq!(
        server.next_frame().await,
        json!({"type": "subscribe", "queryId": "forum:bsky.app", "esquery": {"match_all": {}}})
    );
    assert!(server.frames_within(Duration::from_millis(100)).await.is_empty());

    drop(query);
    client.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_without_reconnecting() {
    let mut server = TestServer::start().await;
    let mut client = LiveClient::connect(fast_config(&server));
    let conn = server.next_connection().await;
    wait_until(|| client.status() == ConnectionStatus::Open).await;

    client.shutdown().await;
    assert_eq!(client.status(), ConnectionStatus::Closed);

    timeout(WAIT, conn.closed).await.unwrap().unwrap();
    assert!(timeout(Duration::from_millis(200), server.connections.recv())
        .await
        .is_err());
}

#[tokio::test]
async fn unreachable_server_keeps_retrying() {
    // Grab a free port, then close it so connects are refused.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = LiveConfig::new(&format!("ws://{addr}/live"))
        .unwrap()
        .with_reconnect(ReconnectConfig {
            initial_delay_ms: 10,
            max_delay_ms: 20,
        });
    let mut client = LiveClient::connect(config);

    // Several connect attempts show up as repeated status entries.
    wait_until(|| {
        client
            .log_entries()
            .iter()
            .filter(|e| e.payload == json!("connecting"))
            .count()
            >= 3
    })
    .await;
    assert_ne!(client.status(), ConnectionStatus::Open);

    client.shutdown().await;
    assert_eq!(client.status(), ConnectionStatus::Closed);
}

#[tokio::test]
async fn backoff_grows_while_failing_and_resets_after_open() {
    // Four failed handshakes wait 40, 80, 160 and 320ms. Without a reset the
    // wait after the successful session would be 640ms.
    let mut server = TestServer::start_rejecting(4).await;
    let config = LiveConfig::new(&server.url())
        .unwrap()
        .with_reconnect(ReconnectConfig {
            initial_delay_ms: 40,
            max_delay_ms: 5_000,
        });
    let mut client = LiveClient::connect(config);

    let mut accepted = Vec::new();
    for _ in 0..5 {
        accepted.push(server.next_accept().await);
    }
    let gaps: Vec<Duration> = accepted.windows(2).map(|w| w[1] - w[0]).collect();
    for (gap, expected) in gaps.iter().zip([40u64, 80, 160, 320]) {
        assert!(
            *gap >= Duration::from_millis(expected),
            "gap {gap:?} shorter than {expected}ms"
        );
    }
    assert!(gaps[3] > gaps[0]);

    let conn = server.next_connection().await;
    wait_until(|| client.status() == ConnectionStatus::Open).await;

    conn.close();
    timeout(WAIT, conn.closed).await.unwrap().unwrap();
    let closed_at = Instant::now();
    let reconnected_at = server.next_accept().await;
    let _again = server.next_connection().await;

    let wait = reconnected_at.saturating_duration_since(closed_at);
    assert!(wait < Duration::from_millis(500), "reconnect took {wait:?}");

    client.shutdown().await;
}
