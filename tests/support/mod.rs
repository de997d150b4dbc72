use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// Recorded in place of a frame when the client closes its side.
pub const CLOSED: &str = "<closed>";

const FRAME_TIMEOUT: Duration = Duration::from_secs(2);

/// Local websocket endpoint that records text frames from the client and
/// writes whatever the test pushes. Connections are served one at a time.
pub struct WsServer {
    pub url: String,
    connections: Arc<AtomicUsize>,
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<Message>,
}

impl WsServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let connections = Arc::new(AtomicUsize::new(0));
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel::<Message>();
        let outbound_rx = Arc::new(Mutex::new(outbound_rx));

        let counter = Arc::clone(&connections);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let inbound_tx = inbound_tx.clone();
                let outbound_rx = Arc::clone(&outbound_rx);

                tokio::spawn(async move {
                    let Ok(ws) = accept_async(stream).await else {
                        return;
                    };
                    let (mut write, mut read) = ws.split();
                    let mut outbound_rx = outbound_rx.lock().await;

                    loop {
                        tokio::select! {
                            incoming = read.next() => match incoming {
                                Some(Ok(Message::Text(text))) => {
                                    let _ = inbound_tx.send(text);
                                }
                                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                                    let _ = inbound_tx.send(CLOSED.to_string());
                                    break;
                                }
                                Some(Ok(_)) => {}
                            },
                            outgoing = outbound_rx.recv() => match outgoing {
                                Some(message) => {
                                    if write.send(message).await.is_err() {
                                        break;
                                    }
                                }
                                None => break,
                            },
                        }
                    }
                });
            }
        });

        Self {
            url: format!("ws://{}", addr),
            connections,
            inbound,
            outbound,
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.outbound
            .send(Message::Text(text.into()))
            .expect("server loop alive");
    }

    pub fn send_ticker(&self, symbol: &str, data: Value) {
        let frame = serde_json::json!({
            "topic": format!("tickers.{}", symbol),
            "type": "snapshot",
            "ts": 1_673_853_746_003_i64,
            "data": data,
        });
        self.send_text(frame.to_string());
    }

    pub fn send_close(&self) {
        self.outbound
            .send(Message::Close(None))
            .expect("server loop alive");
    }

    pub async fn next_frame(&mut self) -> String {
        tokio::time::timeout(FRAME_TIMEOUT, self.inbound.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("server loop ended")
    }

    pub async fn next_json(&mut self) -> Value {
        let frame = self.next_frame().await;
        serde_json::from_str(&frame).unwrap_or_else(|_| panic!("not JSON: {frame}"))
    }

    /// Assert the client sends nothing for `window`.
    pub async fn assert_quiet(&mut self, window: Duration) {
        if let Ok(frame) = tokio::time::timeout(window, self.inbound.recv()).await {
            panic!("unexpected client frame: {frame:?}");
        }
    }
}
