//! In-process broker double speaking the Socket.IO event framing.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

/// How long a test waits for any single step.
pub const STEP: Duration = Duration::from_secs(5);

/// Listening broker endpoint.
pub struct FakeBroker {
    listener: TcpListener,
    url: String,
}

impl FakeBroker {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        Self {
            listener,
            url: format!("ws://{addr}/socket.io/?EIO=3&transport=websocket"),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Accept the next session connection, recording its `Cookie` header.
    pub async fn accept(&self) -> BrokerConnection {
        let (stream, _) = tokio::time::timeout(STEP, self.listener.accept())
            .await
            .expect("session should connect")
            .unwrap();

        let mut cookie = None;
        let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            cookie = request
                .headers()
                .get("cookie")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            Ok(response)
        };
        let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .unwrap();

        BrokerConnection { cookie, ws }
    }

    /// Assert that no further session connection arrives within `wait`.
    pub async fn expect_no_connection(&self, wait: Duration) {
        assert!(
            tokio::time::timeout(wait, self.listener.accept()).await.is_err(),
            "session opened an extra connection"
        );
    }
}

/// Broker side of one session connection.
pub struct BrokerConnection {
    pub cookie: Option<String>,
    ws: WebSocketStream<TcpStream>,
}

impl BrokerConnection {
    /// Next raw text frame from the session.
    pub async fn recv_text(&mut self) -> String {
        loop {
            let message = tokio::time::timeout(STEP, self.ws.next())
                .await
                .expect("session should send a frame")
                .expect("session should keep the connection open")
                .unwrap();
            if let Message::Text(text) = message {
                return text.as_str().to_string();
            }
        }
    }

    /// Next application event, skipping keepalive frames.
    pub async fn recv_event(&mut self) -> (String, Value) {
        loop {
            let text = self.recv_text().await;
            let Some(body) = text.strip_prefix("42") else {
                continue;
            };
            let Value::Array(mut items) = serde_json::from_str::<Value>(body).unwrap() else {
                panic!("event body is not an array: {text}");
            };
            let payload = if items.len() > 1 {
                items.swap_remove(1)
            } else {
                Value::Null
            };
            let name = items[0].as_str().unwrap().to_string();
            return (name, payload);
        }
    }

    /// Collect application events until `count` have arrived.
    pub async fn recv_events(&mut self, count: usize) -> Vec<(String, Value)> {
        let mut events = Vec::with_capacity(count);
        while events.len() < count {
            events.push(self.recv_event().await);
        }
        events
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws.send(Message::text(text)).await.unwrap();
    }

    pub async fn send_event(&mut self, name: &str, payload: &Value) {
        let frame = format!("42{}", serde_json::json!([name, payload]));
        self.send_text(&frame).await;
    }

    /// Wait for the session to close its side.
    pub async fn expect_closed(&mut self) {
        loop {
            match tokio::time::timeout(STEP, self.ws.next())
                .await
                .expect("session should close the connection")
            {
                None | Some(Err(_) | Ok(Message::Close(_))) => return,
                Some(Ok(_)) => {}
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
