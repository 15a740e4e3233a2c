//! Request/response plumbing between agents.
//!
//! Agents never share memory: everything goes through a [`Transport`] to an endpoint served by a
//! [`MessageHandler`]. Two implementations are provided:
//!
//! - [`TcpTransport`] + [`serve_tcp`]: one JSON message per line, one exchange per connection.
//! - [`LocalNetwork`]: in-process routing used by tests and single-process leagues. Messages are
//!   still encoded and parsed on both legs, so validation behaves exactly as over TCP.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, instrument, trace, warn};

use crate::error::{ErrorCode, LeagueError};
use crate::message::Message;

/// Sends one request and waits for its reply.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `message` to `endpoint` and return the reply.
    ///
    /// `ERROR` replies are returned as messages; turning them into errors is up to the caller.
    async fn send(&self, endpoint: &str, message: Message) -> Result<Message, LeagueError>;
}

/// Serves requests addressed to one agent.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Produce the reply to `message`. Failures are expressed as `ERROR` replies.
    async fn handle(&self, message: Message) -> Message;

    /// Id used as sender of rejections produced before `handle` is reached.
    fn agent_id(&self) -> &str;
}

/// JSON-lines over TCP. Endpoints are `host:port` strings.
#[derive(Debug, Default, Clone)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    #[instrument(skip(self, message), fields(kind = %message.kind()))]
    async fn send(&self, endpoint: &str, message: Message) -> Result<Message, LeagueError> {
        let stream = TcpStream::connect(endpoint)
            .await
            .map_err(|e| LeagueError::unavailable(format!("connect to {endpoint}: {e}")))?;
        let (read_half, mut write_half) = stream.into_split();

        let mut line = message.to_json()?;
        line.push('\n');
        write_half
            .write_all(line.as_bytes())
            .await
            .map_err(|e| LeagueError::unavailable(format!("write to {endpoint}: {e}")))?;

        let mut reader = BufReader::new(read_half);
        let mut reply = String::new();
        let n = reader.read_line(&mut reply).await.map_err(|e| LeagueError::Transient {
            code: ErrorCode::Internal,
            message: format!("read from {endpoint}: {e}"),
        })?;
        if n == 0 {
            return Err(LeagueError::unavailable(format!(
                "connection closed by {endpoint}"
            )));
        }
        trace!(reply = reply.trim_end());
        Message::parse(&reply)
    }
}

/// Accept connections on `listener` forever, answering each line with `handler`.
pub async fn serve_tcp(
    listener: TcpListener,
    handler: Arc<dyn MessageHandler>,
) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let handler = handler.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, peer, handler).await {
                warn!(%peer, "connection error: {e}");
            }
        });
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn MessageHandler>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await? {
        debug!(%peer, "request received");
        let reply = dispatch_text(handler.as_ref(), &line).await;
        // encoding our own reply cannot fail on valid messages; fall back to an empty line
        let mut text = reply.to_json().unwrap_or_default();
        text.push('\n');
        write_half.write_all(text.as_bytes()).await?;
    }
    Ok(())
}

/// Parse `text` and hand it to `handler`, or reject it with a validation error.
pub async fn dispatch_text(handler: &dyn MessageHandler, text: &str) -> Message {
    match Message::parse(text) {
        Ok(message) => handler.handle(message).await,
        Err(e) => {
            warn!(agent = handler.agent_id(), "rejecting message: {e}");
            Message::rejection(handler.agent_id(), salvage_conversation_id(text), &e)
        }
    }
}

fn salvage_conversation_id(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("conversation_id")?.as_str().map(str::to_string))
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// In-process network: a routing table from endpoint names to handlers.
#[derive(Default, Clone)]
pub struct LocalNetwork {
    routes: Arc<RwLock<HashMap<String, Arc<dyn MessageHandler>>>>,
}

impl LocalNetwork {
    /// Empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `handler` at `endpoint`, replacing whatever was there.
    pub fn bind(&self, endpoint: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        routes.insert(endpoint.into(), handler);
    }

    /// Stop serving `endpoint`; later sends fail as unavailable.
    pub fn unbind(&self, endpoint: &str) {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        routes.remove(endpoint);
    }

    fn route(&self, endpoint: &str) -> Option<Arc<dyn MessageHandler>> {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        routes.get(endpoint).cloned()
    }
}

#[async_trait]
impl Transport for LocalNetwork {
    async fn send(&self, endpoint: &str, message: Message) -> Result<Message, LeagueError> {
        let handler = self
            .route(endpoint)
            .ok_or_else(|| LeagueError::unavailable(format!("no agent at {endpoint}")))?;
        let reply = dispatch_text(handler.as_ref(), &message.to_json()?).await;
        Message::parse(&reply.to_json()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Payload;

    struct Echo;

    #[async_trait]
    impl MessageHandler for Echo {
        async fn handle(&self, message: Message) -> Message {
            Message::reply_to(&message, "echo", None, Payload::Ack {})
        }

        fn agent_id(&self) -> &str {
            "echo"
        }
    }

    fn ping() -> Message {
        Message::request("tester", "conv-1", None, Payload::Ack {})
    }

    #[tokio::test]
    async fn local_round_trip() {
        let network = LocalNetwork::new();
        network.bind("local://echo", Arc::new(Echo));
        let reply = network.send("local://echo", ping()).await.unwrap();
        assert_eq!(reply.conversation_id(), "conv-1");
        assert_eq!(reply.sender_id(), "echo");
    }

    #[tokio::test]
    async fn unknown_endpoint_is_unavailable() {
        let network = LocalNetwork::new();
        let err = network.send("local://nobody", ping()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unavailable);
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn garbage_is_rejected_with_conversation() {
        let text = r#"{"conversation_id":"c-9","message_kind":"NOPE"}"#;
        let reply = dispatch_text(&Echo, text).await;
        assert_eq!(reply.conversation_id(), "c-9");
        assert_eq!(
            reply.into_result().unwrap_err().code(),
            ErrorCode::Validation
        );
    }

    #[tokio::test]
    async fn tcp_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(serve_tcp(listener, Arc::new(Echo)));

        let reply = TcpTransport.send(&addr, ping()).await.unwrap();
        assert_eq!(reply.conversation_id(), "conv-1");
    }

    #[tokio::test]
    async fn tcp_refused_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let err = TcpTransport.send(&addr, ping()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unavailable);
    }
}
