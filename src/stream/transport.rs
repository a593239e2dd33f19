use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

/// One open stream connection.
#[async_trait]
pub trait StreamConnection: Send {
    /// Next text payload. `None` once the peer closed; `Some(Err)` on a
    /// transport error. Either ends the connection.
    async fn next_text(&mut self) -> Option<Result<String>>;

    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Box<dyn StreamConnection>>;
}

/// WebSocket transport.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

struct WsConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl StreamConnector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn StreamConnection>> {
        let (ws, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("connect {}", url))?;
        Ok(Box::new(WsConnection { ws }))
    }
}

#[async_trait]
impl StreamConnection for WsConnection {
    async fn next_text(&mut self) -> Option<Result<String>> {
        loop {
            let msg = match self.ws.next().await? {
                Ok(m) => m,
                Err(e) => return Some(Err(e.into())),
            };
            match msg {
                Message::Text(t) => return Some(Ok(t)),
                Message::Binary(b) => return Some(Ok(String::from_utf8_lossy(&b).into_owned())),
                // tungstenite queues the pong itself and flushes it on the next read.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                Message::Close(_) => return None,
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.ws.close(None).await.context("close websocket")
    }
}
