//! Event feeds the stream processor can consume.
//!
//! Offsets and delivery guarantees belong to the feed; a source only hands
//! over raw JSON messages one at a time.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines},
    net::TcpStream,
    sync::mpsc,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

use super::backoff::{Backoff, BackoffConfig};

#[async_trait]
pub trait EventSource: Send {
    fn describe(&self) -> String;

    /// Next raw message. `Ok(None)` means the feed has ended for good.
    async fn next_message(&mut self) -> Result<Option<String>>;
}

/// In-process feed, used when the producer lives in the same binary.
pub struct ChannelSource {
    rx: mpsc::Receiver<String>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<String>) -> Self {
        Self { rx }
    }

    pub fn pair(capacity: usize) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl EventSource for ChannelSource {
    fn describe(&self) -> String {
        "channel".to_string()
    }

    async fn next_message(&mut self) -> Result<Option<String>> {
        Ok(self.rx.recv().await)
    }
}

/// Newline-delimited JSON from any buffered reader (stdin, a TCP socket).
///
/// Built on `Lines::next_line`, which keeps a partially read line across
/// calls, so `next_message` may be raced in `select!` without losing bytes.
pub struct LineSource<R> {
    lines: Lines<R>,
    name: String,
}

impl<R: AsyncBufRead + Unpin + Send> LineSource<R> {
    pub fn new(reader: R, name: impl Into<String>) -> Self {
        Self {
            lines: reader.lines(),
            name: name.into(),
        }
    }
}

impl LineSource<BufReader<tokio::io::Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), "stdin")
    }
}

impl LineSource<BufReader<TcpStream>> {
    pub async fn connect_tcp(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("Failed to connect to event feed at {}", addr))?;
        info!(addr, "📡 Connected to TCP event feed");
        Ok(Self::new(BufReader::new(stream), format!("tcp://{}", addr)))
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> EventSource for LineSource<R> {
    fn describe(&self) -> String {
        self.name.clone()
    }

    async fn next_message(&mut self) -> Result<Option<String>> {
        loop {
            let next = self
                .lines
                .next_line()
                .await
                .with_context(|| format!("Read from {} failed", self.name))?;
            match next {
                None => return Ok(None),
                Some(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        return Ok(Some(line.to_string()));
                    }
                }
            }
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket feed that reconnects with backoff whenever the socket drops.
pub struct WebSocketSource {
    url: String,
    stream: Option<WsStream>,
    backoff: Backoff,
}

impl WebSocketSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_backoff(url, BackoffConfig::default())
    }

    pub fn with_backoff(url: impl Into<String>, backoff: BackoffConfig) -> Self {
        Self {
            url: url.into(),
            stream: None,
            backoff: Backoff::new(backoff),
        }
    }

    async fn ensure_connected(&mut self) {
        while self.stream.is_none() {
            match connect_async(self.url.as_str()).await {
                Ok((ws, _)) => {
                    info!(url = %self.url, "📡 Connected to WebSocket event feed");
                    self.backoff.reset();
                    self.stream = Some(ws);
                }
                Err(e) => {
                    let delay = self.backoff.next_backoff();
                    warn!(
                        url = %self.url,
                        error = %e,
                        attempt = self.backoff.attempt(),
                        backoff_ms = delay.as_millis() as u64,
                        "⚠️ Event feed connect failed"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl EventSource for WebSocketSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn next_message(&mut self) -> Result<Option<String>> {
        loop {
            self.ensure_connected().await;
            let Some(ws) = self.stream.as_mut() else {
                continue;
            };
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(bytes))) => {
                    return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Some(Ok(Message::Close(_))) | None => {
                    warn!(url = %self.url, "🔌 Event feed closed, reconnecting");
                    self.stream = None;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(url = %self.url, error = %e, "⚠️ Event feed error, reconnecting");
                    self.stream = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::SinkExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_line_source_skips_blank_lines() {
        let input: &[u8] = b"{\"a\":1}\n\n   \n{\"b\":2}\r\n";
        let mut src = LineSource::new(BufReader::new(input), "test");
        assert_eq!(src.next_message().await.unwrap().as_deref(), Some("{\"a\":1}"));
        assert_eq!(src.next_message().await.unwrap().as_deref(), Some("{\"b\":2}"));
        assert_eq!(src.next_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_channel_source_ends_when_senders_drop() {
        let (tx, mut src) = ChannelSource::pair(4);
        tx.send("x".to_string()).await.unwrap();
        drop(tx);
        assert_eq!(src.next_message().await.unwrap().as_deref(), Some("x"));
        assert_eq!(src.next_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_websocket_source_reconnects_after_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Each connection sends one message and closes.
            for i in 0..2 {
                let (tcp, _) = listener.accept().await.unwrap();
                let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
                ws.send(Message::Text(format!("{{\"n\":{}}}", i))).await.unwrap();
                ws.close(None).await.ok();
            }
        });

        let mut src = WebSocketSource::with_backoff(
            format!("ws://{}", addr),
            BackoffConfig {
                base_ms: 10,
                max_ms: 50,
                ..BackoffConfig::default()
            },
        );
        assert_eq!(src.next_message().await.unwrap().as_deref(), Some("{\"n\":0}"));
        assert_eq!(src.next_message().await.unwrap().as_deref(), Some("{\"n\":1}"));
    }
}
