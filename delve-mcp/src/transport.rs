//! Message framing between the server and its client.
//!
//! Protocol frames are newline-delimited JSON. [`LineTransport`] frames any
//! async byte stream; [`StdioTransport`] is that over the process's stdin and
//! stdout. [`ChannelTransport`] passes whole frames over mpsc channels and is
//! used to drive the server in tests.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::error::McpError;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Next frame without its delimiter; `Ok(None)` at end of stream.
    async fn read_message(&mut self) -> Result<Option<String>, McpError>;

    /// Send one frame. Implementations flush before returning.
    async fn write_message(&mut self, message: &str) -> Result<(), McpError>;

    async fn close(&mut self) -> Result<(), McpError>;
}

/// Newline-delimited frames over a reader/writer pair.
pub struct LineTransport<R, W> {
    reader: BufReader<R>,
    writer: W,
    line: String,
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send + Sync,
    W: AsyncWrite + Unpin + Send + Sync,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            line: String::new(),
        }
    }
}

/// Line framing on stdin/stdout. Nothing else may write to stdout.
pub type StdioTransport = LineTransport<tokio::io::Stdin, tokio::io::Stdout>;

impl StdioTransport {
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

#[async_trait]
impl<R, W> Transport for LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send + Sync,
    W: AsyncWrite + Unpin + Send + Sync,
{
    async fn read_message(&mut self) -> Result<Option<String>, McpError> {
        self.line.clear();
        let read = self.reader.read_line(&mut self.line).await?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(self.line.trim_end_matches(['\r', '\n']).to_string()))
    }

    async fn write_message(&mut self, message: &str) -> Result<(), McpError> {
        if message.contains('\n') {
            return Err(McpError::TransportError {
                message: "frame contains a newline".into(),
            });
        }
        let mut frame = Vec::with_capacity(message.len() + 1);
        frame.extend_from_slice(message.as_bytes());
        frame.push(b'\n');
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), McpError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Frames carried whole over tokio mpsc channels.
pub struct ChannelTransport {
    inbound: mpsc::Receiver<String>,
    outbound: mpsc::Sender<String>,
}

impl ChannelTransport {
    pub fn new(inbound: mpsc::Receiver<String>, outbound: mpsc::Sender<String>) -> Self {
        Self { inbound, outbound }
    }

    /// Two connected ends; each reads what the other writes.
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (to_server, server_inbox) = mpsc::channel(capacity);
        let (to_client, client_inbox) = mpsc::channel(capacity);
        (
            Self::new(client_inbox, to_server),
            Self::new(server_inbox, to_client),
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn read_message(&mut self) -> Result<Option<String>, McpError> {
        Ok(self.inbound.recv().await)
    }

    async fn write_message(&mut self, message: &str) -> Result<(), McpError> {
        self.outbound
            .send(message.to_owned())
            .await
            .map_err(|_| McpError::TransportError {
                message: "peer hung up".into(),
            })
    }

    async fn close(&mut self) -> Result<(), McpError> {
        self.inbound.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, duplex};

    #[tokio::test]
    async fn test_line_transport_reads_frames() {
        let (mut client, server) = duplex(256);
        let (read_half, write_half) = tokio::io::split(server);
        let mut transport = LineTransport::new(read_half, write_half);

        client
            .write_all(b"{\"id\":1}\r\n{\"id\":2}\n")
            .await
            .unwrap();
        drop(client);

        assert_eq!(
            transport.read_message().await.unwrap().as_deref(),
            Some("{\"id\":1}")
        );
        assert_eq!(
            transport.read_message().await.unwrap().as_deref(),
            Some("{\"id\":2}")
        );
        assert!(transport.read_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_line_transport_writes_one_line_per_frame() {
        let (mut client, server) = duplex(256);
        let (read_half, write_half) = tokio::io::split(server);
        let mut transport = LineTransport::new(read_half, write_half);

        transport.write_message("{\"ok\":true}").await.unwrap();
        transport.close().await.unwrap();

        let mut written = String::new();
        client.read_to_string(&mut written).await.unwrap();
        assert_eq!(written, "{\"ok\":true}\n");
    }

    #[tokio::test]
    async fn test_line_transport_rejects_embedded_newline() {
        let (_client, server) = duplex(64);
        let (read_half, write_half) = tokio::io::split(server);
        let mut transport = LineTransport::new(read_half, write_half);
        assert!(matches!(
            transport.write_message("a\nb").await,
            Err(McpError::TransportError { .. })
        ));
    }

    #[tokio::test]
    async fn test_channel_pair_is_crossed() {
        let (mut client, mut server) = ChannelTransport::pair(4);
        client.write_message("ping").await.unwrap();
        assert_eq!(server.read_message().await.unwrap().as_deref(), Some("ping"));
        server.write_message("pong").await.unwrap();
        assert_eq!(client.read_message().await.unwrap().as_deref(), Some("pong"));
    }

    #[tokio::test]
    async fn test_channel_eof_and_hang_up() {
        let (client, mut server) = ChannelTransport::pair(4);
        drop(client);
        assert!(server.read_message().await.unwrap().is_none());
        assert!(matches!(
            server.write_message("late").await,
            Err(McpError::TransportError { .. })
        ));
    }
}
