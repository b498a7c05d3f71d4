use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// One byte stream to the server, split into halves so the reader and
/// writer can live on different tasks.
pub struct TransportStream {
    pub read: Box<dyn AsyncRead + Sync + Send + Unpin>,
    pub write: Box<dyn AsyncWrite + Send + Sync + Unpin>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> io::Result<TransportStream>;
}

pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, host: &str, port: u16) -> io::Result<TransportStream> {
        let stream = TcpStream::connect((host, port)).await?;
        let (read, write) = stream.into_split();

        Ok(TransportStream {
            read: Box::new(read),
            write: Box::new(write),
        })
    }
}
