use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;

/// Failure reported by a transport half.
#[derive(Debug, Clone)]
pub struct TransportFailure(String);

impl TransportFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for TransportFailure {}

/// Write half of a connected transport: one UTF-8 frame per send.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportFailure> + Send>>;

/// Read half of a connected transport. The stream ends when the peer closes;
/// recoverable transport errors are surfaced as `Err` items.
pub type FrameStream = Pin<Box<dyn Stream<Item = std::result::Result<String, TransportFailure>> + Send>>;

/// Establishes a bidirectional, ordered, message-framed connection.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        server: &str,
    ) -> std::result::Result<(FrameSink, FrameStream), TransportFailure>;
}

/// Production connector over a WebSocket.
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        server: &str,
    ) -> std::result::Result<(FrameSink, FrameStream), TransportFailure> {
        let (stream, _) = connect_async(server)
            .await
            .map_err(|err| TransportFailure::new(err.to_string()))?;
        let (write, read) = stream.split();

        let sink: FrameSink = Box::pin(
            write
                .sink_map_err(|err| TransportFailure::new(err.to_string()))
                .with(|frame: String| {
                    futures::future::ready(Ok::<_, TransportFailure>(Message::text(frame)))
                }),
        );

        let stream: FrameStream = Box::pin(read.filter_map(|item| {
            futures::future::ready(match item {
                Ok(Message::Text(text)) => Some(Ok(text)),
                // Binary, ping/pong and close frames carry no envelopes.
                Ok(_) => None,
                Err(err) => Some(Err(TransportFailure::new(err.to_string()))),
            })
        }));

        Ok((sink, stream))
    }
}
