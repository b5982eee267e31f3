use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use super::{Dispatch, DispatchError};

/// Default outbox depth; a full outbox applies backpressure to the cycle.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

/// One message waiting for the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    pub subscriber_id: i64,
    pub text: String,
}

/// Hands messages to a bounded queue drained by a separate consumer task.
#[derive(Clone)]
pub struct OutboxDispatch {
    tx: mpsc::Sender<OutboundMessage>,
}

impl OutboxDispatch {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Dispatch for OutboxDispatch {
    async fn send(&self, subscriber_id: i64, text: String) -> Result<(), DispatchError> {
        self.tx
            .send(OutboundMessage {
                subscriber_id,
                text,
            })
            .await
            .map_err(|_| DispatchError::Closed)
    }
}

/// Drains an outbox, writing one JSON object per line.
pub struct JsonLinesSink<W> {
    writer: W,
}

impl JsonLinesSink<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W: AsyncWrite + Unpin> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Runs until every sender is dropped. Returns the number of lines
    /// written.
    pub async fn run(mut self, mut rx: mpsc::Receiver<OutboundMessage>) -> Result<u64, DispatchError> {
        let mut written = 0;
        while let Some(message) = rx.recv().await {
            let mut line = serde_json::to_vec(&message)?;
            line.push(b'\n');
            self.writer.write_all(&line).await?;
            self.writer.flush().await?;
            written += 1;
        }
        tracing::debug!(written = written, "Outbox drained");
        Ok(written)
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
