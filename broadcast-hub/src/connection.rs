//! Per-connection worker pair bridging a byte stream to the hub.
//!
//! After the peer has joined, the receiver reads lines and submits them to the
//! hub while a spawned sender task drains the peer's outbound queue onto the
//! stream. The receiver's end of stream or read error is what deregisters the
//! peer. A failed write only stops the sender.

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    select,
    sync::oneshot,
};
use tracing::{debug, warn};

use crate::{
    hub::{HubError, HubHandle},
    message::{DEFAULT_MAX_LINE_BYTES, LineReader, write_line},
    peer::{Inbox, Peer, PeerId, outbound_queue},
};

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Lines a peer may have waiting before the hub's overflow policy applies.
    pub outbound_capacity: usize,
    /// Longest inbound line accepted.
    pub max_line_bytes: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

/// Joins `id` to the hub and serves the stream until the peer departs or the
/// hub closes its queue.
///
/// Returns an error only when the peer could not be registered. Transport
/// errors after that point end the connection quietly.
pub async fn serve_connection<S>(
    stream: S,
    id: PeerId,
    hub: HubHandle,
    config: ConnectionConfig,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let (outbound, inbox) = outbound_queue(config.outbound_capacity);

    hub.join(Peer::new(id.clone(), outbound))
        .await
        .with_context(|| format!("failed to register peer {id}"))?;

    let (closed_tx, mut closed_rx) = oneshot::channel();
    let sender = tokio::spawn(run_sender(writer, inbox, id.clone(), closed_tx));

    let mut reader = BufReader::new(reader);
    select! {
        result = run_receiver(&mut reader, &id, &hub, config.max_line_bytes) => {
            match result {
                Ok(()) => debug!(peer = %id, "peer closed the stream"),
                Err(err) => debug!(peer = %id, error = ?err, "receiver stopped"),
            }
        }
        // Only a clean close of the queue ends up here; a sender that failed
        // to write drops `closed_tx` and this branch is disabled.
        Ok(()) = &mut closed_rx => {
            debug!(peer = %id, "outbound queue closed by hub; stopping receiver");
        }
    }

    match hub.depart(&id).await {
        Ok(()) | Err(HubError::NotRegistered(_)) | Err(HubError::Closed) => {}
        Err(err) => debug!(peer = %id, error = %err, "unexpected departure result"),
    }

    if let Err(err) = sender.await {
        warn!(peer = %id, error = ?err, "sender task failed");
    }

    Ok(())
}

async fn run_receiver<R>(
    reader: &mut R,
    id: &PeerId,
    hub: &HubHandle,
    max_line_bytes: usize,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = LineReader::new(reader, max_line_bytes);
    while let Some(text) = lines.next_line().await? {
        hub.submit(id, text).await?;
    }
    Ok(())
}

async fn run_sender<W>(
    mut writer: W,
    mut inbox: Inbox,
    id: PeerId,
    closed: oneshot::Sender<()>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = inbox.recv().await {
        if let Err(err) = write_line(&mut writer, &line).await {
            warn!(peer = %id, error = ?err, "failed to deliver line; sender stopping");
            return;
        }
    }

    if let Err(err) = writer.shutdown().await {
        debug!(peer = %id, error = ?err, "failed to shut down writer");
    }
    let _ = closed.send(());
}
