//! Stream reader task.
//!
//! Reads raw bytes off one transport generation and forwards them to the
//! long-lived parser stage. The first message of every generation is
//! [`Inbound::Reset`], so a frame cut off by the previous disconnect never
//! merges with bytes from the new connection.
//!
//! When the link breaks the reader reports exactly one failure through its
//! `oneshot` and exits. Cancellation exits without reporting.

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::ami::transport::BoxedReader;
use crate::AppError;

/// Message from a reader to the parser stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A new generation started; drop any partial frame.
    Reset,
    /// Raw bytes in arrival order.
    Bytes(Bytes),
}

/// Reader task for one transport generation.
///
/// Exits when:
/// - the peer closes the stream or a read fails (failure reported),
/// - `cancel` fires (nothing reported), or
/// - the parser stage is gone (nothing reported).
pub async fn run_reader(
    generation: u64,
    reader: BoxedReader,
    inbound_tx: mpsc::Sender<Inbound>,
    failure_tx: oneshot::Sender<AppError>,
    cancel: CancellationToken,
) {
    if inbound_tx.send(Inbound::Reset).await.is_err() {
        debug!(generation, "reader: parser stage closed before start");
        return;
    }

    let mut stream = ReaderStream::new(reader);

    let failure = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(generation, "reader: cancellation received, stopping");
                return;
            }

            chunk = stream.next() => {
                match chunk {
                    None => {
                        debug!(generation, "reader: EOF detected");
                        break AppError::Link("stream closed by peer".into());
                    }
                    Some(Err(err)) => {
                        warn!(generation, error = %err, "reader: read failed");
                        break AppError::Link(format!("read failed: {err}"));
                    }
                    Some(Ok(bytes)) => {
                        trace!(generation, len = bytes.len(), "reader: chunk received");
                        if inbound_tx.send(Inbound::Bytes(bytes)).await.is_err() {
                            debug!(generation, "reader: parser stage closed, stopping");
                            return;
                        }
                    }
                }
            }
        }
    };

    if failure_tx.send(failure).is_err() {
        debug!(generation, "reader: supervisor gone before failure could be reported");
    }
}
