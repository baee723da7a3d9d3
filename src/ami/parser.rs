//! Parser stage: turns the reader's byte chunks into records.
//!
//! Lives for the adapter's whole lifetime and outlasts every transport
//! generation. Owns the single [`FrameCodec`] instance.

use bytes::BytesMut;
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::ami::codec::FrameCodec;
use crate::ami::reader::Inbound;
use crate::ami::record::Record;

/// Parser task.
///
/// Records are forwarded in arrival order. Framing errors are logged; the
/// codec skips the rest of the offending frame and the stage keeps running.
pub async fn run_parser(
    mut inbound_rx: mpsc::Receiver<Inbound>,
    record_tx: mpsc::Sender<Record>,
    cancel: CancellationToken,
) {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::new();

    loop {
        let inbound = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("parser: cancellation received, stopping");
                break;
            }

            inbound = inbound_rx.recv() => match inbound {
                Some(inbound) => inbound,
                None => {
                    debug!("parser: inbound channel closed, stopping");
                    break;
                }
            },
        };

        match inbound {
            Inbound::Reset => {
                if codec.has_partial() {
                    debug!("parser: discarding partial frame from previous link");
                }
                codec.reset();
                buf.clear();
            }
            Inbound::Bytes(bytes) => {
                buf.extend_from_slice(&bytes);
                loop {
                    match codec.decode(&mut buf) {
                        Ok(Some(record)) => {
                            if record_tx.send(record).await.is_err() {
                                debug!("parser: record channel closed, stopping");
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            warn!(error = %err, "parser: framing error, skipping rest of frame");
                        }
                    }
                }
            }
        }
    }
}
