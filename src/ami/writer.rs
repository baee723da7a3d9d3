//! Action writer task.
//!
//! Receives outbound actions from the adapter's action queue, serializes
//! each one as `Key: Value\r\n` lines plus a blank terminator line, and
//! writes the bytes to the current transport generation.
//!
//! The action queue outlives every generation: the writer owns the receiver
//! only while it runs and hands it back on exit so the next generation's
//! writer can continue from the same queue.

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::ami::codec::encode_record;
use crate::ami::record::Record;
use crate::ami::transport::BoxedWriter;

/// Writer task for one transport generation.
///
/// The task exits cleanly when:
/// - `cancel` is triggered (generation retired or adapter closed),
/// - `action_rx` is closed (adapter dropped), or
/// - a write fails. The failure is only logged; the reader discovers the
///   broken link independently.
///
/// Returns the action receiver so the caller can reuse it.
pub async fn run_writer(
    generation: u64,
    mut writer: BoxedWriter,
    mut action_rx: mpsc::Receiver<Record>,
    cancel: CancellationToken,
) -> mpsc::Receiver<Record> {
    let mut buf = BytesMut::new();

    loop {
        let action = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(generation, "writer: cancellation received, stopping");
                break;
            }

            action = action_rx.recv() => match action {
                Some(action) => action,
                None => {
                    debug!(generation, "writer: action channel closed, stopping");
                    break;
                }
            },
        };

        buf.clear();
        if let Err(err) = encode_record(&action, &mut buf) {
            warn!(generation, error = %err, ?action, "writer: unserializable action skipped");
            continue;
        }

        let written = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(generation, "writer: cancelled mid-write, stopping");
                break;
            }

            res = write_frame(&mut writer, &buf) => res,
        };

        match written {
            Ok(()) => {
                trace!(generation, action = action.action_name(), "writer: action sent");
            }
            Err(err) => {
                warn!(generation, error = %err, "writer: write failed, stopping");
                break;
            }
        }
    }

    action_rx
}

async fn write_frame(writer: &mut BoxedWriter, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}
