//! Classifier stage: splits parsed records into responses and events.
//!
//! | Fields present          | Route                 |
//! |-------------------------|-----------------------|
//! | `Response`              | response queue        |
//! | `Event`                 | event queue           |
//! | `Response` and `Event`  | response queue        |
//! | neither                 | dropped, `DEBUG` log  |

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ami::record::Record;

/// Destination of one parsed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Reply to the in-flight action.
    Response,
    /// Unsolicited server event.
    Event,
    /// Neither; never delivered.
    Drop,
}

/// Pick the route for `record`. `Response` wins over `Event`.
#[must_use]
pub fn classify(record: &Record) -> Route {
    if record.response().is_some() {
        Route::Response
    } else if record.event().is_some() {
        Route::Event
    } else {
        Route::Drop
    }
}

/// Classifier task.
///
/// Blocks on whichever output queue is full until cancelled. Unclassifiable
/// records are dropped, and so are events once the event consumer has gone
/// away.
pub async fn run_classifier(
    mut record_rx: mpsc::Receiver<Record>,
    response_tx: mpsc::Sender<Record>,
    event_tx: mpsc::Sender<Record>,
    cancel: CancellationToken,
) {
    loop {
        let record = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("classifier: cancellation received, stopping");
                break;
            }

            record = record_rx.recv() => match record {
                Some(record) => record,
                None => {
                    debug!("classifier: record channel closed, stopping");
                    break;
                }
            },
        };

        let delivered = match classify(&record) {
            Route::Response => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    sent = response_tx.send(record) => sent.is_ok(),
                }
            }
            Route::Event => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    sent = event_tx.send(record) => {
                        if sent.is_err() {
                            debug!("classifier: event consumer gone, dropping event");
                        }
                        true
                    }
                }
            }
            Route::Drop => {
                debug!(fields = record.len(), "classifier: dropping unclassified record");
                true
            }
        };

        if !delivered {
            debug!("classifier: output queue closed, stopping");
            break;
        }
    }
}
