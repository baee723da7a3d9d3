//! Unit tests for record classification and the classifier task.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ami_link::ami::classifier::{classify, run_classifier, Route};
use ami_link::ami::Record;

const STEP: Duration = Duration::from_secs(2);

// ── classify ─────────────────────────────────────────────────────────────────

#[test]
fn response_field_routes_to_response_queue() {
    let record = Record::new().with("Response", "Success");
    assert_eq!(classify(&record), Route::Response);
}

#[test]
fn event_field_routes_to_event_queue() {
    let record = Record::new().with("Event", "Hangup").with("Cause", "16");
    assert_eq!(classify(&record), Route::Event);
}

/// A record carrying both markers is a response.
#[test]
fn response_takes_precedence_over_event() {
    let record = Record::new()
        .with("Event", "Status")
        .with("Response", "Follows");
    assert_eq!(classify(&record), Route::Response);
}

#[test]
fn record_without_markers_is_dropped() {
    let record = Record::new().with("Privilege", "system,all");
    assert_eq!(classify(&record), Route::Drop);
}

/// Markers are matched by exact key, not case-folded.
#[test]
fn lowercase_markers_are_not_recognized() {
    let record = Record::new().with("response", "Success").with("event", "X");
    assert_eq!(classify(&record), Route::Drop);
}

// ── run_classifier ───────────────────────────────────────────────────────────

struct Harness {
    record_tx: mpsc::Sender<Record>,
    response_rx: mpsc::Receiver<Record>,
    event_rx: mpsc::Receiver<Record>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

fn spawn_classifier() -> Harness {
    let (record_tx, record_rx) = mpsc::channel(8);
    let (response_tx, response_rx) = mpsc::channel(8);
    let (event_tx, event_rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run_classifier(
        record_rx,
        response_tx,
        event_tx,
        cancel.clone(),
    ));
    Harness {
        record_tx,
        response_rx,
        event_rx,
        cancel,
        task,
    }
}

/// Each record lands on exactly one queue, in arrival order.
#[tokio::test]
async fn records_are_routed_in_order() {
    let mut h = spawn_classifier();

    for record in [
        Record::new().with("Event", "A"),
        Record::new().with("Response", "Success").with("ActionID", "1"),
        Record::new().with("Junk", "x"),
        Record::new().with("Event", "B"),
        Record::new().with("Response", "Error").with("ActionID", "2"),
    ] {
        h.record_tx.send(record).await.expect("send record");
    }
    drop(h.record_tx);

    tokio::time::timeout(STEP, h.task)
        .await
        .expect("classifier stops when input closes")
        .expect("join");

    let mut events = Vec::new();
    while let Ok(event) = h.event_rx.try_recv() {
        events.push(event.event().unwrap_or_default().to_owned());
    }
    let mut responses = Vec::new();
    while let Ok(response) = h.response_rx.try_recv() {
        responses.push(response.get("ActionID").unwrap_or_default().to_owned());
    }

    assert_eq!(events, vec!["A", "B"]);
    assert_eq!(responses, vec!["1", "2"]);
}

/// Losing the event consumer must not stop responses from flowing.
#[tokio::test]
async fn dropped_event_consumer_does_not_stop_responses() {
    let h = spawn_classifier();
    let Harness {
        record_tx,
        mut response_rx,
        event_rx,
        cancel,
        task,
    } = h;
    drop(event_rx);

    record_tx
        .send(Record::new().with("Event", "Lost"))
        .await
        .expect("send event");
    record_tx
        .send(Record::new().with("Response", "Success"))
        .await
        .expect("send response");

    let response = tokio::time::timeout(STEP, response_rx.recv())
        .await
        .expect("response within timeout")
        .expect("response queue open");
    assert_eq!(response.response(), Some("Success"));

    cancel.cancel();
    tokio::time::timeout(STEP, task)
        .await
        .expect("classifier stops on cancel")
        .expect("join");
}

/// Cancellation stops the task even when nothing arrives.
#[tokio::test]
async fn cancellation_stops_idle_classifier() {
    let h = spawn_classifier();
    h.cancel.cancel();
    tokio::time::timeout(STEP, h.task)
        .await
        .expect("classifier stops on cancel")
        .expect("join");
}

/// A classifier blocked on a full response queue still honours cancellation.
#[tokio::test]
async fn cancellation_unblocks_full_response_queue() {
    let (record_tx, record_rx) = mpsc::channel(8);
    let (response_tx, _response_rx) = mpsc::channel(1);
    let (event_tx, _event_rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run_classifier(
        record_rx,
        response_tx,
        event_tx,
        cancel.clone(),
    ));

    for id in ["1", "2", "3"] {
        record_tx
            .send(Record::new().with("Response", "Success").with("ActionID", id))
            .await
            .expect("send record");
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!task.is_finished(), "classifier waits for queue space");

    cancel.cancel();
    tokio::time::timeout(STEP, task)
        .await
        .expect("classifier stops on cancel while blocked")
        .expect("join");
}
