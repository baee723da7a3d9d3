//! Connection supervisor.
//!
//! Owns the current transport generation (reader + writer tasks), waits for
//! the reader's failure signal, and runs the bounded reconnect loop:
//!
//! ```text
//! Connected --reader failure--> Reconnecting { attempt } --dial + re-login--> Connected
//!                                     |
//!                                     +--budget exhausted / re-login rejected--> Fatal
//! ```
//!
//! The parser, classifier, and every queue stay in place across generations.
//! Only one reconnect cycle ever runs because the supervisor is one task.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::ami::adapter::{round_trip, Shared};
use crate::ami::reader::{run_reader, Inbound};
use crate::ami::record::Record;
use crate::ami::transport::{Connector, Transport};
use crate::ami::writer::run_writer;
use crate::{AppError, Result};

/// Externally observable link state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// A transport generation is live.
    Connected,
    /// The link dropped; `attempt` counts dials in the current cycle
    /// (0 before the first dial).
    Reconnecting {
        /// Current attempt number.
        attempt: u32,
    },
    /// The adapter gave up. Terminal.
    Fatal(AppError),
    /// The adapter was shut down by its owner. Terminal.
    Closed,
}

impl LinkState {
    /// Whether no further transition will happen.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Fatal(_) | Self::Closed)
    }
}

/// One transport together with its reader and writer tasks.
pub(crate) struct Generation {
    id: u64,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
    writer: JoinHandle<mpsc::Receiver<Record>>,
    failure_rx: oneshot::Receiver<AppError>,
}

/// Spawn reader and writer tasks bound to `transport`.
pub(crate) fn install(
    id: u64,
    transport: Transport,
    action_rx: mpsc::Receiver<Record>,
    inbound_tx: mpsc::Sender<Inbound>,
    root: &CancellationToken,
) -> Generation {
    let cancel = root.child_token();
    let (failure_tx, failure_rx) = oneshot::channel();
    let Transport {
        reader,
        writer,
        peer,
    } = transport;

    info!(generation = id, %peer, "supervisor: transport generation installed");

    let reader = tokio::spawn(
        run_reader(id, reader, inbound_tx, failure_tx, cancel.clone()).in_current_span(),
    );
    let writer = tokio::spawn(run_writer(id, writer, action_rx, cancel.clone()).in_current_span());

    Generation {
        id,
        cancel,
        reader,
        writer,
        failure_rx,
    }
}

/// Stop a generation and reclaim the action queue.
///
/// Actions still queued were issued by calls that have already failed, so
/// they are discarded rather than replayed on the next link.
async fn retire(generation: Generation) -> Result<mpsc::Receiver<Record>> {
    let Generation {
        id,
        cancel,
        reader,
        writer,
        ..
    } = generation;

    cancel.cancel();

    if let Err(err) = reader.await {
        warn!(generation = id, error = %err, "supervisor: reader task ended abnormally");
    }

    let mut action_rx = writer
        .await
        .map_err(|err| AppError::Link(format!("writer task failed: {err}")))?;

    while let Ok(stale) = action_rx.try_recv() {
        warn!(generation = id, action = stale.action_name(), "supervisor: discarding unsent action");
    }

    debug!(generation = id, "supervisor: generation retired");
    Ok(action_rx)
}

/// Supervisor task: runs until the adapter closes or turns fatal.
pub(crate) async fn run_supervisor(
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    mut generation: Generation,
    inbound_tx: mpsc::Sender<Inbound>,
) {
    let mut next_id = generation.id + 1;

    loop {
        let reason = tokio::select! {
            biased;

            () = shared.cancel.cancelled() => {
                debug!("supervisor: cancellation received, stopping");
                if let Err(err) = retire(generation).await {
                    debug!(error = %err, "supervisor: retire on shutdown failed");
                }
                return;
            }

            failure = &mut generation.failure_rx => failure.unwrap_or_else(|_| {
                AppError::Link("reader exited without reporting".into())
            }),
        };

        warn!(generation = generation.id, error = %reason, "supervisor: link lost");
        shared.set_state(LinkState::Reconnecting { attempt: 0 });

        let outcome = match retire(generation).await {
            Ok(action_rx) => {
                reconnect(&shared, connector.as_ref(), action_rx, &inbound_tx, &mut next_id).await
            }
            Err(err) => Err(err),
        };

        match outcome {
            Ok(fresh) => generation = fresh,
            Err(AppError::Closed(_)) => {
                debug!("supervisor: closed during reconnect");
                return;
            }
            Err(err) => {
                error!(error = %err, "supervisor: giving up on link");
                shared.set_state(LinkState::Fatal(err));
                shared.cancel.cancel();
                return;
            }
        }
    }
}

/// Bounded reconnect loop with a fixed delay between dials.
///
/// Holds the exec gate for the whole cycle so no caller's action can reach
/// a fresh link before the stored credentials have been replayed.
async fn reconnect(
    shared: &Shared,
    connector: &dyn Connector,
    mut action_rx: mpsc::Receiver<Record>,
    inbound_tx: &mpsc::Sender<Inbound>,
    next_id: &mut u64,
) -> Result<Generation> {
    let max_attempts = shared.config.reconnect.max_attempts;
    let delay = shared.config.reconnect_delay();
    let endpoint = connector.endpoint();

    let mut responses = shared.responses.lock().await;

    for attempt in 1..=max_attempts {
        shared.set_state(LinkState::Reconnecting { attempt });
        info!(attempt, max_attempts, ?delay, %endpoint, "supervisor: reconnecting");

        tokio::select! {
            biased;
            () = shared.cancel.cancelled() => return Err(AppError::Closed("adapter closed".into())),
            () = tokio::time::sleep(delay) => {}
        }

        let dialed = tokio::select! {
            biased;
            () = shared.cancel.cancelled() => return Err(AppError::Closed("adapter closed".into())),
            dialed = connector.connect() => dialed,
        };

        let transport = match dialed {
            Ok(transport) => transport,
            Err(err) => {
                warn!(
                    attempt,
                    remaining = max_attempts - attempt,
                    error = %err,
                    "supervisor: reconnect attempt failed"
                );
                continue;
            }
        };

        let id = *next_id;
        *next_id += 1;
        let mut generation = install(id, transport, action_rx, inbound_tx.clone(), &shared.cancel);
        shared.set_state(LinkState::Connected);

        let credentials = {
            let stored = shared.credentials.lock().await;
            if stored.is_some() {
                shared.replays.fetch_add(1, Ordering::Relaxed);
            }
            stored.clone()
        };
        let Some(credentials) = credentials else {
            info!(generation = id, "supervisor: reconnected, no credentials to replay");
            return Ok(generation);
        };

        let relogin = tokio::select! {
            biased;

            () = shared.cancel.cancelled() => {
                retire(generation).await?;
                return Err(AppError::Closed("adapter closed".into()));
            }

            failure = &mut generation.failure_rx => Err(failure.unwrap_or_else(|_| {
                AppError::Link("reader exited without reporting".into())
            })),

            response = round_trip(shared, &mut responses, credentials.login_action()) => response,
        };

        match relogin {
            Ok(response) if response.is_error() => {
                let message = response.message().unwrap_or("login rejected").to_owned();
                retire(generation).await?;
                return Err(AppError::Auth(message));
            }
            Ok(_) => {
                info!(generation = id, username = %credentials.username, "supervisor: re-authenticated");
                return Ok(generation);
            }
            Err(err @ AppError::Timeout(_)) => {
                retire(generation).await?;
                return Err(err);
            }
            Err(err) => {
                warn!(attempt, error = %err, "supervisor: link lost during re-login");
                shared.set_state(LinkState::Reconnecting { attempt });
                action_rx = retire(generation).await?;
            }
        }
    }

    Err(AppError::ReconnectExhausted(format!(
        "{endpoint} unreachable after {max_attempts} attempts"
    )))
}
