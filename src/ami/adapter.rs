//! Adapter façade: connect, login, exec, and the event stream.
//!
//! # Exec discipline
//!
//! Responses carry no mandatory correlation field, so at most one action is
//! in flight per adapter. The response queue sits behind an async mutex and
//! every [`Adapter::exec`] holds it from send to reply. Each action is also
//! stamped with an `ActionID` (unless the caller set one); a reply carrying a
//! different `ActionID` is a leftover from an earlier, timed-out call and is
//! discarded.
//!
//! # Failure surface
//!
//! | Situation                          | `exec` result                  |
//! |------------------------------------|--------------------------------|
//! | reply arrives                      | `Ok(record)`                   |
//! | no reply within the exec timeout   | [`AppError::Timeout`]          |
//! | link drops while waiting           | [`AppError::ConnectionLost`]   |
//! | adapter reconnecting               | [`AppError::ConnectionLost`]   |
//! | adapter fatal                      | the terminal error             |
//! | adapter closed                     | [`AppError::Closed`]           |

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::ami::classifier::run_classifier;
use crate::ami::codec::validate_action;
use crate::ami::parser::run_parser;
use crate::ami::record::Record;
use crate::ami::supervisor::{install, run_supervisor, LinkState};
use crate::ami::transport::{Connector, TcpConnector};
use crate::config::AdapterConfig;
use crate::{AppError, Result};

/// Field echoed by the server to correlate a reply with its action.
pub const ACTION_ID: &str = "ActionID";

/// Login identity kept for re-authentication after a reconnect.
#[derive(Clone)]
pub struct Credentials {
    pub(crate) username: String,
    secret: String,
}

impl Credentials {
    /// Build credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }

    /// Login user name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// `Action: Login` record for these credentials.
    #[must_use]
    pub fn login_action(&self) -> Record {
        Record::action("Login")
            .with("Username", self.username.clone())
            .with("Secret", self.secret.clone())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// State shared by the façade and the supervisor.
pub(crate) struct Shared {
    pub(crate) config: AdapterConfig,
    pub(crate) action_tx: mpsc::Sender<Record>,
    /// Exec gate: whoever holds this owns the single in-flight slot.
    pub(crate) responses: Mutex<mpsc::Receiver<Record>>,
    pub(crate) credentials: Mutex<Option<Credentials>>,
    /// Reads of `credentials` for a reconnect replay. Only touched under the
    /// `credentials` lock.
    pub(crate) replays: AtomicU64,
    pub(crate) state_tx: watch::Sender<LinkState>,
    pub(crate) cancel: CancellationToken,
    events: Mutex<Option<mpsc::Receiver<Record>>>,
    next_action_id: AtomicU64,
    instance: u64,
}

impl Shared {
    pub(crate) fn set_state(&self, state: LinkState) {
        debug!(?state, "adapter: link state changed");
        self.state_tx.send_replace(state);
    }

    fn stamp(&self, action: &mut Record) -> String {
        if let Some(id) = action.get(ACTION_ID) {
            return id.to_owned();
        }
        let seq = self.next_action_id.fetch_add(1, Ordering::Relaxed);
        let id = format!("ami-link-{}-{seq}", self.instance);
        action.insert(ACTION_ID, id.clone());
        id
    }
}

/// Error for a call that finds the link in `state`.
fn unavailable(state: &LinkState) -> AppError {
    match state {
        LinkState::Connected => AppError::ConnectionLost("link state changed".into()),
        LinkState::Reconnecting { attempt } => {
            AppError::ConnectionLost(format!("reconnecting (attempt {attempt})"))
        }
        LinkState::Fatal(err) => err.clone(),
        LinkState::Closed => AppError::Closed("adapter closed".into()),
    }
}

/// Send `action` and wait for its reply. The caller must hold the exec gate.
pub(crate) async fn round_trip(
    shared: &Shared,
    responses: &mut mpsc::Receiver<Record>,
    mut action: Record,
) -> Result<Record> {
    let deadline = shared.config.exec_timeout().map(|limit| Instant::now() + limit);
    round_trip_until(shared, responses, &mut action, deadline).await
}

async fn round_trip_until(
    shared: &Shared,
    responses: &mut mpsc::Receiver<Record>,
    action: &mut Record,
    deadline: Option<Instant>,
) -> Result<Record> {
    while let Ok(stale) = responses.try_recv() {
        warn!(?stale, "adapter: discarding stale response");
    }

    let mut state_rx = shared.state_tx.subscribe();
    {
        let state = state_rx.borrow_and_update();
        if *state != LinkState::Connected {
            return Err(unavailable(&state));
        }
    }

    let action_id = shared.stamp(action);
    let name = action.action_name().unwrap_or_default().to_owned();
    debug!(action = %name, %action_id, "adapter: sending action");

    shared
        .action_tx
        .send(action.clone())
        .await
        .map_err(|_| AppError::Closed("action queue closed".into()))?;

    let wait = async {
        loop {
            tokio::select! {
                biased;

                response = responses.recv() => {
                    let Some(response) = response else {
                        return Err(AppError::Closed("response queue closed".into()));
                    };
                    match response.get(ACTION_ID) {
                        Some(id) if id != action_id => {
                            warn!(expected = %action_id, got = id, "adapter: discarding uncorrelated response");
                        }
                        _ => return Ok(response),
                    }
                }

                changed = state_rx.wait_for(|state| *state != LinkState::Connected) => {
                    return Err(match changed {
                        Ok(state) => unavailable(&state),
                        Err(_) => AppError::Closed("adapter dropped".into()),
                    });
                }
            }
        }
    };

    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, wait).await.map_err(|_| {
            AppError::Timeout(format!("no response to {name} ({action_id})"))
        })?,
        None => wait.await,
    }
}

static INSTANCES: AtomicU64 = AtomicU64::new(1);

/// Client session with one manager endpoint.
///
/// Owns its queues and tasks; several adapters may coexist in a process.
/// Dropping the adapter stops every task it spawned.
pub struct Adapter {
    shared: Arc<Shared>,
    supervisor: JoinHandle<()>,
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("endpoint", &self.shared.config.endpoint())
            .field("state", &*self.shared.state_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl Adapter {
    /// Dial `config.host:config.port` over TCP and start the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] for an invalid configuration and
    /// [`AppError::Connection`] when the initial dial fails.
    pub async fn connect(config: AdapterConfig) -> Result<Self> {
        let connector = TcpConnector::from_config(&config);
        Self::connect_with(connector, config).await
    }

    /// Dial `host` on the default port with default settings.
    ///
    /// # Errors
    ///
    /// Same as [`Adapter::connect`].
    pub async fn connect_host(host: impl Into<String>) -> Result<Self> {
        Self::connect(AdapterConfig::for_host(host)).await
    }

    /// Start the pipeline over transports produced by `connector`.
    ///
    /// # Errors
    ///
    /// Same as [`Adapter::connect`].
    pub async fn connect_with<C: Connector>(connector: C, config: AdapterConfig) -> Result<Self> {
        config.validate()?;

        let connector: Arc<dyn Connector> = Arc::new(connector);
        let endpoint = connector.endpoint();
        let transport = connector.connect().await.map_err(|err| match err {
            AppError::Connection(_) => err,
            other => AppError::Connection(other.to_string()),
        })?;

        let capacity = config.queues.capacity;
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (record_tx, record_rx) = mpsc::channel(capacity);
        let (response_tx, response_rx) = mpsc::channel(capacity);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let (action_tx, action_rx) = mpsc::channel(capacity);
        let (state_tx, _) = watch::channel(LinkState::Connected);

        let instance = INSTANCES.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let shared = Arc::new(Shared {
            config,
            action_tx,
            responses: Mutex::new(response_rx),
            credentials: Mutex::new(None),
            replays: AtomicU64::new(0),
            state_tx,
            cancel: cancel.clone(),
            events: Mutex::new(Some(event_rx)),
            next_action_id: AtomicU64::new(1),
            instance,
        });

        let span = info_span!("ami_adapter", instance, %endpoint);
        let supervisor = async {
            tokio::spawn(run_parser(inbound_rx, record_tx, cancel.clone()).in_current_span());
            tokio::spawn(
                run_classifier(record_rx, response_tx, event_tx, cancel.clone())
                    .in_current_span(),
            );

            let generation = install(0, transport, action_rx, inbound_tx.clone(), &cancel);
            info!("adapter: connected");

            tokio::spawn(
                run_supervisor(Arc::clone(&shared), connector, generation, inbound_tx)
                    .in_current_span(),
            )
        }
        .instrument(span)
        .await;

        Ok(Self { shared, supervisor })
    }

    /// Authenticate and obtain the event stream.
    ///
    /// The credentials are kept and replayed automatically after every
    /// reconnect. A failed login puts the previous credentials back, unless
    /// the link dropped mid-call and a reconnect has already started
    /// replaying the new ones; those then stay, so the stored identity
    /// always matches the one the live session was authenticated with.
    ///
    /// # Errors
    ///
    /// - [`AppError::Auth`] carrying the server's `Message` when the server
    ///   answers `Response: Error`.
    /// - [`AppError::AlreadyConsumed`] when a previous login already took
    ///   the event stream.
    /// - Any [`Adapter::exec`] error.
    pub async fn login(&self, username: &str, secret: &str) -> Result<EventStream> {
        let credentials = Credentials::new(username, secret);
        let (previous, replays) = {
            let mut stored = self.shared.credentials.lock().await;
            let replays = self.shared.replays.load(Ordering::Relaxed);
            (stored.replace(credentials.clone()), replays)
        };

        let response = match self.exec(credentials.login_action()).await {
            Ok(response) => response,
            Err(err) => {
                self.restore_credentials(previous, replays).await;
                return Err(err);
            }
        };

        if response.is_error() {
            self.restore_credentials(previous, replays).await;
            let message = response.message().unwrap_or("login rejected").to_owned();
            warn!(username, %message, "adapter: login rejected");
            return Err(AppError::Auth(message));
        }

        info!(username, "adapter: login accepted");
        self.shared
            .events
            .lock()
            .await
            .take()
            .map(EventStream::new)
            .ok_or_else(|| AppError::AlreadyConsumed("event stream already taken".into()))
    }

    /// Undo a failed login's credential swap if no replay has used it yet.
    async fn restore_credentials(&self, previous: Option<Credentials>, replays: u64) {
        let mut stored = self.shared.credentials.lock().await;
        if self.shared.replays.load(Ordering::Relaxed) == replays {
            *stored = previous;
        } else {
            warn!("adapter: login failed after a reconnect replayed its credentials, keeping them");
        }
    }

    /// Send `action` and wait for exactly one response.
    ///
    /// # Errors
    ///
    /// - [`AppError::Protocol`] if `action` lacks an `Action` field or holds
    ///   a field that cannot be framed.
    /// - [`AppError::Timeout`], [`AppError::ConnectionLost`],
    ///   [`AppError::Closed`], or the terminal error, per the module table.
    pub async fn exec(&self, action: Record) -> Result<Record> {
        validate_action(&action)?;

        {
            let state = self.shared.state_tx.borrow();
            if *state != LinkState::Connected {
                return Err(unavailable(&state));
            }
        }

        let deadline = self
            .shared
            .config
            .exec_timeout()
            .map(|limit| Instant::now() + limit);
        let name = action.action_name().unwrap_or_default().to_owned();

        let mut responses = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, self.shared.responses.lock())
                .await
                .map_err(|_| AppError::Timeout(format!("{name} waited too long for its turn")))?,
            None => self.shared.responses.lock().await,
        };

        let mut action = action;
        round_trip_until(&self.shared, &mut responses, &mut action, deadline).await
    }

    /// `Action: Ping`.
    ///
    /// # Errors
    ///
    /// Same as [`Adapter::exec`].
    pub async fn ping(&self) -> Result<Record> {
        self.exec(Record::action("Ping")).await
    }

    /// Send `Action: Logoff`, then close the adapter.
    ///
    /// The adapter is closed even when the logoff call fails.
    ///
    /// # Errors
    ///
    /// Same as [`Adapter::exec`].
    pub async fn logoff(&self) -> Result<Record> {
        let result = self.exec(Record::action("Logoff")).await;
        self.close();
        result
    }

    /// Current link state.
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.shared.state_tx.borrow().clone()
    }

    /// Watch link state transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.shared.state_tx.subscribe()
    }

    /// Wait until the adapter turns fatal or is closed and return why.
    pub async fn wait_terminal(&self) -> AppError {
        let mut state_rx = self.shared.state_tx.subscribe();
        let result = state_rx.wait_for(LinkState::is_terminal).await;
        match result {
            Ok(state) => unavailable(&state),
            Err(_) => AppError::Closed("adapter dropped".into()),
        }
    }

    /// Stop every task. Idempotent; a fatal state is preserved.
    pub fn close(&self) {
        self.shared.state_tx.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = LinkState::Closed;
                true
            }
        });
        self.shared.cancel.cancel();
    }

    /// Whether the supervisor task has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.supervisor.is_finished()
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

/// Lazy, non-restartable feed of event records.
///
/// Survives reconnects; ends once the adapter closes or turns fatal.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<Record>,
}

impl EventStream {
    fn new(rx: mpsc::Receiver<Record>) -> Self {
        Self { rx }
    }

    /// Next event, or `None` once the adapter has stopped.
    pub async fn next_event(&mut self) -> Option<Record> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = Record;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Record>> {
        self.rx.poll_recv(cx)
    }
}
