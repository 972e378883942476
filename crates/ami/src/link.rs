use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use switchboard_core::config::ManagerConfig;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::action::{ManagerAction, ManagerResponse};
use crate::events::{EventSubscription, ManagerEvent, ManagerEventSource};
use crate::frame::{write_frame, FrameError, FrameKind, FrameReader, ManagerFrame};

const EVENT_CHANNEL_CAPACITY: usize = 1_024;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("could not reach manager at {address}: {message}")]
    Unreachable { address: String, message: String },
    #[error("manager did not complete the handshake within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("manager refused login: {0}")]
    LoginRejected(String),
    #[error("manager link was shut down")]
    Shutdown,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("manager link is not available")]
    ConnectionUnavailable,
    #[error("no correlated manager response before the deadline")]
    Timeout,
    #[error("manager rejected the action: {0}")]
    Rejected(String),
    #[error("action cannot be framed: {0}")]
    Invalid(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Authenticated,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Authenticated => "authenticated",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ManagerSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: SecretString,
    pub connect_timeout: Duration,
    pub action_timeout: Duration,
}

impl ManagerSettings {
    pub fn from_config(config: &ManagerConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            secret: config.secret.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            action_timeout: Duration::from_secs(config.action_timeout_secs),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Delay between reconnect attempts. Retries are unbounded; the delay doubles
/// per consecutive failure up to `max_delay_ms`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { base_delay_ms: 500, max_delay_ms: 30_000 }
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &ManagerConfig) -> Self {
        Self {
            base_delay_ms: config.reconnect_base_delay_ms,
            max_delay_ms: config.reconnect_max_delay_ms,
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

pub type ManagerReader = Box<dyn AsyncBufRead + Send + Unpin>;
pub type ManagerWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Opens the byte stream a session runs over.
#[async_trait]
pub trait ManagerConnector: Send + Sync {
    async fn open(&self) -> Result<(ManagerReader, ManagerWriter), ConnectError>;
}

pub struct TcpConnector {
    address: String,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self { address: address.into(), connect_timeout }
    }
}

#[async_trait]
impl ManagerConnector for TcpConnector {
    async fn open(&self) -> Result<(ManagerReader, ManagerWriter), ConnectError> {
        let stream =
            tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
                .await
                .map_err(|_| ConnectError::Timeout(self.connect_timeout))?
                .map_err(|error| ConnectError::Unreachable {
                    address: self.address.clone(),
                    message: error.to_string(),
                })?;
        stream.set_nodelay(true).map_err(|error| ConnectError::Unreachable {
            address: self.address.clone(),
            message: error.to_string(),
        })?;

        let (read_half, write_half) = stream.into_split();
        Ok((Box::new(BufReader::new(read_half)), Box::new(write_half)))
    }
}

/// Sends actions and waits for their correlated response.
#[async_trait]
pub trait ActionSender: Send + Sync {
    async fn send_action_with_timeout(
        &self,
        action: ManagerAction,
        timeout: Duration,
    ) -> Result<ManagerResponse, ActionError>;
}

/// Handle to the process-wide manager session. Cloning shares the session.
#[derive(Clone)]
pub struct ManagerLink {
    inner: Arc<LinkInner>,
}

struct LinkInner {
    state: watch::Sender<LinkState>,
    session: Mutex<Option<SessionHandle>>,
    events: broadcast::Sender<ManagerEvent>,
    next_action: AtomicU64,
    token_prefix: String,
    action_timeout: Duration,
    shutdown: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
struct SessionHandle {
    outbound: mpsc::UnboundedSender<ManagerFrame>,
    pending: Arc<PendingActions>,
}

/// Waiters keyed by ActionID for one session. Closing it drops every waiter,
/// which resolves them as timed out.
#[derive(Default)]
struct PendingActions {
    table: Mutex<PendingTable>,
}

#[derive(Default)]
struct PendingTable {
    closed: bool,
    waiters: HashMap<String, oneshot::Sender<ManagerFrame>>,
}

impl PendingActions {
    fn register(&self, action_id: &str, waiter: oneshot::Sender<ManagerFrame>) -> bool {
        let mut table = lock(&self.table);
        if table.closed {
            return false;
        }
        table.waiters.insert(action_id.to_owned(), waiter);
        true
    }

    fn complete(&self, action_id: &str, frame: ManagerFrame) -> bool {
        let waiter = lock(&self.table).waiters.remove(action_id);
        match waiter {
            Some(waiter) => {
                // The caller may have given up already.
                let _ = waiter.send(frame);
                true
            }
            None => false,
        }
    }

    fn forget(&self, action_id: &str) {
        lock(&self.table).waiters.remove(action_id);
    }

    fn close(&self) -> usize {
        let mut table = lock(&self.table);
        table.closed = true;
        let abandoned = table.waiters.len();
        table.waiters.clear();
        abandoned
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ManagerLink {
    /// Opens and authenticates the first session before returning, then keeps
    /// it alive in the background.
    pub async fn connect(
        settings: ManagerSettings,
        policy: ReconnectPolicy,
    ) -> Result<Self, ConnectError> {
        let connector = TcpConnector::new(settings.address(), settings.connect_timeout);
        Self::connect_with(Arc::new(connector), settings, policy).await
    }

    pub async fn connect_with(
        connector: Arc<dyn ManagerConnector>,
        settings: ManagerSettings,
        policy: ReconnectPolicy,
    ) -> Result<Self, ConnectError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let link = Self::start(connector, settings, policy, Some(ready_tx));
        match ready_rx.await {
            Ok(Ok(())) => Ok(link),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(ConnectError::Shutdown),
        }
    }

    /// Starts the supervisor without waiting: the first session is opened in
    /// the background and retried until it succeeds.
    pub fn spawn(settings: ManagerSettings, policy: ReconnectPolicy) -> Self {
        let connector = TcpConnector::new(settings.address(), settings.connect_timeout);
        Self::spawn_with(Arc::new(connector), settings, policy)
    }

    pub fn spawn_with(
        connector: Arc<dyn ManagerConnector>,
        settings: ManagerSettings,
        policy: ReconnectPolicy,
    ) -> Self {
        Self::start(connector, settings, policy, None)
    }

    fn start(
        connector: Arc<dyn ManagerConnector>,
        settings: ManagerSettings,
        policy: ReconnectPolicy,
        ready: Option<oneshot::Sender<Result<(), ConnectError>>>,
    ) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        let token = uuid::Uuid::new_v4().simple().to_string();

        let inner = Arc::new(LinkInner {
            state,
            session: Mutex::new(None),
            events,
            next_action: AtomicU64::new(1),
            token_prefix: format!("sb-{}", &token[..8]),
            action_timeout: settings.action_timeout,
            shutdown,
            supervisor: Mutex::new(None),
        });

        let handle = tokio::spawn(supervise(inner.clone(), connector, settings, policy, ready));
        *lock(&inner.supervisor) = Some(handle);

        Self { inner }
    }

    pub fn state(&self) -> LinkState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.inner.state.subscribe()
    }

    /// Sends `action` with the link's default response deadline.
    pub async fn send_action(&self, action: ManagerAction) -> Result<ManagerResponse, ActionError> {
        self.send_action_with_timeout(action, self.inner.action_timeout).await
    }

    pub fn subscribe_events(&self) -> EventSubscription {
        EventSubscription::from_receiver(self.inner.events.subscribe())
    }

    /// Logs off the current session and stops reconnecting.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let handle = lock(&self.inner.supervisor).take();
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                warn!(event_name = "ami.link.supervisor_failed", error = %error, "manager supervisor ended abnormally");
            }
        }
    }

    fn next_action_id(&self) -> String {
        let sequence = self.inner.next_action.fetch_add(1, Ordering::Relaxed);
        format!("{}-{sequence}", self.inner.token_prefix)
    }

    fn current_session(&self) -> Option<SessionHandle> {
        if self.state() != LinkState::Authenticated {
            return None;
        }
        lock(&self.inner.session).clone()
    }
}

#[async_trait]
impl ActionSender for ManagerLink {
    async fn send_action_with_timeout(
        &self,
        action: ManagerAction,
        timeout: Duration,
    ) -> Result<ManagerResponse, ActionError> {
        let Some(session) = self.current_session() else {
            debug!(event_name = "ami.action.unavailable", action = action.name(), "manager link is not authenticated");
            return Err(ActionError::ConnectionUnavailable);
        };

        let action_id = self.next_action_id();
        let frame = action.to_frame(&action_id);
        if let Err(error) = frame.check() {
            warn!(
                event_name = "ami.action.refused",
                correlation_id = %action_id,
                action = action.name(),
                error = %error,
                "manager action not sent"
            );
            return Err(ActionError::Invalid(error.to_string()));
        }

        let (waiter, response) = oneshot::channel();
        if !session.pending.register(&action_id, waiter) {
            return Err(ActionError::ConnectionUnavailable);
        }
        if session.outbound.send(frame).is_err() {
            session.pending.forget(&action_id);
            return Err(ActionError::ConnectionUnavailable);
        }

        debug!(
            event_name = "ami.action.sent",
            correlation_id = %action_id,
            action = action.name(),
            "manager action queued"
        );

        match tokio::time::timeout(timeout, response).await {
            Ok(Ok(frame)) => {
                let response = ManagerResponse::from_frame(frame);
                if response.is_success() {
                    Ok(response)
                } else {
                    Err(ActionError::Rejected(response.message().to_owned()))
                }
            }
            Ok(Err(_)) => {
                warn!(
                    event_name = "ami.action.abandoned",
                    correlation_id = %action_id,
                    action = action.name(),
                    "manager session ended before the response arrived"
                );
                Err(ActionError::Timeout)
            }
            Err(_) => {
                session.pending.forget(&action_id);
                warn!(
                    event_name = "ami.action.timed_out",
                    correlation_id = %action_id,
                    action = action.name(),
                    timeout_ms = timeout.as_millis() as u64,
                    "manager action timed out"
                );
                Err(ActionError::Timeout)
            }
        }
    }
}

impl ManagerEventSource for ManagerLink {
    fn subscribe_events(&self) -> EventSubscription {
        ManagerLink::subscribe_events(self)
    }
}

enum SessionEnd {
    TransportClosed,
    TransportFailed(String),
    Shutdown,
}

async fn supervise(
    inner: Arc<LinkInner>,
    connector: Arc<dyn ManagerConnector>,
    settings: ManagerSettings,
    policy: ReconnectPolicy,
    mut ready: Option<oneshot::Sender<Result<(), ConnectError>>>,
) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        inner.state.send_replace(LinkState::Connecting);
        let opened = tokio::select! {
            opened = open_session(&inner, connector.as_ref(), &settings) => opened,
            _ = shutdown.changed() => Err(ConnectError::Shutdown),
        };

        match opened {
            Ok((reader, writer)) => {
                attempt = 0;
                match run_session(&inner, reader, writer, &mut shutdown, ready.take()).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::TransportClosed => {
                        warn!(event_name = "ami.link.disconnected", "manager closed the connection");
                    }
                    SessionEnd::TransportFailed(message) => {
                        warn!(event_name = "ami.link.disconnected", error = %message, "manager connection failed");
                    }
                }
            }
            Err(ConnectError::Shutdown) => break,
            Err(error) => {
                inner.state.send_replace(LinkState::Disconnected);
                if let Some(ready) = ready.take() {
                    warn!(
                        event_name = "ami.link.connect_failed",
                        address = %settings.address(),
                        error = %error,
                        "initial manager connection failed"
                    );
                    let _ = ready.send(Err(error));
                    return;
                }
                warn!(
                    event_name = "ami.link.connect_failed",
                    address = %settings.address(),
                    attempt,
                    error = %error,
                    "manager connection attempt failed; retrying"
                );
            }
        }

        let delay = policy.backoff(attempt);
        attempt = attempt.saturating_add(1);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    inner.state.send_replace(LinkState::Disconnected);
    info!(event_name = "ami.link.stopped", "manager link supervisor stopped");
}

async fn open_session(
    inner: &LinkInner,
    connector: &dyn ManagerConnector,
    settings: &ManagerSettings,
) -> Result<(FrameReader<ManagerReader>, ManagerWriter), ConnectError> {
    let (reader, mut writer) = connector.open().await?;
    inner.state.send_replace(LinkState::Connected);
    let mut reader = FrameReader::new(reader);

    tokio::time::timeout(
        settings.connect_timeout,
        login(&mut reader, &mut writer, &inner.token_prefix, settings),
    )
    .await
    .map_err(|_| ConnectError::Timeout(settings.connect_timeout))??;

    info!(
        event_name = "ami.link.connected",
        address = %settings.address(),
        username = %settings.username,
        "manager session authenticated"
    );
    Ok((reader, writer))
}

async fn login(
    reader: &mut FrameReader<ManagerReader>,
    writer: &mut ManagerWriter,
    token_prefix: &str,
    settings: &ManagerSettings,
) -> Result<(), ConnectError> {
    let banner = reader.read_banner().await?;
    debug!(event_name = "ami.link.banner", banner = %banner, "manager banner received");

    let login_id = format!("{token_prefix}-login");
    let login = ManagerAction::login(&settings.username, &settings.secret);
    write_frame(writer, &login.to_frame(&login_id)).await?;

    // Events may arrive before the login response; only the response counts.
    loop {
        let frame = reader.read_frame().await?.ok_or(FrameError::Closed)?;
        if frame.kind() == FrameKind::Response && frame.action_id() == Some(login_id.as_str()) {
            let response = ManagerResponse::from_frame(frame);
            if response.is_success() {
                return Ok(());
            }
            return Err(ConnectError::LoginRejected(response.message().to_owned()));
        }
    }
}

async fn run_session(
    inner: &LinkInner,
    reader: FrameReader<ManagerReader>,
    mut writer: ManagerWriter,
    shutdown: &mut watch::Receiver<bool>,
    ready: Option<oneshot::Sender<Result<(), ConnectError>>>,
) -> SessionEnd {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let pending = Arc::new(PendingActions::default());
    *lock(&inner.session) =
        Some(SessionHandle { outbound: outbound_tx, pending: pending.clone() });
    inner.state.send_replace(LinkState::Authenticated);
    if let Some(ready) = ready {
        let _ = ready.send(Ok(()));
    }

    let (inbound_tx, mut inbound_rx) = mpsc::channel(64);
    let reader_task = tokio::spawn(pump_frames(reader, inbound_tx));

    let end = loop {
        tokio::select! {
            inbound = inbound_rx.recv() => match inbound {
                Some(Ok(frame)) => route_frame(inner, &pending, frame),
                Some(Err(error)) => break SessionEnd::TransportFailed(error.to_string()),
                None => break SessionEnd::TransportClosed,
            },
            Some(frame) = outbound_rx.recv() => {
                if let Err(error) = write_frame(&mut writer, &frame).await {
                    break SessionEnd::TransportFailed(error.to_string());
                }
            }
            _ = shutdown.changed() => {
                let logoff = ManagerAction::logoff().to_frame(&format!("{}-logoff", inner.token_prefix));
                if let Err(error) = write_frame(&mut writer, &logoff).await {
                    debug!(error = %error, "manager logoff could not be sent");
                }
                break SessionEnd::Shutdown;
            }
        }
    };

    lock(&inner.session).take();
    inner.state.send_replace(LinkState::Disconnected);
    reader_task.abort();

    let abandoned = pending.close();
    if abandoned > 0 {
        warn!(
            event_name = "ami.link.actions_abandoned",
            abandoned,
            "in-flight manager actions resolved as timed out"
        );
    }

    end
}

async fn pump_frames(
    mut reader: FrameReader<ManagerReader>,
    inbound: mpsc::Sender<Result<ManagerFrame, FrameError>>,
) {
    loop {
        match reader.read_frame().await {
            Ok(Some(frame)) => {
                if inbound.send(Ok(frame)).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(error) => {
                let _ = inbound.send(Err(error)).await;
                return;
            }
        }
    }
}

fn route_frame(inner: &LinkInner, pending: &PendingActions, frame: ManagerFrame) {
    match frame.kind() {
        FrameKind::Response => {
            let action_id = frame.action_id().unwrap_or_default().to_owned();
            if !pending.complete(&action_id, frame) {
                warn!(
                    event_name = "ami.action.unmatched_response",
                    correlation_id = %action_id,
                    "dropping manager response with no waiting action"
                );
            }
        }
        FrameKind::Event => {
            let event = ManagerEvent::from_frame(frame);
            debug!(event_name = "ami.event.received", manager_event = event.name(), "manager event received");
            // No subscribers is fine: events are not buffered for later.
            let _ = inner.events.send(event);
        }
        FrameKind::Other => debug!("ignoring manager frame without Response or Event"),
    }
}
