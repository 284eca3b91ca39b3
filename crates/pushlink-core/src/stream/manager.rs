//! Connection manager
//!
//! Owns the single logical connection to the push stream. Everything that
//! touches the connection runs on one task:
//!
//! - commands from the handle (credential changes, status queries, retries)
//! - inbound frames of the current stream
//! - the heartbeat deadline, the keepalive pulse and the reconnection policy
//! - results of connect attempts, sync fetches and outbound pushes, which run
//!   as spawned tasks and report back over a channel
//!
//! Opening a stream always tears down the previous one first, and every
//! connect attempt carries a generation number so a superseded attempt that
//! completes late is discarded instead of becoming a second live stream.

use std::fmt;
use std::future;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::heartbeat::HeartbeatMonitor;
use super::keepalive::KeepalivePulse;
use super::message::{StreamFrame, TickleKind, KEEPALIVE_TOKEN};
use super::reconnect::{self, PolicyAction, PolicyContext, ReconnectionPolicy};
use super::transport::{
    next_inbound, Connector, Inbound, NetworkMonitor, StreamHandle, CLOSE_CODE_UNAUTHORIZED,
};
use crate::api::PushService;
use crate::config::Config;
use crate::credentials::CredentialSource;
use crate::crypto::PushCrypto;
use crate::error::{ApiError, FailureKind, ManagerError, TransportError};
use crate::models::{MirrorNotification, OutgoingPush, PushPage, PushRecord, SentPush};
use crate::notify::{Desktop, NotificationDispatch};
use crate::store::LocalStore;
use crate::sync::{DeltaSync, FetchWindow};

/// Connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host idle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleState {
    Active,
    Idle,
    Locked,
}

/// Answer to a status query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub status: ConnectionState,
    /// The fast retry budget is used up; offering a manual retry makes sense
    pub can_retry: bool,
    pub attempts: u32,
    pub max_attempts: u32,
}

/// Commands sent to the manager task
#[derive(Debug)]
pub enum ManagerCommand {
    /// Re-read the credential and reconnect (or disconnect if it is gone)
    CredentialUpdated,
    GetStatus(oneshot::Sender<StatusReport>),
    /// Reset the retry budget and reconnect now
    RetryConnection,
    /// Run a sync pass outside of a tickle
    RefreshMessages,
    SendPush {
        push: OutgoingPush,
        reply: oneshot::Sender<Result<PushRecord, ApiError>>,
    },
    IdleStateChanged(IdleState),
    Shutdown,
}

/// Events emitted by the manager task
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    StatusChanged(ConnectionState),
    /// A sync pass changed the cache
    PushesUpdated {
        new: usize,
        updated: usize,
        notified: usize,
    },
    PushSent(PushRecord),
    MirrorReceived(MirrorNotification),
    Failure {
        kind: FailureKind,
        message: String,
    },
    /// An encrypted message arrived but no key is configured (once per credential)
    EncryptionRequired,
}

/// External collaborators the manager drives
pub struct Collaborators {
    pub credentials: Arc<dyn CredentialSource>,
    pub connector: Arc<dyn Connector>,
    pub service: Arc<dyn PushService>,
    pub network: Arc<dyn NetworkMonitor>,
    pub desktop: Arc<dyn Desktop>,
    pub store: LocalStore,
}

/// Handle to control and monitor the manager task
pub struct ConnectionHandle {
    command_tx: mpsc::Sender<ManagerCommand>,
    /// Receive events from the manager
    pub event_rx: mpsc::Receiver<ManagerEvent>,
    /// Watch connection status
    pub status_rx: watch::Receiver<ConnectionState>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    async fn command(&self, command: ManagerCommand) -> Result<(), ManagerError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| ManagerError::Stopped)
    }

    pub async fn credential_updated(&self) -> Result<(), ManagerError> {
        self.command(ManagerCommand::CredentialUpdated).await
    }

    pub async fn status(&self) -> Result<StatusReport, ManagerError> {
        let (reply, rx) = oneshot::channel();
        self.command(ManagerCommand::GetStatus(reply)).await?;
        rx.await.map_err(|_| ManagerError::Stopped)
    }

    pub async fn retry_connection(&self) -> Result<(), ManagerError> {
        self.command(ManagerCommand::RetryConnection).await
    }

    pub async fn refresh_messages(&self) -> Result<(), ManagerError> {
        self.command(ManagerCommand::RefreshMessages).await
    }

    pub async fn send_push(&self, push: OutgoingPush) -> Result<PushRecord, ManagerError> {
        let (reply, rx) = oneshot::channel();
        self.command(ManagerCommand::SendPush { push, reply })
            .await?;
        Ok(rx.await.map_err(|_| ManagerError::Stopped)??)
    }

    pub async fn idle_state_changed(&self, state: IdleState) -> Result<(), ManagerError> {
        self.command(ManagerCommand::IdleStateChanged(state)).await
    }

    /// Stop the manager and wait for it to close the stream
    pub async fn shutdown(&mut self) -> Result<(), ManagerError> {
        let _ = self.command_tx.send(ManagerCommand::Shutdown).await;
        if let Some(task) = self.task.take() {
            task.await.map_err(|_| ManagerError::Stopped)?;
        }
        Ok(())
    }

    /// Last published connection state
    pub fn state(&self) -> ConnectionState {
        *self.status_rx.borrow()
    }
}

/// Results of work spawned off the manager task
enum TaskResult {
    Opened {
        generation: u64,
        result: Result<StreamHandle, TransportError>,
    },
    Fetched {
        window: FetchWindow,
        result: Result<PushPage, ApiError>,
    },
    Sent {
        result: Result<PushRecord, ApiError>,
        reply: oneshot::Sender<Result<PushRecord, ApiError>>,
    },
}

/// Why the loop woke up
enum Wake {
    Command(Option<ManagerCommand>),
    Inbound(Option<Inbound>),
    Task(TaskResult),
    HeartbeatExpired,
    Keepalive,
    Policy,
}

pub struct ConnectionManager {
    config: Config,
    credentials: Arc<dyn CredentialSource>,
    connector: Arc<dyn Connector>,
    service: Arc<dyn PushService>,
    network: Arc<dyn NetworkMonitor>,
    store: LocalStore,

    sync: DeltaSync,
    dispatch: NotificationDispatch,
    crypto: PushCrypto,

    state: ConnectionState,
    token: Option<String>,
    stream: Option<StreamHandle>,
    /// Bumped on every teardown; stale connect results are dropped
    generation: u64,
    heartbeat: HeartbeatMonitor,
    keepalive: KeepalivePulse,
    policy: ReconnectionPolicy,

    sync_in_flight: bool,
    resync: bool,
    encryption_warned: bool,

    status_tx: watch::Sender<ConnectionState>,
    event_tx: mpsc::Sender<ManagerEvent>,
    task_tx: mpsc::UnboundedSender<TaskResult>,
    task_rx: mpsc::UnboundedReceiver<TaskResult>,
}

impl ConnectionManager {
    /// Spawn the manager task
    ///
    /// The manager reads the credential, connects if it can, and then runs
    /// until [`ConnectionHandle::shutdown`] or until every handle is dropped.
    pub fn start(config: Config, parts: Collaborators) -> ConnectionHandle {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::channel(64);
        let (status_tx, status_rx) = watch::channel(ConnectionState::Disconnected);

        let manager = Self::new(config, parts, status_tx, event_tx);
        let task = tokio::spawn(manager.run(command_rx));

        ConnectionHandle {
            command_tx,
            event_rx,
            status_rx,
            task: Some(task),
        }
    }

    fn new(
        config: Config,
        parts: Collaborators,
        status_tx: watch::Sender<ConnectionState>,
        event_tx: mpsc::Sender<ManagerEvent>,
    ) -> Self {
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let settings = &config.connection;

        Self {
            sync: DeltaSync::load(parts.store.clone()),
            dispatch: NotificationDispatch::new(&config, parts.store.clone(), parts.desktop),
            crypto: PushCrypto::new(),
            state: ConnectionState::Disconnected,
            token: None,
            stream: None,
            generation: 0,
            heartbeat: HeartbeatMonitor::new(settings.heartbeat_timeout()),
            keepalive: KeepalivePulse::new(settings.keepalive_interval()),
            policy: ReconnectionPolicy::new(settings, Instant::now()),
            sync_in_flight: false,
            resync: false,
            encryption_warned: false,
            credentials: parts.credentials,
            connector: parts.connector,
            service: parts.service,
            network: parts.network,
            store: parts.store,
            status_tx,
            event_tx,
            task_tx,
            task_rx,
            config,
        }
    }

    async fn run(mut self, mut command_rx: mpsc::Receiver<ManagerCommand>) {
        info!("Connection manager started");
        self.reload_credential();
        self.connect_fresh("startup");

        loop {
            let heartbeat_deadline = self.heartbeat.deadline();
            let policy_deadline = self.policy.next_wakeup();

            let wake = tokio::select! {
                command = command_rx.recv() => Wake::Command(command),
                inbound = next_inbound(&mut self.stream) => Wake::Inbound(inbound),
                Some(result) = self.task_rx.recv() => Wake::Task(result),
                _ = sleep_until_some(heartbeat_deadline) => Wake::HeartbeatExpired,
                _ = self.keepalive.tick() => Wake::Keepalive,
                _ = sleep_until(policy_deadline) => Wake::Policy,
            };

            match wake {
                Wake::Command(Some(command)) => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Wake::Command(None) => break,
                Wake::Inbound(inbound) => self.handle_inbound(inbound),
                Wake::Task(result) => self.handle_task(result),
                Wake::HeartbeatExpired => self.handle_heartbeat_expired(),
                Wake::Keepalive => self.handle_keepalive(),
                Wake::Policy => self.handle_policy(),
            }
        }

        self.teardown();
        self.set_state(ConnectionState::Disconnected);
        info!("Connection manager stopped");
    }

    /// Returns false when the manager should stop
    fn handle_command(&mut self, command: ManagerCommand) -> bool {
        match command {
            ManagerCommand::CredentialUpdated => {
                self.reload_credential();
                if self.token.is_some() {
                    self.connect_fresh("credential updated");
                } else {
                    info!("Access token removed, disconnecting");
                    self.teardown();
                    self.policy.reset();
                    self.set_state(ConnectionState::Disconnected);
                }
            }
            ManagerCommand::GetStatus(reply) => {
                let _ = reply.send(self.status_report());
            }
            ManagerCommand::RetryConnection => self.connect_fresh("manual retry"),
            ManagerCommand::RefreshMessages => self.start_sync(),
            ManagerCommand::SendPush { push, reply } => self.send_push(push, reply),
            ManagerCommand::IdleStateChanged(idle) => {
                debug!("Host idle state: {:?}", idle);
                if idle == IdleState::Active
                    && self.state == ConnectionState::Disconnected
                    && self.token.is_some()
                {
                    self.connect_fresh("host active again");
                }
            }
            ManagerCommand::Shutdown => return false,
        }
        true
    }

    fn handle_inbound(&mut self, inbound: Option<Inbound>) {
        match inbound {
            Some(Inbound::Text(text)) => match StreamFrame::decode(&text) {
                Ok(frame) => self.handle_frame(frame),
                Err(e) => debug!("Ignoring malformed frame: {}", e),
            },
            Some(Inbound::Closed { code, reason }) => {
                if code == Some(CLOSE_CODE_UNAUTHORIZED) {
                    warn!("Stream closed: access token rejected");
                } else {
                    info!("Stream closed (code {:?}) {}", code, reason);
                }
                self.on_stream_lost();
            }
            Some(Inbound::Error(e)) => {
                warn!("Stream error: {}", e);
                self.fail(FailureKind::Transport, e);
            }
            None => {
                info!("Stream ended");
                self.on_stream_lost();
            }
        }
    }

    fn handle_frame(&mut self, frame: StreamFrame) {
        match frame {
            StreamFrame::Liveness => self.heartbeat.arm(Instant::now()),
            StreamFrame::Tickle(TickleKind::Push) => {
                debug!("Push tickle, syncing");
                self.start_sync();
            }
            StreamFrame::Tickle(other) => debug!("Ignoring tickle {:?}", other),
            StreamFrame::MirrorPush(mirror) => {
                self.dispatch.on_mirror(mirror.clone());
                self.emit(ManagerEvent::MirrorReceived(mirror));
            }
            StreamFrame::Dismissal(dismissal) => self.dispatch.on_dismissal(&dismissal),
            StreamFrame::EncryptedMirrorPush(push) => self.decrypt_ephemeral(push),
            StreamFrame::Unrecognized(kind) => debug!("Ignoring {} frame", kind),
        }
    }

    fn decrypt_ephemeral(&mut self, mut push: serde_json::Map<String, serde_json::Value>) {
        if !self.crypto.is_configured() {
            if !self.encryption_warned {
                warn!("Received an encrypted message but no encryption password is set");
                self.encryption_warned = true;
                self.emit(ManagerEvent::EncryptionRequired);
            }
            return;
        }

        if let Err(e) = self.crypto.process_ephemeral(&mut push) {
            warn!("Dropping encrypted message: {}", e);
            self.emit(ManagerEvent::Failure {
                kind: FailureKind::Crypto,
                message: e.to_string(),
            });
            return;
        }

        match StreamFrame::from_ephemeral(push) {
            Ok(StreamFrame::EncryptedMirrorPush(_)) => {
                debug!("Message still encrypted after decryption, dropping")
            }
            Ok(frame) => self.handle_frame(frame),
            Err(e) => debug!("Ignoring malformed decrypted message: {}", e),
        }
    }

    fn handle_task(&mut self, result: TaskResult) {
        match result {
            TaskResult::Opened { generation, result } => {
                if generation != self.generation {
                    debug!("Discarding superseded connection attempt");
                    return;
                }
                match result {
                    Ok(stream) => self.on_connected(stream),
                    Err(e) => {
                        if e.is_auth_rejection() {
                            warn!("{}", e);
                        } else {
                            info!("{}", e);
                        }
                        self.fail(FailureKind::Transport, e.to_string());
                    }
                }
            }
            TaskResult::Fetched { window, result } => {
                self.sync_in_flight = false;
                match result {
                    Ok(page) => {
                        let outcome = self.sync.apply(window, page);
                        let notified = self.dispatch.on_sync(&outcome);
                        if !outcome.is_empty() {
                            self.emit(ManagerEvent::PushesUpdated {
                                new: outcome.new.len(),
                                updated: outcome.updated.len(),
                                notified,
                            });
                        }
                    }
                    Err(e) => {
                        if e.is_unauthorized() {
                            warn!("Sync rejected the access token, watermark unchanged");
                        } else {
                            warn!("Sync failed, watermark unchanged: {}", e);
                        }
                        self.emit(ManagerEvent::Failure {
                            kind: FailureKind::Sync,
                            message: e.to_string(),
                        });
                    }
                }
                if std::mem::take(&mut self.resync) {
                    self.start_sync();
                }
            }
            TaskResult::Sent { result, reply } => {
                match &result {
                    Ok(record) => {
                        info!("Sent push {}", record.iden);
                        if let Err(e) = self.store.record_sent(SentPush::now(record.clone())) {
                            warn!("Failed to record sent push: {}", e);
                        }
                        self.emit(ManagerEvent::PushSent(record.clone()));
                    }
                    Err(e) => {
                        warn!("Failed to send push: {}", e);
                        self.emit(ManagerEvent::Failure {
                            kind: FailureKind::Sync,
                            message: e.to_string(),
                        });
                    }
                }
                let _ = reply.send(result);
            }
        }
    }

    fn handle_heartbeat_expired(&mut self) {
        if !self.heartbeat.is_expired(Instant::now()) {
            return;
        }
        warn!(
            "No heartbeat for {:?}, treating connection as dead",
            self.heartbeat.window()
        );
        self.fail(
            FailureKind::Liveness,
            format!("No heartbeat for {:?}", self.heartbeat.window()),
        );
    }

    fn handle_keepalive(&mut self) {
        let sent = match &self.stream {
            Some(stream) if self.state == ConnectionState::Connected => stream.send(KEEPALIVE_TOKEN),
            _ => {
                debug!("No stream, stopping keepalive");
                self.keepalive.stop();
                return;
            }
        };

        if let Err(e) = sent {
            warn!("Keepalive failed, stream is gone: {}", e);
            self.keepalive.stop();
            self.fail(FailureKind::Transport, e.to_string());
        }
    }

    fn handle_policy(&mut self) {
        let ctx = PolicyContext {
            online: self.network.is_online(),
            has_credential: self.token.is_some(),
            idle: self.state == ConnectionState::Disconnected && self.stream.is_none(),
        };

        match self.policy.poll(Instant::now(), ctx) {
            Some(PolicyAction::Retry) => {
                info!(
                    "Reconnecting (attempt {}/{})",
                    self.policy.attempts() + 1,
                    self.policy.max_attempts()
                );
                self.open();
            }
            Some(PolicyAction::Sweep) => self.open(),
            None => {}
        }
    }

    /// Full reset: zero the budget and open a new stream
    fn connect_fresh(&mut self, reason: &str) {
        info!("Connecting ({})", reason);
        self.policy.reset();
        self.open();
    }

    /// Tear down whatever exists and start one connect attempt
    fn open(&mut self) {
        self.teardown();

        let Some(token) = self.token.clone() else {
            info!("No access token, not connecting");
            self.set_state(ConnectionState::Disconnected);
            return;
        };

        if !self.network.is_online() {
            info!("Network unreachable, deferring connection");
            self.set_state(ConnectionState::Disconnected);
            self.policy.defer(Instant::now());
            return;
        }

        self.set_state(ConnectionState::Connecting);

        let generation = self.generation;
        let connect = self.connector.connect(&self.config.stream_url_for(&token));
        let task_tx = self.task_tx.clone();
        tokio::spawn(async move {
            let result = connect.await;
            let _ = task_tx.send(TaskResult::Opened { generation, result });
        });
    }

    fn on_connected(&mut self, stream: StreamHandle) {
        info!("Stream connected");
        self.stream = Some(stream);
        self.policy.on_connected();
        self.heartbeat.arm(Instant::now());
        self.keepalive.start();
        self.set_state(ConnectionState::Connected);
        self.start_sync();
    }

    /// Drop the stream and cancel every connection timer
    fn teardown(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if self.stream.take().is_some() {
            debug!("Closed previous stream");
        }
        if self.heartbeat.is_armed() || self.keepalive.is_running() {
            debug!("Stopping heartbeat and keepalive");
        }
        self.heartbeat.stop();
        self.keepalive.stop();
    }

    fn fail(&mut self, kind: FailureKind, message: String) {
        self.emit(ManagerEvent::Failure { kind, message });
        self.on_stream_lost();
    }

    fn on_stream_lost(&mut self) {
        self.teardown();
        self.set_state(ConnectionState::Disconnected);

        let outcome = self
            .policy
            .on_disconnected(Instant::now(), self.token.is_some());
        if outcome == reconnect::Disconnected::Exhausted {
            self.emit(ManagerEvent::Failure {
                kind: FailureKind::Exhaustion,
                message: format!(
                    "Gave up after {} reconnection attempts",
                    self.policy.max_attempts()
                ),
            });
        }
    }

    fn reload_credential(&mut self) {
        self.token = self.credentials.access_token();
        match self.credentials.encryption_key() {
            Some(exported) => {
                if let Err(e) = self.crypto.import_key(&exported) {
                    warn!("Ignoring stored encryption key: {}", e);
                    self.crypto.clear();
                }
            }
            None => self.crypto.clear(),
        }
        self.encryption_warned = false;
    }

    fn start_sync(&mut self) {
        let Some(token) = self.token.clone() else {
            return;
        };
        if self.sync_in_flight {
            self.resync = true;
            return;
        }
        self.sync_in_flight = true;

        let window = self.sync.plan();
        debug!("Fetching pushes {:?}", window);
        let fetch = self.service.fetch_pushes(&token, window);
        let task_tx = self.task_tx.clone();
        tokio::spawn(async move {
            let result = fetch.await;
            let _ = task_tx.send(TaskResult::Fetched { window, result });
        });
    }

    fn send_push(
        &mut self,
        push: OutgoingPush,
        reply: oneshot::Sender<Result<PushRecord, ApiError>>,
    ) {
        let Some(token) = self.token.clone() else {
            let _ = reply.send(Err(ApiError::NoCredential));
            return;
        };

        let request = self.service.send_push(&token, push);
        let task_tx = self.task_tx.clone();
        tokio::spawn(async move {
            let result = request.await;
            let _ = task_tx.send(TaskResult::Sent { result, reply });
        });
    }

    fn status_report(&self) -> StatusReport {
        StatusReport {
            status: self.state,
            can_retry: self.policy.is_exhausted(),
            attempts: self.policy.attempts(),
            max_attempts: self.policy.max_attempts(),
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        debug!("Connection state {} -> {}", self.state, state);
        self.state = state;
        self.status_tx.send_replace(state);
        self.emit(ManagerEvent::StatusChanged(state));
    }

    fn emit(&self, event: ManagerEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.event_tx.try_send(event) {
            debug!("Event queue full, dropping {:?}", event);
        }
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use futures_util::future::BoxFuture;
    use tokio::time::sleep;

    use super::*;
    use crate::credentials::SharedCredential;
    use crate::models::PushKind;
    use crate::notify::testing::RecordingDesktop;
    use crate::stream::transport::testing::{MemoryConnector, ServerSide, ToggleNetwork};

    #[derive(Default)]
    struct MemoryService {
        pages: Mutex<VecDeque<Result<PushPage, ApiError>>>,
        windows: Mutex<Vec<FetchWindow>>,
        sent: Mutex<Vec<OutgoingPush>>,
    }

    impl MemoryService {
        fn queue(&self, pushes: Vec<PushRecord>) {
            self.pages.lock().unwrap().push_back(Ok(PushPage {
                pushes,
                cursor: None,
            }));
        }

        fn windows(&self) -> Vec<FetchWindow> {
            self.windows.lock().unwrap().clone()
        }
    }

    impl PushService for MemoryService {
        fn fetch_pushes(
            &self,
            _access_token: &str,
            window: FetchWindow,
        ) -> BoxFuture<'static, Result<PushPage, ApiError>> {
            self.windows.lock().unwrap().push(window);
            let next = self
                .pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(PushPage::default()));
            Box::pin(async move { next })
        }

        fn send_push(
            &self,
            _access_token: &str,
            push: OutgoingPush,
        ) -> BoxFuture<'static, Result<PushRecord, ApiError>> {
            let mut record = PushRecord::new(format!("sent-{}", push.guid), push.kind, 200.0);
            record.body = push.body.clone();
            self.sent.lock().unwrap().push(push);
            Box::pin(async move { Ok(record) })
        }
    }

    struct Harness {
        handle: ConnectionHandle,
        connector: Arc<MemoryConnector>,
        sessions: mpsc::UnboundedReceiver<ServerSide>,
        service: Arc<MemoryService>,
        desktop: Arc<RecordingDesktop>,
        credentials: SharedCredential,
        network: Arc<ToggleNetwork>,
        store: LocalStore,
    }

    impl Harness {
        async fn next_session(&mut self) -> ServerSide {
            self.sessions.recv().await.expect("connector dropped")
        }

        fn events(&mut self) -> Vec<ManagerEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.handle.event_rx.try_recv() {
                events.push(event);
            }
            events
        }

        fn failures(&mut self, kind: FailureKind) -> usize {
            self.events()
                .iter()
                .filter(|e| matches!(e, ManagerEvent::Failure { kind: k, .. } if *k == kind))
                .count()
        }
    }

    struct Setup {
        token: Option<String>,
        encryption_key: Option<String>,
        config: Config,
        online: bool,
        connector: (Arc<MemoryConnector>, mpsc::UnboundedReceiver<ServerSide>),
        service: Arc<MemoryService>,
    }

    impl Setup {
        fn new(token: Option<&str>) -> Self {
            Self {
                token: token.map(str::to_string),
                encryption_key: None,
                config: Config {
                    stream_url: "wss://stream.test/websocket".to_string(),
                    ..Config::default()
                },
                online: true,
                connector: MemoryConnector::new(),
                service: Arc::new(MemoryService::default()),
            }
        }

        fn configure(mut self, f: impl FnOnce(&mut Config)) -> Self {
            f(&mut self.config);
            self
        }

        fn start(self) -> Harness {
            let credentials = SharedCredential::new(self.token.as_deref());
            credentials.set_encryption_key(self.encryption_key.as_deref());
            let (connector, sessions) = self.connector;
            let network = ToggleNetwork::new(self.online);
            let desktop = Arc::new(RecordingDesktop::default());
            let store = LocalStore::in_memory();

            let handle = ConnectionManager::start(
                self.config,
                Collaborators {
                    credentials: Arc::new(credentials.clone()),
                    connector: connector.clone(),
                    service: self.service.clone(),
                    network: network.clone(),
                    desktop: desktop.clone(),
                    store: store.clone(),
                },
            );

            Harness {
                handle,
                connector,
                sessions,
                service: self.service,
                desktop,
                credentials,
                network,
                store,
            }
        }
    }

    /// Let spawned work run; the paused clock only moves once everything is idle
    async fn settle() {
        sleep(Duration::from_millis(10)).await;
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn encrypted_frame(blob: &str) -> String {
        format!(
            r#"{{"type":"push","push":{{"encrypted":true,"ciphertext":"{}"}}}}"#,
            blob
        )
    }

    const MIRROR_JSON: &str = r#"{"type":"mirror","package_name":"com.example","notification_id":"1","title":"Hi","body":"there","dismissible":true}"#;

    #[tokio::test(start_paused = true)]
    async fn test_regular_heartbeats_keep_connection_up() {
        let mut h = Setup::new(Some("o.token")).start();
        let mut server = h.next_session().await;
        settle().await;
        assert_eq!(h.handle.state(), ConnectionState::Connected);
        assert_eq!(server.url, "wss://stream.test/websocket/o.token");

        // 11 x 29s is past five minutes
        for _ in 0..11 {
            sleep(secs(29)).await;
            server.send_nop();
            settle().await;
            assert_eq!(h.handle.state(), ConnectionState::Connected);
        }

        assert_eq!(h.connector.attempts(), 1);
        assert!(server.is_live());
        assert_eq!(h.failures(FailureKind::Liveness), 0);
        assert_eq!(server.from_client.try_recv().unwrap(), KEEPALIVE_TOKEN);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_disconnects_and_reconnects() {
        let mut h = Setup::new(Some("o.token")).start();
        let first = h.next_session().await;
        let connected_at = Instant::now();
        settle().await;
        assert_eq!(h.handle.state(), ConnectionState::Connected);

        sleep(secs(36)).await;
        assert_eq!(h.handle.state(), ConnectionState::Disconnected);
        assert!(!first.is_live());
        assert_eq!(h.failures(FailureKind::Liveness), 1);

        let _second = h.next_session().await;
        let waited = connected_at.elapsed();
        assert!(waited >= secs(40) && waited <= secs(41), "waited {:?}", waited);

        settle().await;
        assert_eq!(h.handle.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_credential_never_connects() {
        let mut h = Setup::new(None).start();
        sleep(secs(60)).await;

        let status = h.handle.status().await.unwrap();
        assert_eq!(status.status, ConnectionState::Disconnected);
        assert!(!status.can_retry);
        assert_eq!(h.connector.attempts(), 0);

        h.credentials.set_access_token(Some("o.late"));
        h.handle.credential_updated().await.unwrap();
        let server = h.next_session().await;
        assert!(server.url.ends_with("/o.late"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_then_manual_retry() {
        let setup = Setup::new(Some("o.token")).configure(|c| c.connection.sweep_interval_secs = 600);
        setup.connector.0.refuse_all(true);
        let mut h = setup.start();

        sleep(secs(60)).await;
        assert_eq!(h.connector.attempts(), 5);
        let status = h.handle.status().await.unwrap();
        assert_eq!(status.status, ConnectionState::Disconnected);
        assert!(status.can_retry);
        assert_eq!(status.attempts, 5);
        assert_eq!(h.failures(FailureKind::Exhaustion), 1);

        // The fast tier stays quiet once exhausted
        sleep(secs(60)).await;
        assert_eq!(h.connector.attempts(), 5);

        h.connector.refuse_all(false);
        h.handle.retry_connection().await.unwrap();
        let _server = h.next_session().await;
        settle().await;

        let status = h.handle.status().await.unwrap();
        assert_eq!(status.status, ConnectionState::Connected);
        assert!(!status.can_retry);
        assert_eq!(status.attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_recovers_after_exhaustion() {
        let setup = Setup::new(Some("o.token")).configure(|c| c.connection.sweep_interval_secs = 30);
        setup.connector.0.refuse_next(5);
        let start = Instant::now();
        let mut h = setup.start();

        let _server = h.next_session().await;
        let waited = start.elapsed();
        assert!(waited >= secs(30) && waited < secs(31), "waited {:?}", waited);
        assert_eq!(h.connector.attempts(), 6);

        settle().await;
        assert_eq!(h.handle.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_close_schedules_retry() {
        let mut h = Setup::new(Some("o.token")).start();
        let first = h.next_session().await;
        settle().await;

        let closed_at = Instant::now();
        first.close(Some(CLOSE_CODE_UNAUTHORIZED));
        settle().await;
        assert_eq!(h.handle.state(), ConnectionState::Disconnected);

        let _second = h.next_session().await;
        let waited = closed_at.elapsed();
        assert!(waited >= secs(5) && waited <= secs(6), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_triggers_leave_one_live_stream() {
        let mut h = Setup::new(Some("o.token")).start();
        let mut sessions = vec![h.next_session().await];
        settle().await;

        for _ in 0..3 {
            h.handle.retry_connection().await.unwrap();
        }
        h.handle.credential_updated().await.unwrap();
        h.handle
            .idle_state_changed(IdleState::Active)
            .await
            .unwrap();
        settle().await;

        while let Ok(session) = h.sessions.try_recv() {
            sessions.push(session);
        }
        assert_eq!(sessions.len(), 5);
        assert_eq!(sessions.iter().filter(|s| s.is_live()).count(), 1);
        assert!(sessions.last().unwrap().is_live());
        assert_eq!(h.handle.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_active_again_is_a_fresh_start() {
        let setup = Setup::new(Some("o.token")).configure(|c| c.connection.sweep_interval_secs = 600);
        setup.connector.0.refuse_all(true);
        let mut h = setup.start();

        sleep(secs(60)).await;
        let status = h.handle.status().await.unwrap();
        assert!(status.can_retry);
        assert_eq!(status.attempts, 5);

        // Idle transitions alone do nothing
        h.handle.idle_state_changed(IdleState::Idle).await.unwrap();
        h.handle.idle_state_changed(IdleState::Locked).await.unwrap();
        settle().await;
        assert_eq!(h.connector.attempts(), 5);

        h.connector.refuse_all(false);
        h.handle
            .idle_state_changed(IdleState::Active)
            .await
            .unwrap();
        let _server = h.next_session().await;
        settle().await;

        let status = h.handle.status().await.unwrap();
        assert_eq!(status.status, ConnectionState::Connected);
        assert_eq!(status.attempts, 0);
        assert!(!status.can_retry);
        assert_eq!(h.connector.attempts(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_stops_when_stream_writer_is_gone() {
        let mut h = Setup::new(Some("o.token")).start();
        let server = h.next_session().await;
        let connected_at = Instant::now();
        settle().await;
        assert_eq!(h.handle.state(), ConnectionState::Connected);

        let ServerSide {
            to_client,
            from_client,
            ..
        } = server;
        drop(from_client);

        sleep(secs(19)).await;
        assert_eq!(h.handle.state(), ConnectionState::Connected);

        sleep(secs(2)).await;
        assert_eq!(h.handle.state(), ConnectionState::Disconnected);
        assert_eq!(h.failures(FailureKind::Transport), 1);
        assert!(to_client.is_closed());

        let _second = h.next_session().await;
        let waited = connected_at.elapsed();
        assert!(waited >= secs(25) && waited <= secs(26), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_push_after_empty_history_is_shown() {
        let setup = Setup::new(Some("o.token"));
        setup.service.queue(vec![]);
        setup.service.queue(vec![PushRecord::new("n1", PushKind::Note, 50.0)]);

        let mut h = setup.start();
        let server = h.next_session().await;
        settle().await;
        assert!(h.desktop.shown_ids().is_empty());

        server.send_text(r#"{"type":"tickle","subtype":"push"}"#);
        settle().await;
        assert_eq!(h.desktop.shown_ids(), vec!["pushbullet-n1".to_string()]);
        assert_eq!(
            h.service.windows(),
            vec![
                FetchWindow::Initial { limit: 20 },
                FetchWindow::Initial { limit: 20 },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_defers_without_spending_attempts() {
        let mut setup = Setup::new(Some("o.token"));
        setup.online = false;
        let start = Instant::now();
        let mut h = setup.start();

        sleep(secs(28)).await;
        assert_eq!(h.connector.attempts(), 0);
        let status = h.handle.status().await.unwrap();
        assert_eq!(status.status, ConnectionState::Disconnected);
        assert_eq!(status.attempts, 0);
        assert!(!status.can_retry);

        // Deferred checks land every 5s; the next one after coming back online connects
        h.network.set_online(true);
        let _server = h.next_session().await;
        let waited = start.elapsed();
        assert!(waited >= secs(30) && waited < secs(31), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tickles_drive_delta_sync() {
        let setup = Setup::new(Some("o.token"));
        setup.service.queue(vec![
            PushRecord::new("a", PushKind::Note, 100.0),
            PushRecord::new("b", PushKind::Note, 90.0),
            PushRecord::new("c", PushKind::Note, 80.0),
        ]);
        setup.service.queue(vec![PushRecord::new("X", PushKind::Note, 110.0)]);
        let mut dismissed = PushRecord::new("X", PushKind::Note, 120.0);
        dismissed.dismissed = true;
        setup.service.queue(vec![dismissed]);

        let mut h = setup.start();
        let server = h.next_session().await;
        settle().await;

        // First-ever sync is history
        assert!(h.desktop.shown_ids().is_empty());
        assert_eq!(h.store.last_modified().unwrap(), 100.0);

        server.send_text(r#"{"type":"tickle","subtype":"push"}"#);
        settle().await;
        assert_eq!(h.desktop.shown_ids(), vec!["pushbullet-X".to_string()]);

        server.send_text(r#"{"type":"tickle","subtype":"push"}"#);
        settle().await;
        assert_eq!(h.desktop.cleared_ids(), vec!["pushbullet-X".to_string()]);

        assert_eq!(
            h.service.windows(),
            vec![
                FetchWindow::Initial { limit: 20 },
                FetchWindow::Since(100.0),
                FetchWindow::Since(110.0),
            ]
        );
        let cached = h.store.pushes().unwrap();
        assert_eq!(cached.len(), 4);
        assert!(cached.iter().find(|p| p.iden == "X").unwrap().dismissed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_sync_keeps_watermark() {
        let setup = Setup::new(Some("o.token"));
        setup.service.queue(vec![PushRecord::new("a", PushKind::Note, 100.0)]);
        setup.service.pages.lock().unwrap().push_back(Err(ApiError::Status {
            status: 503,
            message: "unavailable".to_string(),
        }));

        let mut h = setup.start();
        let server = h.next_session().await;
        settle().await;

        server.send_text(r#"{"type":"tickle","subtype":"push"}"#);
        settle().await;
        assert_eq!(h.failures(FailureKind::Sync), 1);

        h.handle.refresh_messages().await.unwrap();
        settle().await;
        assert_eq!(
            h.service.windows()[1..],
            [FetchWindow::Since(100.0), FetchWindow::Since(100.0)]
        );
        assert_eq!(h.handle.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decrypted_mirror_is_shown() {
        let mut right = PushCrypto::new();
        right.initialize("correct horse", "ujuser").unwrap();
        let blob = right.seal([4u8; 12], MIRROR_JSON);

        let mut setup = Setup::new(Some("o.token"))
            .configure(|c| c.notifications.notification_mirroring = true);
        setup.encryption_key = Some(right.export_key().unwrap());
        let mut h = setup.start();
        let server = h.next_session().await;
        settle().await;

        server.send_text(&encrypted_frame(&blob));
        settle().await;
        assert_eq!(
            h.desktop.shown_ids(),
            vec!["mirror-com.example-1".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_key_mirror_is_ignored() {
        let mut right = PushCrypto::new();
        right.initialize("correct horse", "ujuser").unwrap();
        let mut wrong = PushCrypto::new();
        wrong.initialize("battery staple", "ujuser").unwrap();
        let blob = right.seal([4u8; 12], MIRROR_JSON);

        let mut setup = Setup::new(Some("o.token"))
            .configure(|c| c.notifications.notification_mirroring = true);
        setup.encryption_key = Some(wrong.export_key().unwrap());
        let mut h = setup.start();
        let server = h.next_session().await;
        settle().await;

        server.send_text(&encrypted_frame(&blob));
        settle().await;

        assert!(h.desktop.shown_ids().is_empty());
        assert_eq!(h.failures(FailureKind::Crypto), 1);
        assert_eq!(h.handle.state(), ConnectionState::Connected);
        assert!(server.is_live());
    }

    #[tokio::test(start_paused = true)]
    async fn test_encryption_required_signalled_once() {
        let right = {
            let mut c = PushCrypto::new();
            c.initialize("pw", "ujuser").unwrap();
            c
        };
        let mut h = Setup::new(Some("o.token")).start();
        let server = h.next_session().await;
        settle().await;

        for nonce in 0..3u8 {
            server.send_text(&encrypted_frame(&right.seal([nonce; 12], MIRROR_JSON)));
        }
        settle().await;

        let required = h
            .events()
            .iter()
            .filter(|e| matches!(e, ManagerEvent::EncryptionRequired))
            .count();
        assert_eq!(required, 1);
        assert!(h.desktop.shown_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_push_records_sent_message() {
        let mut h = Setup::new(Some("o.token")).start();
        let _server = h.next_session().await;
        settle().await;

        let record = h
            .handle
            .send_push(OutgoingPush::note(None, "hello"))
            .await
            .unwrap();
        assert_eq!(record.body.as_deref(), Some("hello"));

        let sent = h.store.sent_messages().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].is_sent);
        assert_eq!(sent[0].push.iden, record.iden);
        assert_eq!(h.service.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_push_without_credential_fails() {
        let h = Setup::new(None).start();
        let err = h
            .handle
            .send_push(OutgoingPush::note(None, "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::Api(ApiError::NoCredential)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_stream() {
        let mut h = Setup::new(Some("o.token")).start();
        let server = h.next_session().await;
        settle().await;

        h.handle.shutdown().await.unwrap();
        assert!(!server.is_live());
        assert_eq!(h.handle.state(), ConnectionState::Disconnected);
        assert!(matches!(
            h.handle.status().await,
            Err(ManagerError::Stopped)
        ));
    }
}
