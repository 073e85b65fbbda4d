//! Connection supervisor - the single entry point for the UI.
//!
//! The [`Supervisor`] owns the [`ConnectionState`] machine:
//!
//! ```text
//! Disconnected ──connect()──► Acquiring ──► Open ──► Reading
//!      ▲                          │                     │
//!      │          declined / none │       device failure│
//!      ├──────────────────────────┘                     ▼
//!      │                                       Failed(reason)
//!      │                                                │
//!      └──── disconnect() (any state)    reconnect() ───┘──► Acquiring
//! ```
//!
//! Acquisition first reuses an already-authorized device and only prompts
//! the user when there is none. A device that turns out to be already open is
//! adopted instead of failing. Device failures are never retried
//! automatically; the UI offers a manual reconnect, which revokes existing
//! authorizations, waits for the device to settle and acquires from scratch.
//!
//! # Example
//!
//! ```ignore
//! use scale_link::{Supervisor, SupervisorConfig};
//!
//! let supervisor = Supervisor::new(provider);
//! let _listener = supervisor.on_weight_change(|reading| {
//!     println!("weight: {}", reading.display());
//! });
//!
//! supervisor.connect().await?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::SupervisorConfig;
use crate::error::{FailureReason, Result, ScaleError};
use crate::protocol::WeightReading;
use crate::session::{OpenMode, Session, SessionEnd, SessionEvent};
use crate::transport::{PortProvider, ScalePort};

/// Connection state published to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    /// Looking for a device, possibly waiting on the user.
    Acquiring,
    /// Device open and its reader locked.
    ///
    /// Published by the acquiring task right after the session starts and
    /// immediately followed by `Reading`, so watchers usually only see the
    /// `Reading` that follows.
    Open,
    Reading,
    Failed(FailureReason),
}

impl ConnectionState {
    /// Text to show the user, if any.
    ///
    /// Only failures produce a message; `Disconnected` is shown as a
    /// passive "connect" affordance instead.
    pub fn user_message(&self) -> Option<String> {
        match self {
            ConnectionState::Failed(FailureReason::OpenError(detail)) => Some(format!(
                "Could not open the scale ({}). Close other programs using it and reconnect.",
                detail
            )),
            ConnectionState::Failed(FailureReason::StreamClosed) => {
                Some("The scale was disconnected. Check the cable and reconnect.".to_string())
            }
            ConnectionState::Failed(FailureReason::ReadError(detail)) => Some(format!(
                "Lost communication with the scale ({}). Reconnect to continue.",
                detail
            )),
            _ => None,
        }
    }
}

/// State shared with monitor tasks.
struct Shared {
    state: watch::Sender<ConnectionState>,
    latest: watch::Sender<Option<WeightReading>>,
    readings: broadcast::Sender<WeightReading>,
    /// One lossless queue per `on_weight_change` callback.
    listeners: std::sync::Mutex<Vec<mpsc::UnboundedSender<WeightReading>>>,
}

impl Shared {
    fn transition(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            tracing::info!("Connection state {:?} -> {:?}", state, next);
            *state = next;
            true
        });
    }

    /// Session failure. Ignored unless the session is still the one reading.
    fn fail(&self, reason: FailureReason) {
        self.state.send_if_modified(|state| {
            if *state != ConnectionState::Reading {
                tracing::debug!("Ignoring session failure in state {:?}: {}", state, reason);
                return false;
            }
            tracing::warn!("Scale connection failed: {}", reason);
            *state = ConnectionState::Failed(reason);
            true
        });
    }

    /// An acquisition dropped by its caller leaves nothing to wait for.
    fn settle_abandoned(&self) {
        self.state.send_if_modified(|state| {
            if *state != ConnectionState::Acquiring {
                return false;
            }
            tracing::info!("Acquisition dropped before completing");
            *state = ConnectionState::Disconnected;
            true
        });
    }

    fn publish(&self, reading: WeightReading) {
        self.latest.send_replace(Some(reading));

        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.retain(|tx| tx.send(reading).is_ok());
        drop(listeners);

        // No subscribers is fine.
        let _ = self.readings.send(reading);
    }

    fn add_listener(&self, tx: mpsc::UnboundedSender<WeightReading>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
    }
}

/// Live session plus the task republishing its events.
struct ActiveSession {
    session: Session,
    monitor: JoinHandle<()>,
}

impl ActiveSession {
    async fn shutdown(self) {
        let end = self.session.stop().await;
        tracing::debug!("Previous session ended: {:?}", end);
        if let Err(e) = self.monitor.await {
            tracing::error!("Session monitor failed: {}", e);
        }
    }
}

struct Inner<P> {
    provider: P,
    active: Option<ActiveSession>,
}

/// Rejects re-entrant acquisitions.
///
/// On drop the flag is cleared, and an acquisition that never published an
/// outcome falls back from `Acquiring` to `Disconnected`.
struct AcquisitionGuard<'a> {
    flag: &'a AtomicBool,
    shared: &'a Shared,
}

impl<'a> AcquisitionGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool, shared: &'a Shared) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ScaleError::AcquisitionInProgress)?;
        Ok(Self { flag, shared })
    }
}

impl Drop for AcquisitionGuard<'_> {
    fn drop(&mut self) {
        self.shared.settle_abandoned();
        self.flag.store(false, Ordering::Release);
    }
}

/// Owner of the scale connection.
///
/// Share it behind an `Arc` when several tasks need it.
pub struct Supervisor<P: PortProvider> {
    inner: Mutex<Inner<P>>,
    shared: Arc<Shared>,
    acquiring: AtomicBool,
    /// Bumped by `disconnect()` to abandon an in-flight acquisition.
    cancel: watch::Sender<u64>,
    config: SupervisorConfig,
}

impl<P: PortProvider> Supervisor<P> {
    /// Create a supervisor with default configuration.
    pub fn new(provider: P) -> Self {
        Self::build(provider, SupervisorConfig::default())
    }

    /// Create a supervisor with a custom configuration.
    pub fn with_config(provider: P, config: SupervisorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(provider, config))
    }

    fn build(provider: P, config: SupervisorConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (latest, _) = watch::channel(None);
        let (readings, _) = broadcast::channel(config.broadcast_capacity);
        let (cancel, _) = watch::channel(0);

        Self {
            inner: Mutex::new(Inner {
                provider,
                active: None,
            }),
            shared: Arc::new(Shared {
                state,
                latest,
                readings,
                listeners: std::sync::Mutex::new(Vec::new()),
            }),
            acquiring: AtomicBool::new(false),
            cancel,
            config,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    /// Receiver notified on every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Whether readings are flowing.
    pub fn is_connected(&self) -> bool {
        *self.shared.state.borrow() == ConnectionState::Reading
    }

    /// Whether the UI should offer the "connect" action.
    pub fn needs_connect_prompt(&self) -> bool {
        matches!(
            *self.shared.state.borrow(),
            ConnectionState::Disconnected | ConnectionState::Failed(_)
        )
    }

    /// User-visible message for the current state.
    pub fn status_message(&self) -> Option<String> {
        self.shared.state.borrow().user_message()
    }

    /// Subscribe to decoded readings.
    ///
    /// The channel holds `broadcast_capacity` readings; a receiver that falls
    /// further behind gets [`RecvError::Lagged`](broadcast::error::RecvError::Lagged)
    /// and skips ahead. Use [`on_weight_change`](Self::on_weight_change) to see
    /// every reading.
    pub fn subscribe(&self) -> broadcast::Receiver<WeightReading> {
        self.shared.readings.subscribe()
    }

    /// Most recent reading of any session, if one was decoded.
    pub fn latest_reading(&self) -> Option<WeightReading> {
        *self.shared.latest.borrow()
    }

    /// Call `callback` for every decoded reading, in order, until the
    /// supervisor is dropped.
    ///
    /// Readings queue up without bound while the callback runs. Abort the
    /// returned handle to unsubscribe.
    pub fn on_weight_change<F>(&self, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(WeightReading) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.shared.add_listener(tx);
        tokio::spawn(async move {
            while let Some(reading) = rx.recv().await {
                callback(reading);
            }
        })
    }

    /// Acquire a device and start reading.
    ///
    /// Returns the resulting state. Declined prompts end in `Disconnected`
    /// and device failures in `Failed`; neither is an `Err`. Already
    /// connected supervisors return immediately.
    ///
    /// # Errors
    ///
    /// [`ScaleError::AcquisitionInProgress`] if another acquisition is outstanding.
    pub async fn connect(&self) -> Result<ConnectionState> {
        let _guard = AcquisitionGuard::try_acquire(&self.acquiring, &self.shared)?;
        let mut cancel_rx = self.cancel.subscribe();
        let mut inner = self.inner.lock().await;

        if matches!(self.state(), ConnectionState::Open | ConnectionState::Reading) {
            return Ok(self.state());
        }

        if let Some(active) = inner.active.take() {
            active.shutdown().await;
        }
        self.shared.transition(ConnectionState::Acquiring);

        let inner = &mut *inner;
        tokio::select! {
            state = self.acquire(inner) => Ok(state),
            _ = cancel_rx.changed() => Ok(self.abandon_acquisition()),
        }
    }

    /// Manual reconnect: drop the session, revoke authorizations, settle, acquire.
    ///
    /// # Errors
    ///
    /// [`ScaleError::AcquisitionInProgress`] if another acquisition is outstanding.
    pub async fn reconnect(&self) -> Result<ConnectionState> {
        let _guard = AcquisitionGuard::try_acquire(&self.acquiring, &self.shared)?;
        let mut cancel_rx = self.cancel.subscribe();
        let mut inner = self.inner.lock().await;

        if let Some(active) = inner.active.take() {
            active.shutdown().await;
        }
        self.shared.transition(ConnectionState::Acquiring);

        let inner = &mut *inner;
        tokio::select! {
            state = async move {
                Self::revoke_authorizations(&mut inner.provider).await;
                tokio::time::sleep(self.config.settle_delay).await;
                self.acquire(inner).await
            } => Ok(state),
            _ = cancel_rx.changed() => Ok(self.abandon_acquisition()),
        }
    }

    /// Stop reading and release the device. Valid from any state.
    ///
    /// Cancels an outstanding acquisition, including a pending prompt.
    pub async fn disconnect(&self) {
        self.cancel.send_modify(|generation| *generation = generation.wrapping_add(1));

        let mut inner = self.inner.lock().await;
        if let Some(active) = inner.active.take() {
            active.shutdown().await;
        }
        self.shared.transition(ConnectionState::Disconnected);
    }

    fn abandon_acquisition(&self) -> ConnectionState {
        tracing::info!("Acquisition cancelled");
        self.shared.transition(ConnectionState::Disconnected);
        ConnectionState::Disconnected
    }

    async fn revoke_authorizations(provider: &mut P) {
        let ports = match provider.authorized_ports().await {
            Ok(ports) => ports,
            Err(e) => {
                tracing::warn!("Could not list authorized devices: {}", e);
                return;
            }
        };

        for port in ports {
            let id = port.info().id;
            match provider.revoke(port).await {
                Ok(()) => tracing::info!("Revoked authorization for {}", id),
                Err(e) => tracing::warn!("Failed to revoke {}: {}", id, e),
            }
        }
    }

    /// Find a device, start a session on it and publish the outcome.
    async fn acquire(&self, inner: &mut Inner<P>) -> ConnectionState {
        let Some(port) = Self::select_port(&mut inner.provider).await else {
            self.shared.transition(ConnectionState::Disconnected);
            return ConnectionState::Disconnected;
        };

        let mode = if port.is_open() {
            tracing::info!("Adopting already-open device {}", port.info().id);
            OpenMode::Adopt
        } else {
            OpenMode::Configure
        };

        let started = match Session::start(port, mode, &self.config).await {
            Err(failure) if matches!(failure.error, ScaleError::AlreadyOpen) => {
                tracing::info!(
                    "Device {} was opened concurrently, adopting it",
                    failure.port.info().id
                );
                Session::start(failure.port, OpenMode::Adopt, &self.config).await
            }
            other => other,
        };

        let (session, events) = match started {
            Ok(started) => started,
            Err(failure) => {
                let reason = failure
                    .error
                    .failure_reason()
                    .unwrap_or_else(|| FailureReason::OpenError(failure.error.to_string()));
                tracing::warn!("Could not start session: {}", failure.error);
                let state = ConnectionState::Failed(reason);
                self.shared.transition(state.clone());
                return state;
            }
        };

        self.shared.transition(ConnectionState::Open);
        self.shared.transition(ConnectionState::Reading);

        // Spawned after entering Reading, so an immediate failure is not lost.
        let monitor = tokio::spawn(monitor_session(events, self.shared.clone()));
        inner.active = Some(ActiveSession { session, monitor });

        self.state()
    }

    /// Silent reuse of an authorized device, else prompt the user.
    async fn select_port(provider: &mut P) -> Option<P::Port> {
        let mut authorized = match provider.authorized_ports().await {
            Ok(ports) => ports,
            Err(e) => {
                tracing::warn!("Could not list authorized devices: {}", e);
                Vec::new()
            }
        };

        if !authorized.is_empty() {
            let index = authorized.iter().position(|p| p.is_open()).unwrap_or(0);
            let port = authorized.swap_remove(index);
            tracing::info!("Reusing authorized device {}", port.info().id);
            return Some(port);
        }

        tracing::info!("No authorized device, prompting for selection");
        match provider.request_port().await {
            Ok(Some(port)) => Some(port),
            Ok(None) => {
                tracing::info!("Device selection declined");
                None
            }
            Err(e) => {
                tracing::warn!("No device selected: {}", e);
                None
            }
        }
    }
}

/// Republish session events until the session ends.
async fn monitor_session(mut events: mpsc::Receiver<SessionEvent>, shared: Arc<Shared>) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Reading(reading) => shared.publish(reading),
            SessionEvent::Ended(SessionEnd::Failed(reason)) => shared.fail(reason),
            SessionEvent::Ended(SessionEnd::Stopped) => {}
        }
    }
}
