//! Device session: one open port and its read loop.
//!
//! A [`Session`] owns the port for as long as it runs. Bytes are pumped from
//! the port's reader into a fresh [`FrameDecoder`] and decoded readings are
//! forwarded over an mpsc channel, followed by exactly one
//! [`SessionEvent::Ended`].
//!
//! The port is released on every exit path: stop, read failure, end of
//! stream, or the session being dropped. Release always returns the reader
//! before closing the port.
//!
//! # Example
//!
//! ```ignore
//! use scale_link::session::{OpenMode, Session, SessionEvent};
//!
//! let (session, mut events) = Session::start(port, OpenMode::Configure, &config)
//!     .await
//!     .map_err(|failure| failure.error)?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::Reading(reading) => println!("{}", reading),
//!         SessionEvent::Ended(end) => break,
//!     }
//! }
//! ```

use std::fmt;

use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::SupervisorConfig;
use crate::error::{FailureReason, ScaleError};
use crate::protocol::{FrameDecoder, WeightReading};
use crate::transport::{PortConfig, PortInfo, PortReader, ScalePort};

/// How the session obtains the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Open the device with the scale line settings.
    Configure,
    /// The device is already open; only take its reader.
    Adopt,
}

/// How a session finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Stopped on request (or dropped).
    Stopped,
    /// Ended by a device-level failure.
    Failed(FailureReason),
}

/// Events emitted by a running session, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Reading(WeightReading),
    /// Always the last event.
    Ended(SessionEnd),
}

/// A session that could not start. The port is handed back untouched.
pub struct StartFailure<P> {
    pub error: ScaleError,
    pub port: P,
}

impl<P> fmt::Debug for StartFailure<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartFailure")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// A running read loop over one device.
#[derive(Debug)]
pub struct Session {
    info: PortInfo,
    /// Dropping this sender also stops the loop.
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<SessionEnd>>,
}

impl Session {
    /// Open (or adopt) the device, lock its reader and start reading.
    ///
    /// Open failures are reported as [`ScaleError::AlreadyOpen`] or
    /// [`ScaleError::Open`]; nothing is retried here.
    pub async fn start<P: ScalePort>(
        mut port: P,
        mode: OpenMode,
        config: &SupervisorConfig,
    ) -> std::result::Result<(Session, mpsc::Receiver<SessionEvent>), StartFailure<P>> {
        let info = port.info();

        if mode == OpenMode::Configure {
            let opened = {
                let mut pending = PendingOpen {
                    port: &mut port,
                    settled: false,
                };
                let opened = pending.port.open(&PortConfig::SCALE).await;
                pending.settled = true;
                opened
            };
            if let Err(error) = opened {
                return Err(StartFailure {
                    error: as_open_error(error),
                    port,
                });
            }
        }

        let reader = match port.take_reader() {
            Ok(reader) => reader,
            Err(error) => {
                if mode == OpenMode::Configure {
                    // We opened it, so we close it.
                    if let Err(e) = port.close() {
                        tracing::warn!("Failed to close {} after reader error: {}", info.id, e);
                    }
                }
                return Err(StartFailure {
                    error: as_open_error(error),
                    port,
                });
            }
        };

        tracing::info!("Session started on {} ({:?})", info.id, mode);

        let lease = PortLease {
            port,
            reader: Some(reader),
        };
        let (events_tx, events_rx) = mpsc::channel(config.reading_channel_capacity);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(read_loop(
            lease,
            stop_rx,
            events_tx,
            config.read_buffer_size,
        ));

        let session = Session {
            info,
            stop_tx: Some(stop_tx),
            task: Some(task),
        };
        Ok((session, events_rx))
    }

    /// Device this session is bound to.
    pub fn port_info(&self) -> &PortInfo {
        &self.info
    }

    /// Whether the read loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancel the outstanding read, release the port and wait for the loop.
    ///
    /// Returns how the session ended; a session that already failed reports
    /// its failure.
    pub async fn stop(mut self) -> SessionEnd {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        let Some(task) = self.task.take() else {
            return SessionEnd::Stopped;
        };

        match task.await {
            Ok(end) => end,
            Err(e) => {
                tracing::error!("Session task for {} failed: {}", self.info.id, e);
                SessionEnd::Stopped
            }
        }
    }
}

/// Closes the port if the open call is abandoned before it returns.
struct PendingOpen<'a, P: ScalePort> {
    port: &'a mut P,
    settled: bool,
}

impl<P: ScalePort> Drop for PendingOpen<'_, P> {
    fn drop(&mut self) {
        if self.settled || !self.port.is_open() {
            return;
        }
        tracing::info!("Open of {} abandoned, closing it", self.port.info().id);
        if let Err(e) = self.port.close() {
            tracing::warn!("Failed to close {}: {}", self.port.info().id, e);
        }
    }
}

/// Exclusive hold on an open port and its reader.
///
/// Dropping the lease releases the reader, then closes the port.
struct PortLease<P: ScalePort> {
    port: P,
    reader: Option<PortReader>,
}

impl<P: ScalePort> Drop for PortLease<P> {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            self.port.release_reader(reader);
        }
        if self.port.is_open() {
            if let Err(e) = self.port.close() {
                tracing::warn!("Failed to close {}: {}", self.port.info().id, e);
            }
        }
    }
}

/// Main read loop - reads chunks, decodes and forwards readings.
async fn read_loop<P: ScalePort>(
    mut lease: PortLease<P>,
    mut stop_rx: oneshot::Receiver<()>,
    events: mpsc::Sender<SessionEvent>,
    read_buffer_size: usize,
) -> SessionEnd {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; read_buffer_size];

    let end = 'read: loop {
        let Some(reader) = lease.reader.as_mut() else {
            break SessionEnd::Stopped;
        };

        let n = tokio::select! {
            _ = &mut stop_rx => break SessionEnd::Stopped,
            result = reader.read(&mut buf) => match result {
                Ok(0) => break SessionEnd::Failed(FailureReason::StreamClosed),
                Ok(n) => n,
                Err(e) => break SessionEnd::Failed(FailureReason::ReadError(e.to_string())),
            },
        };

        for reading in decoder.feed(&buf[..n]) {
            tokio::select! {
                biased;
                _ = &mut stop_rx => break 'read SessionEnd::Stopped,
                sent = events.send(SessionEvent::Reading(reading)) => {
                    if sent.is_err() {
                        // Nobody is listening any more.
                        break 'read SessionEnd::Stopped;
                    }
                }
            }
        }
    };

    match &end {
        SessionEnd::Stopped => tracing::info!("Session on {} stopped", lease.port.info().id),
        SessionEnd::Failed(reason) => {
            tracing::warn!("Session on {} failed: {}", lease.port.info().id, reason)
        }
    }

    let stats = decoder.stats();
    tracing::debug!(
        "Decoder stats: {} readings, {} malformed, {} noise, {} bytes discarded",
        stats.readings,
        stats.malformed,
        stats.noise,
        stats.discarded_bytes
    );

    // Release before announcing the end, so observers see a closed port.
    drop(lease);
    let _ = events.send(SessionEvent::Ended(end.clone())).await;
    end
}

fn as_open_error(error: ScaleError) -> ScaleError {
    match error {
        ScaleError::AlreadyOpen | ScaleError::Open(_) => error,
        other => ScaleError::Open(other.to_string()),
    }
}
