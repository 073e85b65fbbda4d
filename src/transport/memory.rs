//! In-memory simulated scale.
//!
//! [`MemoryPort`] behaves like a serial device: it must be opened before a
//! reader can be taken, allows one reader at a time and refuses to close while
//! the reader is locked. The test side drives it through a [`MemoryDevice`]
//! handle: push bytes, inject I/O faults, unplug the cable or simulate another
//! consumer opening the port first.
//!
//! [`MemoryProvider`] holds the authorized devices and scripts the answer to
//! the device selection prompt.
//!
//! # Example
//!
//! ```
//! use scale_link::transport::{MemoryPort, MemoryProvider, PromptBehavior};
//!
//! let (port, device) = MemoryPort::new("scale-0");
//! let provider = MemoryProvider::new();
//! provider.set_prompt(PromptBehavior::Select(port));
//!
//! // Later, once a session is reading:
//! device.send_weight("6.20");
//! ```

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

use super::port::{PortConfig, PortInfo, PortProvider, PortReader, ScalePort};
use crate::error::{Result, ScaleError};
use crate::protocol::encode_frame;

type Chunk = io::Result<Bytes>;

/// Header bytes the simulated scale puts in every frame.
const SIMULATED_HEADER: &[u8] = b"GS,NT,";

/// Scripted failure for the next `open` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenFailure {
    /// Report the device as already open.
    AlreadyOpen,
    /// Report the device as unusable.
    Unavailable(String),
    /// Another consumer wins the race: the device ends up open, but not by us.
    Raced,
    /// The line comes up, but the open call never returns.
    Stall,
}

#[derive(Default)]
struct DeviceState {
    open: bool,
    reader_locked: bool,
    open_failure: Option<OpenFailure>,
    last_config: Option<PortConfig>,
    tx: Option<mpsc::UnboundedSender<Chunk>>,
    rx: Option<mpsc::UnboundedReceiver<Chunk>>,
    opens: usize,
    closes: usize,
}

impl DeviceState {
    /// Power up the line: a fresh channel per open.
    fn connect_line(&mut self) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.tx = Some(tx);
        self.rx = Some(rx);
        self.open = true;
    }
}

fn lock(state: &Mutex<DeviceState>) -> MutexGuard<'_, DeviceState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated scale port.
///
/// Clones refer to the same device.
#[derive(Clone)]
pub struct MemoryPort {
    info: PortInfo,
    state: Arc<Mutex<DeviceState>>,
}

/// Test-side control of a [`MemoryPort`].
#[derive(Clone)]
pub struct MemoryDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MemoryPort {
    /// Create a closed device and its control handle.
    pub fn new(id: &str) -> (MemoryPort, MemoryDevice) {
        let state = Arc::new(Mutex::new(DeviceState::default()));
        let port = MemoryPort {
            info: PortInfo::new(id),
            state: state.clone(),
        };
        (port, MemoryDevice { state })
    }
}

impl ScalePort for MemoryPort {
    fn info(&self) -> PortInfo {
        self.info.clone()
    }

    fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    async fn open(&mut self, config: &PortConfig) -> Result<()> {
        let stall = {
            let mut state = lock(&self.state);

            let stall = match state.open_failure.take() {
                Some(OpenFailure::AlreadyOpen) => return Err(ScaleError::AlreadyOpen),
                Some(OpenFailure::Unavailable(msg)) => return Err(ScaleError::Open(msg)),
                Some(OpenFailure::Raced) => {
                    if !state.open {
                        state.connect_line();
                    }
                    return Err(ScaleError::AlreadyOpen);
                }
                Some(OpenFailure::Stall) => true,
                None => false,
            };
            if state.open {
                return Err(ScaleError::AlreadyOpen);
            }

            state.connect_line();
            state.last_config = Some(*config);
            state.opens += 1;
            stall
        };

        if stall {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn take_reader(&mut self) -> Result<PortReader> {
        let mut state = lock(&self.state);

        if !state.open {
            return Err(ScaleError::Open(format!("{} is not open", self.info.id)));
        }
        if state.reader_locked {
            return Err(ScaleError::Open(format!("{} reader is locked", self.info.id)));
        }
        let rx = state
            .rx
            .take()
            .ok_or_else(|| ScaleError::Open(format!("{} stream already consumed", self.info.id)))?;

        state.reader_locked = true;
        Ok(Box::new(ChannelReader::new(rx)))
    }

    fn release_reader(&mut self, reader: PortReader) {
        drop(reader);
        lock(&self.state).reader_locked = false;
    }

    fn close(&mut self) -> Result<()> {
        let mut state = lock(&self.state);

        if state.reader_locked {
            return Err(ScaleError::Io(io::Error::new(
                io::ErrorKind::Other,
                "cannot close a port with a locked reader",
            )));
        }

        state.open = false;
        state.tx = None;
        state.rx = None;
        state.closes += 1;
        Ok(())
    }
}

impl MemoryDevice {
    /// Push raw bytes onto the line. Returns `false` if nothing is listening.
    pub fn send(&self, bytes: &[u8]) -> bool {
        match &lock(&self.state).tx {
            Some(tx) => tx.send(Ok(Bytes::copy_from_slice(bytes))).is_ok(),
            None => false,
        }
    }

    /// Push one well-formed frame carrying `value` kilograms.
    pub fn send_weight(&self, value: &str) -> bool {
        self.send(&encode_frame(SIMULATED_HEADER, value))
    }

    /// Make the next read fail with an I/O error.
    pub fn inject_fault(&self, kind: io::ErrorKind) -> bool {
        match &lock(&self.state).tx {
            Some(tx) => tx
                .send(Err(io::Error::new(kind, "simulated line fault")))
                .is_ok(),
            None => false,
        }
    }

    /// Pull the cable: readers see end-of-stream after draining.
    pub fn unplug(&self) {
        lock(&self.state).tx = None;
    }

    /// Simulate another consumer opening the device first.
    pub fn open_elsewhere(&self) {
        let mut state = lock(&self.state);
        if !state.open {
            state.connect_line();
        }
    }

    /// Make the next `open` call fail.
    pub fn fail_next_open(&self, failure: OpenFailure) {
        lock(&self.state).open_failure = Some(failure);
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    pub fn reader_locked(&self) -> bool {
        lock(&self.state).reader_locked
    }

    /// Line settings used by the last successful open.
    pub fn last_config(&self) -> Option<PortConfig> {
        lock(&self.state).last_config
    }

    pub fn open_count(&self) -> usize {
        lock(&self.state).opens
    }

    pub fn close_count(&self) -> usize {
        lock(&self.state).closes
    }
}

/// `AsyncRead` over a channel of chunks, preserving chunk boundaries.
struct ChannelReader {
    rx: mpsc::UnboundedReceiver<Chunk>,
    pending: Bytes,
}

impl ChannelReader {
    fn new(rx: mpsc::UnboundedReceiver<Chunk>) -> Self {
        Self {
            rx,
            pending: Bytes::new(),
        }
    }
}

impl AsyncRead for ChannelReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        while self.pending.is_empty() {
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(Ok(chunk))) => self.pending = chunk,
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(e)),
                // Sender gone: end-of-stream
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }

        let n = self.pending.len().min(buf.remaining());
        buf.put_slice(&self.pending[..n]);
        self.pending.advance(n);
        Poll::Ready(Ok(()))
    }
}

/// Scripted answer to the device selection prompt.
#[derive(Clone)]
pub enum PromptBehavior {
    /// The user picks this device; it becomes authorized.
    Select(MemoryPort),
    /// The user dismisses the prompt.
    Decline,
    /// No compatible device is attached.
    NoDevice,
    /// The user never answers.
    Hang,
}

struct ProviderState {
    authorized: Vec<MemoryPort>,
    prompt: VecDeque<PromptBehavior>,
    prompts: usize,
    revoked: Vec<PortInfo>,
}

/// Simulated device registry.
///
/// Clones share state, so a test can keep a handle after giving the
/// provider to a supervisor.
#[derive(Clone)]
pub struct MemoryProvider {
    state: Arc<Mutex<ProviderState>>,
}

impl MemoryProvider {
    /// Create a provider with no authorized devices that declines prompts.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ProviderState {
                authorized: Vec::new(),
                prompt: VecDeque::new(),
                prompts: 0,
                revoked: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Grant access to a device without prompting.
    pub fn authorize(&self, port: MemoryPort) {
        self.lock().authorized.push(port);
    }

    /// Queue the answer to the next prompt. Once the queue is empty, prompts are declined.
    pub fn set_prompt(&self, behavior: PromptBehavior) {
        self.lock().prompt.push_back(behavior);
    }

    /// Number of times the user was prompted.
    pub fn prompt_count(&self) -> usize {
        self.lock().prompts
    }

    /// Devices whose authorization was revoked, in order.
    pub fn revoked(&self) -> Vec<PortInfo> {
        self.lock().revoked.clone()
    }

    /// Number of currently authorized devices.
    pub fn authorized_count(&self) -> usize {
        self.lock().authorized.len()
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl PortProvider for MemoryProvider {
    type Port = MemoryPort;

    async fn authorized_ports(&mut self) -> Result<Vec<MemoryPort>> {
        Ok(self.lock().authorized.clone())
    }

    async fn request_port(&mut self) -> Result<Option<MemoryPort>> {
        let behavior = {
            let mut state = self.lock();
            state.prompts += 1;
            state.prompt.pop_front().unwrap_or(PromptBehavior::Decline)
        };

        match behavior {
            PromptBehavior::Select(port) => {
                self.authorize(port.clone());
                Ok(Some(port))
            }
            PromptBehavior::Decline => Ok(None),
            PromptBehavior::NoDevice => Err(ScaleError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "no compatible device found",
            ))),
            PromptBehavior::Hang => std::future::pending().await,
        }
    }

    async fn revoke(&mut self, port: MemoryPort) -> Result<()> {
        let info = port.info();
        let mut state = self.lock();
        state.authorized.retain(|p| p.info.id != info.id);
        state.revoked.push(info);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_open_read_close_cycle() {
        let (mut port, device) = MemoryPort::new("scale-0");

        port.open(&PortConfig::SCALE).await.unwrap();
        assert!(device.is_open());
        assert_eq!(device.last_config(), Some(PortConfig::SCALE));

        let mut reader = port.take_reader().unwrap();
        assert!(device.send(b"ST"));

        let mut buf = [0u8; 8];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ST");

        port.release_reader(reader);
        port.close().unwrap();
        assert!(!device.is_open());
        assert_eq!(device.close_count(), 1);
    }

    #[tokio::test]
    async fn test_second_open_reports_already_open() {
        let (mut port, _device) = MemoryPort::new("scale-0");

        port.open(&PortConfig::SCALE).await.unwrap();
        let err = port.open(&PortConfig::SCALE).await.unwrap_err();
        assert!(matches!(err, ScaleError::AlreadyOpen));
    }

    #[tokio::test]
    async fn test_close_refused_while_reader_locked() {
        let (mut port, _device) = MemoryPort::new("scale-0");
        port.open(&PortConfig::SCALE).await.unwrap();

        let reader = port.take_reader().unwrap();
        assert!(port.take_reader().is_err());
        assert!(port.close().is_err());

        port.release_reader(reader);
        assert!(port.close().is_ok());
    }

    #[tokio::test]
    async fn test_unplug_yields_eof() {
        let (mut port, device) = MemoryPort::new("scale-0");
        port.open(&PortConfig::SCALE).await.unwrap();
        let mut reader = port.take_reader().unwrap();

        device.send(b"abc");
        device.unplug();

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 3);
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_injected_fault_is_read_error() {
        let (mut port, device) = MemoryPort::new("scale-0");
        port.open(&PortConfig::SCALE).await.unwrap();
        let mut reader = port.take_reader().unwrap();

        device.inject_fault(io::ErrorKind::BrokenPipe);

        let mut buf = [0u8; 8];
        let err = reader.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_stalled_open_leaves_line_up() {
        let (mut port, device) = MemoryPort::new("scale-0");
        device.fail_next_open(OpenFailure::Stall);

        let opening = port.open(&PortConfig::SCALE);
        let result = tokio::time::timeout(std::time::Duration::from_millis(20), opening).await;

        assert!(result.is_err());
        assert!(device.is_open());
        assert_eq!(device.open_count(), 1);
    }

    #[tokio::test]
    async fn test_prompt_selection_authorizes() {
        let (port, _device) = MemoryPort::new("scale-0");
        let mut provider = MemoryProvider::new();
        provider.set_prompt(PromptBehavior::Select(port));

        let selected = provider.request_port().await.unwrap();
        assert!(selected.is_some());
        assert_eq!(provider.authorized_count(), 1);

        // Queue exhausted: further prompts are declined
        assert!(provider.request_port().await.unwrap().is_none());
        assert_eq!(provider.prompt_count(), 2);
    }

    #[tokio::test]
    async fn test_revoke_removes_authorization() {
        let (port, _device) = MemoryPort::new("scale-0");
        let mut provider = MemoryProvider::new();
        provider.authorize(port.clone());

        provider.revoke(port).await.unwrap();

        assert_eq!(provider.authorized_count(), 0);
        assert_eq!(provider.revoked(), vec![PortInfo::new("scale-0")]);
    }
}
