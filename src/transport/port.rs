//! Device traits implemented by concrete serial backends.
//!
//! A backend supplies two things:
//! - a [`PortProvider`] that lists already-authorized devices, prompts the
//!   user to pick a new one and revokes authorizations
//! - a [`ScalePort`] per device, opened with the fixed [`PortConfig::SCALE`]
//!   line settings and exposing one reader at a time
//!
//! # Example
//!
//! ```ignore
//! use scale_link::transport::{PortConfig, PortProvider, ScalePort};
//!
//! let mut ports = provider.authorized_ports().await?;
//! if let Some(mut port) = ports.pop() {
//!     port.open(&PortConfig::SCALE).await?;
//!     let reader = port.take_reader()?;
//!     // ... read ...
//!     port.release_reader(reader);
//!     port.close()?;
//! }
//! ```

use std::future::Future;

use serde::Serialize;
use tokio::io::AsyncRead;

use crate::error::Result;

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    None,
    Hardware,
}

/// Serial line settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortConfig {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    pub flow_control: FlowControl,
}

impl PortConfig {
    /// The only configuration the scale speaks: 9600 baud, 8N1, no flow control.
    pub const SCALE: PortConfig = PortConfig {
        baud_rate: 9600,
        data_bits: 8,
        stop_bits: 1,
        parity: Parity::None,
        flow_control: FlowControl::None,
    };
}

/// Identification of a device, for logging and revocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// Backend-specific identifier (device path, port name, ...).
    pub id: String,
    /// USB vendor ID, when known.
    pub vendor_id: Option<u16>,
    /// USB product ID, when known.
    pub product_id: Option<u16>,
}

impl PortInfo {
    /// Create info carrying only an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            vendor_id: None,
            product_id: None,
        }
    }
}

/// Readable half of an open port.
pub type PortReader = Box<dyn AsyncRead + Send + Unpin>;

/// An opened (or openable) scale device.
///
/// Only one reader may be outstanding. A port must have its reader released
/// before it can be closed.
pub trait ScalePort: Send + 'static {
    /// Identification of this device.
    fn info(&self) -> PortInfo;

    /// Whether the device is currently open, by us or by a racing open.
    fn is_open(&self) -> bool;

    /// Open and configure the device.
    ///
    /// Fails with [`ScaleError::AlreadyOpen`](crate::ScaleError::AlreadyOpen)
    /// when the device is already open, and [`ScaleError::Open`](crate::ScaleError::Open)
    /// when it cannot be configured.
    fn open(&mut self, config: &PortConfig) -> impl Future<Output = Result<()>> + Send;

    /// Lock the readable stream of an open device.
    fn take_reader(&mut self) -> Result<PortReader>;

    /// Return a reader obtained from [`take_reader`](ScalePort::take_reader).
    ///
    /// Any read still pending on it is abandoned.
    fn release_reader(&mut self, reader: PortReader);

    /// Close the device. The reader must have been released first.
    fn close(&mut self) -> Result<()>;
}

/// Discovery and permission handling for scale devices.
pub trait PortProvider: Send + 'static {
    /// Device type handed out by this provider.
    type Port: ScalePort;

    /// Devices the user already granted access to. No prompt is shown.
    fn authorized_ports(&mut self) -> impl Future<Output = Result<Vec<Self::Port>>> + Send;

    /// Ask the user to select a device.
    ///
    /// Resolves to `None` when the user declines. May never resolve if the
    /// user never answers.
    fn request_port(&mut self) -> impl Future<Output = Result<Option<Self::Port>>> + Send;

    /// Revoke a previously granted authorization.
    fn revoke(&mut self, port: Self::Port) -> impl Future<Output = Result<()>> + Send;
}
