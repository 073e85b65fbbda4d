//! Transport module - the device seam.
//!
//! Provides abstraction over:
//! - The scale's serial port (`ScalePort`): fixed line configuration, one reader at a time
//! - Device discovery and permissions (`PortProvider`)
//! - An in-memory simulated scale for tests and demos

mod memory;
mod port;

pub use memory::{MemoryDevice, MemoryPort, MemoryProvider, OpenFailure, PromptBehavior};
pub use port::{FlowControl, Parity, PortConfig, PortInfo, PortProvider, PortReader, ScalePort};
