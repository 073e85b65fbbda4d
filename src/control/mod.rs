//! Control module - JSON-lines bridge to a host UI process.
//!
//! A host UI that embeds this crate as a child process reads one
//! [`ScaleEvent`] per line on stdout: every decoded reading and every
//! connection state change. Logs belong on stderr.
//!
//! # Example
//!
//! ```ignore
//! use scale_link::control::{write_stdout_json, ScaleEvent};
//!
//! let mut readings = supervisor.subscribe();
//! while let Ok(reading) = readings.recv().await {
//!     write_stdout_json(&ScaleEvent::reading(&reading))?;
//! }
//! ```

mod event;
mod stdio;

pub use event::ScaleEvent;
pub use stdio::{write_stdout_json, write_stdout_line};
