//! # scale-link
//!
//! Serial link to an electronic weighing scale.
//!
//! The scale streams fixed 18-byte ASCII frames (`ST` + header + weight +
//! `kg\r\n`) over a 9600 baud 8N1 line. This crate turns that byte stream
//! into weight readings and keeps the link alive for a UI.
//!
//! ## Architecture
//!
//! - **Decoder** ([`protocol::FrameDecoder`]): pure, resynchronizing frame extraction
//! - **Session** ([`session::Session`]): owns one open device and its read loop
//! - **Supervisor** ([`Supervisor`]): device acquisition, connection state,
//!   manual reconnect, and the reading fan-out consumed by the UI
//!
//! Device access goes through the [`transport::PortProvider`] and
//! [`transport::ScalePort`] traits.
//!
//! ## Example
//!
//! ```ignore
//! use scale_link::Supervisor;
//!
//! #[tokio::main]
//! async fn main() {
//!     let supervisor = Supervisor::new(provider);
//!     let _listener = supervisor.on_weight_change(|reading| {
//!         println!("{}", reading.display());
//!     });
//!
//!     supervisor.connect().await.unwrap();
//! }
//! ```

pub mod config;
pub mod control;
pub mod error;
pub mod protocol;
pub mod session;
pub mod supervisor;
pub mod transport;

pub use config::SupervisorConfig;
pub use error::{FailureReason, ScaleError};
pub use protocol::{FrameDecoder, WeightReading};
pub use supervisor::{ConnectionState, Supervisor};
