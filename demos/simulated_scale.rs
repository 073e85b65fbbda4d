//! Simulated Scale - end-to-end walk through the connection lifecycle.
//!
//! This example demonstrates:
//! - Connecting through the device selection prompt
//! - Publishing readings and state changes as JSON lines on stdout
//! - Line noise being dropped by the decoder
//! - An unplug ending in `Failed`, followed by a manual reconnect
//!
//! ```text
//! cargo run --example simulated_scale
//! ```

use std::time::Duration;

use scale_link::control::{write_stdout_json, ScaleEvent};
use scale_link::transport::{MemoryPort, MemoryProvider, PromptBehavior};
use scale_link::{Supervisor, SupervisorConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (port, device) = MemoryPort::new("simulated-scale");
    let provider = MemoryProvider::new();
    provider.set_prompt(PromptBehavior::Select(port.clone()));
    provider.set_prompt(PromptBehavior::Select(port));

    let config = SupervisorConfig::default().settle_delay(Duration::from_millis(200));
    let supervisor = Supervisor::with_config(provider, config)?;

    // Bridge readings and state changes to stdout
    let _readings = supervisor.on_weight_change(|reading| {
        if let Err(e) = write_stdout_json(&ScaleEvent::reading(&reading)) {
            eprintln!("stdout: {}", e);
        }
    });
    let mut states = supervisor.watch_state();
    let _states = tokio::spawn(async move {
        loop {
            let event = ScaleEvent::state(&states.borrow_and_update());
            if let Err(e) = write_stdout_json(&event) {
                eprintln!("stdout: {}", e);
            }
            if states.changed().await.is_err() {
                break;
            }
        }
    });

    supervisor.connect().await?;

    for value in ["0.00", "1.25", "2.50", "6.20"] {
        device.send_weight(value);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // Noise and a malformed frame are silently dropped
    device.send(b"\x00\xffST______XXXXXXkg\r\n");
    device.send(b"ST______006.");
    device.send(b"20kg\r\n");
    tokio::time::sleep(Duration::from_millis(100)).await;

    device.unplug();
    tokio::time::sleep(Duration::from_millis(100)).await;

    supervisor.reconnect().await?;
    device.send_weight("3.10");
    tokio::time::sleep(Duration::from_millis(100)).await;

    supervisor.disconnect().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    Ok(())
}
