//! Events published to the host UI.

use serde::Serialize;

use crate::protocol::WeightReading;
use crate::supervisor::ConnectionState;

/// One line of the UI bridge.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScaleEvent {
    /// A weight was decoded (`onWeightChange`).
    Reading {
        value: f64,
        display: String,
        /// Milliseconds since the Unix epoch.
        observed_at_ms: u64,
    },
    /// The connection state changed.
    State {
        #[serde(flatten)]
        state: ConnectionState,
        connected: bool,
        /// Whether to show the "connect" action.
        prompt_connect: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl ScaleEvent {
    pub fn reading(reading: &WeightReading) -> Self {
        let observed_at_ms = reading
            .observed_at
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        ScaleEvent::Reading {
            value: reading.value(),
            display: reading.display(),
            observed_at_ms,
        }
    }

    pub fn state(state: &ConnectionState) -> Self {
        ScaleEvent::State {
            state: state.clone(),
            connected: *state == ConnectionState::Reading,
            prompt_connect: matches!(
                state,
                ConnectionState::Disconnected | ConnectionState::Failed(_)
            ),
            message: state.user_message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureReason;
    use serde_json::json;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_reading_event_json() {
        let reading = WeightReading::observed_at(124, UNIX_EPOCH + Duration::from_millis(1500));

        let json = serde_json::to_value(ScaleEvent::reading(&reading)).unwrap();

        assert_eq!(
            json,
            json!({
                "type": "reading",
                "value": 12.4,
                "display": "012.4",
                "observed_at_ms": 1500
            })
        );
    }

    #[test]
    fn test_reading_state_event_json() {
        let json = serde_json::to_value(ScaleEvent::state(&ConnectionState::Reading)).unwrap();

        assert_eq!(
            json,
            json!({
                "type": "state",
                "state": "reading",
                "connected": true,
                "prompt_connect": false
            })
        );
    }

    #[test]
    fn test_failed_state_event_carries_message() {
        let state = ConnectionState::Failed(FailureReason::StreamClosed);

        let json = serde_json::to_value(ScaleEvent::state(&state)).unwrap();

        assert_eq!(json["type"], "state");
        assert_eq!(json["state"], "failed");
        assert_eq!(json["reason"]["kind"], "stream_closed");
        assert_eq!(json["connected"], false);
        assert_eq!(json["prompt_connect"], true);
        assert!(json["message"].as_str().unwrap().contains("disconnected"));
    }
}
