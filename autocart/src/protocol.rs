//! Wire types for the host <-> engine control protocol.
//!
//! Commands are request/response and travel inside [`Frame::Request`] /
//! [`Frame::Reply`] with a correlation id. Events are pushed by the engine
//! inside [`Frame::Event`] and never answered.

use crate::cart::CartSnapshot;
use crate::selector::TargetSet;
use crate::types::{AutomationConfig, AutomationStatus, LogLevel};
use serde::{Deserialize, Serialize};

/// Host -> engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    Start {
        config: AutomationConfig,
        targets: TargetSet,
    },
    Stop,
    GetStatus,
    /// The cart of the current or most recent run
    GetCart,
    /// Return a finished engine to idle and empty its cart
    Reset,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start { .. } => "start",
            Command::Stop => "stop",
            Command::GetStatus => "getStatus",
            Command::GetCart => "getCart",
            Command::Reset => "reset",
        }
    }
}

/// Engine -> host, unsolicited
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Event {
    Progress {
        status: AutomationStatus,
    },
    /// Terminal event for completed and stopped runs
    Complete {
        status: AutomationStatus,
        cart: CartSnapshot,
    },
    /// Terminal event for failed runs
    Error {
        reason: String,
    },
    Log {
        level: LogLevel,
        text: String,
    },
}

impl Event {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Complete { .. } | Event::Error { .. })
    }
}

/// Any message of the protocol, as seen by code that handles both directions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlMessage {
    Command(Command),
    Event(Event),
}

impl From<Command> for ControlMessage {
    fn from(c: Command) -> Self {
        ControlMessage::Command(c)
    }
}

impl From<Event> for ControlMessage {
    fn from(e: Event) -> Self {
        ControlMessage::Event(e)
    }
}

/// Engine -> host answer to a [`Command`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Reply {
    Start {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// `success` is always true; `stopped` says whether a run was cancelled
    Stop {
        success: bool,
        #[serde(default)]
        stopped: bool,
    },
    Status {
        status: AutomationStatus,
    },
    Cart {
        cart: CartSnapshot,
    },
    Reset {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// The engine could not make sense of the request
    Rejected {
        error: String,
    },
}

/// Envelope actually written to a transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Frame {
    Request { id: String, command: Command },
    Reply { id: String, reply: Reply },
    Event { event: Event },
}

impl Frame {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunState;
    use serde_json::json;

    #[test]
    fn start_request_wire_shape() {
        let raw = json!({
            "kind": "request",
            "id": "42",
            "command": {
                "type": "start",
                "config": {"stepDelayMs": 300, "maxItemsPerCategory": 2},
                "targets": {
                    "category": [".cat"],
                    "menuItem": [".item"],
                    "addButton": [".add"],
                    "modal": [".modal"],
                    "closeButton": [".close"]
                }
            }
        });
        let frame: Frame = serde_json::from_value(raw).unwrap();
        let Frame::Request { id, command } = frame else {
            panic!("expected request");
        };
        assert_eq!(id, "42");
        let Command::Start { config, targets } = command else {
            panic!("expected start");
        };
        assert_eq!(config.max_items_per_category, 2);
        targets.validate().unwrap();
    }

    #[test]
    fn unit_commands_and_events_use_type_tags() {
        assert_eq!(serde_json::to_value(Command::GetStatus).unwrap(), json!({"type": "getStatus"}));
        assert_eq!(serde_json::to_value(Command::Stop).unwrap(), json!({"type": "stop"}));
        assert_eq!(serde_json::to_value(Command::GetCart).unwrap(), json!({"type": "getCart"}));

        let log = Event::Log {
            level: LogLevel::Success,
            text: "Added Taco".into(),
        };
        assert_eq!(
            serde_json::to_value(&log).unwrap(),
            json!({"type": "log", "level": "success", "text": "Added Taco"})
        );
    }

    #[test]
    fn control_message_dispatches_both_directions() {
        let cmd: ControlMessage = serde_json::from_value(json!({"type": "stop"})).unwrap();
        assert_eq!(cmd, ControlMessage::Command(Command::Stop));

        let ev: ControlMessage =
            serde_json::from_value(json!({"type": "error", "reason": "No categories"})).unwrap();
        assert!(matches!(ev, ControlMessage::Event(Event::Error { .. })));

        let progress: ControlMessage = serde_json::from_value(json!({
            "type": "progress",
            "status": {"state": "running", "itemsCount": 1, "totalValue": 2.5,
                       "progress": {"current": 1, "total": 4}}
        }))
        .unwrap();
        match progress {
            ControlMessage::Event(Event::Progress { status }) => {
                assert_eq!(status.state, RunState::Running);
                assert_eq!(status.progress.total, 4);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn start_reply_omits_missing_error() {
        let reply = Reply::Start {
            success: true,
            error: None,
        };
        assert_eq!(
            serde_json::to_value(reply).unwrap(),
            json!({"type": "start", "success": true})
        );
    }

    #[test]
    fn stop_reply_succeeds_even_when_idle() {
        let idle: Reply = serde_json::from_value(json!({"type": "stop", "success": true})).unwrap();
        assert_eq!(
            idle,
            Reply::Stop {
                success: true,
                stopped: false
            }
        );
    }

    #[test]
    fn cart_reply_carries_the_snapshot() {
        let raw = json!({
            "type": "cart",
            "cart": {
                "items": [{"name": "Elote", "price": 3.5, "category": "Sides",
                           "addedAt": "2024-05-01T12:00:00Z"}],
                "total": 3.5,
                "itemsCount": 1,
                "exportedAt": "2024-05-01T12:00:01Z"
            }
        });
        match serde_json::from_value::<Reply>(raw).unwrap() {
            Reply::Cart { cart } => {
                assert_eq!(cart.items_count, 1);
                assert_eq!(cart.items[0].category, "Sides");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
