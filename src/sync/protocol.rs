// Push-socket wire messages. Both directions use the same JSON text frames:
// a participant identifies itself once after connecting, then either side
// may send `state_update` carrying a full document.

use serde::{Deserialize, Serialize};

use crate::state::StateDocument;

/// Name of the server-push-stream event carrying a document.
pub const STATE_EVENT: &str = "state";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SocketMessage {
    Identify {
        #[serde(rename = "clientId")]
        client_id: String,
    },
    StateUpdate {
        state: StateDocument,
        #[serde(rename = "clientId")]
        client_id: String,
    },
}

impl SocketMessage {
    pub fn identify(client_id: impl Into<String>) -> Self {
        Self::Identify {
            client_id: client_id.into(),
        }
    }

    pub fn state_update(state: StateDocument, client_id: impl Into<String>) -> Self {
        Self::StateUpdate {
            state,
            client_id: client_id.into(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_wire_format() {
        let json = SocketMessage::identify("client-1").to_json().unwrap();
        assert_eq!(json, r#"{"type":"identify","clientId":"client-1"}"#);
    }

    #[test]
    fn state_update_wire_format() {
        let msg = SocketMessage::state_update(StateDocument::default(), "client-2");
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "state_update");
        assert_eq!(value["clientId"], "client-2");
        assert_eq!(value["state"]["controlMode"], "auto");

        let parsed: SocketMessage = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let parsed = serde_json::from_str::<SocketMessage>(r#"{"type":"ping"}"#);
        assert!(parsed.is_err());
    }
}
