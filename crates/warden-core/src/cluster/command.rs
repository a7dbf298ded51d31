use serde::{Deserialize, Serialize};

/// Instruction relayed to a node through the `intercom` table.
///
/// Payloads are opaque to the store; the wire form is
/// `{"command": "rpc", "object": "Node", "method": "upgrade", "params": {}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCommand {
    pub command: String,
    pub object: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
}

impl NodeCommand {
    /// "Upgrade yourself".
    pub fn upgrade() -> Self {
        Self {
            command: "rpc".to_string(),
            object: "Node".to_string(),
            method: "upgrade".to_string(),
            params: serde_json::Value::Null,
        }
    }

    /// Interpret the payload as a node instruction.
    pub fn action(&self) -> Option<NodeAction> {
        if self.command != "rpc" || self.object != "Node" {
            return None;
        }
        match self.method.as_str() {
            "upgrade" => Some(NodeAction::Upgrade),
            "restart" => Some(NodeAction::Restart),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn from_json(value: serde_json::Value) -> crate::Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Node instructions understood by the relay consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAction {
    Upgrade,
    Restart,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upgrade_wire_form() {
        let value = NodeCommand::upgrade().to_json();
        assert_eq!(
            value,
            json!({"command": "rpc", "object": "Node", "method": "upgrade"})
        );
    }

    #[test]
    fn test_action_parsing() {
        let cmd = NodeCommand::from_json(json!({
            "command": "rpc", "object": "Node", "method": "upgrade"
        }))
        .unwrap();
        assert_eq!(cmd.action(), Some(NodeAction::Upgrade));

        let other = NodeCommand::from_json(json!({
            "command": "rpc", "service": "Bot", "object": "Bot", "method": "audit",
            "params": {"message": "hi"}
        }))
        .unwrap();
        assert_eq!(other.action(), None);
    }

    #[test]
    fn test_malformed_payload() {
        assert!(NodeCommand::from_json(json!({"method": "upgrade"})).is_err());
    }
}
