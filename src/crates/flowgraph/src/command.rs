//! Node-driven routing decisions.

use serde_json::Value;

use crate::graph::NodeId;

/// Returned by a node that wants to pick its own successor instead of
/// following the graph's edges. The update (if any) is committed before the
/// goto target is resolved.
#[derive(Debug, Clone, Default)]
pub struct Command {
    pub goto: Option<NodeId>,
    pub update: Option<Value>,
}

impl Command {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_goto(mut self, node: impl Into<NodeId>) -> Self {
        self.goto = Some(node.into());
        self
    }

    pub fn with_update(mut self, update: Value) -> Self {
        self.update = Some(update);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_chains() {
        let cmd = Command::new()
            .with_update(json!({"sender": "coder"}))
            .with_goto("quality_review");
        assert_eq!(cmd.goto.as_deref(), Some("quality_review"));
        assert_eq!(cmd.update.unwrap()["sender"], json!("coder"));
    }
}
