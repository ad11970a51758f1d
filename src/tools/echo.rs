//! Echo Provider（测试用）

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::{ToolProvider, ToolSpec};

/// Echo Provider：以 `{"result": text}` 信封回显文本
pub struct EchoProvider {
    id: String,
}

impl EchoProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl ToolProvider for EchoProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn list_tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec::new("echo", "Echo text (for testing). Args: {\"text\": \"message\"}")
            .with_input_schema(json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }))
            .with_output_schema(json!({"type": "string"}))]
    }

    async fn invoke(&self, _tool_name: &str, args: Value) -> Result<Value, String> {
        let text = args
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or("(empty)");
        Ok(json!({ "result": text }))
    }
}
