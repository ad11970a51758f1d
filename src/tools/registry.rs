//! Provider 注册表
//!
//! 所有工具提供方实现 ToolProvider trait（id / list_tools / invoke），由 ProviderRegistry 在启动时发现并登记；
//! 发现得到的 ToolSpec 在进程生命周期内只读，ToolRouter 据此按 provider_id 路由。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 工具描述：名称、输入/输出 schema、所属 Provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    /// 工具描述（供 LLM 理解功能，也参与 tool hint 匹配）
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
    pub provider_id: String,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
            output_schema: serde_json::json!({}),
            provider_id: String::new(),
        }
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = schema;
        self
    }

    /// input_schema 中声明的参数名；未声明 properties 时返回 None（不限制）
    pub fn declared_args(&self) -> Option<Vec<&str>> {
        let props = self.input_schema.get("properties")?.as_object()?;
        if props.is_empty() {
            return None;
        }
        Some(props.keys().map(|k| k.as_str()).collect())
    }
}

/// 工具提供方：一个 Provider 实现一个或多个具名工具，返回自有信封格式的原始响应
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Provider id（ToolSpec.provider_id 指向此值）
    fn id(&self) -> &str;

    /// 工具发现：返回本 Provider 声明的工具
    fn list_tools(&self) -> Vec<ToolSpec>;

    /// 调用工具，返回 Provider 自有信封（由 ToolRouter 归一化）；Err 为传输/Provider 层错误
    async fn invoke(&self, tool_name: &str, args: Value) -> Result<Value, String>;
}

/// Provider 注册表：按 id 存储 Arc<dyn ToolProvider>，登记时完成工具发现
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ToolProvider>>,
    /// 按注册顺序保存的工具描述（同名工具以先注册者为准）
    specs: Vec<ToolSpec>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: impl ToolProvider + 'static) {
        self.register_arc(Arc::new(provider));
    }

    pub fn register_arc(&mut self, provider: Arc<dyn ToolProvider>) {
        let id = provider.id().to_string();
        if self.providers.contains_key(&id) {
            tracing::warn!(provider = %id, "Provider already registered, ignoring");
            return;
        }
        for mut spec in provider.list_tools() {
            if self.specs.iter().any(|s| s.name == spec.name) {
                tracing::warn!(tool = %spec.name, provider = %id, "Tool already declared by another provider, ignoring");
                continue;
            }
            spec.provider_id = id.clone();
            self.specs.push(spec);
        }
        self.providers.insert(id, provider);
    }

    pub fn provider(&self, id: &str) -> Option<Arc<dyn ToolProvider>> {
        self.providers.get(id).cloned()
    }

    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy(&'static str, &'static [&'static str]);

    #[async_trait]
    impl ToolProvider for Dummy {
        fn id(&self) -> &str {
            self.0
        }

        fn list_tools(&self) -> Vec<ToolSpec> {
            self.1.iter().map(|n| ToolSpec::new(*n, "dummy")).collect()
        }

        async fn invoke(&self, _tool_name: &str, _args: Value) -> Result<Value, String> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_register_assigns_provider_id() {
        let mut reg = ProviderRegistry::new();
        reg.register(Dummy("a", &["x", "y"]));
        reg.register(Dummy("b", &["y", "z"]));
        let specs = reg.specs();
        assert_eq!(specs.len(), 3);
        let y = specs.iter().find(|s| s.name == "y").unwrap();
        assert_eq!(y.provider_id, "a");
        assert_eq!(reg.provider_ids(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_declared_args() {
        let spec = ToolSpec::new("t", "d").with_input_schema(serde_json::json!({
            "type": "object",
            "properties": {"a": {"type": "number"}}
        }));
        assert_eq!(spec.declared_args(), Some(vec!["a"]));
        assert_eq!(ToolSpec::new("u", "d").declared_args(), None);
    }
}
