//! 工具路由器
//!
//! 持有启动时发现的 ToolSpec 与 Provider 句柄以及全局超时；invoke(tool_name, args) 按 ToolSpec.provider_id 路由，
//! 超时或失败时转为 ToolError（ProviderTimeout / ProviderError），响应经信封归一化后返回；每次调用输出结构化审计日志（JSON）。
//! 调用之间不保留任何连接或上下文。

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::ToolError;
use crate::tools::{normalize_response, ProviderRegistry, ToolProvider, ToolSpec};

/// 工具路由器：对每次调用施加超时，并将结果映射为 ToolError
pub struct ToolRouter {
    specs: Vec<ToolSpec>,
    by_name: HashMap<String, usize>,
    providers: HashMap<String, Arc<dyn ToolProvider>>,
    timeout: Duration,
}

impl ToolRouter {
    pub fn new(registry: ProviderRegistry, timeout_secs: u64) -> Self {
        Self::with_timeout(registry, Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(registry: ProviderRegistry, timeout: Duration) -> Self {
        let specs = registry.specs().to_vec();
        let by_name = specs
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();
        let providers = registry
            .provider_ids()
            .into_iter()
            .filter_map(|id| registry.provider(&id).map(|p| (id, p)))
            .collect();
        Self {
            specs,
            by_name,
            providers,
            timeout,
        }
    }

    /// 调用指定工具；未声明返回 UnknownTool，超时返回 ProviderTimeout，Provider 返回 Err 则转为 ProviderError
    pub async fn invoke(&self, tool_name: &str, args: Value) -> Result<Value, ToolError> {
        let spec = self
            .spec(tool_name)
            .ok_or_else(|| ToolError::UnknownTool(tool_name.to_string()))?;
        let provider = self
            .providers
            .get(&spec.provider_id)
            .ok_or_else(|| ToolError::UnknownTool(tool_name.to_string()))?;

        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, provider.invoke(tool_name, args)).await;

        let normalized = match result {
            Ok(Ok(raw)) => normalize_response(&spec.provider_id, tool_name, raw),
            Ok(Err(raw)) => Err(ToolError::ProviderError {
                provider: spec.provider_id.clone(),
                tool: tool_name.to_string(),
                raw,
            }),
            Err(_) => Err(ToolError::ProviderTimeout(tool_name.to_string())),
        };

        let outcome = match &normalized {
            Ok(_) => "ok",
            Err(ToolError::ProviderTimeout(_)) => "timeout",
            Err(ToolError::MalformedResponse { .. }) => "malformed",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "provider": spec.provider_id,
            "ok": normalized.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        normalized
    }

    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.by_name.get(name).map(|&i| &self.specs[i])
    }

    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.name.clone()).collect()
    }

    pub fn provider_ids(&self) -> BTreeSet<String> {
        self.providers.keys().cloned().collect()
    }

    /// 给定 Provider 集合下可用的工具（注册顺序）；集合为空时返回全部工具
    pub fn tools_from_providers(&self, provider_ids: &[String]) -> Vec<ToolSpec> {
        if provider_ids.is_empty() {
            return self.specs.clone();
        }
        self.specs
            .iter()
            .filter(|s| provider_ids.iter().any(|p| p == &s.provider_id))
            .cloned()
            .collect()
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{EchoProvider, MathProvider};
    use async_trait::async_trait;
    use serde_json::json;

    struct SlowProvider;

    #[async_trait]
    impl ToolProvider for SlowProvider {
        fn id(&self) -> &str {
            "slow"
        }

        fn list_tools(&self) -> Vec<ToolSpec> {
            vec![ToolSpec::new("sleep", "never returns in time")]
        }

        async fn invoke(&self, _tool_name: &str, _args: Value) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!("late"))
        }
    }

    fn router() -> ToolRouter {
        let mut reg = ProviderRegistry::new();
        reg.register(MathProvider::new("math"));
        reg.register(EchoProvider::new("echo"));
        reg.register(SlowProvider);
        ToolRouter::with_timeout(reg, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_invoke_routes_and_normalizes() {
        let r = router();
        let v = r.invoke("power", json!({"a": 144, "b": 0.5})).await.unwrap();
        assert_eq!(v, json!(12.0));
        let v = r.invoke("echo", json!({"text": "hi"})).await.unwrap();
        assert_eq!(v, json!("hi"));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let r = router();
        let err = r.invoke("teleport", json!({})).await.unwrap_err();
        assert_eq!(err, ToolError::UnknownTool("teleport".to_string()));
    }

    #[tokio::test]
    async fn test_provider_error_and_timeout() {
        let r = router();
        let err = r.invoke("divide", json!({"a": 1, "b": 0})).await.unwrap_err();
        assert!(matches!(err, ToolError::ProviderError { ref provider, .. } if provider == "math"));

        let err = r.invoke("sleep", json!({})).await.unwrap_err();
        assert_eq!(err, ToolError::ProviderTimeout("sleep".to_string()));
    }

    #[test]
    fn test_tools_from_providers() {
        let r = router();
        let echo_only = r.tools_from_providers(&["echo".to_string()]);
        assert_eq!(echo_only.len(), 1);
        assert_eq!(echo_only[0].name, "echo");
        assert_eq!(r.tools_from_providers(&[]).len(), r.specs().len());
    }
}
