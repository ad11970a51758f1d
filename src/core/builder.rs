//! 运行时构建：进程级共享资源的显式初始化与关闭
//!
//! 启动时一次性完成 Provider 发现（ProviderRegistry -> ToolRouter）、打开历史索引并扫描已有会话日志；
//! Runtime 以句柄形式把路由器与索引交给每个 LoopController，退出时由 shutdown() 落盘。

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{load_config, AppConfig};
use crate::core::{
    AbortHandle, AgentError, HistoricalIndexCleanup, ShutdownCoordinator, ShutdownManager,
};
use crate::llm::LlmClient;
use crate::memory::{HistoricalIndex, SessionLogStore, INDEX_FILE_NAME};
use crate::react::{LlmPlanner, LlmProposer, LoopController, PlanProposer, PlannerPrompts, Proposer};
use crate::tools::{EchoProvider, MathProvider, ProviderRegistry, ToolProvider, ToolRouter};

/// 运行时构建器
pub struct RuntimeBuilder {
    config: AppConfig,
    extra_providers: Vec<Arc<dyn ToolProvider>>,
}

impl RuntimeBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            extra_providers: Vec::new(),
        }
    }

    /// 追加一个外部 Provider（在配置中的 Provider 之后注册）
    pub fn with_provider(mut self, provider: Arc<dyn ToolProvider>) -> Self {
        self.extra_providers.push(provider);
        self
    }

    /// 按 [[providers]] 注册内置 Provider；未配置时注册 math 与 echo
    pub fn build_registry(&self) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        if self.config.providers.is_empty() {
            registry.register(MathProvider::new("math"));
            registry.register(EchoProvider::new("echo"));
        }
        for entry in self.config.providers.iter().filter(|p| p.enabled) {
            match entry.kind.to_lowercase().as_str() {
                "math" => registry.register(MathProvider::new(entry.id.clone())),
                "echo" => registry.register(EchoProvider::new(entry.id.clone())),
                other => tracing::warn!(id = %entry.id, kind = %other, "Unknown provider kind, skipped"),
            }
        }
        for provider in &self.extra_providers {
            registry.register_arc(provider.clone());
        }
        registry
    }

    /// 打开历史索引：持久化开启时从记忆目录加载并补扫会话日志（blocking 线程），否则为纯内存
    pub async fn build_index(&self) -> HistoricalIndex {
        if !self.config.app.persist_sessions {
            return HistoricalIndex::in_memory();
        }
        let dir = self.config.app.memory_dir.clone();
        let scan = tokio::task::spawn_blocking(move || {
            let index = HistoricalIndex::open(dir.join(INDEX_FILE_NAME));
            let indexed = index.index_all_sessions(&dir).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to scan session logs");
                0
            });
            (index, indexed)
        })
        .await;
        let (index, indexed) = match scan {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "Session log scan aborted, starting with empty index");
                return HistoricalIndex::in_memory();
            }
        };
        if indexed > 0 {
            if let Err(e) = index.persist().await {
                tracing::warn!(error = %e, "Failed to persist rebuilt historical index");
            }
        }
        index
    }

    /// 步数、生命线与调用预算必须为正
    fn validate(&self) -> Result<(), AgentError> {
        let s = &self.config.strategy;
        if s.max_steps == 0 {
            return Err(AgentError::ConfigError("strategy.max_steps must be >= 1".to_string()));
        }
        if s.max_lifelines_per_step == 0 {
            return Err(AgentError::ConfigError(
                "strategy.max_lifelines_per_step must be >= 1".to_string(),
            ));
        }
        if self.config.executor.max_tool_calls_per_plan == 0 {
            return Err(AgentError::ConfigError(
                "executor.max_tool_calls_per_plan must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn build(self) -> Result<Runtime, AgentError> {
        self.validate()?;
        let registry = self.build_registry();
        let router = Arc::new(ToolRouter::new(
            registry,
            self.config.executor.tool_timeout_secs,
        ));
        tracing::info!(
            tools = router.specs().len(),
            providers = router.provider_ids().len(),
            "Tool discovery finished"
        );
        let index = Arc::new(self.build_index().await);
        let log_store = self
            .config
            .app
            .persist_sessions
            .then(|| SessionLogStore::new(&self.config.app.memory_dir));
        Ok(Runtime {
            config: self.config,
            router,
            index,
            log_store,
            shutdown: ShutdownManager::new(),
        })
    }
}

/// 进程级运行时
pub struct Runtime {
    config: AppConfig,
    router: Arc<ToolRouter>,
    index: Arc<HistoricalIndex>,
    log_store: Option<SessionLogStore>,
    shutdown: ShutdownManager,
}

impl Runtime {
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<ToolRouter> {
        &self.router
    }

    pub fn index(&self) -> &Arc<HistoricalIndex> {
        &self.index
    }

    pub fn shutdown_manager(&self) -> &ShutdownManager {
        &self.shutdown
    }

    /// 新会话的中止句柄（进程关闭时一并中止）
    pub fn abort_handle(&self) -> AbortHandle {
        self.shutdown.session_handle()
    }

    /// Provider 与工具一览，供 Proposer prompt 使用
    pub fn providers_summary(&self) -> String {
        self.router
            .provider_ids()
            .into_iter()
            .map(|id| {
                let tools: Vec<String> = self
                    .router
                    .tools_from_providers(std::slice::from_ref(&id))
                    .into_iter()
                    .map(|t| t.name)
                    .collect();
                format!("- {}: {}", id, tools.join(", "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 用给定的外部能力创建控制循环
    pub fn controller(
        &self,
        proposer: Arc<dyn Proposer>,
        planner: Arc<dyn PlanProposer>,
    ) -> LoopController {
        let controller = LoopController::new(
            proposer,
            planner,
            self.router.clone(),
            self.index.clone(),
            self.config.strategy.clone(),
            self.config.executor.max_tool_calls_per_plan,
        );
        match &self.log_store {
            Some(store) => controller.with_log_store(store.clone()),
            None => controller,
        }
    }

    /// 以同一个 LlmClient 作为 Proposer 与 Planner-LLM 的后端
    pub fn llm_controller(&self, llm: Arc<dyn LlmClient>) -> LoopController {
        let mut proposer = LlmProposer::new(llm.clone(), self.providers_summary());
        let mut planner = LlmPlanner::new(llm, self.config.executor.max_tool_calls_per_plan);
        if let Some(dir) = &self.config.app.prompts_dir {
            if let Ok(p) = std::fs::read_to_string(dir.join("proposer.md")) {
                proposer = proposer.with_prompt(p);
            }
            planner = planner.with_prompts(PlannerPrompts::load_from_dir(dir));
        }
        self.controller(Arc::new(proposer), Arc::new(planner))
    }

    /// 关闭：中止所有会话并执行清理（历史索引落盘）
    pub async fn shutdown(&self) {
        if !self.shutdown.is_shutdown() {
            self.shutdown
                .shutdown(crate::core::ShutdownReason::UserInitiated);
        }
        let mut coordinator = ShutdownCoordinator::new();
        coordinator.register(HistoricalIndexCleanup::new(self.index.clone()));
        coordinator.run_cleanup().await;
    }
}

/// 加载配置并构建运行时；配置无法解析或取值非法时返回 ConfigError
pub async fn create_runtime(config_path: Option<PathBuf>) -> Result<Runtime, AgentError> {
    let config = load_config(config_path).map_err(|e| AgentError::ConfigError(e.to_string()))?;
    RuntimeBuilder::new(config).build().await
}
