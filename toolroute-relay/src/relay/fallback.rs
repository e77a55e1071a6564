use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use toolroute_core::{
    ExpertExecutionError, ToolExecutor, ToolRequest, ToolType, FALLBACK_EXPERT_ID,
};
use tracing::debug;

const DEFAULT_FALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// 回退执行器
///
/// 直接调用工具接入路由前的默认处理器。不持有路由器引用，
/// 因此回退路径不可能再次进入路由。
pub struct FallbackExecutor {
    handlers: HashMap<ToolType, Arc<dyn ToolExecutor>>,
    default_handler: Option<Arc<dyn ToolExecutor>>,
    timeout: Duration,
}

impl Default for FallbackExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackExecutor {
    /// 超时由 [`Router::new`](crate::Router::new) 按 `settings.fallback_timeout_ms` 设置
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            default_handler: None,
            timeout: DEFAULT_FALLBACK_TIMEOUT,
        }
    }

    /// 为某个工具注册默认处理器
    pub fn with_handler(mut self, tool: ToolType, handler: Arc<dyn ToolExecutor>) -> Self {
        self.handlers.insert(tool, handler);
        self
    }

    /// 未单独注册的工具都交给它
    pub fn with_default(mut self, handler: Arc<dyn ToolExecutor>) -> Self {
        self.default_handler = Some(handler);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn has_handler(&self, tool: ToolType) -> bool {
        self.handlers.contains_key(&tool) || self.default_handler.is_some()
    }

    pub async fn execute(&self, request: &ToolRequest) -> Result<Value, ExpertExecutionError> {
        let handler = self
            .handlers
            .get(&request.tool)
            .or(self.default_handler.as_ref())
            .ok_or_else(|| ExpertExecutionError::Failed {
                expert_id: FALLBACK_EXPERT_ID.to_string(),
                message: format!("no fallback handler for tool '{}'", request.tool),
            })?;

        debug!(
            "Executing request '{}' ({}) on fallback handler",
            request.request_id, request.tool
        );

        match tokio::time::timeout(self.timeout, handler.execute(request)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ExpertExecutionError::Failed {
                expert_id: FALLBACK_EXPERT_ID.to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(ExpertExecutionError::Timeout {
                expert_id: FALLBACK_EXPERT_ID.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

impl std::fmt::Debug for FallbackExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackExecutor")
            .field("tools", &self.handlers.keys().collect::<Vec<_>>())
            .field("has_default", &self.default_handler.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Map};

    struct Named(&'static str);

    #[async_trait]
    impl ToolExecutor for Named {
        async fn execute(&self, _request: &ToolRequest) -> anyhow::Result<Value> {
            Ok(json!({ "handler": self.0 }))
        }
    }

    struct Slow;

    #[async_trait]
    impl ToolExecutor for Slow {
        async fn execute(&self, _request: &ToolRequest) -> anyhow::Result<Value> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(json!(null))
        }
    }

    fn request(tool: ToolType) -> ToolRequest {
        ToolRequest::new("r1", tool, Map::new())
    }

    #[tokio::test]
    async fn test_specific_handler_then_default() {
        let fallback = FallbackExecutor::new()
            .with_handler(ToolType::Search, Arc::new(Named("search")))
            .with_default(Arc::new(Named("default")));

        let value = fallback.execute(&request(ToolType::Search)).await.unwrap();
        assert_eq!(value["handler"], "search");
        let value = fallback.execute(&request(ToolType::Install)).await.unwrap();
        assert_eq!(value["handler"], "default");
    }

    #[tokio::test]
    async fn test_missing_handler_fails() {
        let fallback = FallbackExecutor::new();
        assert!(!fallback.has_handler(ToolType::Search));
        let err = fallback.execute(&request(ToolType::Search)).await.unwrap_err();
        assert_eq!(err.expert_id(), FALLBACK_EXPERT_ID);
        assert_eq!(err.kind(), "failed");
    }

    #[tokio::test]
    async fn test_fallback_has_its_own_timeout() {
        let fallback = FallbackExecutor::new()
            .with_timeout(Duration::from_millis(20))
            .with_default(Arc::new(Slow));
        let err = fallback.execute(&request(ToolType::Search)).await.unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }
}
