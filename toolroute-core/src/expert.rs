use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::types::{ExpertCapabilities, ExpertDefinition, ExpertType, ToolRequest};

/// 工具执行器接口
///
/// 真正的工具实现（搜索、安装、校验等）在路由器之外，通过这个 trait 接入。
/// 专家和回退路径使用同一个接口。
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// 执行工具调用
    async fn execute(&self, request: &ToolRequest) -> anyhow::Result<Value>;

    /// 健康探测，默认视为成功
    async fn probe(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 专家：不可变定义 + 执行器
///
/// 四种专家类型共用这一个结构，类型标签只影响评分。
#[derive(Clone)]
pub struct Expert {
    definition: Arc<ExpertDefinition>,
    executor: Arc<dyn ToolExecutor>,
}

impl Expert {
    pub fn new(definition: ExpertDefinition, executor: Arc<dyn ToolExecutor>) -> Self {
        Self {
            definition: Arc::new(definition),
            executor,
        }
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn definition(&self) -> &ExpertDefinition {
        &self.definition
    }

    pub fn capabilities(&self) -> &ExpertCapabilities {
        &self.definition.capabilities
    }

    pub fn expert_type(&self) -> ExpertType {
        self.definition.expert_type
    }

    /// 是否声明支持该请求的工具
    pub fn can_handle(&self, request: &ToolRequest) -> bool {
        self.definition.capabilities.supports(request.tool)
    }

    pub async fn execute(&self, request: &ToolRequest) -> anyhow::Result<Value> {
        self.executor.execute(request).await
    }

    pub async fn probe(&self) -> anyhow::Result<()> {
        self.executor.probe().await
    }
}

impl fmt::Debug for Expert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expert")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolType;
    use serde_json::{json, Map};
    use std::collections::BTreeSet;

    struct EchoExecutor;

    #[async_trait]
    impl ToolExecutor for EchoExecutor {
        async fn execute(&self, request: &ToolRequest) -> anyhow::Result<Value> {
            Ok(json!({ "tool": request.tool.as_str() }))
        }
    }

    fn definition(tools: &[ToolType]) -> ExpertDefinition {
        ExpertDefinition {
            id: "echo".to_string(),
            expert_type: ExpertType::Balanced,
            capabilities: ExpertCapabilities {
                supported_tools: tools.iter().copied().collect::<BTreeSet<_>>(),
                max_concurrency: 4,
                avg_latency_ms: 10.0,
                accuracy_score: 0.9,
            },
            base_weight: 1.0,
            priority: 0,
        }
    }

    #[tokio::test]
    async fn test_can_handle_and_execute() {
        let expert = Expert::new(definition(&[ToolType::Search]), Arc::new(EchoExecutor));
        let search = ToolRequest::new("r1", ToolType::Search, Map::new());
        let install = ToolRequest::new("r2", ToolType::Install, Map::new());

        assert!(expert.can_handle(&search));
        assert!(!expert.can_handle(&install));
        assert_eq!(expert.execute(&search).await.unwrap()["tool"], "search");
        assert!(expert.probe().await.is_ok());
    }
}
