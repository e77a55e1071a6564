use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// 工具类型（固定枚举集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    /// 搜索 - 偏重准确度
    Search,
    /// 单条技能查询 - 低延迟查找
    GetSkill,
    /// 技能列表
    ListSkills,
    /// 安装 - 偏重可靠性
    Install,
    /// 卸载
    Uninstall,
    /// 校验
    Validate,
    /// 推荐
    Recommend,
}

impl ToolType {
    pub const ALL: [ToolType; 7] = [
        ToolType::Search,
        ToolType::GetSkill,
        ToolType::ListSkills,
        ToolType::Install,
        ToolType::Uninstall,
        ToolType::Validate,
        ToolType::Recommend,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::Search => "search",
            ToolType::GetSkill => "get_skill",
            ToolType::ListSkills => "list_skills",
            ToolType::Install => "install",
            ToolType::Uninstall => "uninstall",
            ToolType::Validate => "validate",
            ToolType::Recommend => "recommend",
        }
    }

    /// 默认是否幂等（可被配置覆盖）
    ///
    /// 只有幂等工具才允许对同一专家重试
    pub fn default_idempotent(&self) -> bool {
        !matches!(self, ToolType::Install | ToolType::Uninstall)
    }
}

impl fmt::Display for ToolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolType::ALL
            .iter()
            .copied()
            .find(|tool| tool.as_str() == s)
            .ok_or_else(|| format!("unknown tool type '{s}'"))
    }
}

/// 请求优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    /// 高优先级请求总是重新评分，且其决策不进入缓存
    High,
}

/// 请求元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMetadata {
    #[serde(default)]
    pub caller_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    /// 调用方所属层级，用于按层级开关路由
    #[serde(default)]
    pub tier: Option<String>,
    /// 单请求级别的开关覆盖（例如 `routing = false` 强制走直连路径）
    #[serde(default)]
    pub flag_overrides: HashMap<String, bool>,
}

/// 工具调用请求（不可变值）
///
/// 路由器从不检查 `arguments` 的内容，只在计算缓存键时对其做规范化。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub request_id: String,
    pub tool: ToolType,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub max_latency_ms: Option<u64>,
    #[serde(default)]
    pub metadata: RequestMetadata,
}

impl ToolRequest {
    pub fn new(request_id: impl Into<String>, tool: ToolType, arguments: Map<String, Value>) -> Self {
        Self {
            request_id: request_id.into(),
            tool,
            arguments,
            timestamp: Utc::now(),
            priority: None,
            max_latency_ms: None,
            metadata: RequestMetadata::default(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_latency_ms(mut self, max_latency_ms: u64) -> Self {
        self.max_latency_ms = Some(max_latency_ms);
        self
    }

    pub fn with_metadata(mut self, metadata: RequestMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_high_priority(&self) -> bool {
        self.priority == Some(Priority::High)
    }

    /// 参数的规范化 JSON，用于缓存键
    ///
    /// 每一层对象都按键重新排序，结果与插入顺序以及 `serde_json` 的
    /// `preserve_order` 特性无关。
    pub fn canonical_arguments(&self) -> Result<String, serde_json::Error> {
        let sorted: BTreeMap<&str, Value> = self
            .arguments
            .iter()
            .map(|(key, value)| (key.as_str(), sorted_keys(value)))
            .collect();
        serde_json::to_string(&sorted)
    }

    /// 读取单请求开关覆盖
    pub fn flag_override(&self, flag: &str) -> Option<bool> {
        self.metadata.flag_overrides.get(flag).copied()
    }
}

/// 递归按键排序后重建对象
fn sorted_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(key, inner)| (key.clone(), sorted_keys(inner)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted_keys).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_type_round_trip_names() {
        for tool in ToolType::ALL {
            assert_eq!(tool.as_str().parse::<ToolType>().unwrap(), tool);
        }
        assert!("deploy".parse::<ToolType>().is_err());
    }

    #[test]
    fn test_install_is_not_idempotent_by_default() {
        assert!(!ToolType::Install.default_idempotent());
        assert!(!ToolType::Uninstall.default_idempotent());
        assert!(ToolType::Search.default_idempotent());
    }

    #[test]
    fn test_canonical_arguments_ignore_insertion_order() {
        let mut a = Map::new();
        a.insert("query".to_string(), json!("rust"));
        a.insert("limit".to_string(), json!(10));

        let mut b = Map::new();
        b.insert("limit".to_string(), json!(10));
        b.insert("query".to_string(), json!("rust"));

        let ra = ToolRequest::new("r1", ToolType::Search, a);
        let rb = ToolRequest::new("r2", ToolType::Search, b);
        assert_eq!(
            ra.canonical_arguments().unwrap(),
            rb.canonical_arguments().unwrap()
        );
    }

    #[test]
    fn test_canonical_arguments_sort_nested_objects() {
        let mut a = Map::new();
        a.insert("filter".to_string(), json!({ "tag": "cli", "lang": "rust" }));
        a.insert("items".to_string(), json!([{ "z": 1, "a": 2 }]));

        let mut inner = Map::new();
        inner.insert("lang".to_string(), json!("rust"));
        inner.insert("tag".to_string(), json!("cli"));
        let mut b = Map::new();
        b.insert("items".to_string(), json!([{ "a": 2, "z": 1 }]));
        b.insert("filter".to_string(), Value::Object(inner));

        let ra = ToolRequest::new("r1", ToolType::Search, a);
        let rb = ToolRequest::new("r2", ToolType::Search, b);
        let canonical = ra.canonical_arguments().unwrap();

        assert_eq!(canonical, rb.canonical_arguments().unwrap());
        assert_eq!(
            canonical,
            r#"{"filter":{"lang":"rust","tag":"cli"},"items":[{"a":2,"z":1}]}"#
        );
    }

    #[test]
    fn test_priority_helpers() {
        let request = ToolRequest::new("r1", ToolType::GetSkill, Map::new());
        assert!(!request.is_high_priority());
        assert!(request.with_priority(Priority::High).is_high_priority());
    }
}
