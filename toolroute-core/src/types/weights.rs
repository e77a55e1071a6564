use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::request::ToolType;
use crate::error::ConfigurationError;

/// 工具权重配置
///
/// 四个分量各自在 [0, 1] 内，用于加权求和计算专家总分。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightProfile {
    pub accuracy: f64,
    pub latency: f64,
    pub reliability: f64,
    pub efficiency: f64,
}

impl WeightProfile {
    pub const fn new(accuracy: f64, latency: f64, reliability: f64, efficiency: f64) -> Self {
        Self {
            accuracy,
            latency,
            reliability,
            efficiency,
        }
    }

    /// 内置的默认权重表
    pub fn default_for(tool: ToolType) -> Self {
        match tool {
            ToolType::Search => Self::new(0.7, 0.2, 0.05, 0.05),
            ToolType::GetSkill => Self::new(0.2, 0.6, 0.15, 0.05),
            ToolType::ListSkills => Self::new(0.2, 0.5, 0.15, 0.15),
            ToolType::Install => Self::new(0.3, 0.1, 0.4, 0.2),
            ToolType::Uninstall => Self::new(0.3, 0.1, 0.4, 0.2),
            ToolType::Validate => Self::new(0.5, 0.2, 0.2, 0.1),
            ToolType::Recommend => Self::new(0.6, 0.2, 0.1, 0.1),
        }
    }

    pub fn sum(&self) -> f64 {
        self.accuracy + self.latency + self.reliability + self.efficiency
    }

    /// 校验权重合法性
    pub fn validate(&self, tool: &str) -> Result<(), ConfigurationError> {
        let components = [
            ("accuracy", self.accuracy),
            ("latency", self.latency),
            ("reliability", self.reliability),
            ("efficiency", self.efficiency),
        ];

        for (component, value) in components {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ConfigurationError::InvalidWeight {
                    tool: tool.to_string(),
                    component: component.to_string(),
                    value,
                });
            }
        }

        if self.sum() <= 0.0 {
            return Err(ConfigurationError::ZeroWeightProfile {
                tool: tool.to_string(),
            });
        }

        Ok(())
    }
}

/// 按工具类型查找权重的静态表
#[derive(Debug, Clone, PartialEq)]
pub struct WeightTable {
    profiles: HashMap<ToolType, WeightProfile>,
}

impl Default for WeightTable {
    fn default() -> Self {
        Self {
            profiles: ToolType::ALL
                .iter()
                .map(|tool| (*tool, WeightProfile::default_for(*tool)))
                .collect(),
        }
    }
}

impl WeightTable {
    /// 从显式配置构建，不补默认值
    pub fn from_profiles(profiles: HashMap<ToolType, WeightProfile>) -> Result<Self, ConfigurationError> {
        let table = Self { profiles };
        table.validate()?;
        Ok(table)
    }

    /// 在默认表之上叠加覆盖项
    pub fn with_overrides(overrides: &HashMap<ToolType, WeightProfile>) -> Result<Self, ConfigurationError> {
        let mut table = Self::default();
        for (tool, profile) in overrides {
            table.profiles.insert(*tool, *profile);
        }
        table.validate()?;
        Ok(table)
    }

    /// 每个工具都必须有合法权重
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for tool in ToolType::ALL {
            match self.profiles.get(&tool) {
                Some(profile) => profile.validate(tool.as_str())?,
                None => {
                    return Err(ConfigurationError::MissingWeights {
                        tool: tool.to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, tool: ToolType) -> Option<&WeightProfile> {
        self.profiles.get(&tool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_is_complete_and_valid() {
        let table = WeightTable::default();
        assert!(table.validate().is_ok());
        assert_eq!(table.get(ToolType::Search).unwrap().accuracy, 0.7);
        assert_eq!(table.get(ToolType::GetSkill).unwrap().latency, 0.6);
        assert_eq!(table.get(ToolType::Install).unwrap().reliability, 0.4);
    }

    #[test]
    fn test_out_of_range_weight_rejected() {
        let profile = WeightProfile::new(1.2, 0.0, 0.0, 0.0);
        let err = profile.validate("search").unwrap_err();
        assert!(err.to_string().contains("accuracy"));
    }

    #[test]
    fn test_all_zero_profile_rejected() {
        let profile = WeightProfile::new(0.0, 0.0, 0.0, 0.0);
        assert!(matches!(
            profile.validate("search"),
            Err(ConfigurationError::ZeroWeightProfile { .. })
        ));
    }

    #[test]
    fn test_missing_tool_mapping_rejected() {
        let mut profiles = HashMap::new();
        profiles.insert(ToolType::Search, WeightProfile::default_for(ToolType::Search));
        let err = WeightTable::from_profiles(profiles).unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingWeights { .. }));
    }

    #[test]
    fn test_overrides_replace_defaults() {
        let mut overrides = HashMap::new();
        overrides.insert(ToolType::Search, WeightProfile::new(0.25, 0.25, 0.25, 0.25));
        let table = WeightTable::with_overrides(&overrides).unwrap();
        assert_eq!(table.get(ToolType::Search).unwrap().latency, 0.25);
        assert_eq!(table.get(ToolType::GetSkill).unwrap().latency, 0.6);
    }
}
