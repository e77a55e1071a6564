use crate::config::model::Config;
use crate::error::ConfigurationError;

/// 默认配置文件路径，可用 `TOOLROUTE_CONFIG` 覆盖
pub const DEFAULT_CONFIG_PATH: &str = "toolroute.toml";

pub fn load_config() -> Result<Config, ConfigurationError> {
    let path =
        std::env::var("TOOLROUTE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    load_config_from_path(&path)
}

pub fn load_config_from_path(config_path: &str) -> Result<Config, ConfigurationError> {
    let config_str =
        std::fs::read_to_string(config_path).map_err(|source| ConfigurationError::Io {
            path: config_path.to_string(),
            source,
        })?;
    let config = load_config_from_str(&config_str)?;
    tracing::info!(
        "Loaded config from {} ({} experts)",
        config_path,
        config.experts.len()
    );
    Ok(config)
}

/// 解析并校验配置
pub fn load_config_from_str(config_str: &str) -> Result<Config, ConfigurationError> {
    let config: Config = toml::from_str(config_str)?;
    config.validate()?;
    Ok(config)
}
