use crate::config::loader::load_config_from_str;
use crate::config::model::*;
use crate::error::ConfigurationError;
use crate::types::{ExpertType, ToolType, WeightProfile, FALLBACK_EXPERT_ID};

fn create_test_expert(tools: &[&str]) -> ExpertConfig {
    ExpertConfig {
        expert_type: ExpertType::Balanced,
        tools: tools.iter().map(|t| t.to_string()).collect(),
        max_concurrency: 4,
        avg_latency_ms: 50.0,
        accuracy_score: 0.9,
        priority: 0,
        weight: 1.0,
        enabled: true,
    }
}

fn create_test_config() -> Config {
    let mut config = Config::default();
    config
        .experts
        .insert("search-pro".to_string(), create_test_expert(&["search", "recommend"]));
    config
        .experts
        .insert("installer".to_string(), create_test_expert(&["install", "uninstall"]));
    config
}

#[test]
fn test_valid_config() {
    let config = create_test_config();
    assert!(config.validate().is_ok());
}

#[test]
fn test_default_settings() {
    let settings = RouterSettings::default();
    assert!(settings.fallback_enabled);
    assert_eq!(settings.overload_threshold, 0.9);
    assert_eq!(settings.decision_budget_ms, 50);
    assert_eq!(settings.execution_timeout_ms, 5000);
    assert_eq!(settings.health.unhealthy_threshold, 3);
    assert_eq!(settings.health.degraded_success_rate, 0.8);
    assert_eq!(settings.circuit_breaker.error_rate_threshold, 0.1);
    assert_eq!(settings.circuit_breaker.cool_down_ms, 30_000);
    assert_eq!(settings.cache.ttl_seconds, 60);
    assert_eq!(settings.cache.max_entries, 1000);
    assert_eq!(settings.alerts.min_speed_improvement, 2.0);
}

#[test]
fn test_parse_minimal_toml() {
    let config = load_config_from_str(
        r#"
        [experts.fast]
        type = "latency"
        tools = ["get_skill", "list_skills"]
        avg_latency_ms = 20.0
        accuracy_score = 0.7
        "#,
    )
    .unwrap();

    let fast = &config.experts["fast"];
    assert_eq!(fast.expert_type, ExpertType::Latency);
    assert_eq!(fast.max_concurrency, 10);
    assert_eq!(fast.weight, 1.0);
    assert!(fast.enabled);
    assert!(config.flags.master);
    assert_eq!(config.flags.rollout_percentage, 100);
}

#[test]
fn test_parse_full_toml() {
    let config = load_config_from_str(
        r#"
        [settings]
        fallback_enabled = false
        decision_budget_ms = 20

        [settings.circuit_breaker]
        cool_down_ms = 1000

        [settings.cache]
        scope_by_caller = false

        [flags]
        master = true
        rollout_percentage = 25
        tools = { install = false }
        tiers = { free = false }

        [weights.search]
        accuracy = 0.5
        latency = 0.5
        reliability = 0.0
        efficiency = 0.0

        [tools.validate]
        idempotent = false

        [experts.accurate]
        type = "accuracy"
        tools = ["search"]
        avg_latency_ms = 300.0
        accuracy_score = 0.95
        priority = 5
        "#,
    )
    .unwrap();

    assert!(!config.settings.fallback_enabled);
    assert_eq!(config.settings.decision_budget_ms, 20);
    assert_eq!(config.settings.circuit_breaker.cool_down_ms, 1000);
    // 未覆盖的字段保持默认
    assert_eq!(config.settings.circuit_breaker.window_size, 50);
    assert!(!config.settings.cache.scope_by_caller);
    assert_eq!(config.flags.rollout_percentage, 25);
    assert_eq!(config.flags.tools.get("install"), Some(&false));

    let table = config.weight_table().unwrap();
    assert_eq!(
        table.get(ToolType::Search),
        Some(&WeightProfile::new(0.5, 0.5, 0.0, 0.0))
    );
    assert_eq!(
        table.get(ToolType::Install),
        Some(&WeightProfile::default_for(ToolType::Install))
    );

    assert!(!config.is_idempotent(ToolType::Validate));
    assert!(config.is_idempotent(ToolType::Search));
    assert!(!config.is_idempotent(ToolType::Install));
}

#[test]
fn test_unknown_tool_in_expert() {
    let mut config = create_test_config();
    config
        .experts
        .insert("broken".to_string(), create_test_expert(&["teleport"]));

    match config.validate() {
        Err(ConfigurationError::UnknownTool { tool, .. }) => assert_eq!(tool, "teleport"),
        other => panic!("expected UnknownTool, got {other:?}"),
    }
}

#[test]
fn test_expert_without_tools() {
    let mut config = create_test_config();
    config
        .experts
        .insert("empty".to_string(), create_test_expert(&[]));

    assert!(matches!(
        config.validate(),
        Err(ConfigurationError::InvalidExpert { .. })
    ));
}

#[test]
fn test_reserved_expert_id() {
    let mut config = create_test_config();
    config
        .experts
        .insert(FALLBACK_EXPERT_ID.to_string(), create_test_expert(&["search"]));

    assert!(matches!(
        config.validate(),
        Err(ConfigurationError::InvalidExpert { .. })
    ));
}

#[test]
fn test_invalid_expert_values() {
    let mut config = create_test_config();
    config.experts.get_mut("installer").unwrap().accuracy_score = 1.5;
    assert!(config.validate().is_err());

    let mut config = create_test_config();
    config.experts.get_mut("installer").unwrap().max_concurrency = 0;
    assert!(config.validate().is_err());

    let mut config = create_test_config();
    config.experts.get_mut("installer").unwrap().weight = 0.0;
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_weight_override() {
    let mut config = create_test_config();
    config
        .weights
        .insert("search".to_string(), WeightProfile::new(1.2, 0.0, 0.0, 0.0));

    assert!(matches!(
        config.validate(),
        Err(ConfigurationError::InvalidWeight { .. })
    ));

    let mut config = create_test_config();
    config
        .weights
        .insert("search".to_string(), WeightProfile::new(0.0, 0.0, 0.0, 0.0));

    assert!(matches!(
        config.validate(),
        Err(ConfigurationError::ZeroWeightProfile { .. })
    ));
}

#[test]
fn test_invalid_settings() {
    let mut config = create_test_config();
    config.settings.overload_threshold = 0.0;
    assert!(matches!(
        config.validate(),
        Err(ConfigurationError::InvalidSetting { .. })
    ));

    let mut config = create_test_config();
    config.settings.circuit_breaker.min_requests = 100;
    assert!(config.validate().is_err());

    let mut config = create_test_config();
    config.flags.rollout_percentage = 101;
    assert!(config.validate().is_err());

    let mut config = create_test_config();
    config.flags.tools.insert("bogus".to_string(), true);
    assert!(config.validate().is_err());
}

#[test]
fn test_expert_definitions_skip_disabled() {
    let mut config = create_test_config();
    config.experts.get_mut("installer").unwrap().enabled = false;

    let definitions = config.expert_definitions().unwrap();
    assert_eq!(definitions.len(), 1);
    assert_eq!(definitions[0].id, "search-pro");
    assert!(definitions[0]
        .capabilities
        .supported_tools
        .contains(&ToolType::Recommend));
    assert!(!definitions[0].is_single_tool_specialist());
}

#[test]
fn test_expert_definitions_sorted_by_id() {
    let config = create_test_config();
    let ids: Vec<_> = config
        .expert_definitions()
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .collect();
    assert_eq!(ids, vec!["installer", "search-pro"]);
}

#[test]
fn test_parse_error() {
    assert!(matches!(
        load_config_from_str("[experts.bad"),
        Err(ConfigurationError::Parse(_))
    ));
}
