//! Toolroute CLI Tool
//!
//! Command line interface for validating toolroute configuration and
//! simulating routing against it

use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use rand::Rng;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use toolroute_core::config::loader::DEFAULT_CONFIG_PATH;
use toolroute_core::{Config, ToolExecutor, ToolRequest, ToolType};
use toolroute_relay::{FallbackExecutor, Router};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "toolroute-cli")]
#[command(about = "A CLI tool for toolroute configuration and routing simulation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration file
    ValidateConfig {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,
    },
    /// Generate example configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "toolroute_example.toml")]
        output: String,
        /// Dump every setting with its default value instead of the example
        #[arg(long)]
        defaults: bool,
    },
    /// Probe every configured expert once with simulated executors
    HealthCheck {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,
    },
    /// Route simulated requests and print the decisions
    Route {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,
        /// Tool to call
        #[arg(short, long)]
        tool: String,
        /// Number of requests to send
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
        /// Simulated failure probability for every expert
        #[arg(long, default_value_t = 0.0)]
        failure_rate: f64,
    },
    /// Run a mixed simulated workload and show routing metrics
    Metrics {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,
        /// Requests per tool
        #[arg(short = 'n', long, default_value_t = 20)]
        requests: usize,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Show weight profiles and current distribution weights
    Weights {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // 完全依赖RUST_LOG环境变量
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    debug!("toolroute-cli {} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::ValidateConfig { config } => {
            println!("Validating configuration file: {}", config);
            match toolroute_core::load_config_from_path(&config) {
                Ok(cfg) => {
                    let enabled = cfg.experts.values().filter(|e| e.enabled).count();
                    println!("✅ Configuration is valid");
                    println!("  - {} experts configured ({} enabled)", cfg.experts.len(), enabled);
                    println!("  - {} weight overrides", cfg.weights.len());
                    println!("  - rollout at {}%", cfg.flags.rollout_percentage);
                }
                Err(e) => {
                    eprintln!("❌ Configuration validation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::GenerateConfig { output, defaults } => {
            println!("Generating configuration file: {}", output);
            generate_config_file(&output, defaults)?;
            println!("✅ Configuration file generated successfully");
        }
        Commands::HealthCheck { config } => {
            let cfg = toolroute_core::load_config_from_path(&config)?;
            let router = simulated_router(cfg, 0.0)?;
            let results = router.health_monitor().check_now().await;
            info!("Probed {} experts", results.len());
            for result in &results {
                println!(
                    "{} {} ({}ms)",
                    if result.success { "🟢" } else { "🔴" },
                    result.expert_id,
                    result.latency.as_millis()
                );
            }
            let summary = router.manager().health_summary();
            println!("{}", summary);
            println!("Routable: {:.0}%", summary.routable_ratio() * 100.0);
        }
        Commands::Route {
            config,
            tool,
            count,
            failure_rate,
        } => {
            let tool: ToolType = tool.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            let cfg = toolroute_core::load_config_from_path(&config)?;
            let router = simulated_router(cfg, failure_rate)?;
            run_route(&router, tool, count).await?;
        }
        Commands::Metrics {
            config,
            requests,
            format,
        } => {
            let cfg = toolroute_core::load_config_from_path(&config)?;
            let router = simulated_router(cfg, 0.02)?;
            show_metrics(&router, requests, format).await?;
        }
        Commands::Weights { config } => {
            let cfg = toolroute_core::load_config_from_path(&config)?;
            let router = simulated_router(cfg, 0.0)?;
            show_weights(&router);
        }
    }

    Ok(())
}

/// 模拟执行器：按声明的平均延迟加抖动休眠，按概率失败
struct SimulatedExecutor {
    name: String,
    avg_latency_ms: f64,
    failure_rate: f64,
}

#[async_trait]
impl ToolExecutor for SimulatedExecutor {
    async fn execute(&self, request: &ToolRequest) -> anyhow::Result<Value> {
        let (delay, fail) = {
            let mut rng = rand::rng();
            let jitter = rng.random_range(0.5..1.5);
            (
                Duration::from_secs_f64(self.avg_latency_ms.max(0.0) * jitter / 1000.0),
                rng.random_bool(self.failure_rate.clamp(0.0, 1.0)),
            )
        };

        tokio::time::sleep(delay).await;
        if fail {
            anyhow::bail!("simulated failure on '{}'", self.name);
        }
        Ok(json!({
            "handled_by": self.name,
            "tool": request.tool,
            "request_id": request.request_id,
        }))
    }
}

fn simulated_router(config: Config, failure_rate: f64) -> Result<Router> {
    let mut executors: HashMap<String, Arc<dyn ToolExecutor>> = HashMap::new();
    for (id, expert) in &config.experts {
        executors.insert(
            id.clone(),
            Arc::new(SimulatedExecutor {
                name: id.clone(),
                avg_latency_ms: expert.avg_latency_ms,
                failure_rate,
            }),
        );
    }

    let baseline_ms = config
        .settings
        .metrics
        .baseline_latency_ms
        .unwrap_or(config.settings.latency_baseline_ms);
    let fallback = FallbackExecutor::new().with_default(Arc::new(SimulatedExecutor {
        name: "direct".to_string(),
        avg_latency_ms: baseline_ms,
        failure_rate: 0.0,
    }));

    let router = Router::new(config, executors, fallback)?;
    info!(
        "Simulated router ready (failure rate {:.2}, fallback timeout {}ms)",
        failure_rate,
        router.settings().fallback_timeout_ms
    );
    Ok(router)
}

fn sample_request(tool: ToolType, index: usize) -> ToolRequest {
    let mut arguments = Map::new();
    arguments.insert("query".to_string(), json!(format!("sample-{}", index % 5)));
    ToolRequest::new(format!("cli-{}-{}", tool, index), tool, arguments)
}

async fn run_route(router: &Router, tool: ToolType, count: usize) -> Result<()> {
    for i in 0..count {
        let request = sample_request(tool, i);
        let decision = router.route(&request).await?;
        println!(
            "{} -> {} (confidence {:.2}, cache {})",
            request.request_id,
            decision.expert_id,
            decision.confidence,
            if decision.cache_hit { "hit" } else { "miss" }
        );
        println!("  {}", decision.rationale);
        for alt in &decision.alternatives {
            println!("  alt {} {:.3}: {}", alt.expert_id, alt.score, alt.reason);
        }

        let response = router.execute_with_routing(&request).await?;
        println!(
            "  {} via {} in {}ms (attempts {})",
            if response.success { "✅" } else { "❌" },
            response.metadata.expert_id,
            response.metadata.total_latency.as_millis(),
            response.metadata.attempts
        );
    }
    Ok(())
}

/// 显示路由指标
async fn show_metrics(router: &Router, requests: usize, format: OutputFormat) -> Result<()> {
    for tool in ToolType::ALL {
        for i in 0..requests {
            router.execute_with_routing(&sample_request(tool, i)).await?;
        }
    }

    match format {
        OutputFormat::Json => {
            let snapshot = router.metrics().snapshot();
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        OutputFormat::Text => {
            let snapshot = router.metrics().snapshot();
            println!("📊 Routing Metrics");
            println!("==================");
            println!("Total Requests: {}", snapshot.total_requests);
            println!("Error Rate: {:.2}%", snapshot.error_rate * 100.0);
            println!("Fallback Rate: {:.2}%", snapshot.fallback_rate * 100.0);
            println!("Cache Hit Rate: {:.2}%", snapshot.cache_hit_rate * 100.0);
            println!(
                "Total Latency: avg {:.1}ms, p95 {:.1}ms",
                snapshot.total_latency.avg_ms, snapshot.total_latency.p95_ms
            );
            if let Some(ratio) = snapshot.speed_improvement_ratio {
                println!("Speed Improvement: {:.2}x", ratio);
            }
            println!("{}", router.cache().stats());
            println!();

            for alert in router.alerts() {
                println!("⚠️  {:?}: {}", alert.severity, alert.message);
            }
            println!();
            println!("{}", router.export_metrics());
        }
    }
    Ok(())
}

fn show_weights(router: &Router) {
    for tool in ToolType::ALL {
        let profile = router.weight_profile(tool);
        println!(
            "{}: accuracy {:.2}, latency {:.2}, reliability {:.2}, efficiency {:.2} (idempotent: {})",
            tool,
            profile.accuracy,
            profile.latency,
            profile.reliability,
            profile.efficiency,
            router.is_idempotent(tool)
        );
        for (expert_id, weight) in router.manager().distribution_weights(tool) {
            println!("  {} {:.3}", expert_id, weight);
        }
    }
}

/// 生成配置文件
fn generate_config_file(output_path: &str, defaults: bool) -> Result<()> {
    let config_content = if defaults {
        toml::to_string_pretty(&Config::default())?
    } else {
        r#"# toolroute configuration example

[settings]
fallback_enabled = true
overload_threshold = 0.9
latency_baseline_ms = 200.0
execution_timeout_ms = 5000
max_retries = 2
decision_budget_ms = 50

[settings.health]
probe_interval_ms = 5000
unhealthy_threshold = 3
recovery_threshold = 3

[settings.circuit_breaker]
error_rate_threshold = 0.1
window_size = 50
cool_down_ms = 30000

[settings.cache]
max_entries = 1000
ttl_seconds = 60

[settings.metrics]
baseline_latency_ms = 250.0

[flags]
rollout_percentage = 100

[flags.tools]
install = true

[weights.search]
accuracy = 0.7
latency = 0.2
reliability = 0.05
efficiency = 0.05

[tools.validate]
idempotent = true

[experts.precise]
type = "accuracy"
tools = ["search", "recommend", "validate"]
max_concurrency = 8
avg_latency_ms = 120.0
accuracy_score = 0.95

[experts.fast]
type = "latency"
tools = ["get_skill", "list_skills", "search"]
max_concurrency = 32
avg_latency_ms = 8.0
accuracy_score = 0.8

[experts.general]
type = "balanced"
tools = ["search", "get_skill", "list_skills", "install", "uninstall", "validate", "recommend"]
max_concurrency = 16
avg_latency_ms = 60.0
accuracy_score = 0.85

[experts.installer]
type = "specialized"
tools = ["install"]
max_concurrency = 4
avg_latency_ms = 40.0
accuracy_score = 0.9
priority = 10
"#
        .to_string()
    };

    std::fs::write(output_path, &config_content)?;
    info!("Wrote {} bytes of configuration to {}", config_content.len(), output_path);
    Ok(())
}
