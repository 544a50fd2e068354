//! Canopy - 置信度驱动的 API 树遍历与动态分发引擎
//!
//! 入口：初始化日志、加载配置、装配默认行业树与注册表，跑一组演示步骤并输出报告。

use std::sync::Arc;

use anyhow::Context;
use serde_json::json;

use canopy::config::load_config;
use canopy::executor::{Step, StepExecutor};
use canopy::invoker::EndpointInvoker;
use canopy::oracle::{DecisionOracle, MockOracle, OpenAiOracle, StructuredGenerator};
use canopy::persona::{MemoryRetriever, SelfReflection};
use canopy::registry::{default_registry, default_tree};
use canopy::synth::ParameterSynthesizer;
use canopy::traversal::TraversalEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    canopy::observability::init();

    let config = load_config(None).context("Failed to load config")?;

    // oracle 后端：mock 离线可跑，openai 走任意兼容端点
    let (oracle, generator): (Arc<dyn DecisionOracle>, Arc<dyn StructuredGenerator>) =
        match config.oracle.provider.as_str() {
            "openai" => {
                let backend = Arc::new(OpenAiOracle::new(
                    config.oracle.base_url.as_deref(),
                    &config.oracle.model,
                    std::env::var("OPENAI_API_KEY").ok().as_deref(),
                ));
                (backend.clone(), backend)
            }
            _ => {
                let backend = Arc::new(MockOracle);
                (backend.clone(), backend)
            }
        };

    let tree = Arc::new(default_tree());
    let registry = Arc::new(default_registry());
    let traversal = Arc::new(TraversalEngine::new(
        tree,
        registry,
        oracle,
        config.thresholds.clone(),
        config.retry.clone(),
    ));

    let reflection = SelfReflection {
        specific_needs: vec!["track cryptocurrency prices".to_string()],
        available_apis: vec!["crypto_compare_api".to_string()],
        goals: vec!["stay on top of the BTC market".to_string()],
        workstreams: vec![],
    };
    let synthesizer = ParameterSynthesizer::new(
        generator.clone(),
        Arc::new(MemoryRetriever::new()),
        reflection,
        config.thresholds.parameter_accept,
    );

    let executor = StepExecutor::new(
        traversal,
        synthesizer,
        EndpointInvoker::new(config.invoke.timeout_secs),
        generator,
        config.thresholds.clone(),
        config.retry.clone(),
    );

    let steps = vec![
        Step::new("Get the current Bitcoin price in USD", "crypto_compare_api")
            .with_parameter("fsym", json!("BTC"))
            .with_parameter("tsyms", json!("USD")),
        Step::new(
            "List the top cryptocurrencies by trading volume",
            "crypto_compare_api",
        )
        .with_parameter("tsym", json!("USD"))
        .with_parameter("limit", json!(5)),
    ];

    let report = executor
        .execute_steps(&steps, &config.app.default_session)
        .await;

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to render report")?
    );

    Ok(())
}
