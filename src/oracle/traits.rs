//! Oracle 抽象
//!
//! 两种模型能力各占一个 trait：DecisionOracle 在候选集中做带置信度的选择，
//! StructuredGenerator 按 JSON Schema 生成结构化值。后端（OpenAI 兼容 / Mock）都实现这两个 trait。

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 一次 oracle 决策的结果：被选项、[0,1] 置信度、文字理由
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceResult {
    pub chosen: String,
    pub score: f64,
    pub reason: String,
}

impl ConfidenceResult {
    pub fn new(chosen: impl Into<String>, score: f64, reason: impl Into<String>) -> Self {
        Self {
            chosen: chosen.into(),
            score: score.clamp(0.0, 1.0),
            reason: reason.into(),
        }
    }
}

/// 决策 oracle：给定查询与候选项（名称 -> 描述），返回最匹配的一项
///
/// 返回的 chosen 不保证是 options 的键，调用方必须自行校验（幻觉分支按致命解析错误处理）。
/// options 用 BTreeMap，候选项在 prompt 中的呈现顺序因此是确定的。
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn decide(
        &self,
        query: &str,
        options: &BTreeMap<String, String>,
    ) -> Result<ConfidenceResult, String>;
}

/// 结构化生成器：按给定 JSON Schema 产出一个值（参数 spec、参数值、步骤重写、相关性判定都走这里）
#[async_trait]
pub trait StructuredGenerator: Send + Sync {
    async fn generate(
        &self,
        system_instruction: &str,
        query: &str,
        schema: &Value,
    ) -> Result<Value, String>;
}
