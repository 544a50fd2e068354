//! 执行循环层：步骤类型、执行记录与带再生成的主循环

pub mod loop_;
mod regen;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use loop_::StepExecutor;

use crate::invoker::StepStatus;

/// 一个执行步骤：自然语言描述 + 声明的 API 标识 + 已知参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub api_name: String,
    /// 调用方已经知道的参数值（缺的才交给合成器）
    #[serde(default)]
    pub known_parameters: Map<String, Value>,
}

impl Step {
    pub fn new(name: impl Into<String>, api_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_name: api_name.into(),
            known_parameters: Map::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.known_parameters.insert(name.into(), value);
        self
    }
}

/// 单步执行记录：追加进报告后不再修改
#[derive(Debug, Clone, Serialize)]
pub struct StepExecutionRecord {
    pub step_name: String,
    pub endpoint_name: Option<String>,
    pub status: StepStatus,
    pub details: Value,
    pub required_parameters: Map<String, Value>,
    pub confidence_score: f64,
}

/// 整次运行的执行报告：每个输入步骤恰好一条记录，外加按 API 聚合的待补参数提示
#[derive(Debug, Serialize)]
pub struct ExecutionReport {
    pub run_id: String,
    pub started_at: i64,
    pub completed_at: i64,
    pub steps_execution: Vec<StepExecutionRecord>,
    pub user_prompts: std::collections::BTreeMap<String, std::collections::BTreeMap<String, String>>,
}

impl ExecutionReport {
    /// 是否全部步骤成功
    pub fn all_succeeded(&self) -> bool {
        self.steps_execution
            .iter()
            .all(|r| r.status == StepStatus::Success)
    }
}
