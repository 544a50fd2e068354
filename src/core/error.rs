//! 引擎错误类型与统一错误封套
//!
//! 两条错误通道：可恢复结果（低置信度、缺参数、调用失败）留在返回值的 status 里，
//! 真正的致命错误（树 / 注册表构建失败）才作为 EngineError 向上传播。
//! ErrorDetail 是对外的统一错误封套，调用方永远不会看到裸异常。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 引擎运行过程中可能出现的错误（解析、低置信度、调用、配置等）
#[derive(Error, Debug)]
pub enum EngineError {
    /// Oracle 选择了树中不存在的分支名，对当前解析是致命的，不再重试
    #[error("Branch not found in tree: {0}")]
    BranchNotFound(String),

    #[error("API not found in registry: {0}")]
    ApiNotFound(String),

    #[error("No operations available for API: {0}")]
    NoOperations(String),

    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    /// 重试预算耗尽后置信度仍未达标
    #[error("Low confidence after retries: {0:.2}")]
    LowConfidence(f64),

    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Invocation failed: {0}")]
    Invocation(String),

    /// 树或注册表构建失败（启动期错误，直接传播）
    #[error("Registry build error: {0}")]
    RegistryBuild(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl EngineError {
    /// 错误分类名，写入 ErrorDetail.error_type
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::BranchNotFound(_) => "BranchNotFound",
            EngineError::ApiNotFound(_) => "ApiNotFound",
            EngineError::NoOperations(_) => "NoOperations",
            EngineError::OperationNotFound(_) => "OperationNotFound",
            EngineError::LowConfidence(_) => "LowConfidenceError",
            EngineError::Oracle(_) => "OracleError",
            EngineError::Invocation(_) => "InvocationError",
            EngineError::RegistryBuild(_) => "RegistryBuildError",
            EngineError::Config(_) => "ConfigError",
        }
    }
}

/// 统一错误封套：无论失败来自 HTTP、Oracle 还是调用本身，形状一致
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorDetail {
    pub code: u16,
    pub error_type: String,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(code: u16, error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// 兜底封套：未预期的失败统一映射为 code 500
    pub fn internal(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(500, error_type, message)
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({
                "code": 500,
                "error_type": "SerializationError",
                "message": "failed to serialize error detail",
            })
        })
    }
}

impl From<&EngineError> for ErrorDetail {
    fn from(e: &EngineError) -> Self {
        ErrorDetail::internal(e.kind(), e.to_string())
    }
}
