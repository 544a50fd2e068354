//! API 客户端抽象
//!
//! 每个客户端静态声明自己的操作表（名称 / 描述 / 形参名），invoke 按操作名分发。
//! 操作表在编译期写死，遍历引擎依赖的「操作映射」因此无需任何运行时反射。

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

/// 一个可调用操作的静态描述：名称、供 oracle 理解的描述、形参名列表（不含接收者）
#[derive(Debug, Clone, Serialize)]
pub struct OperationDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<String>,
}

impl OperationDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: parameters.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// API 客户端 trait：名称、描述（供 oracle 理解）、静态操作表、按名调用
///
/// invoke 返回 JSON 兼容数据；传输层失败以 Err(String) 表示，
/// 由 EndpointInvoker 统一转为 ErrorDetail 封套。
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// API 标识（注册表中的键，如 crypto_compare_api）
    fn name(&self) -> &str;

    /// 用途描述（供 oracle 在树遍历与端点选择时理解）
    fn description(&self) -> &str;

    /// 静态操作表
    fn operations(&self) -> &[OperationDescriptor];

    /// 调用指定操作，args 为参数名 -> JSON 值
    async fn invoke(&self, operation: &str, args: &Map<String, Value>) -> Result<Value, String>;
}
