//! API 注册表
//!
//! 行业树的叶子在这里解析成活客户端。注册表启动时构建一次，此后只读，
//! 由调用方显式注入（没有进程级全局量）。ApiOperation 把「API + 操作 + 客户端」
//! 绑成一等值，oracle 只负责在已知闭集里排序，从不直接命名分发目标。

pub mod builtin;
pub mod client;
pub mod tree;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::{Map, Value};

pub use builtin::{default_registry, CryptoCompareClient, StaticClient};
pub use client::{ApiClient, OperationDescriptor};
pub use tree::{default_tree, IndustryNode, IndustryTree};

use crate::core::EngineError;

/// API 注册表：标识 -> 客户端，启动时填充，此后只读
#[derive(Default)]
pub struct ApiRegistry {
    clients: HashMap<String, Arc<dyn ApiClient>>,
}

impl ApiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, client: impl ApiClient + 'static) {
        let name = client.name().to_string();
        self.clients.insert(name, Arc::new(client));
    }

    pub fn register_arc(&mut self, client: Arc<dyn ApiClient>) {
        self.clients.insert(client.name().to_string(), client);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ApiClient>> {
        self.clients.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.clients.contains_key(name)
    }

    pub fn api_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.keys().cloned().collect();
        names.sort();
        names
    }

    /// 返回指定 API 的操作映射（名称 -> 描述），供 oracle 端点选择
    pub fn operation_map(&self, api_name: &str) -> Result<BTreeMap<String, String>, EngineError> {
        let client = self
            .get(api_name)
            .ok_or_else(|| EngineError::ApiNotFound(api_name.to_string()))?;
        Ok(client
            .operations()
            .iter()
            .map(|op| (op.name.clone(), op.description.clone()))
            .collect())
    }
}

/// 一等操作值：API 标识 + 静态描述符 + 客户端句柄
#[derive(Clone)]
pub struct ApiOperation {
    pub api_name: String,
    pub descriptor: OperationDescriptor,
    client: Arc<dyn ApiClient>,
}

impl ApiOperation {
    pub fn new(
        api_name: impl Into<String>,
        descriptor: OperationDescriptor,
        client: Arc<dyn ApiClient>,
    ) -> Self {
        Self {
            api_name: api_name.into(),
            descriptor,
            client,
        }
    }

    /// 如 crypto_compare_api.get_price，用于日志与 prompt
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.api_name, self.descriptor.name)
    }

    pub async fn invoke(&self, args: &Map<String, Value>) -> Result<Value, String> {
        self.client.invoke(&self.descriptor.name, args).await
    }
}

impl std::fmt::Debug for ApiOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiOperation")
            .field("api_name", &self.api_name)
            .field("operation", &self.descriptor.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_map_lists_all_operations() {
        let registry = default_registry();
        let map = registry.operation_map("crypto_compare_api").unwrap();
        assert!(map.contains_key("get_price"));
        assert!(matches!(
            registry.operation_map("nope"),
            Err(EngineError::ApiNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_api_operation_invokes_client() {
        let client = StaticClient::new("demo_api", "demo")
            .with_operation(
                OperationDescriptor::new("ping", "ping the demo", &[]),
                json!({"pong": true}),
            );
        let op = client.operations()[0].clone();
        let client: Arc<dyn ApiClient> = Arc::new(client);
        let operation = ApiOperation::new("demo_api", op, client);

        assert_eq!(operation.qualified_name(), "demo_api.ping");
        let out = operation.invoke(&Map::new()).await.unwrap();
        assert_eq!(out["pong"], true);
    }
}
