//! 端点调用器
//!
//! 用已解析的操作发起真实调用，把五花八门的返回形状压成统一封套：
//! {endpoint_name, status, details, required_parameters, confidence_score}。
//! 任何失败（传输、超时、客户端内部）都折叠为 ErrorDetail，调用方看不到裸错误；
//! 每次调用输出一条结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::time::timeout;

use crate::core::ErrorDetail;
use crate::registry::ApiOperation;

/// 步骤 / 调用状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Error,
    InputRequired,
}

/// 统一调用封套
#[derive(Debug, Clone, Serialize)]
pub struct InvocationEnvelope {
    pub endpoint_name: String,
    pub status: StepStatus,
    pub details: Value,
    pub required_parameters: Map<String, Value>,
    pub confidence_score: f64,
}

impl InvocationEnvelope {
    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }
}

/// 端点调用器：施加超时并归一化返回值
pub struct EndpointInvoker {
    timeout: Duration,
}

impl EndpointInvoker {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 调用操作：user_parameters 非空时优先使用，否则用已合成 / 已知的 required_parameters
    pub async fn call(
        &self,
        operation: &ApiOperation,
        confidence: f64,
        user_parameters: Option<&Map<String, Value>>,
        required_parameters: &Map<String, Value>,
    ) -> InvocationEnvelope {
        let args = match user_parameters {
            Some(p) if !p.is_empty() => p,
            _ => required_parameters,
        };

        let endpoint_name = operation.qualified_name();
        let start = Instant::now();
        let result = timeout(self.timeout, operation.invoke(args)).await;

        let (status, details) = match result {
            Ok(Ok(value)) => normalize(value),
            Ok(Err(e)) => (
                StepStatus::Error,
                ErrorDetail::internal("InvocationError", e).to_value(),
            ),
            Err(_) => (
                StepStatus::Error,
                ErrorDetail::internal(
                    "InvocationTimeout",
                    format!("invocation exceeded {}s", self.timeout.as_secs()),
                )
                .to_value(),
            ),
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "endpoint_audit",
            "endpoint": endpoint_name,
            "ok": status == StepStatus::Success,
            "duration_ms": duration_ms,
            "arg_names": args.keys().collect::<Vec<_>>(),
        });
        tracing::info!(audit = %audit.to_string(), "endpoint");

        InvocationEnvelope {
            endpoint_name,
            status,
            details,
            required_parameters: required_parameters.clone(),
            confidence_score: confidence,
        }
    }
}

/// 归一化客户端返回值：带 error 标记的映射视为失败，其余一律成功
///
/// 客户端返回的已是 serde_json::Value，JSON 兼容性由类型系统保证；
/// 这里只需识别「包装了错误的成功返回」。
fn normalize(value: Value) -> (StepStatus, Value) {
    if let Value::Object(ref map) = value {
        let has_error_marker = map
            .get("error")
            .map(|v| !v.is_null() && v != &Value::Bool(false))
            .unwrap_or(false)
            || map.get("status").and_then(|v| v.as_str()) == Some("error");
        if has_error_marker {
            return (StepStatus::Error, value);
        }
    }
    (StepStatus::Success, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ApiClient, ApiOperation, OperationDescriptor, StaticClient};
    use serde_json::json;
    use std::sync::Arc;

    fn operation_returning(value: Value) -> ApiOperation {
        let client = StaticClient::new("demo_api", "demo").with_operation(
            OperationDescriptor::new("op", "demo op", &["x"]),
            value,
        );
        let op = client.operations()[0].clone();
        ApiOperation::new("demo_api", op, Arc::new(client))
    }

    fn failing_operation(msg: &str) -> ApiOperation {
        let client = StaticClient::new("demo_api", "demo")
            .with_failing_operation(OperationDescriptor::new("op", "demo op", &["x"]), msg);
        let op = client.operations()[0].clone();
        ApiOperation::new("demo_api", op, Arc::new(client))
    }

    fn assert_envelope_shape(env: &InvocationEnvelope) {
        let v = serde_json::to_value(env).unwrap();
        for key in [
            "endpoint_name",
            "status",
            "details",
            "required_parameters",
            "confidence_score",
        ] {
            assert!(v.get(key).is_some(), "missing key {}", key);
        }
        let status = v["status"].as_str().unwrap();
        assert!(status == "success" || status == "error");
    }

    #[tokio::test]
    async fn test_success_envelope() {
        let invoker = EndpointInvoker::new(5);
        let op = operation_returning(json!({"BTC": {"USD": 65000}}));
        let env = invoker.call(&op, 0.95, None, &Map::new()).await;
        assert!(env.is_success());
        assert_eq!(env.details["BTC"]["USD"], 65000);
        assert_eq!(env.endpoint_name, "demo_api.op");
        assert_envelope_shape(&env);
    }

    #[tokio::test]
    async fn test_client_error_becomes_error_detail() {
        let invoker = EndpointInvoker::new(5);
        let op = failing_operation("HTTP status 502");
        let env = invoker.call(&op, 0.9, None, &Map::new()).await;
        assert_eq!(env.status, StepStatus::Error);
        assert_eq!(env.details["code"], 500);
        assert_eq!(env.details["error_type"], "InvocationError");
        assert!(env.details["message"].as_str().unwrap().contains("502"));
        assert_envelope_shape(&env);
    }

    #[tokio::test]
    async fn test_error_marker_in_payload_detected() {
        let invoker = EndpointInvoker::new(5);
        let op = operation_returning(json!({"error": "rate limited", "code": 429}));
        let env = invoker.call(&op, 0.9, None, &Map::new()).await;
        assert_eq!(env.status, StepStatus::Error);
        assert_eq!(env.details["error"], "rate limited");
    }

    #[tokio::test]
    async fn test_non_object_return_is_success() {
        let invoker = EndpointInvoker::new(5);
        for value in [json!(42), json!("ok"), json!([1, 2, 3]), json!(null)] {
            let env = invoker
                .call(&operation_returning(value), 0.9, None, &Map::new())
                .await;
            assert!(env.is_success());
            assert_envelope_shape(&env);
        }
    }

    #[tokio::test]
    async fn test_user_parameters_win_over_required() {
        let client = StaticClient::new("demo_api", "demo").with_operation(
            OperationDescriptor::new("op", "demo op", &["x"]),
            json!({}),
        );
        let op_desc = client.operations()[0].clone();
        let client = Arc::new(client);
        let op = ApiOperation::new("demo_api", op_desc, client.clone());

        let invoker = EndpointInvoker::new(5);
        let mut user = Map::new();
        user.insert("x".to_string(), json!("from user"));
        let mut required = Map::new();
        required.insert("x".to_string(), json!("synthesized"));

        let env = invoker.call(&op, 0.9, Some(&user), &required).await;
        assert!(env.is_success());
        // 封套始终回显 required_parameters，供上层记录
        assert_eq!(env.required_parameters["x"], json!("synthesized"));
        assert_eq!(client.invocations(), 1);
    }
}
