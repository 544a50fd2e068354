//! 参数合成器
//!
//! 对缺失参数：先让生成器逐个产出参数 spec（类型 / 描述 / 是否必填，schemars 出 schema），
//! 再按用户画像上下文一次性合成全部候选值，最后对每个值做一次独立的置信度复核。
//! 单次生成不可信——模型输出没有类型与领域校验，复核门槛把坏参数挡在真实 API 调用之前。
//! 任何参数缺失或复核不过，整个调用降级为「需要用户输入」，绝不猜着调。

use std::collections::BTreeMap;
use std::sync::Arc;

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::core::EngineError;
use crate::oracle::StructuredGenerator;
use crate::persona::{ContextRetriever, SelfReflection};
use crate::registry::ApiOperation;

/// 参数类型：只允许三种标量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Integer,
    Boolean,
}

/// 单个参数的 spec（按需生成，调用之间不缓存）
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ParameterSpec {
    pub name: String,
    /// 参数类型：string / integer / boolean
    #[serde(rename = "type")]
    pub kind: ParamKind,
    pub description: String,
    pub required: bool,
}

/// 生成器产出的 spec 片段（name 由调用方补上）
#[derive(Debug, Deserialize, JsonSchema)]
struct ParameterSpecDraft {
    #[serde(rename = "type")]
    kind: ParamKind,
    description: String,
    required: bool,
}

/// 参数合成结果：全部通过才 Ready，否则带上每个待补参数的提示语
#[derive(Debug)]
pub enum ArgumentOutcome {
    Ready(Map<String, Value>),
    NeedsInput(BTreeMap<String, String>),
}

impl ArgumentOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, ArgumentOutcome::Ready(_))
    }
}

/// 复核回复的 JSON 形状
#[derive(Debug, Deserialize)]
struct ValidationReply {
    confidence_score: f64,
    #[serde(default)]
    reason: String,
}

/// 参数合成器：结构化生成 + 画像检索 + 独立复核门槛
pub struct ParameterSynthesizer {
    generator: Arc<dyn StructuredGenerator>,
    retriever: Arc<dyn ContextRetriever>,
    reflection: SelfReflection,
    accept_threshold: f64,
}

impl ParameterSynthesizer {
    pub fn new(
        generator: Arc<dyn StructuredGenerator>,
        retriever: Arc<dyn ContextRetriever>,
        reflection: SelfReflection,
        accept_threshold: f64,
    ) -> Self {
        Self {
            generator,
            retriever,
            reflection,
            accept_threshold,
        }
    }

    /// 画像上下文：自省记录的结构化字段 + 按会话检索的自由文本
    async fn persona_context(&self, operation: &ApiOperation, session_id: &str) -> String {
        let mut parts = vec![self.reflection.summary()];
        let query = format!(
            "What does the user likely want to call {} for?",
            operation.qualified_name()
        );
        match self.retriever.retrieve_user_info(&query, session_id).await {
            Ok(info) if !info.is_empty() => parts.push(info),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "persona retrieval failed, continuing without it"),
        }
        parts.retain(|p| !p.is_empty());
        parts.join("\n\n")
    }

    /// 为单个缺失参数生成 spec
    async fn parameter_spec(
        &self,
        operation: &ApiOperation,
        name: &str,
    ) -> Result<ParameterSpec, EngineError> {
        let schema = serde_json::to_value(schema_for!(ParameterSpecDraft))
            .map_err(|e| EngineError::Oracle(e.to_string()))?;
        let query = format!(
            "Parameter `{}` of operation `{}` ({})",
            name,
            operation.qualified_name(),
            operation.descriptor.description
        );
        let value = self
            .generator
            .generate(
                "Describe this API parameter. Type must be one of string, integer, boolean.",
                &query,
                &schema,
            )
            .await
            .map_err(EngineError::Oracle)?;
        let draft: ParameterSpecDraft = serde_json::from_value(value)
            .map_err(|e| EngineError::Oracle(format!("bad parameter spec: {}", e)))?;
        Ok(ParameterSpec {
            name: name.to_string(),
            kind: draft.kind,
            description: draft.description,
            required: draft.required,
        })
    }

    /// 按画像上下文一次性合成全部候选值
    async fn candidate_values(
        &self,
        operation: &ApiOperation,
        specs: &[ParameterSpec],
        persona: &str,
    ) -> Result<Map<String, Value>, EngineError> {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for spec in specs {
            let type_name = match spec.kind {
                ParamKind::String => "string",
                ParamKind::Integer => "integer",
                ParamKind::Boolean => "boolean",
            };
            properties.insert(
                spec.name.clone(),
                json!({"type": type_name, "description": spec.description}),
            );
            if spec.required {
                required.push(Value::String(spec.name.clone()));
            }
        }
        let schema = json!({
            "type": "object",
            "properties": properties,
            "required": required,
        });

        let system = format!(
            "Generate concrete argument values for an API call on behalf of this user.\n\n\
             User context:\n{}",
            persona
        );
        let query = format!(
            "Operation `{}`: {}",
            operation.qualified_name(),
            operation.descriptor.description
        );
        let value = self
            .generator
            .generate(&system, &query, &schema)
            .await
            .map_err(EngineError::Oracle)?;
        match value {
            Value::Object(map) => Ok(map),
            other => Err(EngineError::Oracle(format!(
                "expected object of argument values, got: {}",
                other
            ))),
        }
    }

    /// 独立复核：这个值对这个用户、这个参数语义到底合不合适
    async fn validate_value(
        &self,
        spec: &ParameterSpec,
        value: &Value,
        persona: &str,
    ) -> Result<f64, EngineError> {
        let schema = json!({
            "type": "object",
            "properties": {
                "confidence_score": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                "reason": {"type": "string"}
            },
            "required": ["confidence_score"]
        });
        let system = format!(
            "Score how well a generated argument value fits the user's context and the \
             parameter's meaning, from 0.0 to 1.0.\n\nUser context:\n{}",
            persona
        );
        let query = format!(
            "Parameter `{}` ({}): value {}",
            spec.name, spec.description, value
        );
        let reply = self
            .generator
            .generate(&system, &query, &schema)
            .await
            .map_err(EngineError::Oracle)?;
        let reply: ValidationReply = serde_json::from_value(reply)
            .map_err(|e| EngineError::Oracle(format!("bad validation reply: {}", e)))?;
        tracing::debug!(
            parameter = %spec.name,
            score = reply.confidence_score,
            reason = %reply.reason,
            "parameter validation"
        );
        Ok(reply.confidence_score.clamp(0.0, 1.0))
    }

    /// 为缺失参数合成实参：全部通过复核才 Ready，否则返回逐参数的用户提示
    pub async fn generate_arguments(
        &self,
        operation: &ApiOperation,
        missing: &[String],
        session_id: &str,
    ) -> Result<ArgumentOutcome, EngineError> {
        if missing.is_empty() {
            return Ok(ArgumentOutcome::Ready(Map::new()));
        }

        let persona = self.persona_context(operation, session_id).await;

        let mut specs = Vec::with_capacity(missing.len());
        for name in missing {
            specs.push(self.parameter_spec(operation, name).await?);
        }

        let candidates = self.candidate_values(operation, &specs, &persona).await?;

        let mut accepted = Map::new();
        let mut prompts = BTreeMap::new();
        for spec in &specs {
            match candidates.get(&spec.name) {
                Some(value) => {
                    let score = self.validate_value(spec, value, &persona).await?;
                    if score >= self.accept_threshold {
                        accepted.insert(spec.name.clone(), value.clone());
                    } else {
                        prompts.insert(
                            spec.name.clone(),
                            format!(
                                "Please provide a value for `{}` ({})",
                                spec.name, spec.description
                            ),
                        );
                    }
                }
                None => {
                    prompts.insert(
                        spec.name.clone(),
                        format!(
                            "Please provide a value for `{}` ({})",
                            spec.name, spec.description
                        ),
                    );
                }
            }
        }

        if prompts.is_empty() {
            Ok(ArgumentOutcome::Ready(accepted))
        } else {
            Ok(ArgumentOutcome::NeedsInput(prompts))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::ScriptedGenerator;
    use crate::persona::MemoryRetriever;
    use crate::registry::{ApiClient, OperationDescriptor, StaticClient};

    fn price_operation() -> ApiOperation {
        let client = StaticClient::new("crypto_compare_api", "crypto prices").with_operation(
            OperationDescriptor::new("get_price", "current price", &["fsym", "tsyms"]),
            json!({}),
        );
        let op = client.operations()[0].clone();
        ApiOperation::new("crypto_compare_api", op, Arc::new(client))
    }

    fn spec_value(desc: &str) -> Value {
        json!({"type": "string", "description": desc, "required": true})
    }

    fn synthesizer(generator: Arc<ScriptedGenerator>) -> ParameterSynthesizer {
        ParameterSynthesizer::new(
            generator,
            Arc::new(MemoryRetriever::new()),
            SelfReflection::default(),
            0.7,
        )
    }

    #[tokio::test]
    async fn test_all_parameters_accepted() {
        // 2 个 spec + 1 次取值 + 2 次复核
        let generator = Arc::new(ScriptedGenerator::new(vec![
            spec_value("base symbol"),
            spec_value("quote symbols"),
            json!({"fsym": "BTC", "tsyms": "USD"}),
            json!({"confidence_score": 0.9}),
            json!({"confidence_score": 0.9}),
        ]));
        let synth = synthesizer(generator.clone());

        let out = synth
            .generate_arguments(&price_operation(), &["fsym".into(), "tsyms".into()], "s1")
            .await
            .unwrap();
        match out {
            ArgumentOutcome::Ready(values) => {
                assert_eq!(values.get("fsym"), Some(&json!("BTC")));
                assert_eq!(values.get("tsyms"), Some(&json!("USD")));
            }
            other => panic!("expected Ready, got {:?}", other),
        }
        assert_eq!(generator.calls(), 5);
    }

    #[tokio::test]
    async fn test_low_validation_score_demands_input() {
        // domain 的复核只有 0.4，低于 0.7 门槛
        let generator = Arc::new(ScriptedGenerator::new(vec![
            spec_value("the domain to analyze"),
            json!({"domain": "example.com"}),
            json!({"confidence_score": 0.4, "reason": "generic placeholder"}),
        ]));
        let synth = synthesizer(generator);

        let out = synth
            .generate_arguments(&price_operation(), &["domain".into()], "s1")
            .await
            .unwrap();
        match out {
            ArgumentOutcome::NeedsInput(prompts) => {
                let msg = prompts.get("domain").expect("prompt for domain");
                assert!(!msg.is_empty());
                assert!(msg.contains("domain"));
            }
            other => panic!("expected NeedsInput, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_candidate_demands_input() {
        // 取值结果里根本没有 tsyms：无需复核，直接要求用户补
        let generator = Arc::new(ScriptedGenerator::new(vec![
            spec_value("base symbol"),
            spec_value("quote symbols"),
            json!({"fsym": "BTC"}),
            json!({"confidence_score": 0.95}),
        ]));
        let synth = synthesizer(generator);

        let out = synth
            .generate_arguments(&price_operation(), &["fsym".into(), "tsyms".into()], "s1")
            .await
            .unwrap();
        match out {
            ArgumentOutcome::NeedsInput(prompts) => {
                assert!(prompts.contains_key("tsyms"));
                // 通过复核的 fsym 也不放行：要么全齐，要么整体等输入
                assert!(!prompts.contains_key("fsym"));
            }
            other => panic!("expected NeedsInput, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_missing_parameters_is_ready_empty() {
        let generator = Arc::new(ScriptedGenerator::new(vec![]));
        let synth = synthesizer(generator.clone());
        let out = synth
            .generate_arguments(&price_operation(), &[], "s1")
            .await
            .unwrap();
        assert!(out.is_ready());
        assert_eq!(generator.calls(), 0);
    }
}
