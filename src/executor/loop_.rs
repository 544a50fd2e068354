//! 主执行循环
//!
//! 每个步骤走一条固定流水线：选端点 -> 置信度门 -> 参数门 -> 调用。
//! 两道门各自带一个有界再生成循环（低置信度改写描述、调用失败带上下文改写），
//! 外层再套一个按步骤的兜底重试；无论哪条路走到头，每个输入步骤都恰好落一条记录。
//! 解析类错误（分支 / API / 操作不存在）说明树或注册表配置有问题，重试无意义，直接终结。

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::{RetrySection, ThresholdsSection};
use crate::core::{retry_with_budget, EngineError, ErrorDetail, Verdict};
use crate::executor::regen;
use crate::executor::{ExecutionReport, Step, StepExecutionRecord};
use crate::invoker::{EndpointInvoker, InvocationEnvelope, StepStatus};
use crate::oracle::StructuredGenerator;
use crate::synth::{ArgumentOutcome, ParameterSynthesizer};
use crate::traversal::{EndpointSelection, TraversalEngine};

/// 单步的最终去向：一条记录，外加可能的待补参数提示
struct StepOutcome {
    record: StepExecutionRecord,
    prompts: Option<std::collections::BTreeMap<String, String>>,
}

/// 步骤执行器：把遍历、合成、调用三件套串成循环
pub struct StepExecutor {
    traversal: Arc<TraversalEngine>,
    synthesizer: ParameterSynthesizer,
    invoker: EndpointInvoker,
    generator: Arc<dyn StructuredGenerator>,
    thresholds: ThresholdsSection,
    retry: RetrySection,
}

impl StepExecutor {
    pub fn new(
        traversal: Arc<TraversalEngine>,
        synthesizer: ParameterSynthesizer,
        invoker: EndpointInvoker,
        generator: Arc<dyn StructuredGenerator>,
        thresholds: ThresholdsSection,
        retry: RetrySection,
    ) -> Self {
        Self {
            traversal,
            synthesizer,
            invoker,
            generator,
            thresholds,
            retry,
        }
    }

    /// 按序执行一组步骤，产出完整报告
    ///
    /// 不会提前返回：单步失败落一条 error 记录后继续下一步。
    pub async fn execute_steps(&self, steps: &[Step], session_id: &str) -> ExecutionReport {
        let run_id = Uuid::new_v4().to_string();
        let started_at = chrono::Utc::now().timestamp_millis();
        tracing::info!(run = %run_id, steps = steps.len(), session = %session_id, "execution run started");

        let mut records = Vec::with_capacity(steps.len());
        let mut user_prompts: std::collections::BTreeMap<
            String,
            std::collections::BTreeMap<String, String>,
        > = std::collections::BTreeMap::new();

        for (index, step) in steps.iter().enumerate() {
            tracing::info!(run = %run_id, step = %step.name, api = %step.api_name, "executing step");
            let outcome = self.run_step_with_budget(steps, index, session_id).await;
            if let Some(prompts) = outcome.prompts {
                user_prompts
                    .entry(step.api_name.clone())
                    .or_default()
                    .extend(prompts);
            }
            records.push(outcome.record);
        }

        let completed_at = chrono::Utc::now().timestamp_millis();
        let report = ExecutionReport {
            run_id,
            started_at,
            completed_at,
            steps_execution: records,
            user_prompts,
        };
        tracing::info!(
            run = %report.run_id,
            succeeded = report.all_succeeded(),
            "execution run finished"
        );
        report
    }

    /// 外层兜底：步骤流程自身出错（oracle 失败等）时整步重跑，解析类错误立即终结
    async fn run_step_with_budget(
        &self,
        steps: &[Step],
        index: usize,
        session_id: &str,
    ) -> StepOutcome {
        let step = &steps[index];
        let attempts = self.retry.max_retries + 1;
        let mut last_error: Option<EngineError> = None;

        for attempt in 0..attempts {
            match self.run_step(steps, index, session_id).await {
                Ok(outcome) => return outcome,
                Err(e) => {
                    tracing::error!(step = %step.name, attempt, error = %e, "step procedure failed");
                    let fatal = is_fatal_resolution(&e);
                    last_error = Some(e);
                    if fatal {
                        break;
                    }
                }
            }
        }

        let error = last_error.unwrap_or_else(|| EngineError::Oracle("step never ran".into()));
        StepOutcome {
            record: StepExecutionRecord {
                step_name: step.name.clone(),
                endpoint_name: None,
                status: StepStatus::Error,
                details: ErrorDetail::from(&error).to_value(),
                required_parameters: Map::new(),
                confidence_score: 0.0,
            },
            prompts: None,
        }
    }

    /// 单步流水线：Resolving -> ConfidenceCheck -> ParamCheck -> Invoking
    async fn run_step(
        &self,
        steps: &[Step],
        index: usize,
        session_id: &str,
    ) -> Result<StepOutcome, EngineError> {
        let step = &steps[index];

        // Resolving
        let mut selection = self
            .traversal
            .select_endpoint(&step.api_name, &step.name)
            .await?;
        let endpoint = selection.operation.qualified_name();

        // ConfidenceCheck：低于接受线则改写描述重选，改写必须先过独立的相关性复核
        if selection.confidence < self.thresholds.branch_accept {
            tracing::warn!(
                step = %step.name,
                endpoint = %endpoint,
                score = selection.confidence,
                "endpoint confidence below accept line, regenerating step description"
            );
            match self.regenerate_endpoint(step, &endpoint, &selection).await? {
                Ok(fresh) => selection = fresh,
                Err(best_score) => {
                    let error = EngineError::LowConfidence(best_score);
                    return Ok(StepOutcome {
                        record: StepExecutionRecord {
                            step_name: step.name.clone(),
                            endpoint_name: Some(endpoint),
                            status: StepStatus::Error,
                            details: ErrorDetail::from(&error).to_value(),
                            required_parameters: Map::new(),
                            confidence_score: best_score,
                        },
                        prompts: None,
                    });
                }
            }
        }

        // ParamCheck：已知参数直接用，缺的交给合成器；任何参数不过复核整步转为待输入
        let mut resolved = step.known_parameters.clone();
        let missing: Vec<String> = selection
            .parameters
            .iter()
            .filter(|p| !resolved.contains_key(*p))
            .cloned()
            .collect();
        if !missing.is_empty() {
            match self
                .synthesizer
                .generate_arguments(&selection.operation, &missing, session_id)
                .await?
            {
                ArgumentOutcome::Ready(values) => resolved.extend(values),
                ArgumentOutcome::NeedsInput(prompts) => {
                    tracing::info!(
                        step = %step.name,
                        parameters = prompts.len(),
                        "parameters need user input, skipping invocation"
                    );
                    let details =
                        serde_json::to_value(&prompts).unwrap_or_else(|_| Value::Null);
                    return Ok(StepOutcome {
                        record: StepExecutionRecord {
                            step_name: step.name.clone(),
                            endpoint_name: Some(selection.operation.qualified_name()),
                            status: StepStatus::InputRequired,
                            details,
                            required_parameters: resolved,
                            confidence_score: selection.confidence,
                        },
                        prompts: Some(prompts),
                    });
                }
            }
        }

        // Invoking
        let envelope = self
            .invoker
            .call(&selection.operation, selection.confidence, None, &resolved)
            .await;
        if envelope.is_success() {
            return Ok(StepOutcome {
                record: record_from_envelope(&step.name, envelope),
                prompts: None,
            });
        }

        // 调用失败：带完整序列上下文改写后重选重调
        let envelope = self
            .retry_invocation(steps, index, session_id, envelope)
            .await?;
        Ok(StepOutcome {
            record: record_from_envelope(&step.name, envelope),
            prompts: None,
        })
    }

    /// 低置信度再生成循环：改写 -> 相关性复核 -> 重选端点
    ///
    /// 返回 Ok(Ok(selection)) 表示拿到达标的新选择；Ok(Err(best_score)) 表示预算耗尽，
    /// 携带历次尝试中的最高置信度。
    async fn regenerate_endpoint(
        &self,
        step: &Step,
        endpoint: &str,
        selection: &EndpointSelection,
    ) -> Result<Result<EndpointSelection, f64>, EngineError> {
        let generator = self.generator.as_ref();
        let reason = selection.reason.as_str();
        let outcome = retry_with_budget(
            self.retry.max_retries.max(1),
            Duration::ZERO,
            |attempt| async move {
                let rewritten = regen::regenerate_step(generator, &step.name, endpoint, reason)
                    .await
                    .map_err(EngineError::Oracle)?;
                let relevant = regen::check_relevance(generator, &rewritten, endpoint)
                    .await
                    .map_err(EngineError::Oracle)?;
                if !relevant {
                    tracing::debug!(attempt, "regenerated description judged irrelevant");
                    return Ok(Verdict::Reject {
                        value: None,
                        score: 0.0,
                    });
                }
                let fresh = self
                    .traversal
                    .select_endpoint(&step.api_name, &rewritten)
                    .await?;
                if fresh.confidence >= self.thresholds.branch_accept {
                    Ok(Verdict::Accept(Some(fresh)))
                } else {
                    let score = fresh.confidence;
                    Ok(Verdict::Reject {
                        value: Some(fresh),
                        score,
                    })
                }
            },
        )
        .await?;

        if outcome.accepted {
            if let Some(fresh) = outcome.value {
                return Ok(Ok(fresh));
            }
        }
        let best_score = outcome
            .value
            .map(|s| s.confidence)
            .unwrap_or(selection.confidence);
        Ok(Err(best_score))
    }

    /// 调用失败后的再生成循环：每次尝试都带上整个计划的上下文改写，重选端点并重新合成缺参
    async fn retry_invocation(
        &self,
        steps: &[Step],
        index: usize,
        session_id: &str,
        failed: InvocationEnvelope,
    ) -> Result<InvocationEnvelope, EngineError> {
        let step = &steps[index];
        let generator = self.generator.as_ref();
        let error_text = error_message(&failed.details);
        let error_ref = error_text.as_str();

        let outcome = retry_with_budget(
            self.retry.max_retries.max(1),
            Duration::from_millis(self.retry.backoff_ms),
            |attempt| async move {
                tracing::warn!(
                    attempt,
                    step = %step.name,
                    "invocation failed, regenerating with plan context"
                );
                let rewritten =
                    regen::regenerate_with_context(generator, steps, index, error_ref)
                        .await
                        .map_err(EngineError::Oracle)?;
                let fresh = self
                    .traversal
                    .select_endpoint(&step.api_name, &rewritten)
                    .await?;

                let mut args = step.known_parameters.clone();
                let missing: Vec<String> = fresh
                    .parameters
                    .iter()
                    .filter(|p| !args.contains_key(*p))
                    .cloned()
                    .collect();
                if !missing.is_empty() {
                    match self
                        .synthesizer
                        .generate_arguments(&fresh.operation, &missing, session_id)
                        .await?
                    {
                        ArgumentOutcome::Ready(values) => args.extend(values),
                        ArgumentOutcome::NeedsInput(_) => {
                            let envelope = InvocationEnvelope {
                                endpoint_name: fresh.operation.qualified_name(),
                                status: StepStatus::Error,
                                details: ErrorDetail::internal(
                                    "ParameterValidationFailure",
                                    "synthesized arguments failed validation during retry",
                                )
                                .to_value(),
                                required_parameters: args,
                                confidence_score: fresh.confidence,
                            };
                            return Ok(Verdict::Reject {
                                value: envelope,
                                score: 0.0,
                            });
                        }
                    }
                }

                let envelope = self
                    .invoker
                    .call(&fresh.operation, fresh.confidence, None, &args)
                    .await;
                if envelope.is_success() {
                    Ok(Verdict::Accept(envelope))
                } else {
                    Ok(Verdict::Reject {
                        value: envelope,
                        score: 0.0,
                    })
                }
            },
        )
        .await?;

        Ok(outcome.value)
    }
}

fn record_from_envelope(step_name: &str, envelope: InvocationEnvelope) -> StepExecutionRecord {
    StepExecutionRecord {
        step_name: step_name.to_string(),
        endpoint_name: Some(envelope.endpoint_name),
        status: envelope.status,
        details: envelope.details,
        required_parameters: envelope.required_parameters,
        confidence_score: envelope.confidence_score,
    }
}

/// 树 / 注册表层面的解析错误，重跑也不会变好
fn is_fatal_resolution(error: &EngineError) -> bool {
    matches!(
        error,
        EngineError::BranchNotFound(_)
            | EngineError::ApiNotFound(_)
            | EngineError::NoOperations(_)
            | EngineError::OperationNotFound(_)
    )
}

/// 从归一化后的 details 里抽人类可读的错误信息
fn error_message(details: &Value) -> String {
    details
        .get("message")
        .and_then(|m| m.as_str())
        .map(String::from)
        .unwrap_or_else(|| details.to_string())
}
