//! 步骤描述再生成
//!
//! 两种再生成都走结构化生成器：低置信度时只带端点名与评分理由改写当前步骤；
//! 调用失败时带上整个步骤序列（之前与之后的步骤）加错误信息，让改写保住上下文连贯性。

use serde::Deserialize;
use serde_json::json;

use crate::executor::Step;
use crate::oracle::StructuredGenerator;

#[derive(Debug, Deserialize)]
struct RewriteReply {
    step_description: String,
}

#[derive(Debug, Deserialize)]
struct RelevanceReply {
    relevant: bool,
}

/// 低置信度改写：给定原描述、选中端点与 oracle 的评分理由，产出更贴合端点的新描述
pub(crate) async fn regenerate_step(
    generator: &dyn StructuredGenerator,
    original: &str,
    endpoint_name: &str,
    score_reason: &str,
) -> Result<String, String> {
    let schema = json!({
        "type": "object",
        "properties": {"step_description": {"type": "string"}},
        "required": ["step_description"]
    });
    let system = "Rewrite the step description so it clearly matches the chosen API endpoint. \
                  Keep the user's intent, change only the wording.";
    let query = format!(
        "Step: {}\nChosen endpoint: {}\nWhy the match scored low: {}",
        original, endpoint_name, score_reason
    );
    let value = generator.generate(system, &query, &schema).await?;
    let reply: RewriteReply = serde_json::from_value(value).map_err(|e| e.to_string())?;
    if reply.step_description.trim().is_empty() {
        return Err("empty regenerated step description".to_string());
    }
    Ok(reply.step_description)
}

/// 布尔相关性复核：改写后的描述和端点到底配不配（独立于打分的第二道门）
pub(crate) async fn check_relevance(
    generator: &dyn StructuredGenerator,
    description: &str,
    endpoint_name: &str,
) -> Result<bool, String> {
    let schema = json!({
        "type": "object",
        "properties": {"relevant": {"type": "boolean"}},
        "required": ["relevant"]
    });
    let system = "Judge whether the step description is a relevant use of the API endpoint. \
                  Answer strictly with the boolean field.";
    let query = format!("Step: {}\nEndpoint: {}", description, endpoint_name);
    let value = generator.generate(system, &query, &schema).await?;
    let reply: RelevanceReply = serde_json::from_value(value).map_err(|e| e.to_string())?;
    Ok(reply.relevant)
}

/// 调用失败后的改写：带完整序列上下文（之前与之后的所有步骤）和错误信息
pub(crate) async fn regenerate_with_context(
    generator: &dyn StructuredGenerator,
    steps: &[Step],
    index: usize,
    error: &str,
) -> Result<String, String> {
    let schema = json!({
        "type": "object",
        "properties": {"step_description": {"type": "string"}},
        "required": ["step_description"]
    });

    let before: Vec<&str> = steps[..index].iter().map(|s| s.name.as_str()).collect();
    let after: Vec<&str> = steps[index + 1..].iter().map(|s| s.name.as_str()).collect();

    let system = "A step in a plan failed when invoked against its API. Rewrite the failed \
                  step so the invocation can succeed, keeping it coherent with the rest of \
                  the plan.";
    let query = format!(
        "Previous steps: {:?}\nFailed step: {}\nFollowing steps: {:?}\nError: {}",
        before, steps[index].name, after, error
    );
    let value = generator.generate(system, &query, &schema).await?;
    let reply: RewriteReply = serde_json::from_value(value).map_err(|e| e.to_string())?;
    if reply.step_description.trim().is_empty() {
        return Err("empty regenerated step description".to_string());
    }
    Ok(reply.step_description)
}
