//! OpenAI 兼容 oracle 后端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 OpenAI、DeepSeek、自建代理等。
//! 决策与结构化生成都要求模型只输出 JSON，解析时从文本中提取首个 JSON 块。

use std::collections::BTreeMap;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::oracle::{ConfidenceResult, DecisionOracle, StructuredGenerator};

/// OpenAI 兼容客户端：持有 Client 与 model 名
pub struct OpenAiOracle {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiOracle {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, String> {
        let messages = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system.to_string())
                    .build()
                    .map_err(|e| e.to_string())?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user.to_string())
                    .build()
                    .map_err(|e| e.to_string())?,
            ),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()
            .map_err(|e| e.to_string())?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| "Empty completion".to_string())
    }
}

/// 决策回复的 JSON 形状（与 prompt 中要求的字段名一致）
#[derive(Debug, Deserialize)]
struct DecisionReply {
    chosen_option: String,
    confidence_score: f64,
    #[serde(default)]
    score_reason: String,
}

/// 从模型输出中提取首个 JSON 块（```json ... ``` 或裸 JSON）
pub(crate) fn extract_json(output: &str) -> Result<Value, String> {
    let trimmed = output.trim();

    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or(rest.trim())
    } else if let Some(start) = trimmed.find('{') {
        match trimmed.rfind('}') {
            Some(end) => &trimmed[start..=end],
            None => trimmed,
        }
    } else {
        trimmed
    };

    serde_json::from_str(json_str).map_err(|e| format!("{}: {}", e, json_str))
}

#[async_trait]
impl DecisionOracle for OpenAiOracle {
    async fn decide(
        &self,
        query: &str,
        options: &BTreeMap<String, String>,
    ) -> Result<ConfidenceResult, String> {
        let option_list = options
            .iter()
            .map(|(name, desc)| format!("- {}: {}", name, desc))
            .collect::<Vec<_>>()
            .join("\n");

        let system = format!(
            "You select the option that best matches the user's request.\n\
             Reply with ONLY a JSON object, no markdown, no explanation outside it:\n\
             {{\"chosen_option\": \"<one of the option names>\", \"confidence_score\": <0.0-1.0>, \"score_reason\": \"<short justification>\"}}\n\n\
             Options:\n{}",
            option_list
        );

        let output = self.complete(&system, query).await?;
        let reply: DecisionReply =
            serde_json::from_value(extract_json(&output)?).map_err(|e| e.to_string())?;

        Ok(ConfidenceResult::new(
            reply.chosen_option,
            reply.confidence_score,
            reply.score_reason,
        ))
    }
}

#[async_trait]
impl StructuredGenerator for OpenAiOracle {
    async fn generate(
        &self,
        system_instruction: &str,
        query: &str,
        schema: &Value,
    ) -> Result<Value, String> {
        let system = format!(
            "{}\n\nReply with ONLY a JSON value matching this JSON Schema, nothing else:\n{}",
            system_instruction, schema
        );
        let output = self.complete(&system, query).await?;
        extract_json(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_fenced_block() {
        let out = "Here you go:\n```json\n{\"chosen_option\": \"a\", \"confidence_score\": 0.9}\n```";
        let v = extract_json(out).unwrap();
        assert_eq!(v["chosen_option"], "a");
    }

    #[test]
    fn test_extract_json_from_surrounding_text() {
        let out = "I think {\"chosen_option\": \"b\", \"confidence_score\": 0.5} fits best.";
        let v = extract_json(out).unwrap();
        assert_eq!(v["chosen_option"], "b");
    }

    #[test]
    fn test_extract_json_rejects_garbage() {
        assert!(extract_json("no json here").is_err());
    }
}
