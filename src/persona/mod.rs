//! 用户画像与上下文检索
//!
//! 参数合成需要「这个用户大概率想用它做什么」的上下文：结构化的自省记录
//! （SelfReflection）加上按会话检索的自由文本。检索后端只是一个 trait，
//! 生产环境接向量库，进程内用关键词重合度的 MemoryRetriever 即可。

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// 自省记录：Q&A 向导沉淀下来的结构化画像字段
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelfReflection {
    pub specific_needs: Vec<String>,
    pub available_apis: Vec<String>,
    pub goals: Vec<String>,
    pub workstreams: Vec<String>,
}

impl SelfReflection {
    /// 拼成一段供 prompt 使用的画像摘要；空字段跳过
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.specific_needs.is_empty() {
            parts.push(format!("Specific needs: {}", self.specific_needs.join("; ")));
        }
        if !self.available_apis.is_empty() {
            parts.push(format!("Available APIs: {}", self.available_apis.join(", ")));
        }
        if !self.goals.is_empty() {
            parts.push(format!("Goals: {}", self.goals.join("; ")));
        }
        if !self.workstreams.is_empty() {
            parts.push(format!("Workstreams: {}", self.workstreams.join("; ")));
        }
        parts.join("\n")
    }
}

/// 检索条目：名称 + 描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevantEntry {
    pub name: String,
    pub description: String,
}

/// 上下文检索 trait：按类别搜相关条目，按会话取用户自由文本
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn search_relevant(
        &self,
        query: &str,
        kind: &str,
        n: usize,
    ) -> Result<Vec<RelevantEntry>, String>;

    async fn retrieve_user_info(&self, query: &str, session_id: &str) -> Result<String, String>;
}

/// 进程内检索器：条目按 kind 分桶，打分用查询与描述的词重合度（Jaccard）
#[derive(Default)]
pub struct MemoryRetriever {
    entries: RwLock<HashMap<String, Vec<RelevantEntry>>>,
    sessions: RwLock<HashMap<String, Vec<String>>>,
}

impl MemoryRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, entities: Vec<RelevantEntry>, kind: &str) {
        self.entries
            .write()
            .await
            .entry(kind.to_string())
            .or_default()
            .extend(entities);
    }

    pub async fn record_user_info(&self, session_id: &str, text: impl Into<String>) {
        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .push(text.into());
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_lowercase())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

#[async_trait]
impl ContextRetriever for MemoryRetriever {
    async fn search_relevant(
        &self,
        query: &str,
        kind: &str,
        n: usize,
    ) -> Result<Vec<RelevantEntry>, String> {
        let entries = self.entries.read().await;
        let bucket = match entries.get(kind) {
            Some(b) => b,
            None => return Ok(Vec::new()),
        };

        let query_tokens = tokenize(query);
        let mut scored: Vec<(f64, &RelevantEntry)> = bucket
            .iter()
            .map(|e| {
                let text = format!("{} {}", e.name, e.description);
                (jaccard(&query_tokens, &tokenize(&text)), e)
            })
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.name.cmp(&b.1.name))
        });

        Ok(scored.into_iter().take(n).map(|(_, e)| e.clone()).collect())
    }

    async fn retrieve_user_info(&self, query: &str, session_id: &str) -> Result<String, String> {
        let sessions = self.sessions.read().await;
        let notes = match sessions.get(session_id) {
            Some(n) => n,
            None => return Ok(String::new()),
        };

        let query_tokens = tokenize(query);
        let mut scored: Vec<(f64, &String)> = notes
            .iter()
            .map(|t| (jaccard(&query_tokens, &tokenize(t)), t))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        // 取最相关的几条拼接；全部零分时仍返回最近记录，画像聊胜于无
        Ok(scored
            .into_iter()
            .take(3)
            .map(|(_, t)| t.as_str())
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_skips_empty_fields() {
        let r = SelfReflection {
            goals: vec!["grow audience".to_string()],
            ..Default::default()
        };
        let s = r.summary();
        assert!(s.contains("grow audience"));
        assert!(!s.contains("Specific needs"));
    }

    #[tokio::test]
    async fn test_search_relevant_ranks_by_overlap() {
        let store = MemoryRetriever::new();
        store
            .add(
                vec![
                    RelevantEntry {
                        name: "bitcoin price tracking".to_string(),
                        description: "watch bitcoin market price".to_string(),
                    },
                    RelevantEntry {
                        name: "weather digest".to_string(),
                        description: "daily weather summary".to_string(),
                    },
                ],
                "workstream",
            )
            .await;

        let hits = store
            .search_relevant("bitcoin price", "workstream", 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].name.contains("bitcoin"));
    }

    #[tokio::test]
    async fn test_retrieve_user_info_unknown_session_is_empty() {
        let store = MemoryRetriever::new();
        let info = store.retrieve_user_info("anything", "nope").await.unwrap();
        assert!(info.is_empty());
    }
}
