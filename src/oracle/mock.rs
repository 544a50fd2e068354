//! Mock oracle（用于测试与离线演示，无需 API）
//!
//! MockOracle 固定选第一个候选项；Scripted 系列按预置脚本依次出队，并统计调用次数，
//! 供测试校验重试预算是否被精确执行。

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::oracle::{ConfidenceResult, DecisionOracle, StructuredGenerator};

/// Mock：总是选第一个候选项，置信度 0.95
#[derive(Debug, Default)]
pub struct MockOracle;

#[async_trait]
impl DecisionOracle for MockOracle {
    async fn decide(
        &self,
        _query: &str,
        options: &BTreeMap<String, String>,
    ) -> Result<ConfidenceResult, String> {
        let first = options
            .keys()
            .next()
            .ok_or_else(|| "No options to decide among".to_string())?;
        Ok(ConfidenceResult::new(first.clone(), 0.95, "mock: first option"))
    }
}

#[async_trait]
impl StructuredGenerator for MockOracle {
    async fn generate(
        &self,
        _system_instruction: &str,
        _query: &str,
        _schema: &Value,
    ) -> Result<Value, String> {
        Ok(Value::Object(serde_json::Map::new()))
    }
}

/// 脚本化决策 oracle：按入队顺序逐次返回预置结果，队列空后重复最后一条
pub struct ScriptedOracle {
    script: Mutex<VecDeque<ConfidenceResult>>,
    last: Mutex<Option<ConfidenceResult>>,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new(script: Vec<ConfidenceResult>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// 固定返回同一结果（如「永远 0.3 置信度」场景）
    pub fn always(result: ConfidenceResult) -> Self {
        Self::new(vec![result])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn decide(
        &self,
        _query: &str,
        _options: &BTreeMap<String, String>,
    ) -> Result<ConfidenceResult, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        match script.pop_front() {
            Some(r) => {
                if script.is_empty() {
                    *self.last.lock().unwrap() = Some(r.clone());
                }
                Ok(r)
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| "Scripted oracle exhausted".to_string()),
        }
    }
}

/// 脚本化结构化生成器：按入队顺序返回预置 JSON 值，队列空后重复最后一条
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Value>>,
    last: Mutex<Option<Value>>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<Value>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(value: Value) -> Self {
        Self::new(vec![value])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StructuredGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        _system_instruction: &str,
        _query: &str,
        _schema: &Value,
    ) -> Result<Value, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        match script.pop_front() {
            Some(v) => {
                if script.is_empty() {
                    *self.last.lock().unwrap() = Some(v.clone());
                }
                Ok(v)
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| "Scripted generator exhausted".to_string()),
        }
    }
}
