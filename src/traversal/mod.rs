//! 树遍历引擎
//!
//! 单路径 resolve：逐层让 oracle 选分支，低置信度时在预算内重问并择优，
//! 到叶子后解析注册表并再选一次端点。多路径 resolve_all：广度优先展开，
//! 对每个子节点独立打分，收集达标叶子，不达标时退化为得分前三。
//! 树与注册表都是注入的只读引用，每次解析从零推导，调用之间不缓存任何决策。

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::config::{RetrySection, ThresholdsSection};
use crate::core::{retry_with_budget, EngineError, Verdict};
use crate::oracle::{ConfidenceResult, DecisionOracle};
use crate::registry::{ApiOperation, ApiRegistry, IndustryNode, IndustryTree};

/// 单路径解析结果：最终选择的置信度、根到操作的完整路径、一等操作值与形参名
#[derive(Debug)]
pub struct Resolution {
    pub confidence: f64,
    pub path: Vec<String>,
    pub operation: ApiOperation,
    pub parameters: Vec<String>,
    pub reason: String,
}

/// 端点选择结果
#[derive(Debug)]
pub struct EndpointSelection {
    pub operation: ApiOperation,
    pub parameters: Vec<String>,
    pub confidence: f64,
    pub reason: String,
}

/// 树遍历引擎：持有注入的树、注册表与 oracle
pub struct TraversalEngine {
    tree: Arc<IndustryTree>,
    registry: Arc<ApiRegistry>,
    oracle: Arc<dyn DecisionOracle>,
    thresholds: ThresholdsSection,
    retry: RetrySection,
}

impl TraversalEngine {
    pub fn new(
        tree: Arc<IndustryTree>,
        registry: Arc<ApiRegistry>,
        oracle: Arc<dyn DecisionOracle>,
        thresholds: ThresholdsSection,
        retry: RetrySection,
    ) -> Self {
        Self {
            tree,
            registry,
            oracle,
            thresholds,
            retry,
        }
    }

    pub fn registry(&self) -> &Arc<ApiRegistry> {
        &self.registry
    }

    /// 子节点候选集：分支给子分类摘要，叶子优先用注册表里客户端的自述
    fn options_for(&self, children: &BTreeMap<String, IndustryNode>) -> BTreeMap<String, String> {
        children
            .iter()
            .map(|(name, child)| {
                let desc = match child {
                    IndustryNode::Leaf(api_id) => self
                        .registry
                        .get(api_id)
                        .map(|c| c.description().to_string())
                        .unwrap_or_else(|| child.summary()),
                    IndustryNode::Branch(_) => child.summary(),
                };
                (name.clone(), desc)
            })
            .collect()
    }

    /// 带预算的分支选择：置信度达标立即接受，否则重问并保留历次最高分
    async fn choose_with_retry(
        &self,
        query: &str,
        options: &BTreeMap<String, String>,
    ) -> Result<ConfidenceResult, EngineError> {
        let threshold = self.thresholds.branch_accept;
        // 首问 + max_retries 次重问
        let budget = self.retry.max_retries + 1;
        let outcome = retry_with_budget(budget, std::time::Duration::ZERO, |attempt| async move {
            let result = self
                .oracle
                .decide(query, options)
                .await
                .map_err(EngineError::Oracle)?;
            tracing::debug!(
                attempt,
                chosen = %result.chosen,
                score = result.score,
                "branch decision"
            );
            if result.score >= threshold {
                Ok(Verdict::Accept(result))
            } else {
                let score = result.score;
                Ok(Verdict::Reject { value: result, score })
            }
        })
        .await?;

        if !outcome.accepted {
            tracing::warn!(
                attempts = outcome.attempts,
                score = outcome.value.score,
                "confidence below threshold after retry budget, keeping best"
            );
        }
        Ok(outcome.value)
    }

    /// 单路径解析：query -> (置信度, 路径, 操作, 形参名)
    pub async fn resolve(&self, query: &str) -> Result<Resolution, EngineError> {
        let mut node = self.tree.root();
        let mut path = Vec::new();

        while let IndustryNode::Branch(children) = node {
            let options = self.options_for(children);
            let choice = self.choose_with_retry(query, &options).await?;
            // 幻觉分支名：对本次解析致命，换个名字重问同一棵树不会变出这个键
            let next = children
                .get(&choice.chosen)
                .ok_or_else(|| EngineError::BranchNotFound(choice.chosen.clone()))?;
            path.push(choice.chosen.clone());
            node = next;
        }

        let api_name = match node {
            IndustryNode::Leaf(api_id) => api_id.clone(),
            IndustryNode::Branch(_) => unreachable!("loop exits only at a leaf"),
        };

        let selection = self.select_endpoint(&api_name, query).await?;
        path.push(selection.operation.descriptor.name.clone());

        tracing::info!(path = ?path, confidence = selection.confidence, "resolved");
        Ok(Resolution {
            confidence: selection.confidence,
            path,
            parameters: selection.parameters,
            reason: selection.reason,
            operation: selection.operation,
        })
    }

    /// 单个子节点的相关性打分（多路径展开用）：单候选 decide，取其置信度
    async fn score_branch(
        &self,
        query: &str,
        name: &str,
        child: &IndustryNode,
    ) -> Result<f64, EngineError> {
        let mut options = BTreeMap::new();
        let desc = match child {
            IndustryNode::Leaf(api_id) => self
                .registry
                .get(api_id)
                .map(|c| c.description().to_string())
                .unwrap_or_else(|| child.summary()),
            IndustryNode::Branch(_) => child.summary(),
        };
        options.insert(name.to_string(), desc);
        let result = self
            .oracle
            .decide(query, &options)
            .await
            .map_err(EngineError::Oracle)?;
        Ok(result.score)
    }

    /// 多路径解析：展开全树，返回相关性达标的 API 标识
    ///
    /// threshold 为 None 时用配置的 multi_path 阈值。无叶子达标时退化为
    /// 已探索叶子的得分前三；排序按 (置信度降序, 标识字典序) 两级，结果确定。
    pub async fn resolve_all(
        &self,
        query: &str,
        threshold: Option<f64>,
    ) -> Result<Vec<String>, EngineError> {
        let threshold = threshold.unwrap_or(self.thresholds.multi_path);

        let mut queue: VecDeque<(f64, Vec<String>, &IndustryNode)> = VecDeque::new();
        let mut visited: HashSet<Vec<String>> = HashSet::new();
        // (置信度, API 标识)，按探索顺序
        let mut explored: Vec<(f64, String)> = Vec::new();

        queue.push_back((1.0, Vec::new(), self.tree.root()));

        while let Some((confidence, path, node)) = queue.pop_front() {
            if !visited.insert(path.clone()) {
                continue;
            }
            match node {
                IndustryNode::Branch(children) => {
                    // 每个子节点独立打分并全部入队（不是只推最优的那个）
                    for (name, child) in children {
                        let score = self.score_branch(query, name, child).await?;
                        let mut child_path = path.clone();
                        child_path.push(name.clone());
                        queue.push_back((score, child_path, child));
                    }
                }
                IndustryNode::Leaf(api_id) => {
                    // 只收注册表里真实存在的标识
                    if self.registry.contains(api_id) {
                        explored.push((confidence, api_id.clone()));
                    }
                }
            }
        }

        // 同一 API 从多条路径到达时保留最高分
        let mut best: BTreeMap<String, f64> = BTreeMap::new();
        for (score, api) in &explored {
            let entry = best.entry(api.clone()).or_insert(*score);
            if *score > *entry {
                *entry = *score;
            }
        }

        let mut ranked: Vec<(f64, String)> =
            best.into_iter().map(|(api, score)| (score, api)).collect();
        ranked.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });

        let passing: Vec<String> = ranked
            .iter()
            .filter(|(score, _)| *score >= threshold)
            .map(|(_, api)| api.clone())
            .collect();

        if !passing.is_empty() {
            return Ok(passing);
        }
        // 无叶子达标：退化为得分前三
        Ok(ranked.into_iter().take(3).map(|(_, api)| api).collect())
    }

    /// 端点选择：API 标识 -> (操作, 形参名, 置信度, 理由)
    pub async fn select_endpoint(
        &self,
        api_name: &str,
        query: &str,
    ) -> Result<EndpointSelection, EngineError> {
        let client = self
            .registry
            .get(api_name)
            .ok_or_else(|| EngineError::ApiNotFound(api_name.to_string()))?;

        let operations = client.operations();
        if operations.is_empty() {
            return Err(EngineError::NoOperations(api_name.to_string()));
        }

        let options: BTreeMap<String, String> = operations
            .iter()
            .map(|op| {
                (
                    op.name.clone(),
                    format!("{} (parameters: {})", op.description, op.parameters.join(", ")),
                )
            })
            .collect();

        let choice = self
            .oracle
            .decide(query, &options)
            .await
            .map_err(EngineError::Oracle)?;

        let descriptor = operations
            .iter()
            .find(|op| op.name == choice.chosen)
            .ok_or_else(|| EngineError::OperationNotFound(choice.chosen.clone()))?
            .clone();

        Ok(EndpointSelection {
            parameters: descriptor.parameters.clone(),
            operation: ApiOperation::new(api_name, descriptor, client),
            confidence: choice.score,
            reason: choice.reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::ScriptedOracle;
    use crate::registry::{IndustryNode, OperationDescriptor, StaticClient};
    use serde_json::json;

    fn test_registry() -> ApiRegistry {
        let mut registry = ApiRegistry::new();
        registry.register(
            StaticClient::new("crypto_compare_api", "crypto prices").with_operation(
                OperationDescriptor::new("get_price", "current price", &["fsym", "tsyms"]),
                json!({"BTC": {"USD": 65000}}),
            ),
        );
        registry.register(
            StaticClient::new("open_weather_api", "weather data").with_operation(
                OperationDescriptor::new("current_weather", "current weather", &["city"]),
                json!({"weather": []}),
            ),
        );
        registry
    }

    fn engine(tree: IndustryTree, oracle: Arc<ScriptedOracle>) -> TraversalEngine {
        TraversalEngine::new(
            Arc::new(tree),
            Arc::new(test_registry()),
            oracle,
            ThresholdsSection::default(),
            RetrySection {
                max_retries: 3,
                backoff_ms: 0,
            },
        )
    }

    fn two_leaf_tree() -> IndustryTree {
        IndustryTree::new(IndustryNode::branch(vec![
            ("Finance", IndustryNode::leaf("crypto_compare_api")),
            ("Weather", IndustryNode::leaf("open_weather_api")),
        ]))
        .unwrap()
    }

    #[tokio::test]
    async fn test_resolve_path_is_valid() {
        let oracle = Arc::new(ScriptedOracle::new(vec![
            ConfidenceResult::new("Finance", 0.92, "money question"),
            ConfidenceResult::new("get_price", 0.95, "price lookup"),
        ]));
        let engine = engine(two_leaf_tree(), oracle.clone());

        let r = engine.resolve("get latest bitcoin price").await.unwrap();
        assert_eq!(r.path, vec!["Finance".to_string(), "get_price".to_string()]);
        assert_eq!(r.parameters, vec!["fsym".to_string(), "tsyms".to_string()]);
        assert!((r.confidence - 0.95).abs() < f64::EPSILON);
        assert_eq!(oracle.calls(), 2);
    }

    #[tokio::test]
    async fn test_resolve_exhausts_retry_budget_before_low_confidence() {
        // 分支选择 4 次（首问 + 3 次重试）都只有 0.3，之后端点选择 1 次
        let oracle = Arc::new(ScriptedOracle::new(vec![
            ConfidenceResult::new("Finance", 0.3, "unsure"),
            ConfidenceResult::new("Finance", 0.3, "unsure"),
            ConfidenceResult::new("Finance", 0.3, "unsure"),
            ConfidenceResult::new("Finance", 0.3, "unsure"),
            ConfidenceResult::new("get_price", 0.3, "unsure"),
        ]));
        let engine = engine(two_leaf_tree(), oracle.clone());

        let r = engine.resolve("vague request").await.unwrap();
        assert!(r.confidence < 0.85);
        // 恰好 5 次：分支层耗尽预算（4 次），端点选择不重试（1 次）
        assert_eq!(oracle.calls(), 5);
    }

    #[tokio::test]
    async fn test_resolve_hallucinated_branch_is_fatal() {
        let oracle = Arc::new(ScriptedOracle::always(ConfidenceResult::new(
            "Sports", 0.99, "confident but wrong",
        )));
        let engine = engine(two_leaf_tree(), oracle.clone());

        let err = engine.resolve("anything").await.unwrap_err();
        assert!(matches!(err, EngineError::BranchNotFound(name) if name == "Sports"));
        // 高置信度的幻觉第一问就被接受，不消耗重试预算
        assert_eq!(oracle.calls(), 1);
    }

    #[tokio::test]
    async fn test_resolve_all_includes_leaves_above_threshold() {
        // BFS 按字典序给子节点打分：Finance 先于 Weather
        let oracle = Arc::new(ScriptedOracle::new(vec![
            ConfidenceResult::new("Finance", 0.9, "relevant"),
            ConfidenceResult::new("Weather", 0.2, "irrelevant"),
        ]));
        let engine = engine(two_leaf_tree(), oracle);

        let apis = engine.resolve_all("bitcoin price", None).await.unwrap();
        assert_eq!(apis, vec!["crypto_compare_api".to_string()]);
    }

    #[tokio::test]
    async fn test_resolve_all_falls_back_to_top_explored() {
        let oracle = Arc::new(ScriptedOracle::new(vec![
            ConfidenceResult::new("Finance", 0.3, "weak"),
            ConfidenceResult::new("Weather", 0.1, "weaker"),
        ]));
        let engine = engine(two_leaf_tree(), oracle);

        let apis = engine.resolve_all("unrelated request", None).await.unwrap();
        // 无叶子达标：按置信度降序返回全部已探索叶子（不足 3 个）
        assert_eq!(
            apis,
            vec![
                "crypto_compare_api".to_string(),
                "open_weather_api".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_select_endpoint_errors() {
        let oracle = Arc::new(ScriptedOracle::always(ConfidenceResult::new(
            "made_up_op", 0.9, "hallucination",
        )));
        let engine = engine(two_leaf_tree(), oracle);

        assert!(matches!(
            engine.select_endpoint("missing_api", "q").await.unwrap_err(),
            EngineError::ApiNotFound(_)
        ));
        assert!(matches!(
            engine
                .select_endpoint("crypto_compare_api", "q")
                .await
                .unwrap_err(),
            EngineError::OperationNotFound(_)
        ));
    }
}
