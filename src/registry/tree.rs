//! 行业树
//!
//! 静态的嵌套分类结构：内部节点是分支名 -> 子节点的映射，叶子是 API 标识字符串。
//! 构建后不可变；子节点用 BTreeMap 存储，遍历顺序是字典序，任何平分情况因此有确定结果。

use std::collections::BTreeMap;

use crate::core::EngineError;

/// 行业树节点：分支（名称 -> 子节点）或叶子（API 标识）
#[derive(Debug, Clone)]
pub enum IndustryNode {
    Branch(BTreeMap<String, IndustryNode>),
    Leaf(String),
}

impl IndustryNode {
    pub fn leaf(api_id: impl Into<String>) -> Self {
        IndustryNode::Leaf(api_id.into())
    }

    pub fn branch(children: Vec<(&str, IndustryNode)>) -> Self {
        IndustryNode::Branch(
            children
                .into_iter()
                .map(|(name, node)| (name.to_string(), node))
                .collect(),
        )
    }

    /// 供 oracle 理解的节点摘要：分支列出子分支名，叶子给出 API 标识
    pub fn summary(&self) -> String {
        match self {
            IndustryNode::Branch(children) => format!(
                "Category containing: {}",
                children.keys().cloned().collect::<Vec<_>>().join(", ")
            ),
            IndustryNode::Leaf(api_id) => format!("API: {}", api_id),
        }
    }
}

/// 行业树：根必须是分支；构建时校验没有空分支与空叶子
#[derive(Debug, Clone)]
pub struct IndustryTree {
    root: IndustryNode,
}

impl IndustryTree {
    pub fn new(root: IndustryNode) -> Result<Self, EngineError> {
        match &root {
            IndustryNode::Leaf(_) => {
                return Err(EngineError::RegistryBuild(
                    "industry tree root must be a branch".to_string(),
                ));
            }
            IndustryNode::Branch(children) if children.is_empty() => {
                return Err(EngineError::RegistryBuild(
                    "industry tree root has no children".to_string(),
                ));
            }
            IndustryNode::Branch(_) => {}
        }
        validate(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &IndustryNode {
        &self.root
    }

    /// 收集全部叶子 API 标识（字典序路径顺序）
    pub fn leaves(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_leaves(&self.root, &mut out);
        out
    }
}

fn validate(node: &IndustryNode) -> Result<(), EngineError> {
    match node {
        IndustryNode::Leaf(api_id) => {
            if api_id.is_empty() {
                return Err(EngineError::RegistryBuild("empty leaf API id".to_string()));
            }
        }
        IndustryNode::Branch(children) => {
            if children.is_empty() {
                return Err(EngineError::RegistryBuild(
                    "branch node with no children".to_string(),
                ));
            }
            for child in children.values() {
                validate(child)?;
            }
        }
    }
    Ok(())
}

fn collect_leaves(node: &IndustryNode, out: &mut Vec<String>) {
    match node {
        IndustryNode::Leaf(api_id) => out.push(api_id.clone()),
        IndustryNode::Branch(children) => {
            for child in children.values() {
                collect_leaves(child, out);
            }
        }
    }
}

/// 默认行业树：从宽泛领域收窄到具体 API 标识
pub fn default_tree() -> IndustryTree {
    let root = IndustryNode::branch(vec![
        (
            "Finance",
            IndustryNode::branch(vec![
                (
                    "Cryptocurrency",
                    IndustryNode::branch(vec![
                        ("Market Data", IndustryNode::leaf("crypto_compare_api")),
                        ("Exchange", IndustryNode::leaf("binance_api")),
                    ]),
                ),
                ("Stocks", IndustryNode::leaf("alpha_vantage_api")),
            ]),
        ),
        (
            "Developer",
            IndustryNode::branch(vec![
                ("Code Hosting", IndustryNode::leaf("github_api")),
                ("Q&A", IndustryNode::leaf("stack_exchange_api")),
            ]),
        ),
        (
            "Communication",
            IndustryNode::branch(vec![
                ("Team Chat", IndustryNode::leaf("slack_api")),
                ("Messaging", IndustryNode::leaf("twilio_api")),
            ]),
        ),
        (
            "Media",
            IndustryNode::branch(vec![
                ("News", IndustryNode::leaf("news_api")),
                ("Forums", IndustryNode::leaf("reddit_api")),
            ]),
        ),
        ("Weather", IndustryNode::leaf("open_weather_api")),
    ]);
    // 字面量构造，校验不可能失败
    IndustryTree::new(root).expect("default tree is well-formed")
}
