//! Canopy - 置信度驱动的 API 树遍历与动态分发引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量），阈值与重试预算都在这里
//! - **core**: 错误类型、统一错误详情、有界重试原语
//! - **executor**: 步骤类型、执行报告与带再生成的主执行循环
//! - **invoker**: 端点调用器（超时 + 返回值归一化为统一封套）
//! - **observability**: 日志初始化
//! - **oracle**: 置信度决策与结构化生成抽象（OpenAI 兼容 / Mock / 脚本化）
//! - **persona**: 用户画像（自省记录 + 上下文检索）
//! - **registry**: API 客户端注册表、操作描述符与行业树
//! - **synth**: 参数合成器（spec 生成 -> 候选值 -> 独立复核门槛）
//! - **traversal**: 行业树遍历（单路径 / 多路径）与端点选择

pub mod config;
pub mod core;
pub mod executor;
pub mod invoker;
pub mod observability;
pub mod oracle;
pub mod persona;
pub mod registry;
pub mod synth;
pub mod traversal;

pub use executor::{ExecutionReport, Step, StepExecutor};
