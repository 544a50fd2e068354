//! Oracle 层：决策与结构化生成的抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::{MockOracle, ScriptedGenerator, ScriptedOracle};
pub use openai::OpenAiOracle;
pub use traits::{ConfidenceResult, DecisionOracle, StructuredGenerator};
