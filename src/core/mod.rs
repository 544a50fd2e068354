//! 核心层：错误分类、统一封套与重试策略

pub mod error;
pub mod retry;

pub use error::{EngineError, ErrorDetail};
pub use retry::{retry_with_budget, RetryOutcome, Verdict};
