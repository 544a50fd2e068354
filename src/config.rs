//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CANOPY__*` 覆盖（双下划线表示嵌套，如 `CANOPY__ORACLE__MODEL=gpt-4o`）。
//! 置信度阈值与重试预算都在这里，不在算法代码里写死。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub thresholds: ThresholdsSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub oracle: OracleSection,
    #[serde(default)]
    pub invoke: InvokeSection,
}

/// [app] 段：应用名与默认会话
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 无显式会话时使用的 session_id
    #[serde(default = "default_session_id")]
    pub default_session: String,
}

fn default_session_id() -> String {
    "local".to_string()
}

/// [thresholds] 段：三个置信度门限（均可调，默认取自原始设计）
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ThresholdsSection {
    /// 分支 / 端点选择的接受线
    pub branch_accept: f64,
    /// 多路径展开时叶子的纳入线
    pub multi_path: f64,
    /// 合成参数值的接受线
    pub parameter_accept: f64,
}

impl Default for ThresholdsSection {
    fn default() -> Self {
        Self {
            branch_accept: 0.85,
            multi_path: 0.6,
            parameter_accept: 0.7,
        }
    }
}

/// [retry] 段：统一重试预算（遍历、再生成、调用失败共用）
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// 首次尝试之外的最大重试次数
    pub max_retries: u32,
    /// 重试间的线性退避步长（毫秒），0 表示不等待
    pub backoff_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 200,
        }
    }
}

/// [oracle] 段：决策 / 结构化生成后端与超时
#[derive(Debug, Clone, Deserialize)]
pub struct OracleSection {
    /// 后端：openai（任意兼容端点）/ mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for OracleSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// [invoke] 段：端点调用超时
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct InvokeSection {
    /// 单次端点调用超时（秒）
    pub timeout_secs: u64,
}

impl Default for InvokeSection {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            thresholds: ThresholdsSection::default(),
            retry: RetrySection::default(),
            oracle: OracleSection::default(),
            invoke: InvokeSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 CANOPY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CANOPY__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CANOPY")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_threshold_defaults() {
        let cfg = AppConfig::default();
        assert!((cfg.thresholds.branch_accept - 0.85).abs() < f64::EPSILON);
        assert!((cfg.thresholds.multi_path - 0.6).abs() < f64::EPSILON);
        assert!((cfg.thresholds.parameter_accept - 0.7).abs() < f64::EPSILON);
        assert_eq!(cfg.retry.max_retries, 3);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "[thresholds]\nbranch_accept = 0.9\n\n[retry]\nmax_retries = 5"
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert!((cfg.thresholds.branch_accept - 0.9).abs() < f64::EPSILON);
        assert_eq!(cfg.retry.max_retries, 5);
        // 未覆盖的键保持默认
        assert!((cfg.thresholds.parameter_accept - 0.7).abs() < f64::EPSILON);
    }
}
