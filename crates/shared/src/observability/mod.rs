//! 统一可观测性模块
//!
//! 提供日志与指标的统一初始化。指标通过 `metrics` 门面记录，
//! 由嵌入方安装具体的 recorder；未安装时记录操作为空操作。

pub mod metrics;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;
use serde::Deserialize;

/// 日志输出格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// 人类可读
    #[default]
    Pretty,
    /// 结构化 JSON
    Json,
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// 日志级别（如 "info", "rule_engine=debug"），RUST_LOG 优先
    pub log_level: String,

    /// 日志输出格式
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl ObservabilityConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match std::env::var("LOG_FORMAT").as_deref() {
                Ok("json") => LogFormat::Json,
                _ => defaults.log_format,
            },
        }
    }
}

/// 可观测性资源守卫
///
/// 持有期间日志与指标保持可用；drop 时记录关闭日志。
pub struct ObservabilityGuard {
    service_name: String,
}

impl ObservabilityGuard {
    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        info!(service = %self.service_name, "可观测性组件关闭");
    }
}

/// 统一初始化可观测性
///
/// 初始化顺序：
/// 1. Tracing（日志）
/// 2. 指标描述注册
///
/// # Example
///
/// ```ignore
/// use factrule_shared::observability::{init, ObservabilityConfig};
///
/// fn main() -> anyhow::Result<()> {
///     let config = ObservabilityConfig::from_env();
///     let _guard = init(&config, "rule-engine")?;
///     // 应用逻辑...
///     Ok(())
/// }
/// ```
pub fn init(config: &ObservabilityConfig, service_name: &str) -> Result<ObservabilityGuard> {
    tracing::init(config)?;
    metrics::describe_metrics();

    info!(
        service = %service_name,
        log_level = %config.log_level,
        log_format = ?config.log_format,
        "可观测性初始化完成"
    );

    Ok(ObservabilityGuard {
        service_name: service_name.to_string(),
    })
}
