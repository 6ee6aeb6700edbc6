//! 配置管理模块
//!
//! 支持多层配置文件加载与环境变量覆盖，所有配置段都有默认值。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::observability::ObservabilityConfig;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "FACTRULE";

/// `FACTRULE_ENGINE__TRACE_ENABLED=true` 形式的环境变量覆盖
fn env_overrides() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

/// 规则引擎配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// DSL 规则文件路径
    pub rules_path: String,
    /// 待评估事实（JSON 数组）文件路径
    pub facts_path: String,
    /// 是否在评估报告中记录条件追踪
    pub trace_enabled: bool,
    /// 判定端点闲置的天数阈值
    pub inactive_days_threshold: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rules_path: "config/rules/storage.rules".to_string(),
            facts_path: "config/facts/endpoints.json".to_string(),
            trace_enabled: false,
            inactive_days_threshold: 90,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub engine: EngineConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（FACTRULE_ 前缀，层级用双下划线分隔，
    ///    如 FACTRULE_ENGINE__RULES_PATH -> engine.rules_path）
    ///
    /// 环境由 FACTRULE_ENV 指定（默认 development），配置目录由 CONFIG_DIR 指定。
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("FACTRULE_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
        Self::load_from(Path::new(&config_dir), &env, service_name)
    }

    /// 从指定目录加载配置
    pub fn load_from(
        config_dir: &Path,
        environment: &str,
        service_name: &str,
    ) -> Result<Self, ConfigError> {
        Self::load_with_env(config_dir, environment, service_name, env_overrides())
    }

    fn load_with_env(
        config_dir: &Path,
        environment: &str,
        service_name: &str,
        overrides: Environment,
    ) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", environment)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(
                File::from(config_dir.join(format!("{}.toml", environment))).required(false),
            )
            .add_source(
                File::from(config_dir.join(format!("{}.toml", service_name))).required(false),
            )
            .add_source(overrides);

        builder.build()?.try_deserialize()
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
