//! 存储端点巡检示例
//!
//! 从配置加载 DSL 规则和端点事实，逐个评估并以日志模拟邮件通知。

use anyhow::{Context, Result, bail};
use factrule_shared::config::AppConfig;
use factrule_shared::observability;
use rule_engine::{ActionParams, ActionSpec, Fact, RuleEngine, Value, ValueKind, derive};
use std::fs;
use tracing::{info, warn};

fn send_email(destination: &str, message: &str) {
    info!(destination = %destination, "发送邮件: {}", message);
}

fn build_engine(config: &AppConfig) -> RuleEngine {
    let engine = if config.engine.trace_enabled {
        RuleEngine::new().with_trace()
    } else {
        RuleEngine::new()
    };

    let threshold = f64::from(config.engine.inactive_days_threshold);
    engine.register_derived(
        "current_usage_percentage",
        derive::percentage("space_used", "space_quota"),
    );
    engine.register_derived("days_since_last_access", derive::days_since("last_access"));
    engine.register_derived("inactive_days_threshold", move |_: &Fact| Value::from(threshold));

    engine.register_action(
        ActionSpec::new("under_usage_resource").param("endpoint", ValueKind::String),
        |_: &Fact, params: &ActionParams| -> Result<()> {
            let endpoint = params.get_str("endpoint").unwrap_or_default();
            send_email(
                "team_member",
                &format!("Under usage detected for data endpoint \"{}\"", endpoint),
            );
            Ok(())
        },
    );

    engine.register_action(
        ActionSpec::new("inactive_resource")
            .param("endpoint", ValueKind::String)
            .optional_param("inactive_days", threshold)
            .optional_param("recipient", "user"),
        |_: &Fact, params: &ActionParams| -> Result<()> {
            let endpoint = params.get_str("endpoint").unwrap_or_default();
            let days = params.get_f64("inactive_days").unwrap_or_default();
            let recipient = params.get_str("recipient").unwrap_or("user");
            send_email(
                recipient,
                &format!(
                    "Files on endpoint \"{}\" have not been accessed in the last {} days",
                    endpoint, days
                ),
            );
            Ok(())
        },
    );

    engine.register_action(
        ActionSpec::new("no_match").param("endpoint", ValueKind::String),
        |_: &Fact, params: &ActionParams| -> Result<()> {
            info!(
                endpoint = params.get_str("endpoint").unwrap_or_default(),
                "没有规则命中"
            );
            Ok(())
        },
    );

    engine
}

fn load_facts(path: &str) -> Result<Vec<serde_json::Value>> {
    let text = fs::read_to_string(path).with_context(|| format!("读取事实文件失败: {}", path))?;
    let json: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("事实文件不是合法 JSON: {}", path))?;
    match json {
        serde_json::Value::Array(items) => Ok(items),
        serde_json::Value::Object(_) => Ok(vec![json]),
        _ => bail!("事实文件应为对象或对象数组: {}", path),
    }
}

fn main() -> Result<()> {
    let config = AppConfig::load("rule-engine").unwrap_or_else(|e| {
        eprintln!("配置加载失败，使用默认配置: {}", e);
        AppConfig::default()
    });

    let _guard = observability::init(&config.observability, &config.service_name)?;
    info!(environment = %config.environment, "启动存储端点巡检");

    let engine = build_engine(&config);

    let rules = fs::read_to_string(&config.engine.rules_path)
        .with_context(|| format!("读取规则文件失败: {}", config.engine.rules_path))?;
    let loaded = engine
        .load_rules(&rules)
        .with_context(|| format!("规则文件解析失败: {}", config.engine.rules_path))?;
    info!(rules = loaded, status = ?engine.status(), "规则加载完成");

    let facts = load_facts(&config.engine.facts_path)?;
    for json in &facts {
        let report = match engine.evaluate_json(json) {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "跳过无效事实");
                continue;
            }
        };

        let endpoint = json
            .get("endpoint_identifier")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("<unknown>");
        info!(
            endpoint = %endpoint,
            matched = ?report.matched_rules(),
            elapsed_us = report.evaluation_time_us,
            "端点评估完成"
        );

        for rule in &report.rules {
            for line in &rule.trace {
                info!(endpoint = %endpoint, rule = %rule.rule_name, "{}", line);
            }
            for error in &rule.dispatch_errors {
                warn!(endpoint = %endpoint, code = error.code(), "{}", error);
            }
        }
    }

    info!(facts = facts.len(), "巡检结束");
    Ok(())
}
