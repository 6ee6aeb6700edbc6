//! 指标记录
//!
//! 基于 metrics 门面记录规则引擎指标。导出器由嵌入方安装，
//! 未安装 recorder 时所有记录函数都是空操作。

/// 注册指标描述
pub fn describe_metrics() {
    metrics::describe_counter!("rule_evaluations_total", "Total number of rule evaluations");
    metrics::describe_histogram!(
        "rule_evaluation_duration_seconds",
        "Rule evaluation duration in seconds"
    );

    metrics::describe_counter!("fact_evaluations_total", "Total number of evaluated facts");
    metrics::describe_histogram!(
        "fact_evaluation_duration_seconds",
        "Whole rule set evaluation duration per fact in seconds"
    );

    metrics::describe_counter!("action_dispatches_total", "Total number of action dispatches");
    metrics::describe_gauge!("rule_set_size", "Number of rules currently loaded");
}

/// 记录单条规则评估
#[inline]
pub fn record_rule_evaluation(matched: bool, duration_secs: f64) {
    metrics::counter!(
        "rule_evaluations_total",
        "matched" => matched.to_string()
    )
    .increment(1);

    metrics::histogram!("rule_evaluation_duration_seconds").record(duration_secs);
}

/// 记录一次事实评估（整个规则集）
#[inline]
pub fn record_fact_evaluation(matched_rules: usize, duration_secs: f64) {
    metrics::counter!(
        "fact_evaluations_total",
        "matched" => (matched_rules > 0).to_string()
    )
    .increment(1);

    metrics::histogram!("fact_evaluation_duration_seconds").record(duration_secs);
}

/// 记录动作分发；status 为 `success` 或错误码
#[inline]
pub fn record_action_dispatch(action: &str, status: &str) {
    metrics::counter!(
        "action_dispatches_total",
        "action" => action.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 更新已加载规则数
#[inline]
pub fn set_rule_set_size(size: usize) {
    metrics::gauge!("rule_set_size").set(size as f64);
}
