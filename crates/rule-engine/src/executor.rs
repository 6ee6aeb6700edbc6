//! 规则执行器
//!
//! 对单条规则做短路求值，命中后按声明顺序分发动作，返回规则报告。
//! 分发失败只记录在报告中，不影响同一规则的后续动作。

use std::time::Instant;

use factrule_shared::observability::metrics::{record_action_dispatch, record_rule_evaluation};
use tracing::{debug, warn};

use crate::action::ActionRegistry;
use crate::compiler::CompiledRule;
use crate::condition::Condition;
use crate::models::{ActionCall, RuleReport};
use crate::resolver::Resolver;

/// 规则执行器
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleExecutor {
    /// 是否记录详细评估追踪
    trace_enabled: bool,
}

impl RuleExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 启用评估追踪
    pub fn with_trace(mut self) -> Self {
        self.trace_enabled = true;
        self
    }

    pub fn trace_enabled(&self) -> bool {
        self.trace_enabled
    }

    /// 评估规则条件，命中时分发全部动作
    pub fn execute(
        &self,
        rule: &CompiledRule,
        actions: &ActionRegistry,
        resolver: &Resolver<'_>,
    ) -> RuleReport {
        let start = Instant::now();
        let mut report = RuleReport::new(rule.name());

        report.matched = if self.trace_enabled {
            trace_node(rule.condition(), resolver, &mut report.trace, "root")
        } else {
            rule.condition().evaluate(resolver)
        };
        record_rule_evaluation(report.matched, start.elapsed().as_secs_f64());

        if !report.matched {
            return report;
        }

        debug!(rule = %rule.name(), actions = rule.actions().len(), "规则命中");
        for call in rule.actions() {
            dispatch(rule.name(), call, actions, resolver, &mut report);
        }

        report
    }
}

fn dispatch(
    rule: &str,
    call: &ActionCall,
    actions: &ActionRegistry,
    resolver: &Resolver<'_>,
    report: &mut RuleReport,
) {
    match actions.dispatch(rule, call, resolver) {
        Ok(params) => {
            debug!(rule = %rule, action = %call.name, params = %params, "动作执行成功");
            record_action_dispatch(&call.name, "success");
            report.dispatched.push(call.name.clone());
        }
        Err(e) => {
            warn!(rule = %rule, action = %call.name, code = e.code(), error = %e, "动作分发失败");
            record_action_dispatch(&call.name, e.code());
            report.dispatch_errors.push(e);
        }
    }
}

/// 带追踪的递归求值，语义与 [`Condition::evaluate`] 一致
fn trace_node(
    node: &Condition,
    resolver: &Resolver<'_>,
    trace: &mut Vec<String>,
    path: &str,
) -> bool {
    match node {
        Condition::Leaf(cmp) => {
            let actual = resolver.resolve(&cmp.field);
            let matched = cmp.evaluate(resolver);
            trace.push(format!(
                "{}: {} => {} (字段值 {})",
                path,
                cmp,
                if matched { "MATCHED" } else { "NOT_MATCHED" },
                actual
            ));
            matched
        }
        Condition::All(children) => {
            trace.push(format!(
                "{}: 开始评估 all 组 (共 {} 个子节点)",
                path,
                children.len()
            ));
            for (i, child) in children.iter().enumerate() {
                let child_path = format!("{}.children[{}]", path, i);
                if !trace_node(child, resolver, trace, &child_path) {
                    trace.push(format!("{}: all 短路 - 子节点 {} 不匹配", path, i));
                    return false;
                }
            }
            trace.push(format!("{}: all 组全部匹配", path));
            true
        }
        Condition::Any(children) => {
            trace.push(format!(
                "{}: 开始评估 any 组 (共 {} 个子节点)",
                path,
                children.len()
            ));
            for (i, child) in children.iter().enumerate() {
                let child_path = format!("{}.children[{}]", path, i);
                if trace_node(child, resolver, trace, &child_path) {
                    trace.push(format!("{}: any 短路 - 子节点 {} 匹配", path, i));
                    return true;
                }
            }
            trace.push(format!("{}: any 组无匹配", path));
            false
        }
    }
}
