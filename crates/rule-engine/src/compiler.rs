//! 规则编译器
//!
//! 对规则做结构校验并预先提取引用的字段。DSL 解析出的规则在语法层面已经合法，
//! 直接构造或从 JSON 加载的规则需要经过这里的校验才能进入引擎。

use std::collections::BTreeSet;

use crate::condition::{Comparison, Condition, Operand};
use crate::error::{Result, RuleError};
use crate::models::{ActionCall, Rule, RuleSet};
use crate::parser::{is_identifier, is_plain_field_name};
use crate::value::Value;

/// 编译后的规则
#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// 原始规则
    pub rule: Rule,
    /// 条件和动作参数中引用的所有字段
    pub required_fields: BTreeSet<String>,
}

impl CompiledRule {
    pub fn name(&self) -> &str {
        &self.rule.name
    }

    pub fn condition(&self) -> &Condition {
        &self.rule.condition
    }

    pub fn actions(&self) -> &[ActionCall] {
        &self.rule.actions
    }
}

/// 规则编译器
///
/// 校验通过的规则都能由 `Display` 输出为规则文本并原样解析回来，
/// 因此字段名必须是点分标识符，动作名和参数名必须是标识符。
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleCompiler;

impl RuleCompiler {
    pub fn new() -> Self {
        Self
    }

    /// 从 JSON 编译，接受单条规则对象或规则数组
    ///
    /// 按文档的顶层形状选择解析目标，错误信息指向真正出错的位置。
    pub fn compile_json(&self, json: &str) -> Result<Vec<CompiledRule>> {
        let rules = if json.trim_start().starts_with('[') {
            serde_json::from_str::<RuleSet>(json)?
        } else {
            RuleSet::from(vec![serde_json::from_str::<Rule>(json)?])
        };
        self.compile_all(rules)
    }

    /// 编译整个规则集，任一规则校验失败则整体失败
    pub fn compile_all(&self, rules: impl IntoIterator<Item = Rule>) -> Result<Vec<CompiledRule>> {
        rules.into_iter().map(|rule| self.compile(rule)).collect()
    }

    /// 编译单条规则
    pub fn compile(&self, rule: Rule) -> Result<CompiledRule> {
        validate_rule(&rule)?;

        let mut required_fields = rule.condition.fields();
        for action in &rule.actions {
            required_fields.extend(action_fields(action));
        }

        Ok(CompiledRule {
            rule,
            required_fields,
        })
    }
}

fn validate_rule(rule: &Rule) -> Result<()> {
    let invalid = |reason: String| RuleError::InvalidRule {
        rule: rule.name.clone(),
        reason,
    };

    if rule.name.trim().is_empty() {
        return Err(invalid("规则名称不能为空".to_string()));
    }

    validate_node(&rule.condition, "condition").map_err(invalid)?;

    for (i, action) in rule.actions.iter().enumerate() {
        validate_action(action, &format!("actions[{}]", i)).map_err(invalid)?;
    }

    Ok(())
}

fn validate_node(node: &Condition, path: &str) -> std::result::Result<(), String> {
    match node {
        Condition::Leaf(cmp) => validate_comparison(cmp, path),
        Condition::All(children) | Condition::Any(children) => {
            for (i, child) in children.iter().enumerate() {
                validate_node(child, &format!("{}.children[{}]", path, i))?;
            }
            Ok(())
        }
    }
}

fn validate_comparison(cmp: &Comparison, path: &str) -> std::result::Result<(), String> {
    if cmp.field.trim().is_empty() {
        return Err(format!("条件 '{}' 的字段不能为空", path));
    }
    if !is_plain_field_name(&cmp.field) {
        return Err(format!("条件 '{}' 的字段名 `{}` 无法写成规则文本", path, cmp.field));
    }
    validate_operand(&cmp.value, path)
}

fn validate_operand(operand: &Operand, path: &str) -> std::result::Result<(), String> {
    match operand {
        Operand::Field { field } if field.trim().is_empty() => {
            Err(format!("'{}' 引用的字段名不能为空", path))
        }
        Operand::Field { field } if !is_plain_field_name(field) => {
            Err(format!("'{}' 引用的字段名 `{}` 无法写成规则文本", path, field))
        }
        Operand::Literal(Value::Number(n)) if !n.is_finite() => {
            Err(format!("'{}' 的数值字面量必须是有限数", path))
        }
        _ => Ok(()),
    }
}

fn validate_action(action: &ActionCall, path: &str) -> std::result::Result<(), String> {
    if action.name.trim().is_empty() {
        return Err(format!("动作 '{}' 的名称不能为空", path));
    }
    if !is_identifier(&action.name) {
        return Err(format!("动作 '{}' 的名称 `{}` 不是合法标识符", path, action.name));
    }
    for (i, arg) in action.args.iter().enumerate() {
        validate_operand(arg, &format!("{}.args[{}]", path, i))?;
    }
    for (name, operand) in &action.params {
        if name.trim().is_empty() {
            return Err(format!("动作 '{}' 的参数名不能为空", path));
        }
        if !is_identifier(name) {
            return Err(format!("动作 '{}' 的参数名 `{}` 不是合法标识符", path, name));
        }
        validate_operand(operand, &format!("{}.params.{}", path, name))?;
    }
    Ok(())
}

fn action_fields(action: &ActionCall) -> impl Iterator<Item = String> + '_ {
    action
        .args
        .iter()
        .chain(action.params.values())
        .filter_map(|operand| match operand {
            Operand::Field { field } => Some(field.clone()),
            Operand::Literal(_) => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::Operator;

    fn usage_rule() -> Rule {
        Rule::new(
            "under usage",
            Condition::all(vec![
                Condition::leaf("current_usage_percentage", Operator::Lte, 20),
                Condition::compare_fields("space_used", Operator::Lt, "space_quota"),
            ]),
        )
        .then(ActionCall::new("notify").field_arg("endpoint_name"))
    }

    #[test]
    fn test_compile_extracts_fields() {
        let compiler = RuleCompiler::new();
        let compiled = compiler.compile(usage_rule()).unwrap();

        let fields: Vec<&str> = compiled.required_fields.iter().map(String::as_str).collect();
        assert_eq!(
            fields,
            vec![
                "current_usage_percentage",
                "endpoint_name",
                "space_quota",
                "space_used"
            ]
        );
        assert_eq!(compiled.name(), "under usage");
    }

    #[test]
    fn test_empty_groups_are_valid() {
        let compiler = RuleCompiler::new();
        assert!(
            compiler
                .compile(Rule::new("always", Condition::all(vec![])))
                .is_ok()
        );
        assert!(
            compiler
                .compile(Rule::new("never", Condition::any(vec![])))
                .is_ok()
        );
    }

    #[test]
    fn test_validation_errors() {
        let compiler = RuleCompiler::new();

        let err = compiler
            .compile(Rule::new(" ", Condition::all(vec![])))
            .unwrap_err();
        assert!(err.to_string().contains("规则名称不能为空"));

        let err = compiler
            .compile(Rule::new(
                "r",
                Condition::any(vec![Condition::leaf("", Operator::Eq, 1)]),
            ))
            .unwrap_err();
        assert!(err.to_string().contains("condition.children[0]"));

        let err = compiler
            .compile(Rule::new("r", Condition::all(vec![])).then(ActionCall::new("")))
            .unwrap_err();
        assert!(matches!(err, RuleError::InvalidRule { ref rule, .. } if rule == "r"));

        let err = compiler
            .compile(Rule::new(
                "r",
                Condition::Leaf(Comparison::new(
                    "x",
                    Operator::Lt,
                    Operand::Literal(Value::Number(f64::INFINITY)),
                )),
            ))
            .unwrap_err();
        assert!(err.to_string().contains("有限数"));
    }

    #[test]
    fn test_compile_json_single_and_many() {
        let compiler = RuleCompiler::new();

        let single = r#"{
            "name": "under usage",
            "conditions": {"name": "current_usage_percentage", "operator": "<=", "value": 20},
            "actions": [{"name": "notify", "args": [{"field": "endpoint_name"}]}]
        }"#;
        let compiled = compiler.compile_json(single).unwrap();
        assert_eq!(compiled.len(), 1);
        assert!(compiled[0].required_fields.contains("endpoint_name"));

        let many = r#"[
            {"name": "a", "conditions": {"all": []}},
            {"name": "b", "conditions": {"any": []}}
        ]"#;
        let names: Vec<String> = compiler
            .compile_json(many)
            .unwrap()
            .into_iter()
            .map(|c| c.rule.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);

        assert!(matches!(
            compiler.compile_json(r#"[{"conditions": {}}]"#),
            Err(RuleError::Json(_))
        ));
    }

    #[test]
    fn test_compile_json_reports_single_rule_cause() {
        let compiler = RuleCompiler::new();
        let err = compiler
            .compile_json(r#"{"conditions": {"all": []}}"#)
            .unwrap_err();
        let RuleError::Json(json) = err else {
            panic!("期望 JSON 错误, 实际 {:?}", err);
        };
        let message = json.to_string();
        assert!(message.contains("missing field `name`"), "{}", message);
        assert!(!message.contains("sequence"), "{}", message);
    }

    #[test]
    fn test_names_must_be_printable() {
        let compiler = RuleCompiler::new();
        let rejected = [
            Rule::new("r", Condition::compare_fields("x", Operator::Eq, "null")),
            Rule::new("r", Condition::leaf("space-used", Operator::Gt, 1)),
            Rule::new("r", Condition::leaf("rule", Operator::Eq, 1)),
            Rule::new("r", Condition::leaf("true", Operator::Eq, 1)),
            Rule::new("r", Condition::all(vec![])).then(ActionCall::new("notify-user")),
            Rule::new("r", Condition::all(vec![]))
                .then(ActionCall::new("notify").param("to.user", Operand::literal(1))),
            Rule::new("r", Condition::all(vec![]))
                .then(ActionCall::new("notify").field_arg("false")),
        ];
        for rule in rejected {
            let err = compiler.compile(rule.clone()).unwrap_err();
            assert!(matches!(err, RuleError::InvalidRule { .. }), "{}", rule);
        }
    }

    #[test]
    fn test_compiled_rules_round_trip_through_text() {
        let compiler = RuleCompiler::new();
        let rule = Rule::new(
            "round trip",
            Condition::all(vec![
                Condition::compare_fields("user.level", Operator::Eq, "null_level"),
                Condition::leaf("rules", Operator::Gte, 2),
                Condition::any(vec![Condition::leaf("truthy", Operator::Neq, true)]),
            ]),
        )
        .then(ActionCall::new("notify").field_arg("user.id"));
        let compiled = compiler.compile(rule.clone()).unwrap();

        let reparsed = crate::parser::parse_rules(&compiled.rule.to_string()).unwrap();
        assert_eq!(reparsed.rules(), &[rule]);
    }
}
