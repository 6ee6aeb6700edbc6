//! 规则引擎领域模型

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::condition::{Condition, Operand};
use crate::error::{DispatchError, Result, RuleSyntaxError};
use crate::value::Value;

/// 动作调用
///
/// 位置参数在分发时按动作声明的参数顺序绑定，命名参数按名称绑定。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCall {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Operand>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Operand>,
}

impl ActionCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            params: BTreeMap::new(),
        }
    }

    /// 追加一个位置参数
    pub fn arg(mut self, operand: Operand) -> Self {
        self.args.push(operand);
        self
    }

    /// 追加一个字段引用位置参数
    pub fn field_arg(self, field: impl Into<String>) -> Self {
        self.arg(Operand::field(field))
    }

    /// 追加一个字面量位置参数
    pub fn literal_arg(self, value: impl Into<Value>) -> Self {
        self.arg(Operand::literal(value))
    }

    /// 设置命名参数
    pub fn param(mut self, name: impl Into<String>, operand: Operand) -> Self {
        self.params.insert(name.into(), operand);
        self
    }

    /// 实参总数
    pub fn arg_count(&self) -> usize {
        self.args.len() + self.params.len()
    }
}

impl fmt::Display for ActionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        let positional = self.args.iter().map(ToString::to_string);
        let named = self
            .params
            .iter()
            .map(|(name, operand)| format!("{} = {}", name, operand));
        let rendered: Vec<String> = positional.chain(named).collect();
        write!(f, "{})", rendered.join(", "))
    }
}

/// 规则定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    #[serde(alias = "conditions")]
    pub condition: Condition,
    #[serde(default)]
    pub actions: Vec<ActionCall>,
}

impl Rule {
    pub fn new(name: impl Into<String>, condition: Condition) -> Self {
        Self {
            name: name.into(),
            condition,
            actions: Vec::new(),
        }
    }

    /// 追加一个命中后执行的动作
    pub fn then(mut self, action: ActionCall) -> Self {
        self.actions.push(action);
        self
    }
}

/// 输出为 DSL 文本，解析后得到语义相同的规则
impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "rule {}", Value::from(self.name.as_str()))?;
        writeln!(f, "when")?;
        for line in self.condition.dsl_lines() {
            writeln!(f, "    {}", line)?;
        }
        writeln!(f, "then")?;
        for action in &self.actions {
            writeln!(f, "    {}", action)?;
        }
        write!(f, "end")
    }
}

/// 有序规则集，插入顺序即触发顺序；允许重名
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 解析 DSL 文本
    pub fn from_dsl(text: &str) -> std::result::Result<Self, RuleSyntaxError> {
        crate::parser::parse_rules(text)
    }

    /// 解析 JSON 数组形式的规则集
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

impl From<Vec<Rule>> for RuleSet {
    fn from(rules: Vec<Rule>) -> Self {
        Self { rules }
    }
}

impl FromIterator<Rule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = Rule>>(iter: I) -> Self {
        Self {
            rules: iter.into_iter().collect(),
        }
    }
}

impl Extend<Rule> for RuleSet {
    fn extend<I: IntoIterator<Item = Rule>>(&mut self, iter: I) {
        self.rules.extend(iter);
    }
}

impl IntoIterator for RuleSet {
    type Item = Rule;
    type IntoIter = std::vec::IntoIter<Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.into_iter()
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

impl fmt::Display for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rule) in self.rules.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
                writeln!(f)?;
            }
            write!(f, "{}", rule)?;
        }
        Ok(())
    }
}

/// 单条规则的评估结果
///
/// `matched` 与 `dispatch_errors` 分开记录，调用方可以区分
/// "规则未命中" 和 "规则命中但动作失败"。
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleReport {
    pub rule_name: String,
    pub matched: bool,
    /// 成功执行的动作名，按执行顺序
    pub dispatched: Vec<String>,
    pub dispatch_errors: Vec<DispatchError>,
    /// 条件追踪，仅在启用追踪时记录
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<String>,
}

impl RuleReport {
    pub fn new(rule_name: impl Into<String>) -> Self {
        Self {
            rule_name: rule_name.into(),
            ..Default::default()
        }
    }

    /// 命中且所有动作都成功
    pub fn succeeded(&self) -> bool {
        self.matched && self.dispatch_errors.is_empty()
    }
}

/// 一次事实评估的结果，规则顺序与规则集一致
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub rules: Vec<RuleReport>,
    pub evaluation_time_us: u64,
}

impl EvaluationReport {
    /// 命中的规则名，按规则集顺序
    pub fn matched_rules(&self) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| r.matched)
            .map(|r| r.rule_name.as_str())
            .collect()
    }

    pub fn any_matched(&self) -> bool {
        self.rules.iter().any(|r| r.matched)
    }

    pub fn has_dispatch_errors(&self) -> bool {
        self.rules.iter().any(|r| !r.dispatch_errors.is_empty())
    }

    /// 所有分发错误，按发生顺序
    pub fn dispatch_errors(&self) -> impl Iterator<Item = &DispatchError> {
        self.rules.iter().flat_map(|r| r.dispatch_errors.iter())
    }

    /// 按名称查找规则结果；重名时返回第一个
    pub fn rule(&self, name: &str) -> Option<&RuleReport> {
        self.rules.iter().find(|r| r.rule_name == name)
    }
}
