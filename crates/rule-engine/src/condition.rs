//! 条件树
//!
//! 叶子节点是 `field OP operand` 比较，组合节点是 `all` / `any`。
//! 求值是纯函数：只通过 [`FieldLookup`] 读取字段，不持有任何共享可变状态，
//! 因此同一棵树可以在多个线程中针对不同事实并发求值。

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::operators::Operator;
use crate::value::Value;

/// 按名称读取字段值
///
/// 不存在或无法计算的字段返回 [`Value::Absent`]，不允许报错。
pub trait FieldLookup {
    fn lookup(&self, field: &str) -> Value;
}

impl<F> FieldLookup for F
where
    F: Fn(&str) -> Value,
{
    fn lookup(&self, field: &str) -> Value {
        self(field)
    }
}

/// 比较的右操作数：字面量或另一个字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Field { field: String },
    Literal(Value),
}

impl Operand {
    pub fn field(name: impl Into<String>) -> Self {
        Self::Field { field: name.into() }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// 取得操作数的值，字段引用通过 lookup 解析
    pub fn resolve<L: FieldLookup + ?Sized>(&self, lookup: &L) -> Value {
        match self {
            Self::Field { field } => lookup.lookup(field),
            Self::Literal(value) => value.clone(),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field { field } => f.write_str(field),
            Self::Literal(value) => fmt::Display::fmt(value, f),
        }
    }
}

/// 叶子比较
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    #[serde(alias = "name")]
    pub field: String,
    pub operator: Operator,
    pub value: Operand,
}

impl Comparison {
    pub fn new(field: impl Into<String>, operator: Operator, value: Operand) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    pub fn evaluate<L: FieldLookup + ?Sized>(&self, lookup: &L) -> bool {
        let left = lookup.lookup(&self.field);
        let right = self.value.resolve(lookup);
        left.compare(self.operator, &right)
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.operator, self.value)
    }
}

/// 条件节点
///
/// JSON 形式兼容 business-rules：`{"all": [...]}`、`{"any": [...]}`，
/// 叶子直接写成 `{"name": ..., "operator": ..., "value": ...}`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// 全部子节点为真；空列表为真
    All(Vec<Condition>),
    /// 任一子节点为真；空列表为假
    Any(Vec<Condition>),
    #[serde(untagged)]
    Leaf(Comparison),
}

impl Condition {
    /// `field OP literal`
    pub fn leaf(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self::Leaf(Comparison::new(field, operator, Operand::Literal(value.into())))
    }

    /// `left OP right`，两侧都是字段
    pub fn compare_fields(
        left: impl Into<String>,
        operator: Operator,
        right: impl Into<String>,
    ) -> Self {
        Self::Leaf(Comparison::new(left, operator, Operand::field(right)))
    }

    pub fn all(children: Vec<Condition>) -> Self {
        Self::All(children)
    }

    pub fn any(children: Vec<Condition>) -> Self {
        Self::Any(children)
    }

    /// 求值；组合节点从左到右短路求值
    pub fn evaluate<L: FieldLookup + ?Sized>(&self, lookup: &L) -> bool {
        match self {
            Self::Leaf(cmp) => cmp.evaluate(lookup),
            Self::All(children) => children.iter().all(|c| c.evaluate(lookup)),
            Self::Any(children) => children.iter().any(|c| c.evaluate(lookup)),
        }
    }

    /// 条件中引用的所有字段（含右侧的字段引用）
    pub fn fields(&self) -> BTreeSet<String> {
        let mut fields = BTreeSet::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields(&self, fields: &mut BTreeSet<String>) {
        match self {
            Self::Leaf(cmp) => {
                fields.insert(cmp.field.clone());
                if let Operand::Field { field } = &cmp.value {
                    fields.insert(field.clone());
                }
            }
            Self::All(children) | Self::Any(children) => {
                for child in children {
                    child.collect_fields(fields);
                }
            }
        }
    }

    /// 展开为 DSL 的条件行：顶层多于一个子节点的 `all` 拆成多行隐式合取
    pub fn dsl_lines(&self) -> Vec<String> {
        match self {
            Self::All(children) if children.len() > 1 => {
                children.iter().map(ToString::to_string).collect()
            }
            other => vec![other.to_string()],
        }
    }
}

impl From<Comparison> for Condition {
    fn from(cmp: Comparison) -> Self {
        Self::Leaf(cmp)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (keyword, children) = match self {
            Self::Leaf(cmp) => return fmt::Display::fmt(cmp, f),
            Self::All(children) => ("all", children),
            Self::Any(children) => ("any", children),
        };

        write!(f, "{}(", keyword)?;
        for (i, child) in children.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            fmt::Display::fmt(child, f)?;
        }
        f.write_str(")")
    }
}
