//! 比较操作符定义

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 比较操作符
///
/// JSON 规则中既接受符号形式（`<=`），也接受缩写（`lte`）和
/// business-rules 风格的全称（`less_than_or_equal_to`）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "lt", alias = "<", alias = "less_than")]
    Lt,
    #[serde(rename = "lte", alias = "<=", alias = "less_than_or_equal_to")]
    Lte,
    #[serde(rename = "gt", alias = ">", alias = "greater_than")]
    Gt,
    #[serde(rename = "gte", alias = ">=", alias = "greater_than_or_equal_to")]
    Gte,
    #[serde(rename = "eq", alias = "==", alias = "equal_to")]
    Eq,
    #[serde(rename = "neq", alias = "!=", alias = "not_equal_to")]
    Neq,
}

impl Operator {
    pub const ALL: [Operator; 6] = [
        Self::Lt,
        Self::Lte,
        Self::Gt,
        Self::Gte,
        Self::Eq,
        Self::Neq,
    ];

    /// DSL 中使用的符号
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Eq => "==",
            Self::Neq => "!=",
        }
    }

    /// 将比较结果（左值相对右值的大小关系）映射为布尔值
    pub fn holds(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Self::Lt => ordering == Less,
            Self::Lte => ordering != Greater,
            Self::Gt => ordering == Greater,
            Self::Gte => ordering != Less,
            Self::Eq => ordering == Equal,
            Self::Neq => ordering != Equal,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.symbol() == s)
            .ok_or_else(|| format!("无效的操作符: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn test_symbol_round_trip() {
        for op in Operator::ALL {
            assert_eq!(op.symbol().parse::<Operator>().unwrap(), op);
        }
        assert!("=<".parse::<Operator>().is_err());
    }

    #[test]
    fn test_holds() {
        assert!(Operator::Lte.holds(Ordering::Equal));
        assert!(Operator::Lte.holds(Ordering::Less));
        assert!(!Operator::Lt.holds(Ordering::Equal));
        assert!(Operator::Neq.holds(Ordering::Greater));
        assert!(!Operator::Eq.holds(Ordering::Less));
    }

    #[test]
    fn test_deserialize_aliases() {
        let ops: Vec<Operator> =
            serde_json::from_str(r#"["lte", "<=", "less_than_or_equal_to", "greater_than"]"#)
                .unwrap();
        assert_eq!(
            ops,
            vec![Operator::Lte, Operator::Lte, Operator::Lte, Operator::Gt]
        );
    }
}
