//! 规则引擎错误类型
//!
//! 加载期错误（语法、结构校验）是硬失败，直接返回给调用方；
//! 分发期错误（`DispatchError`）是软失败，只记录在评估报告中。

use serde::Serialize;
use thiserror::Error;

use crate::value::ValueKind;

/// 规则文本语法错误
///
/// 解析器不做错误恢复，遇到第一个错误即中止整个规则集的解析。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("第 {line} 行规则语法错误: {cause} (`{source_line}`)")]
pub struct RuleSyntaxError {
    /// 出错的行号（从 1 开始）
    pub line: usize,
    /// 出错行的原始文本（已去除首尾空白）
    pub source_line: String,
    /// 人类可读的错误原因
    pub cause: String,
}

impl RuleSyntaxError {
    pub fn new(line: usize, source_line: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            line,
            source_line: source_line.into().trim().to_string(),
            cause: cause.into(),
        }
    }
}

/// 动作分发错误
///
/// 每个变体都携带规则名和动作名，便于在报告中定位是哪条规则的哪个动作失败。
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchError {
    #[error("规则 '{rule}' 引用了未注册的动作: {action}")]
    ActionNotRegistered { rule: String, action: String },

    #[error("规则 '{rule}' 调用动作 '{action}' 的参数个数不匹配: 期望 {expected}, 实际 {actual}")]
    ArityMismatch {
        rule: String,
        action: String,
        expected: usize,
        actual: usize,
    },

    #[error("规则 '{rule}' 调用动作 '{action}' 时传入了未声明的参数: {param}")]
    UnknownParam {
        rule: String,
        action: String,
        param: String,
    },

    #[error("规则 '{rule}' 调用动作 '{action}' 的参数 {param} 类型错误: 期望 {expected}, 实际 {actual}")]
    ParamKindMismatch {
        rule: String,
        action: String,
        param: String,
        expected: ValueKind,
        actual: ValueKind,
    },

    #[error("规则 '{rule}' 的动作 '{action}' 执行失败: {reason}")]
    HandlerFailed {
        rule: String,
        action: String,
        reason: String,
    },
}

impl DispatchError {
    /// 出错的规则名
    pub fn rule(&self) -> &str {
        match self {
            Self::ActionNotRegistered { rule, .. }
            | Self::ArityMismatch { rule, .. }
            | Self::UnknownParam { rule, .. }
            | Self::ParamKindMismatch { rule, .. }
            | Self::HandlerFailed { rule, .. } => rule,
        }
    }

    /// 出错的动作名
    pub fn action(&self) -> &str {
        match self {
            Self::ActionNotRegistered { action, .. }
            | Self::ArityMismatch { action, .. }
            | Self::UnknownParam { action, .. }
            | Self::ParamKindMismatch { action, .. }
            | Self::HandlerFailed { action, .. } => action,
        }
    }

    /// 错误码，用于指标标签
    pub fn code(&self) -> &'static str {
        match self {
            Self::ActionNotRegistered { .. } => "ACTION_NOT_REGISTERED",
            Self::ArityMismatch { .. } => "ARITY_MISMATCH",
            Self::UnknownParam { .. } => "UNKNOWN_PARAM",
            Self::ParamKindMismatch { .. } => "PARAM_KIND_MISMATCH",
            Self::HandlerFailed { .. } => "HANDLER_FAILED",
        }
    }
}

/// 规则加载错误
#[derive(Debug, Error)]
pub enum RuleError {
    #[error(transparent)]
    Syntax(#[from] RuleSyntaxError),

    #[error("规则 '{rule}' 校验失败: {reason}")]
    InvalidRule { rule: String, reason: String },

    #[error("无效的事实数据: {0}")]
    InvalidFact(String),

    #[error("JSON 序列化错误: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RuleError>;
