//! 事实规则引擎
//!
//! 提供可复用的规则评估能力，支持：
//! - 文本 DSL 与 JSON 规则定义
//! - 规则校验与编译
//! - 派生字段惰性计算与单次评估内缓存
//! - 短路求值与评估追踪
//! - 动作参数绑定与按序分发

pub mod action;
pub mod compiler;
pub mod condition;
pub mod engine;
pub mod error;
pub mod executor;
pub mod models;
pub mod operators;
pub mod parser;
pub mod resolver;
pub mod value;

pub use action::{ActionHandler, ActionParams, ActionRegistry, ActionSpec};
pub use compiler::{CompiledRule, RuleCompiler};
pub use condition::{Comparison, Condition, FieldLookup, Operand};
pub use engine::{EngineStatus, RuleEngine};
pub use error::{DispatchError, Result, RuleError, RuleSyntaxError};
pub use executor::RuleExecutor;
pub use models::{ActionCall, EvaluationReport, Rule, RuleReport, RuleSet};
pub use operators::Operator;
pub use parser::{parse_condition, parse_rules};
pub use resolver::{DerivedFields, Fact, Resolver, derive};
pub use value::{Value, ValueKind};
