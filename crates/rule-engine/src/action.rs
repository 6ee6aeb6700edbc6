//! 动作注册表与分发
//!
//! 规则命中后，动作调用的实参按动作声明的参数顺序绑定：
//! 位置参数依次绑定，命名参数按名称绑定，缺省的参数取默认值。
//! 字段引用通过本次评估的 [`Resolver`] 解析，字面量原样传入。
//!
//! ```ignore
//! let mut registry = ActionRegistry::new();
//! registry.register(
//!     ActionSpec::new("notify_user")
//!         .param("endpoint", ValueKind::String)
//!         .param("email", ValueKind::String),
//!     Arc::new(|fact: &Fact, params: &ActionParams| {
//!         send_mail(params.get_str("email"), fact)?;
//!         Ok(())
//!     }),
//! );
//! ```

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::DispatchError;
use crate::models::ActionCall;
use crate::resolver::{Fact, Resolver};
use crate::value::{Value, ValueKind};

/// 参数声明
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: String,
    /// 期望的取值类型，`None` 表示任意类型
    pub kind: Option<ValueKind>,
    /// 调用方未提供时使用的默认值
    pub default: Option<Value>,
}

/// 动作声明：名称与有序参数表
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionSpec {
    pub name: String,
    pub params: Vec<ParamSpec>,
    /// 严格模式下校验实参个数与参数名
    pub strict: bool,
}

impl ActionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            strict: true,
        }
    }

    /// 声明一个指定类型的参数
    pub fn param(self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.push_param(name.into(), Some(kind), None)
    }

    /// 声明一个任意类型的参数
    pub fn any_param(self, name: impl Into<String>) -> Self {
        self.push_param(name.into(), None, None)
    }

    /// 声明一个带默认值的参数，类型取自默认值
    pub fn optional_param(self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        let default = default.into();
        let kind = (!default.is_absent()).then(|| default.kind());
        self.push_param(name.into(), kind, Some(default))
    }

    /// 关闭严格校验：多余的位置参数和未声明的命名参数被忽略，
    /// 缺失的参数绑定为默认值或 `Absent`
    pub fn lenient(mut self) -> Self {
        self.strict = false;
        self
    }

    pub fn param_names(&self) -> Vec<&str> {
        self.params.iter().map(|p| p.name.as_str()).collect()
    }

    fn push_param(mut self, name: String, kind: Option<ValueKind>, default: Option<Value>) -> Self {
        self.params.push(ParamSpec {
            name,
            kind,
            default,
        });
        self
    }
}

/// 绑定完成的参数，按声明顺序排列
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActionParams {
    values: Vec<(String, Value)>,
}

impl ActionParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.push((name.into(), value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(param, _)| param == name)
            .map(|(_, value)| value)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for ActionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        Ok(())
    }
}

/// 动作处理器
///
/// 返回 `Err` 时分发记为 [`DispatchError::HandlerFailed`]，不会中断本次评估。
/// 处理器可以执行阻塞 I/O，引擎不设置超时。
#[cfg_attr(test, mockall::automock)]
pub trait ActionHandler: Send + Sync {
    fn handle(&self, fact: &Fact, params: &ActionParams) -> anyhow::Result<()>;
}

impl<F> ActionHandler for F
where
    F: Fn(&Fact, &ActionParams) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, fact: &Fact, params: &ActionParams) -> anyhow::Result<()> {
        self(fact, params)
    }
}

/// 已注册的动作
#[derive(Clone)]
pub struct RegisteredAction {
    pub spec: ActionSpec,
    pub handler: Arc<dyn ActionHandler>,
}

impl fmt::Debug for RegisteredAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredAction")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

/// 动作注册表，按动作名索引；同名注册以最后一次为准
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, RegisteredAction>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: ActionSpec, handler: Arc<dyn ActionHandler>) -> &mut Self {
        debug!(
            action = %spec.name,
            params = ?spec.param_names(),
            strict = spec.strict,
            "注册动作"
        );
        self.actions
            .insert(spec.name.clone(), RegisteredAction { spec, handler });
        self
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredAction> {
        self.actions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// 已注册的动作名（排序后）
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// 按声明绑定动作调用的实参
    pub fn bind(
        &self,
        rule: &str,
        call: &ActionCall,
        resolver: &Resolver<'_>,
    ) -> Result<ActionParams, DispatchError> {
        let action = self.lookup(rule, call)?;
        bind_params(rule, &action.spec, call, resolver)
    }

    /// 绑定并调用处理器，返回绑定后的参数
    pub fn dispatch(
        &self,
        rule: &str,
        call: &ActionCall,
        resolver: &Resolver<'_>,
    ) -> Result<ActionParams, DispatchError> {
        let action = self.lookup(rule, call)?;
        let params = bind_params(rule, &action.spec, call, resolver)?;

        action
            .handler
            .handle(resolver.fact(), &params)
            .map_err(|e| DispatchError::HandlerFailed {
                rule: rule.to_string(),
                action: call.name.clone(),
                reason: format!("{:#}", e),
            })?;
        Ok(params)
    }

    fn lookup(&self, rule: &str, call: &ActionCall) -> Result<&RegisteredAction, DispatchError> {
        self.get(&call.name)
            .ok_or_else(|| DispatchError::ActionNotRegistered {
                rule: rule.to_string(),
                action: call.name.clone(),
            })
    }
}

fn bind_params(
    rule: &str,
    spec: &ActionSpec,
    call: &ActionCall,
    resolver: &Resolver<'_>,
) -> Result<ActionParams, DispatchError> {
    let arity_mismatch = || DispatchError::ArityMismatch {
        rule: rule.to_string(),
        action: call.name.clone(),
        expected: spec.params.len(),
        actual: call.arg_count(),
    };

    if spec.strict && call.args.len() > spec.params.len() {
        return Err(arity_mismatch());
    }
    if spec.strict {
        for name in call.params.keys() {
            let position = spec.params.iter().position(|p| &p.name == name);
            match position {
                None => {
                    return Err(DispatchError::UnknownParam {
                        rule: rule.to_string(),
                        action: call.name.clone(),
                        param: name.clone(),
                    });
                }
                // 同一参数既按位置又按名称传入
                Some(index) if index < call.args.len() => return Err(arity_mismatch()),
                Some(_) => {}
            }
        }
    }

    let mut params = ActionParams::new();
    for (index, param) in spec.params.iter().enumerate() {
        let operand = call
            .args
            .get(index)
            .or_else(|| call.params.get(&param.name));

        let value = match (operand, &param.default) {
            (Some(operand), _) => operand.resolve(resolver),
            (None, Some(default)) => default.clone(),
            (None, None) if spec.strict => return Err(arity_mismatch()),
            (None, None) => Value::Absent,
        };

        if let Some(expected) = param.kind {
            let actual = value.kind();
            let tolerated = actual == ValueKind::Absent && !spec.strict;
            if actual != expected && !tolerated {
                return Err(DispatchError::ParamKindMismatch {
                    rule: rule.to_string(),
                    action: call.name.clone(),
                    param: param.name.clone(),
                    expected,
                    actual,
                });
            }
        }

        params.values.push((param.name.clone(), value));
    }

    Ok(params)
}
