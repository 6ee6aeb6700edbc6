//! 事实与变量解析
//!
//! [`Fact`] 保存实体在评估时刻的字段快照；[`DerivedFields`] 登记派生字段的计算函数；
//! [`Resolver`] 在一次评估调用内为条件树提供字段值，派生字段按需计算并缓存。

use chrono::{DateTime, NaiveDate, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::condition::FieldLookup;
use crate::error::{Result, RuleError};
use crate::value::Value;

/// 事实：字段名到取值的有序映射
///
/// 字段按首次插入的顺序保存；重复插入同名字段会覆盖原值但保留位置。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fact {
    fields: Vec<(String, Value)>,
}

impl Fact {
    pub fn new() -> Self {
        Self::default()
    }

    /// 链式插入字段
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// 从 JSON 对象创建
    ///
    /// 嵌套对象展开为点号分隔的字段名（如 `user.level`），数组和 null 被忽略。
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(map) = json else {
            return Err(RuleError::InvalidFact(format!(
                "事实必须是 JSON 对象, 实际为: {}",
                json
            )));
        };

        let mut fact = Self::new();
        flatten_into(&mut fact, None, map);
        Ok(fact)
    }

    /// 从 JSON 文本创建
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_json(&value)
    }
}

fn flatten_into(
    fact: &mut Fact,
    prefix: Option<&str>,
    map: &serde_json::Map<String, serde_json::Value>,
) {
    for (key, value) in map {
        let name = match prefix {
            Some(prefix) => format!("{}.{}", prefix, key),
            None => key.clone(),
        };
        match value {
            serde_json::Value::Object(nested) => flatten_into(fact, Some(&name), nested),
            serde_json::Value::Array(_) | serde_json::Value::Null => {}
            scalar => fact.insert(name, Value::from_json(scalar)),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Fact {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fact = Self::new();
        for (name, value) in iter {
            fact.insert(name, value);
        }
        fact
    }
}

impl Serialize for Fact {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// 派生字段计算函数
///
/// 只能读取存储字段；无法计算时返回 [`Value::Absent`]。
pub type DeriveFn = Arc<dyn Fn(&Fact) -> Value + Send + Sync>;

/// 派生字段表
#[derive(Clone, Default)]
pub struct DerivedFields {
    fields: HashMap<String, DeriveFn>,
}

impl DerivedFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记派生字段，同名覆盖
    pub fn register<F>(&mut self, name: impl Into<String>, derive: F)
    where
        F: Fn(&Fact) -> Value + Send + Sync + 'static,
    {
        self.fields.insert(name.into(), Arc::new(derive));
    }

    pub fn get(&self, name: &str) -> Option<&DeriveFn> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// 已登记的字段名（排序后）
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.fields.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for DerivedFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedFields")
            .field("names", &self.names())
            .finish()
    }
}

/// 单次评估的字段解析器
///
/// 存储字段优先于同名派生字段。派生字段在一次评估内最多计算一次，
/// 缓存随解析器一起丢弃，不会跨评估调用共享。
pub struct Resolver<'a> {
    fact: &'a Fact,
    derived: &'a DerivedFields,
    cache: RefCell<HashMap<String, Value>>,
}

impl<'a> Resolver<'a> {
    pub fn new(fact: &'a Fact, derived: &'a DerivedFields) -> Self {
        Self {
            fact,
            derived,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn fact(&self) -> &'a Fact {
        self.fact
    }

    /// 取字段值；未知字段返回 `Absent`
    pub fn resolve(&self, field: &str) -> Value {
        if let Some(value) = self.fact.get(field) {
            return value.clone();
        }
        if let Some(value) = self.cache.borrow().get(field) {
            return value.clone();
        }
        let Some(derive) = self.derived.get(field) else {
            return Value::Absent;
        };

        let value = match derive(self.fact) {
            Value::Number(n) => Value::number(n),
            other => other,
        };
        self.cache
            .borrow_mut()
            .insert(field.to_string(), value.clone());
        value
    }

    /// 本次评估中已计算过的派生字段数量
    pub fn derived_computed(&self) -> usize {
        self.cache.borrow().len()
    }
}

impl FieldLookup for Resolver<'_> {
    fn lookup(&self, field: &str) -> Value {
        self.resolve(field)
    }
}

/// 常用派生字段
pub mod derive {
    use super::*;

    /// `part * 100 / whole`；任一字段非数值或 `whole` 为 0 时为 `Absent`
    pub fn percentage(
        part: impl Into<String>,
        whole: impl Into<String>,
    ) -> impl Fn(&Fact) -> Value + Send + Sync + 'static {
        let part = part.into();
        let whole = whole.into();
        move |fact: &Fact| {
            let numerator = fact.get(&part).and_then(Value::as_f64);
            let denominator = fact.get(&whole).and_then(Value::as_f64);
            match (numerator, denominator) {
                (Some(n), Some(d)) if d != 0.0 => Value::number(n * 100.0 / d),
                _ => Value::Absent,
            }
        }
    }

    /// 距今的整天数，基于当前 UTC 时间
    pub fn days_since(field: impl Into<String>) -> impl Fn(&Fact) -> Value + Send + Sync + 'static {
        let field = field.into();
        move |fact: &Fact| elapsed_days(fact, &field, Utc::now())
    }

    /// 距给定时刻的整天数
    pub fn days_since_at(
        field: impl Into<String>,
        now: DateTime<Utc>,
    ) -> impl Fn(&Fact) -> Value + Send + Sync + 'static {
        let field = field.into();
        move |fact: &Fact| elapsed_days(fact, &field, now)
    }

    /// 解析 RFC 3339 时间戳或 `YYYY-MM-DD` 日期
    pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    }

    fn elapsed_days(fact: &Fact, field: &str, now: DateTime<Utc>) -> Value {
        fact.get(field)
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .map(|ts| Value::from((now - ts).num_days()))
            .unwrap_or_default()
    }
}
