//! 规则引擎门面
//!
//! 持有规则集、动作注册表和派生字段表，对每个事实依次评估全部规则。
//!
//! 引擎状态是一份不可变快照，读取端通过 `ArcSwap::load_full` 无锁获取；
//! 加载规则、注册动作等修改操作在写锁下复制快照、修改后整体替换。
//! 进行中的评估始终使用开始时的快照，处理器中回调引擎不会死锁。

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

use factrule_shared::observability::metrics::{record_fact_evaluation, set_rule_set_size};
use tracing::{debug, info, instrument};

use crate::action::{ActionHandler, ActionRegistry, ActionSpec};
use crate::compiler::{CompiledRule, RuleCompiler};
use crate::error::Result;
use crate::executor::RuleExecutor;
use crate::models::{EvaluationReport, Rule, RuleSet};
use crate::parser;
use crate::resolver::{DerivedFields, Fact, Resolver};
use crate::value::Value;

/// 引擎状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// 尚未加载任何规则
    Uninitialized,
    /// 已加载规则，可以评估
    Ready,
}

#[derive(Clone, Default)]
struct EngineState {
    rules: Vec<Arc<CompiledRule>>,
    actions: ActionRegistry,
    derived: DerivedFields,
}

/// 规则引擎
pub struct RuleEngine {
    state: ArcSwap<EngineState>,
    /// 写锁，串行化所有修改
    writer: Mutex<()>,
    compiler: RuleCompiler,
    executor: RuleExecutor,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleEngine {
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(EngineState::default()),
            writer: Mutex::new(()),
            compiler: RuleCompiler::new(),
            executor: RuleExecutor::new(),
        }
    }

    /// 在评估报告中记录条件追踪
    pub fn with_trace(mut self) -> Self {
        self.executor = self.executor.with_trace();
        self
    }

    pub fn status(&self) -> EngineStatus {
        if self.state.load().rules.is_empty() {
            EngineStatus::Uninitialized
        } else {
            EngineStatus::Ready
        }
    }

    /// 解析 DSL 文本并追加到规则集
    ///
    /// 全部成功才生效；失败时已加载的规则保持不变。返回本次加载的规则数。
    #[instrument(skip(self, text), fields(bytes = text.len()))]
    pub fn load_rules(&self, text: &str) -> Result<usize> {
        let rules = parser::parse_rules(text)?;
        self.load_rule_set(rules)
    }

    /// 从 JSON 加载规则（单条规则对象或规则数组）并追加到规则集
    #[instrument(skip(self, json))]
    pub fn load_rules_json(&self, json: &str) -> Result<usize> {
        self.update(|compiler, state| {
            let compiled = compiler.compile_json(json)?;
            Ok(append_rules(state, compiled))
        })
    }

    /// 校验并追加规则集
    #[instrument(skip(self, rules), fields(count = rules.len()))]
    pub fn load_rule_set(&self, rules: RuleSet) -> Result<usize> {
        self.update(|compiler, state| {
            let compiled = compiler.compile_all(rules)?;
            Ok(append_rules(state, compiled))
        })
    }

    /// 追加单条规则
    pub fn add_rule(&self, rule: Rule) -> Result<()> {
        self.load_rule_set(RuleSet::from(vec![rule])).map(|_| ())
    }

    /// 注册动作；同名动作被覆盖
    #[instrument(skip(self, spec, handler), fields(action = %spec.name))]
    pub fn register_action<H>(&self, spec: ActionSpec, handler: H)
    where
        H: ActionHandler + 'static,
    {
        self.update_infallible(|state| {
            state.actions.register(spec, Arc::new(handler));
        });
    }

    /// 登记派生字段；同名覆盖
    #[instrument(skip(self, derive))]
    pub fn register_derived<F>(&self, name: &str, derive: F)
    where
        F: Fn(&Fact) -> Value + Send + Sync + 'static,
    {
        self.update_infallible(|state| state.derived.register(name, derive));
    }

    /// 清空规则集，动作与派生字段保留
    #[instrument(skip(self))]
    pub fn clear_rules(&self) {
        self.update_infallible(|state| {
            let count = state.rules.len();
            state.rules.clear();
            info!("规则集已清空: 移除 {} 条规则", count);
        });
        set_rule_set_size(0);
    }

    pub fn rule_count(&self) -> usize {
        self.state.load().rules.len()
    }

    /// 当前规则集的快照，按触发顺序
    pub fn rules(&self) -> RuleSet {
        self.state
            .load()
            .rules
            .iter()
            .map(|compiled| compiled.rule.clone())
            .collect()
    }

    pub fn action_names(&self) -> Vec<String> {
        let state = self.state.load();
        state.actions.names().into_iter().map(String::from).collect()
    }

    /// 按规则集顺序评估事实，命中的规则按声明顺序分发动作
    ///
    /// 评估本身不会失败：缺失字段、无法计算的派生字段和类型不匹配都按不命中处理，
    /// 分发错误记录在对应规则的报告中。
    #[instrument(skip(self, fact), fields(fields = fact.len()))]
    pub fn evaluate(&self, fact: &Fact) -> EvaluationReport {
        let start = Instant::now();
        let state = self.state.load_full();
        let resolver = Resolver::new(fact, &state.derived);

        let rules = state
            .rules
            .iter()
            .map(|rule| self.executor.execute(rule, &state.actions, &resolver))
            .collect();

        let elapsed = start.elapsed();
        let report = EvaluationReport {
            rules,
            evaluation_time_us: u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
        };

        let matched = report.matched_rules();
        record_fact_evaluation(matched.len(), elapsed.as_secs_f64());
        debug!(
            matched = ?matched,
            derived_computed = resolver.derived_computed(),
            elapsed_us = report.evaluation_time_us,
            "事实评估完成"
        );

        report
    }

    /// 评估 JSON 对象形式的事实
    pub fn evaluate_json(&self, json: &serde_json::Value) -> Result<EvaluationReport> {
        let fact = Fact::from_json(json)?;
        Ok(self.evaluate(&fact))
    }

    /// 在写锁下复制快照、修改并发布；闭包失败时快照不变
    fn update<T>(
        &self,
        mutate: impl FnOnce(&RuleCompiler, &mut EngineState) -> Result<T>,
    ) -> Result<T> {
        let _writer = self.writer.lock();
        let mut next = EngineState::clone(&self.state.load());
        let out = mutate(&self.compiler, &mut next)?;
        let size = next.rules.len();
        self.state.store(Arc::new(next));
        set_rule_set_size(size);
        Ok(out)
    }

    fn update_infallible(&self, mutate: impl FnOnce(&mut EngineState)) {
        let _writer = self.writer.lock();
        let mut next = EngineState::clone(&self.state.load());
        mutate(&mut next);
        self.state.store(Arc::new(next));
    }
}

fn append_rules(state: &mut EngineState, compiled: Vec<CompiledRule>) -> usize {
    let count = compiled.len();
    for rule in compiled {
        debug!(rule = %rule.name(), fields = ?rule.required_fields, "规则已加载");
        state.rules.push(Arc::new(rule));
    }
    info!("规则加载完成: 新增 {} 条, 共 {} 条", count, state.rules.len());
    count
}
