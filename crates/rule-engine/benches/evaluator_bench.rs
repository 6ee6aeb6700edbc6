//! 规则评估性能基准测试
//!
//! 覆盖单条比较、条件树求值、DSL 解析和引擎整体评估。

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rule_engine::{
    ActionParams, ActionSpec, Condition, Fact, Operator, RuleEngine, Value, ValueKind, derive,
    parse_rules,
};
use std::hint::black_box;

const STORAGE_RULES: &str = r#"
rule "under usage resource"
when
    current_usage_percentage <= 20
then
    under_usage_resource(endpoint_identifier)
end

rule "inactive resource"
when
    days_since_last_access >= 90
then
    inactive_resource(endpoint_identifier)
end

rule "no match"
when
    endpoint_identifier != null
    all(current_usage_percentage > 20, days_since_last_access < 90)
then
    no_match(endpoint_identifier)
end
"#;

fn endpoint_fact() -> Fact {
    Fact::new()
        .with("endpoint_identifier", "endpoint-0")
        .with("space_quota", 512)
        .with("space_used", 104)
        .with("associated_email", "team1@email.com")
        .with("last_access", "2025-05-01")
}

/// 值比较基准
fn bench_value_compare(c: &mut Criterion) {
    let mut group = c.benchmark_group("value_compare");

    let number = Value::from(1000);
    let other = Value::from(500);
    group.bench_function("number_gte", |b| {
        b.iter(|| black_box(&number).compare(black_box(Operator::Gte), black_box(&other)))
    });

    let text = Value::from("gold");
    let other_text = Value::from("silver");
    group.bench_function("string_eq", |b| {
        b.iter(|| black_box(&text).compare(black_box(Operator::Eq), black_box(&other_text)))
    });

    group.bench_function("absent_neq", |b| {
        b.iter(|| Value::Absent.compare(black_box(Operator::Neq), black_box(&number)))
    });

    group.finish();
}

/// 条件树宽度对求值的影响
fn bench_condition_width(c: &mut Criterion) {
    let mut group = c.benchmark_group("condition_width");
    let fact = (0..64).fold(Fact::new(), |fact, i| fact.with(format!("f{}", i), i));
    let lookup = |name: &str| fact.get(name).cloned().unwrap_or_default();

    for width in [1usize, 8, 64] {
        let condition = Condition::all(
            (0..width)
                .map(|i| Condition::leaf(format!("f{}", i), Operator::Gte, 0))
                .collect(),
        );
        group.bench_with_input(BenchmarkId::new("all", width), &condition, |b, condition| {
            b.iter(|| condition.evaluate(black_box(&lookup)))
        });
    }

    group.finish();
}

/// DSL 解析
fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_storage_rules", |b| {
        b.iter(|| parse_rules(black_box(STORAGE_RULES)))
    });
}

/// 引擎整体评估，包含派生字段计算与动作分发
fn bench_engine_evaluate(c: &mut Criterion) {
    let engine = RuleEngine::new();
    engine.register_derived(
        "current_usage_percentage",
        derive::percentage("space_used", "space_quota"),
    );
    engine.register_derived("days_since_last_access", derive::days_since("last_access"));
    for name in ["under_usage_resource", "inactive_resource", "no_match"] {
        engine.register_action(
            ActionSpec::new(name).param("endpoint", ValueKind::String),
            |_: &Fact, params: &ActionParams| -> anyhow::Result<()> {
                black_box(params);
                Ok(())
            },
        );
    }
    if let Err(e) = engine.load_rules(STORAGE_RULES) {
        panic!("基准规则无效: {}", e);
    }

    let fact = endpoint_fact();
    c.bench_function("engine_evaluate_storage", |b| {
        b.iter(|| engine.evaluate(black_box(&fact)))
    });

    let traced = RuleEngine::new().with_trace();
    if let Err(e) = traced.load_rules(STORAGE_RULES) {
        panic!("基准规则无效: {}", e);
    }
    c.bench_function("engine_evaluate_traced", |b| {
        b.iter(|| traced.evaluate(black_box(&fact)))
    });
}

criterion_group!(
    benches,
    bench_value_compare,
    bench_condition_width,
    bench_parse,
    bench_engine_evaluate,
);
criterion_main!(benches);
