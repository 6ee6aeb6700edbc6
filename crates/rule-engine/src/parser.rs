//! 规则 DSL 解析器
//!
//! 文本格式按行组织：
//!
//! ```text
//! # 注释行
//! rule "notify underused space"
//! when
//!     usage_percentage < 20
//!     any(owner == "team1", space_used >= space_quota)
//! then
//!     notify_user(endpoint_name, email)
//!     inactive_resource(endpoint_name, inactive_days = 90)
//! end
//! ```
//!
//! 段落结构（`rule` / `when` / `then` / `end`）由逐行状态机处理，
//! 行内的条件表达式和动作调用由 winnow 组合子解析。
//! 多个条件行之间是隐式的合取。遇到第一个错误即中止，不做恢复。

use winnow::ascii::{digit1, multispace0};
use winnow::combinator::{alt, cut_err, delimited, not, opt, separated, terminated};
use winnow::error::{AddContext, ContextError, ErrMode, ParseError, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::stream::Stream;
use winnow::token::{any, literal, one_of, take_while};

use crate::condition::{Comparison, Condition, Operand};
use crate::error::RuleSyntaxError;
use crate::models::{ActionCall, Rule, RuleSet};
use crate::operators::Operator;
use crate::value::Value;

/// 解析包含零到多个 `rule ... end` 块的文本，保持规则的出现顺序
pub fn parse_rules(text: &str) -> Result<RuleSet, RuleSyntaxError> {
    let mut rules = RuleSet::new();
    let mut pending: Option<PendingRule> = None;

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fail = |cause: String| RuleSyntaxError::new(line_no, line, cause);
        let kind = LineKind::classify(line);

        let Some(rule) = pending.as_mut() else {
            match kind {
                LineKind::Rule(rest) => {
                    let name = parse_rule_name(rest).map_err(fail)?;
                    pending = Some(PendingRule::new(name, line_no, line));
                }
                LineKind::Keyword(keyword) => {
                    return Err(fail(format!("`{}` 没有对应的 rule 声明", keyword)));
                }
                LineKind::Body => {
                    let word = line.split_whitespace().next().unwrap_or(line);
                    return Err(fail(format!("未知关键字 `{}`", word)));
                }
            }
            continue;
        };

        match (rule.section, kind) {
            (Section::Header, LineKind::Keyword("when")) => rule.section = Section::When,
            (Section::Header, _) => {
                return Err(fail(format!("规则 '{}' 的声明之后应为 when", rule.name)));
            }

            (Section::When, LineKind::Keyword("then")) => {
                if rule.conditions.is_empty() {
                    return Err(fail(format!("规则 '{}' 的 when 段没有条件", rule.name)));
                }
                rule.section = Section::Then;
            }
            (Section::When, LineKind::Keyword("end")) => {
                return Err(fail(format!("规则 '{}' 缺少 then", rule.name)));
            }
            (Section::When, LineKind::Body) => {
                let condition = parse_condition_line(line).map_err(fail)?;
                rule.conditions.push(condition);
            }

            (Section::Then, LineKind::Keyword("end")) => {
                if let Some(done) = pending.take() {
                    rules.push(done.finish());
                }
            }
            (Section::Then, LineKind::Body) => {
                let action = parse_action_line(line).map_err(fail)?;
                rule.actions.push(action);
            }

            (_, LineKind::Rule(_)) => {
                return Err(fail(format!("规则 '{}' 缺少 end", rule.name)));
            }
            (_, LineKind::Keyword(keyword)) => {
                return Err(fail(format!(
                    "规则 '{}' 中出现多余的 `{}`",
                    rule.name, keyword
                )));
            }
        }
    }

    if let Some(rule) = pending {
        return Err(RuleSyntaxError::new(
            rule.line,
            rule.header,
            format!("规则 '{}' 缺少 end", rule.name),
        ));
    }

    Ok(rules)
}

/// 解析单个条件表达式（一行 when 条件的写法）
pub fn parse_condition(text: &str) -> Result<Condition, RuleSyntaxError> {
    parse_condition_line(text.trim()).map_err(|cause| RuleSyntaxError::new(1, text, cause))
}

// ---------------------------------------------------------------------------
// 段落状态机
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Header,
    When,
    Then,
}

struct PendingRule {
    name: String,
    line: usize,
    header: String,
    section: Section,
    conditions: Vec<Condition>,
    actions: Vec<ActionCall>,
}

impl PendingRule {
    fn new(name: String, line: usize, header: &str) -> Self {
        Self {
            name,
            line,
            header: header.to_string(),
            section: Section::Header,
            conditions: Vec::new(),
            actions: Vec::new(),
        }
    }

    fn finish(mut self) -> Rule {
        let condition = if self.conditions.len() == 1 {
            self.conditions.remove(0)
        } else {
            Condition::All(self.conditions)
        };
        Rule {
            name: self.name,
            condition,
            actions: self.actions,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind<'a> {
    /// `rule` 声明，携带关键字之后的内容
    Rule(&'a str),
    /// 独占一行的 `when` / `then` / `end`
    Keyword(&'static str),
    /// 条件行或动作行
    Body,
}

impl<'a> LineKind<'a> {
    fn classify(line: &'a str) -> Self {
        match line {
            "when" => return Self::Keyword("when"),
            "then" => return Self::Keyword("then"),
            "end" => return Self::Keyword("end"),
            _ => {}
        }
        match line.strip_prefix("rule") {
            Some(rest)
                if rest.is_empty()
                    || rest.starts_with(|c: char| c.is_whitespace() || c == '"') =>
            {
                Self::Rule(rest.trim())
            }
            _ => Self::Body,
        }
    }
}

// ---------------------------------------------------------------------------
// 行级入口
// ---------------------------------------------------------------------------

fn parse_rule_name(rest: &str) -> Result<String, String> {
    if rest.is_empty() {
        return Err("缺少规则名".to_string());
    }
    let name = alt((quoted_string, ident.map(String::from)))
        .parse(rest)
        .map_err(|e| describe(&e))?;
    if name.trim().is_empty() {
        return Err("规则名为空".to_string());
    }
    Ok(name)
}

fn parse_condition_line(line: &str) -> Result<Condition, String> {
    delimited(multispace0, expr, multispace0)
        .parse(line)
        .map_err(|e| describe(&e))
}

fn parse_action_line(line: &str) -> Result<ActionCall, String> {
    if line.starts_with('(') {
        return Err("动作名为空".to_string());
    }
    let (name, args) = delimited(multispace0, action_call, multispace0)
        .parse(line)
        .map_err(|e| describe(&e))?;

    let mut call = ActionCall::new(name);
    for arg in args {
        match arg {
            CallArg::Positional(operand) => {
                if !call.params.is_empty() {
                    return Err("位置参数不能出现在命名参数之后".to_string());
                }
                call.args.push(operand);
            }
            CallArg::Named(param, operand) => {
                if call.params.contains_key(&param) {
                    return Err(format!("重复的命名参数 `{}`", param));
                }
                call.params.insert(param, operand);
            }
        }
    }
    Ok(call)
}

/// 把 winnow 的错误转换为可读的原因描述
fn describe(err: &ParseError<&str, ContextError>) -> String {
    let input: &str = err.input();
    let rest = input.get(err.offset()..).unwrap_or_default();
    let position = if rest.is_empty() {
        "行尾".to_string()
    } else {
        format!("`{}`", rest)
    };

    let expected: Vec<String> = err
        .inner()
        .context()
        .filter_map(|ctx| match ctx {
            StrContext::Expected(value) => Some(value.to_string()),
            _ => None,
        })
        .collect();

    if expected.is_empty() {
        format!("无法识别 {}", position)
    } else {
        format!("在 {} 处期望 {}", position, expected.join(" 或 "))
    }
}

// ---------------------------------------------------------------------------
// 条件表达式
// ---------------------------------------------------------------------------

fn expr(input: &mut &str) -> ModalResult<Condition> {
    alt((group, comparison)).parse_next(input)
}

/// `all(expr, ...)` / `any(expr, ...)`
fn group(input: &mut &str) -> ModalResult<Condition> {
    let keyword = terminated(
        alt((literal("all"), literal("any"))),
        (multispace0, literal("(")),
    )
    .parse_next(input)?;

    let children: Vec<Condition> =
        separated(0.., delimited(multispace0, expr, multispace0), literal(","))
            .parse_next(input)?;
    multispace0.parse_next(input)?;

    cut_err(literal(")"))
        .context(StrContext::Expected(StrContextValue::CharLiteral(')')))
        .parse_next(input)?;

    Ok(if keyword == "all" {
        Condition::All(children)
    } else {
        Condition::Any(children)
    })
}

/// `field OP operand`
fn comparison(input: &mut &str) -> ModalResult<Condition> {
    let field = field_name.parse_next(input)?;
    multispace0.parse_next(input)?;

    let operator = cut_err(operator)
        .context(StrContext::Expected(StrContextValue::Description(
            "比较操作符",
        )))
        .parse_next(input)?;
    multispace0.parse_next(input)?;

    let value = cut_err(operand).parse_next(input)?;
    Ok(Condition::Leaf(Comparison::new(field, operator, value)))
}

fn operator(input: &mut &str) -> ModalResult<Operator> {
    // 双字符操作符必须排在单字符之前
    alt((
        literal("<=").value(Operator::Lte),
        literal(">=").value(Operator::Gte),
        literal("==").value(Operator::Eq),
        literal("!=").value(Operator::Neq),
        literal("<").value(Operator::Lt),
        literal(">").value(Operator::Gt),
    ))
    .parse_next(input)
}

/// 字面量或字段引用；未加引号的标识符是字段引用
fn operand(input: &mut &str) -> ModalResult<Operand> {
    alt((
        number.map(|n| Operand::Literal(Value::number(n))),
        quoted_string.map(|s| Operand::Literal(Value::String(s))),
        field_name.map(|name| match name.as_str() {
            "true" => Operand::literal(true),
            "false" => Operand::literal(false),
            "null" => Operand::Literal(Value::Absent),
            _ => Operand::Field { field: name },
        }),
    ))
    .context(StrContext::Expected(StrContextValue::Description(
        "数值、字符串或字段名",
    )))
    .parse_next(input)
}

// ---------------------------------------------------------------------------
// 动作调用
// ---------------------------------------------------------------------------

enum CallArg {
    Positional(Operand),
    Named(String, Operand),
}

/// `name(arg, ..., key = value, ...)`
fn action_call(input: &mut &str) -> ModalResult<(String, Vec<CallArg>)> {
    let name = ident
        .context(StrContext::Expected(StrContextValue::Description("动作名")))
        .parse_next(input)?;
    multispace0.parse_next(input)?;

    cut_err(literal("("))
        .context(StrContext::Expected(StrContextValue::CharLiteral('(')))
        .parse_next(input)?;

    let args: Vec<CallArg> =
        separated(0.., delimited(multispace0, call_arg, multispace0), literal(","))
            .parse_next(input)?;
    multispace0.parse_next(input)?;

    cut_err(literal(")"))
        .context(StrContext::Expected(StrContextValue::CharLiteral(')')))
        .parse_next(input)?;

    Ok((name.to_string(), args))
}

fn call_arg(input: &mut &str) -> ModalResult<CallArg> {
    let named = opt(terminated(
        ident,
        (multispace0, literal("="), not(literal("="))),
    ))
    .parse_next(input)?;

    match named {
        Some(param) => {
            multispace0.parse_next(input)?;
            let value = cut_err(operand).parse_next(input)?;
            Ok(CallArg::Named(param.to_string(), value))
        }
        None => operand.map(CallArg::Positional).parse_next(input),
    }
}

// ---------------------------------------------------------------------------
// 词法单元
// ---------------------------------------------------------------------------

fn ident<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    (
        one_of(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
        .take()
        .parse_next(input)
}

/// 字段名，允许 `user.level` 这样的点分形式
fn field_name(input: &mut &str) -> ModalResult<String> {
    let first = ident.parse_next(input)?;
    let mut name = first.to_string();
    while opt(literal(".")).parse_next(input)?.is_some() {
        let next = cut_err(ident)
            .context(StrContext::Expected(StrContextValue::Description(
                "点号之后的字段名",
            )))
            .parse_next(input)?;
        name.push('.');
        name.push_str(next);
    }
    Ok(name)
}

/// `-?digits(.digits)?`，超出 f64 范围的字面量是语法错误
fn number(input: &mut &str) -> ModalResult<f64> {
    let start = input.checkpoint();
    let n = (opt(literal("-")), digit1, opt((literal("."), digit1)))
        .take()
        .try_map(str::parse::<f64>)
        .parse_next(input)?;

    if !n.is_finite() {
        input.reset(&start);
        return Err(ErrMode::Cut(ContextError::new().add_context(
            input,
            &start,
            StrContext::Expected(StrContextValue::Description("有限范围内的数值")),
        )));
    }
    Ok(n)
}

/// 可以原样写进规则文本并读回的字段名：点分标识符，且不是 `true` / `false` / `null` / `rule`
pub fn is_plain_field_name(name: &str) -> bool {
    const RESERVED: [&str; 4] = ["true", "false", "null", "rule"];
    !RESERVED.contains(&name) && field_name.parse(name).is_ok()
}

/// 动作名和命名参数使用的标识符
pub fn is_identifier(name: &str) -> bool {
    ident.parse(name).is_ok()
}

/// 双引号字符串，支持 `\"`、`\\`、`\n`、`\t` 转义
fn quoted_string(input: &mut &str) -> ModalResult<String> {
    literal("\"").parse_next(input)?;
    let mut content = String::new();
    loop {
        let chunk = take_while(0.., |c: char| c != '"' && c != '\\').parse_next(input)?;
        content.push_str(chunk);

        if opt(literal("\\")).parse_next(input)?.is_some() {
            let escaped = cut_err(any)
                .context(StrContext::Expected(StrContextValue::Description(
                    "转义字符",
                )))
                .parse_next(input)?;
            content.push(match escaped {
                'n' => '\n',
                't' => '\t',
                other => other,
            });
            continue;
        }

        cut_err(literal("\""))
            .context(StrContext::Expected(StrContextValue::Description(
                "闭合引号",
            )))
            .parse_next(input)?;
        return Ok(content);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STORAGE_RULES: &str = r#"
# 存储端点监控
rule "notify underused space"
when
    current_usage_percentage <= 20
then
    under_usage_resource(endpoint_name)
end

rule "inactive endpoint"
when
    days_since_last_access >= 90
    owner != null
then
    inactive_resource(endpoint_name, inactive_days = 90)
    audit("inactive", endpoint_name)
end
"#;

    #[test]
    fn test_parse_multiple_rules_in_order() {
        let rules = parse_rules(STORAGE_RULES).unwrap();
        assert_eq!(rules.len(), 2);

        let first = &rules.rules()[0];
        assert_eq!(first.name, "notify underused space");
        assert_eq!(
            first.condition,
            Condition::leaf("current_usage_percentage", Operator::Lte, 20)
        );
        assert_eq!(
            first.actions,
            vec![ActionCall::new("under_usage_resource").field_arg("endpoint_name")]
        );

        let second = &rules.rules()[1];
        assert_eq!(second.name, "inactive endpoint");
        // 多个条件行是隐式合取
        assert_eq!(
            second.condition,
            Condition::all(vec![
                Condition::leaf("days_since_last_access", Operator::Gte, 90),
                Condition::leaf("owner", Operator::Neq, Value::Absent),
            ])
        );
        assert_eq!(second.actions.len(), 2);
        assert_eq!(
            second.actions[0],
            ActionCall::new("inactive_resource")
                .field_arg("endpoint_name")
                .param("inactive_days", Operand::literal(90))
        );
        assert_eq!(
            second.actions[1],
            ActionCall::new("audit")
                .literal_arg("inactive")
                .field_arg("endpoint_name")
        );
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_rules("").unwrap().is_empty());
        assert!(parse_rules("\n   \n# only a comment\n").unwrap().is_empty());
    }

    #[test]
    fn test_literals_and_field_references() {
        let cases = [
            ("x < -3.5", Condition::leaf("x", Operator::Lt, -3.5)),
            ("x == 42", Condition::leaf("x", Operator::Eq, 42)),
            (r#"name == "team \"a\"""#, Condition::leaf("name", Operator::Eq, "team \"a\"")),
            ("active == true", Condition::leaf("active", Operator::Eq, true)),
            ("active != false", Condition::leaf("active", Operator::Neq, false)),
            ("owner != null", Condition::leaf("owner", Operator::Neq, Value::Absent)),
            ("used>=quota", Condition::compare_fields("used", Operator::Gte, "quota")),
            ("user.level > 2", Condition::leaf("user.level", Operator::Gt, 2)),
            ("true_count == 1", Condition::leaf("true_count", Operator::Eq, 1)),
        ];
        for (text, expected) in cases {
            assert_eq!(parse_condition(text).unwrap(), expected, "{}", text);
        }
    }

    #[test]
    fn test_nested_groups() {
        let cond = parse_condition(r#"any(all(a < 1, b > 2), c == "x", any())"#).unwrap();
        assert_eq!(
            cond,
            Condition::any(vec![
                Condition::all(vec![
                    Condition::leaf("a", Operator::Lt, 1),
                    Condition::leaf("b", Operator::Gt, 2),
                ]),
                Condition::leaf("c", Operator::Eq, "x"),
                Condition::any(vec![]),
            ])
        );

        // 名为 all 的字段不会被当作分组
        assert_eq!(
            parse_condition("allowance >= 10").unwrap(),
            Condition::leaf("allowance", Operator::Gte, 10)
        );
    }

    #[test]
    fn test_blank_inside_empty_parentheses() {
        assert_eq!(parse_condition("all( )").unwrap(), Condition::all(vec![]));
        assert_eq!(parse_condition("any(\t)").unwrap(), Condition::any(vec![]));
        assert_eq!(
            parse_condition("all( a < 1 , b > 2 )").unwrap(),
            Condition::all(vec![
                Condition::leaf("a", Operator::Lt, 1),
                Condition::leaf("b", Operator::Gt, 2),
            ])
        );

        let rules = parse_rules("rule \"r\"\nwhen\n  a < 1\nthen\n  notify( )\nend\n").unwrap();
        assert_eq!(rules.rules()[0].actions, vec![ActionCall::new("notify")]);
    }

    #[test]
    fn test_number_out_of_range() {
        let huge = format!("x < 1{}", "0".repeat(400));
        let err = parse_condition(&huge).unwrap_err();
        assert!(err.cause.contains("有限范围内的数值"), "{}", err.cause);

        let err = parse_condition(&format!("x > -{}", "9".repeat(400))).unwrap_err();
        assert!(err.cause.contains("有限范围内的数值"), "{}", err.cause);

        let text = format!("rule \"r\"\nwhen\n  a < 1\nthen\n  notify(1{})\nend\n", "0".repeat(400));
        let err = parse_rules(&text).unwrap_err();
        assert_eq!(err.line, 5);
        assert!(err.cause.contains("有限范围内的数值"), "{}", err.cause);

        // 上限附近的有限值仍然合法
        assert!(parse_condition(&format!("x < 17976931348623157{}", "0".repeat(292))).is_ok());
    }

    #[test]
    fn test_plain_field_names() {
        for name in ["usage", "user.level", "_x", "null_count", "rules"] {
            assert!(is_plain_field_name(name), "{}", name);
        }
        for name in ["", "null", "true", "false", "rule", "space-used", "a..b", "1st", "a.", "a b"] {
            assert!(!is_plain_field_name(name), "{}", name);
        }
        assert!(is_identifier("notify_user"));
        assert!(!is_identifier("notify.user"));
        assert!(!is_identifier("notify-user"));
    }

    #[test]
    fn test_missing_operator() {
        let err = parse_condition("usage_percentage 20").unwrap_err();
        assert!(err.cause.contains("比较操作符"), "{}", err.cause);

        let text = "rule \"r\"\nwhen\n    usage_percentage 20\nthen\nend\n";
        let err = parse_rules(text).unwrap_err();
        assert_eq!(err.line, 3);
        assert_eq!(err.source_line, "usage_percentage 20");
    }

    #[test]
    fn test_missing_end_reports_rule_header() {
        let text = "rule \"first\"\nwhen\n  a < 1\nthen\n  notify(a)\n";
        let err = parse_rules(text).unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.cause.contains("缺少 end"));

        let text = "rule \"first\"\nwhen\n  a < 1\nthen\nrule \"second\"\n";
        let err = parse_rules(text).unwrap_err();
        assert_eq!(err.line, 5);
        assert!(err.cause.contains("'first' 缺少 end"));
    }

    #[test]
    fn test_unmatched_sections() {
        let err = parse_rules("when\n  a < 1\n").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.cause.contains("没有对应的 rule"));

        let err = parse_rules("rule \"r\"\nthen\nend\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.cause.contains("应为 when"));

        let err = parse_rules("rule \"r\"\nwhen\n  a < 1\nend\n").unwrap_err();
        assert!(err.cause.contains("缺少 then"));

        let err = parse_rules("rule \"r\"\nwhen\nthen\nend\n").unwrap_err();
        assert!(err.cause.contains("没有条件"));

        let err = parse_rules("rule \"r\"\nwhen\n  a < 1\nthen\nwhen\nend\n").unwrap_err();
        assert_eq!(err.line, 5);
        assert!(err.cause.contains("多余的 `when`"));
    }

    #[test]
    fn test_unknown_keyword() {
        let err = parse_rules("rulez \"r\"\n").unwrap_err();
        assert_eq!(err.cause, "未知关键字 `rulez`");
    }

    #[test]
    fn test_rule_name_errors() {
        assert!(parse_rules("rule\n").unwrap_err().cause.contains("缺少规则名"));
        assert!(parse_rules("rule \"\"\n").unwrap_err().cause.contains("规则名为空"));
        assert!(
            parse_rules("rule \"unterminated\n")
                .unwrap_err()
                .cause
                .contains("闭合引号")
        );
    }

    #[test]
    fn test_action_errors() {
        let rule = |action: &str| format!("rule \"r\"\nwhen\n  a < 1\nthen\n  {}\nend\n", action);

        let err = parse_rules(&rule("(endpoint_name)")).unwrap_err();
        assert_eq!(err.line, 5);
        assert_eq!(err.cause, "动作名为空");

        let err = parse_rules(&rule("notify")).unwrap_err();
        assert!(err.cause.contains("`(`"), "{}", err.cause);

        let err = parse_rules(&rule("notify(days = 1, endpoint)")).unwrap_err();
        assert!(err.cause.contains("命名参数之后"));

        let err = parse_rules(&rule("notify(days = 1, days = 2)")).unwrap_err();
        assert!(err.cause.contains("重复的命名参数"));
    }

    #[test]
    fn test_rule_display_round_trip() {
        let rule = Rule::new(
            "mixed \"quoted\" name",
            Condition::all(vec![
                Condition::leaf("owner", Operator::Eq, "line\nbreak"),
                Condition::any(vec![
                    Condition::leaf("space_used", Operator::Gt, 1.5),
                    Condition::compare_fields("space_used", Operator::Gte, "space_quota"),
                ]),
            ]),
        )
        .then(
            ActionCall::new("notify")
                .field_arg("owner")
                .literal_arg(false)
                .param("days", Operand::literal(90)),
        );

        let parsed = parse_rules(&rule.to_string()).unwrap();
        assert_eq!(parsed.rules(), &[rule]);
    }
}
