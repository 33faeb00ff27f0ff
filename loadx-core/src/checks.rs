//! Runtime assertion evaluation: (field, operator, value) triples against
//! a completed exchange. Failures are recorded on the request result; they
//! never abort the iteration on their own.

use loadx_ir::{AssertOp, AssertValue, Assertion, EvaluationContext};

use crate::vars;

#[derive(Debug, Clone)]
pub struct CheckResult {
    /// `status == 200` style rendering for reports.
    pub expression: String,
    pub passed: bool,
    /// Actual value observed, when the field resolved.
    pub actual: Option<String>,
}

/// Evaluate every assertion against the exchange.
pub fn evaluate_all(checks: &[Assertion], ctx: &EvaluationContext) -> Vec<CheckResult> {
    checks.iter().map(|check| evaluate(check, ctx)).collect()
}

pub fn evaluate(check: &Assertion, ctx: &EvaluationContext) -> CheckResult {
    let expression = format!("{} {} {}", check.field, check.op, check.value);

    let Some(actual) = resolve_field(&check.field, ctx) else {
        return CheckResult {
            expression,
            passed: false,
            actual: None,
        };
    };

    let passed = compare(&actual, check.op, &check.value);
    CheckResult {
        expression,
        passed,
        actual: Some(render(&actual)),
    }
}

/// The observed value for an assertion field: `status`, `latency`, a
/// dotted path under `body`, or `header.<Name>`.
fn resolve_field(field: &str, ctx: &EvaluationContext) -> Option<serde_json::Value> {
    if field == "status" {
        return Some(ctx.response.status.into());
    }

    if field == "latency" || field == "latency_ms" {
        return serde_json::Number::from_f64(ctx.response.latency_ms)
            .map(serde_json::Value::Number);
    }

    if let Some(path) = field.strip_prefix("body.") {
        return vars::json_path(ctx.response.body.as_ref()?, path).cloned();
    }

    if field == "body" {
        return ctx.response.body.clone();
    }

    if let Some(name) = field.strip_prefix("header.") {
        return ctx
            .response
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| serde_json::Value::String(v.clone()));
    }

    None
}

fn compare(actual: &serde_json::Value, op: AssertOp, expected: &AssertValue) -> bool {
    match op {
        AssertOp::Eq => equals(actual, expected),
        AssertOp::Ne => !equals(actual, expected),
        AssertOp::Lt | AssertOp::Le | AssertOp::Gt | AssertOp::Ge => ordered(actual, op, expected),
        AssertOp::Contains => match expected {
            AssertValue::String(needle) => as_text(actual).contains(needle),
            other => as_text(actual).contains(&other.to_string()),
        },
        AssertOp::In => match expected {
            AssertValue::List(options) => options.iter().any(|option| equals(actual, option)),
            single => equals(actual, single),
        },
    }
}

fn equals(actual: &serde_json::Value, expected: &AssertValue) -> bool {
    match expected {
        AssertValue::Number(n) => actual.as_f64().is_some_and(|a| a == *n),
        AssertValue::Bool(b) => actual.as_bool() == Some(*b),
        AssertValue::String(s) => match actual {
            serde_json::Value::String(a) => a == s,
            // `body.id == "42"` style comparisons against non-string
            // fields fall back to textual equality.
            other => other.to_string() == *s,
        },
        AssertValue::List(_) => false,
    }
}

fn ordered(actual: &serde_json::Value, op: AssertOp, expected: &AssertValue) -> bool {
    let Some(a) = actual.as_f64() else {
        return false;
    };
    let b = match expected {
        AssertValue::Number(n) => *n,
        AssertValue::String(s) => match s.parse::<f64>() {
            Ok(n) => n,
            Err(_) => return false,
        },
        _ => return false,
    };

    match op {
        AssertOp::Lt => a < b,
        AssertOp::Le => a <= b,
        AssertOp::Gt => a > b,
        AssertOp::Ge => a >= b,
        _ => false,
    }
}

fn as_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render(value: &serde_json::Value) -> String {
    as_text(value)
}
