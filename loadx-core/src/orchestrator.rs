//! Retry/mutation loop around one request node.
//!
//! Each attempt executes a fresh substitution of a working copy of the
//! plan's IR; verdict mutations accumulate on that working copy, never on
//! the plan itself. The `attempt` counter is visible to the evaluator
//! through its variable map.

use std::time::Duration;

use loadx_ir::{Decision, EvaluationContext, ExtractSpec, Ir, QueryValue, Verdict};
use regex::Regex;

use crate::cookies::CookieJar;
use crate::evaluator::EvaluatorGateway;
use crate::http::HttpExecutor;
use crate::runner::CancelSignal;
use crate::vars::{self, VarMap};

/// Run-level retry defaults, overridable per request (`retry` block) and
/// per verdict (`actions.max_retries`).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempt bound, first attempt included.
    pub default_max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            default_max_attempts: 3,
        }
    }
}

/// The result of driving one request node to completion.
#[derive(Debug)]
pub struct RequestOutcome {
    pub name: String,
    pub attempts: u32,
    pub passed: bool,
    /// Reason when not passed.
    pub failure: Option<String>,
    /// The final attempt's context, when one was produced.
    pub ctx: Option<EvaluationContext>,
    pub verdict: Option<Verdict>,
    /// Set when the evaluator subprocess failed and the default evaluator
    /// decided instead.
    pub evaluator_fallback: Option<String>,
    pub cancelled: bool,
}

impl RequestOutcome {
    fn failed(name: &str, attempts: u32, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            attempts,
            passed: false,
            failure: Some(reason.into()),
            ctx: None,
            verdict: None,
            evaluator_fallback: None,
            cancelled: false,
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn run_request(
    executor: &HttpExecutor,
    gateway: &EvaluatorGateway,
    name: &str,
    plan_ir: &Ir,
    vu: u64,
    iter: u64,
    iteration_vars: &mut VarMap,
    jar: &CookieJar,
    cancel: &CancelSignal,
    policy: &RetryPolicy,
) -> RequestOutcome {
    let mut working = plan_ir.clone();
    let mut max_attempts = configured_max_attempts(&working, policy);
    let mut fallback: Option<String> = None;

    let mut attempt: u32 = 1;
    loop {
        if cancel.is_cancelled() {
            let mut outcome = RequestOutcome::failed(name, attempt, "cancelled");
            outcome.cancelled = true;
            return outcome;
        }

        iteration_vars.insert("attempt".to_string(), attempt.into());

        let mut send_ir = working.clone();
        // Everything the iteration knows goes along to the evaluator.
        for (key, value) in iteration_vars.iter() {
            send_ir
                .evaluation
                .vars
                .insert(key.clone(), value.clone());
        }
        vars::apply_to_ir(&mut send_ir, vu, iter, iteration_vars);

        let ctx = match executor.execute(&send_ir, jar).await {
            Ok(ctx) => ctx,
            Err(err) => {
                let mut outcome = RequestOutcome::failed(name, attempt, err.to_string());
                outcome.evaluator_fallback = fallback;
                return outcome;
            }
        };

        let gate_outcome = gateway.evaluate(&ctx, cancel).await;
        if gate_outcome.fallback.is_some() && fallback.is_none() {
            fallback = gate_outcome.fallback.clone();
        }
        let verdict = gate_outcome.verdict;

        apply_action_extracts(&verdict, &ctx, iteration_vars);
        if let Some(mutations) = &verdict.mutations {
            for (key, value) in &mutations.vars {
                iteration_vars.insert(key.clone(), value.clone());
            }
        }

        match verdict.decision {
            Decision::Pass => {
                return RequestOutcome {
                    name: name.to_string(),
                    attempts: attempt,
                    passed: true,
                    failure: None,
                    ctx: Some(ctx),
                    verdict: Some(verdict),
                    evaluator_fallback: fallback,
                    cancelled: false,
                };
            }
            Decision::Fail => {
                let reason = if verdict.reason.is_empty() {
                    "evaluator returned fail".to_string()
                } else {
                    verdict.reason.clone()
                };
                return RequestOutcome {
                    name: name.to_string(),
                    attempts: attempt,
                    passed: false,
                    failure: Some(reason),
                    ctx: Some(ctx),
                    verdict: Some(verdict),
                    evaluator_fallback: fallback,
                    cancelled: false,
                };
            }
            Decision::Branch => {
                // Defined by the protocol but not executable here; an
                // explicit failure beats silently passing.
                let target = verdict
                    .actions
                    .as_ref()
                    .and_then(|a| a.goto.clone())
                    .unwrap_or_default();
                return RequestOutcome {
                    name: name.to_string(),
                    attempts: attempt,
                    passed: false,
                    failure: Some(format!(
                        "branch to `{target}` requested but branch execution is not supported"
                    )),
                    ctx: Some(ctx),
                    verdict: Some(verdict),
                    evaluator_fallback: fallback,
                    cancelled: false,
                };
            }
            Decision::Retry => {
                if let Some(mutations) = &verdict.mutations {
                    apply_mutations(&mut working, mutations);
                }

                if let Some(actions) = &verdict.actions {
                    if let Some(override_max) = actions.max_retries {
                        max_attempts = override_max.max(1);
                    }
                }

                if attempt >= max_attempts {
                    return RequestOutcome {
                        name: name.to_string(),
                        attempts: attempt,
                        passed: false,
                        failure: Some("max retries exceeded".to_string()),
                        ctx: Some(ctx),
                        verdict: Some(verdict),
                        evaluator_fallback: fallback,
                        cancelled: false,
                    };
                }

                let delay = retry_delay(&verdict, &working, attempt);
                if !delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            let mut outcome =
                                RequestOutcome::failed(name, attempt, "cancelled");
                            outcome.cancelled = true;
                            return outcome;
                        }
                    }
                }

                attempt += 1;
            }
        }
    }
}

/// The attempt bound before any verdict override: the request's `retry`
/// block, else the run default.
fn configured_max_attempts(ir: &Ir, policy: &RetryPolicy) -> u32 {
    ir.evaluation
        .vars
        .get("retry_max_attempts")
        .and_then(|v| v.as_u64())
        .map(|v| (v as u32).max(1))
        .unwrap_or(policy.default_max_attempts)
}

/// Delay before the next attempt: the verdict's `retry_after_ms` wins,
/// else the request's configured backoff schedule.
fn retry_delay(verdict: &Verdict, ir: &Ir, attempt: u32) -> Duration {
    if let Some(actions) = &verdict.actions {
        if let Some(ms) = actions.retry_after_ms {
            return Duration::from_millis(ms.max(0) as u64);
        }
    }

    let base = ir
        .evaluation
        .vars
        .get("retry_base_delay")
        .and_then(|v| v.as_str())
        .and_then(|s| parse_delay(s))
        .unwrap_or(Duration::ZERO);

    if base.is_zero() {
        return Duration::ZERO;
    }

    match ir
        .evaluation
        .vars
        .get("retry_backoff")
        .and_then(|v| v.as_str())
        .unwrap_or("fixed")
    {
        "exponential" => base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1))),
        "linear" => base.saturating_mul(attempt),
        _ => base,
    }
}

fn parse_delay(literal: &str) -> Option<Duration> {
    let digits_end = literal
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map_or(literal.len(), |(i, _)| i);
    let value: u64 = literal[..digits_end].parse().ok()?;
    match &literal[digits_end..] {
        "" | "ms" => Some(Duration::from_millis(value)),
        "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        _ => None,
    }
}

fn apply_mutations(ir: &mut Ir, mutations: &loadx_ir::Mutations) {
    for (key, value) in &mutations.headers {
        ir.request.headers.insert(key.clone(), value.clone());
    }

    for (key, value) in &mutations.query {
        ir.request
            .query
            .insert(key.clone(), QueryValue::One(value.clone()));
    }

    if let Some(body) = &mutations.body {
        match &mut ir.request.body {
            Some(loadx_ir::Body::Json { content }) => *content = body.clone(),
            Some(loadx_ir::Body::Text { content }) => {
                *content = match body {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
            }
            _ => {
                ir.request.body = Some(loadx_ir::Body::Json {
                    content: body.clone(),
                });
            }
        }
    }
}

/// Extraction rules carried in `actions.extract` bind into the iteration's
/// variable map, with the rule's default as fallback.
fn apply_action_extracts(verdict: &Verdict, ctx: &EvaluationContext, vars: &mut VarMap) {
    let Some(actions) = &verdict.actions else {
        return;
    };

    for (name, spec) in &actions.extract {
        if let Some(value) = run_extract_spec(spec, ctx) {
            vars.insert(name.clone(), value);
        }
    }
}

fn run_extract_spec(spec: &ExtractSpec, ctx: &EvaluationContext) -> Option<serde_json::Value> {
    if let Some(path) = &spec.jsonpath {
        if let Some(body) = &ctx.response.body {
            if let Some(value) = vars::json_path(body, path) {
                return Some(value.clone());
            }
        }
    }

    if let Some(pattern) = &spec.regex {
        if let Ok(re) = Regex::new(pattern) {
            let body = ctx.response.body_text();
            if let Some(captures) = re.captures(&body) {
                if let Some(group) = captures.get(1).or_else(|| captures.get(0)) {
                    return Some(serde_json::Value::String(group.as_str().to_string()));
                }
            }
        }
    }

    spec.default
        .clone()
        .map(serde_json::Value::String)
}
