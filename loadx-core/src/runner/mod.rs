//! Load driver: spawns virtual users, paces work under the three load
//! models, walks the compiled request tree per iteration, and feeds the
//! aggregator and the progress channel.

mod gate;
mod progress;
mod signal;

pub use gate::IterationGate;
pub use progress::{PROGRESS_CAPACITY, ProgressEvent, ProgressSender, progress_channel};
pub use signal::CancelSignal;

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, join_all};
use loadx_ir::{CondOp, Condition, LoadProfile, RequestNode, ScenarioPlan};
use tokio::time::MissedTickBehavior;

use crate::checks;
use crate::cookies::CookieJar;
use crate::error::{Error, Result};
use crate::evaluator::EvaluatorGateway;
use crate::http::HttpExecutor;
use crate::orchestrator::{self, RetryPolicy};
use crate::stats::{RequestMeta, RunStats, RunSummary, VuSummary};
use crate::vars::{self, VarMap};

/// Everything a VU task needs, cheap to clone.
#[derive(Clone)]
struct RunCtx {
    executor: Arc<HttpExecutor>,
    gateway: Arc<EvaluatorGateway>,
    stats: Arc<RunStats>,
    progress: Option<ProgressSender>,
    cancel: Arc<CancelSignal>,
    policy: RetryPolicy,
}

/// Aggregated result of executing one subtree of the request tree.
#[derive(Debug, Default)]
struct NodeResult {
    requests: u64,
    passed: u64,
    failed: u64,
    latency_ms_total: f64,
    first_failure: Option<(String, String)>,
}

impl NodeResult {
    fn merge(&mut self, other: NodeResult) {
        self.requests += other.requests;
        self.passed += other.passed;
        self.failed += other.failed;
        self.latency_ms_total += other.latency_ms_total;
        if self.first_failure.is_none() {
            self.first_failure = other.first_failure;
        }
    }
}

pub struct Runner {
    plan: Arc<ScenarioPlan>,
    ctx: RunCtx,
}

impl Runner {
    pub fn new(plan: ScenarioPlan) -> Self {
        let stats = Arc::new(RunStats::new());
        Self {
            plan: Arc::new(plan),
            ctx: RunCtx {
                executor: Arc::new(HttpExecutor::new()),
                gateway: Arc::new(EvaluatorGateway::new()),
                stats,
                progress: None,
                cancel: Arc::new(CancelSignal::new()),
                policy: RetryPolicy::default(),
            },
        }
    }

    pub fn with_progress(mut self, sender: ProgressSender) -> Self {
        self.ctx.progress = Some(sender);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.ctx.policy = policy;
        self
    }

    pub fn stats(&self) -> Arc<RunStats> {
        self.ctx.stats.clone()
    }

    /// Handle the caller keeps to request a cooperative shutdown.
    pub fn cancel_signal(&self) -> Arc<CancelSignal> {
        self.ctx.cancel.clone()
    }

    /// Execute the whole scenario: setup once, the load model, teardown
    /// once, then the merged summary.
    pub async fn run(self) -> Result<RunSummary> {
        let started = Instant::now();
        let plan = self.plan;
        let ctx = self.ctx;

        // Compile-time bindings seed the variable map so conditions and
        // late substitutions can still see them.
        let mut setup_vars: VarMap = plan
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();

        {
            let jar = CookieJar::new();
            for node in &plan.setup {
                let result = exec_node(&ctx, node, 0, 0, &mut setup_vars, &jar).await;
                if result.failed > 0 {
                    let (name, reason) = result
                        .first_failure
                        .unwrap_or_else(|| (node.name.clone(), "request failed".to_string()));
                    return Err(Error::SetupFailed(name, reason));
                }
            }
        }

        let setup_vars = Arc::new(setup_vars);

        match plan.load {
            LoadProfile::VusForDuration { vus, duration } => {
                let gate = Arc::new(IterationGate::new(None, Some(duration)));
                gate.start_at(Instant::now());

                let mut handles = Vec::with_capacity(vus as usize);
                for vu in 1..=u64::from(vus) {
                    handles.push(tokio::spawn(vu_loop(
                        ctx.clone(),
                        plan.clone(),
                        vu,
                        gate.clone(),
                        setup_vars.clone(),
                    )));
                }
                for handle in handles {
                    handle.await?;
                }
            }
            LoadProfile::Iterations { iterations, vus } => {
                let vus = u64::from(vus.max(1));
                let base = iterations / vus;
                let extra = iterations % vus;

                let mut handles = Vec::new();
                for vu in 1..=vus {
                    let count = base + u64::from(vu <= extra);
                    if count == 0 {
                        continue;
                    }
                    let gate = Arc::new(IterationGate::new(Some(count), None));
                    handles.push(tokio::spawn(vu_loop(
                        ctx.clone(),
                        plan.clone(),
                        vu,
                        gate,
                        setup_vars.clone(),
                    )));
                }
                for handle in handles {
                    handle.await?;
                }
            }
            LoadProfile::RpsForDuration { rps, duration } => {
                run_rps(&ctx, &plan, rps, duration, &setup_vars).await?;
            }
        }

        // Teardown runs regardless of iteration outcomes; failures are
        // logged and do not change the reported result.
        {
            let jar = CookieJar::new();
            let mut teardown_vars = (*setup_vars).clone();
            for node in &plan.teardown {
                let result = exec_node(&ctx, node, 0, 0, &mut teardown_vars, &jar).await;
                if result.failed > 0 {
                    let reason = result
                        .first_failure
                        .map(|(name, reason)| format!("{name}: {reason}"))
                        .unwrap_or_else(|| "request failed".to_string());
                    tracing::warn!(%reason, "teardown request failed");
                }
            }
        }

        Ok(ctx.stats.summarize(started.elapsed()))
    }
}

/// One constant VU: loop until the gate closes or the run is cancelled.
async fn vu_loop(
    ctx: RunCtx,
    plan: Arc<ScenarioPlan>,
    vu: u64,
    gate: Arc<IterationGate>,
    setup_vars: Arc<VarMap>,
) {
    if let Some(progress) = &ctx.progress {
        progress.emit(ProgressEvent::VuStarted { vu });
    }

    let mut summary = VuSummary::new(vu);
    let mut iter: u64 = 1;

    while !ctx.cancel.is_cancelled() && gate.next() {
        if let Some(progress) = &ctx.progress {
            progress.emit(ProgressEvent::IterationStarted { vu, iter });
        }

        let result = run_iteration(&ctx, &plan, vu, iter, &setup_vars).await;
        summary.iterations += 1;
        summary.requests += result.requests;
        summary.passed += result.passed;
        summary.failed += result.failed;
        summary.total_latency_ms += result.latency_ms_total;
        ctx.stats.record_iteration();

        iter += 1;
    }

    if let Some(progress) = &ctx.progress {
        progress.emit(ProgressEvent::VuFinished { vu });
    }
    ctx.stats.push_vu_summary(summary);
}

/// RPS pacing: one iteration task per tick until the deadline. VU ids are
/// synthetic — the id rolls every `rps` iterations and only serves to
/// de-duplicate log lines.
async fn run_rps(
    ctx: &RunCtx,
    plan: &Arc<ScenarioPlan>,
    rps: u32,
    duration: Duration,
    setup_vars: &Arc<VarMap>,
) -> Result<()> {
    let deadline = Instant::now() + duration;
    let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(rps.max(1))));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut handles = Vec::new();
    let mut iteration: u64 = 0;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if Instant::now() >= deadline {
                    break;
                }

                iteration += 1;
                let vu = iteration / u64::from(rps) + 1;
                let iter = iteration;

                let ctx = ctx.clone();
                let plan = plan.clone();
                let setup_vars = setup_vars.clone();
                handles.push(tokio::spawn(async move {
                    if let Some(progress) = &ctx.progress {
                        progress.emit(ProgressEvent::IterationStarted { vu, iter });
                    }
                    run_iteration(&ctx, &plan, vu, iter, &setup_vars).await;
                    ctx.stats.record_iteration();
                }));
            }
            _ = ctx.cancel.cancelled() => break,
        }
    }

    for handle in handles {
        handle.await?;
    }
    Ok(())
}

/// One traversal of the main flow: fresh variable map seeded from setup,
/// fresh cookie jar, nodes in order.
async fn run_iteration(
    ctx: &RunCtx,
    plan: &ScenarioPlan,
    vu: u64,
    iter: u64,
    setup_vars: &VarMap,
) -> NodeResult {
    let mut iteration_vars = setup_vars.clone();
    let jar = CookieJar::new();

    let mut total = NodeResult::default();
    for node in &plan.main {
        total.merge(exec_node(ctx, node, vu, iter, &mut iteration_vars, &jar).await);
        if ctx.cancel.is_cancelled() {
            break;
        }
    }
    total
}

/// Execute one node and its subtree. Children run only after the node's
/// own request returned and its extractions were applied; parallel
/// children each get a copy of the variable map, merged back afterwards
/// in unspecified order.
fn exec_node<'a>(
    ctx: &'a RunCtx,
    node: &'a RequestNode,
    vu: u64,
    iter: u64,
    iteration_vars: &'a mut VarMap,
    jar: &'a CookieJar,
) -> BoxFuture<'a, NodeResult> {
    Box::pin(async move {
        let mut result = NodeResult::default();

        if ctx.cancel.is_cancelled() {
            return result;
        }

        if let Some(condition) = &node.condition {
            if !condition_holds(condition, vu, iter, iteration_vars) {
                return result;
            }
        }

        let mut request_cancelled = false;
        if let Some(ir) = &node.ir {
            let outcome = orchestrator::run_request(
                ctx.executor.as_ref(),
                ctx.gateway.as_ref(),
                &node.name,
                ir,
                vu,
                iter,
                iteration_vars,
                jar,
                ctx.cancel.as_ref(),
                &ctx.policy,
            )
            .await;
            request_cancelled = outcome.cancelled;

            let mut status = None;
            let mut latency = Duration::ZERO;
            let mut bytes_received = 0;
            let mut assertion_failures: u64 = 0;
            let mut error = outcome.failure.clone();

            if let Some(exchange) = &outcome.ctx {
                if exchange.response.error.is_none() {
                    status = Some(exchange.response.status);
                } else if error.is_none() {
                    error = exchange.response.error.clone();
                }
                latency = Duration::from_secs_f64(exchange.response.latency_ms.max(0.0) / 1000.0);
                bytes_received = exchange.response.size_bytes;

                for check in checks::evaluate_all(&node.checks, exchange) {
                    if !check.passed {
                        assertion_failures += 1;
                        if error.is_none() {
                            error = Some(format!("assertion failed: {}", check.expression));
                        }
                        tracing::debug!(
                            request = %node.name,
                            check = %check.expression,
                            actual = ?check.actual,
                            "assertion failed"
                        );
                    }
                }

                for (name, value) in vars::extract(&node.extract, exchange) {
                    iteration_vars.insert(name, value);
                }
            }

            let recorded_pass = outcome.passed && assertion_failures == 0;

            result.requests += 1;
            result.latency_ms_total += latency.as_secs_f64() * 1000.0;
            if recorded_pass {
                result.passed += 1;
            } else {
                result.failed += 1;
                result.first_failure = Some((
                    node.name.clone(),
                    error
                        .clone()
                        .unwrap_or_else(|| "request failed".to_string()),
                ));
            }

            ctx.stats.record_request(&RequestMeta {
                name: &node.name,
                status,
                latency,
                bytes_received,
                passed: recorded_pass,
                attempts: outcome.attempts,
                assertion_failures,
                evaluator_fell_back: outcome.evaluator_fallback.is_some(),
            });

            if let Some(progress) = &ctx.progress {
                progress.emit(ProgressEvent::RequestCompleted {
                    vu,
                    iter,
                    name: node.name.clone(),
                    status,
                    latency_ms: latency.as_secs_f64() * 1000.0,
                    attempts: outcome.attempts,
                    error,
                });
            }
        }

        if request_cancelled {
            return result;
        }

        if node.parallel && !node.children.is_empty() {
            let futures: Vec<_> = node
                .children
                .iter()
                .map(|child| {
                    let mut child_vars = iteration_vars.clone();
                    async move {
                        let child_result =
                            exec_node(ctx, child, vu, iter, &mut child_vars, jar).await;
                        (child_result, child_vars)
                    }
                })
                .collect();

            for (child_result, child_vars) in join_all(futures).await {
                result.merge(child_result);
                for (name, value) in child_vars {
                    iteration_vars.insert(name, value);
                }
            }
        } else {
            for child in &node.children {
                let child_result = exec_node(ctx, child, vu, iter, iteration_vars, jar).await;
                result.merge(child_result);
                if ctx.cancel.is_cancelled() {
                    break;
                }
            }
        }

        if let Some(pause) = node.think_time {
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = ctx.cancel.cancelled() => {}
            }
        }

        result
    })
}

/// Substitute both sides against the current variable map, then compare:
/// numerically when both sides parse as numbers, else as strings.
fn condition_holds(condition: &Condition, vu: u64, iter: u64, vars: &VarMap) -> bool {
    let left = vars::substitute(&condition.left, vu, iter, vars);
    let right = vars::substitute(&condition.right, vu, iter, vars);

    if let (Ok(l), Ok(r)) = (left.parse::<f64>(), right.parse::<f64>()) {
        return match condition.op {
            CondOp::Eq => l == r,
            CondOp::Ne => l != r,
            CondOp::Lt => l < r,
            CondOp::Le => l <= r,
            CondOp::Gt => l > r,
            CondOp::Ge => l >= r,
        };
    }

    match condition.op {
        CondOp::Eq => left == right,
        CondOp::Ne => left != right,
        CondOp::Lt => left < right,
        CondOp::Le => left <= right,
        CondOp::Gt => left > right,
        CondOp::Ge => left >= right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cond(left: &str, op: CondOp, right: &str) -> Condition {
        Condition {
            left: left.to_string(),
            op,
            right: right.to_string(),
        }
    }

    #[test]
    fn condition_compares_substituted_strings() {
        let mut vars = VarMap::new();
        vars.insert("enabled".to_string(), "true".into());

        assert!(condition_holds(&cond("${enabled}", CondOp::Eq, "true"), 1, 1, &vars));
        assert!(!condition_holds(&cond("${enabled}", CondOp::Eq, "false"), 1, 1, &vars));
        assert!(condition_holds(&cond("${enabled}", CondOp::Ne, "false"), 1, 1, &vars));
    }

    #[test]
    fn condition_compares_numbers_numerically() {
        let mut vars = VarMap::new();
        vars.insert("count".to_string(), 10.into());

        assert!(condition_holds(&cond("${count}", CondOp::Gt, "9"), 1, 1, &vars));
        assert!(condition_holds(&cond("${count}", CondOp::Eq, "10.0"), 1, 1, &vars));
        assert!(!condition_holds(&cond("${count}", CondOp::Lt, "2"), 1, 1, &vars));
    }

    #[test]
    fn unbound_condition_reference_compares_textually() {
        let vars = VarMap::new();
        // `${ghost}` stays literal, so it never equals "true".
        assert!(!condition_holds(&cond("${ghost}", CondOp::Eq, "true"), 1, 1, &vars));
    }

    #[test]
    fn builtin_vu_is_usable_in_conditions() {
        let vars = VarMap::new();
        assert!(condition_holds(&cond("${VU}", CondOp::Le, "3"), 2, 1, &vars));
        assert!(!condition_holds(&cond("${VU}", CondOp::Le, "3"), 7, 1, &vars));
    }
}
