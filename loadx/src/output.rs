//! Human-readable rendering: single-exchange results, plan summaries,
//! live progress lines, and the end-of-run summary.

use std::collections::HashSet;
use std::time::Duration;

use indicatif::HumanBytes;
use loadx_core::{ProgressEvent, RequestOutcome, RunSummary};
use loadx_ir::{LoadProfile, RequestNode, ScenarioPlan};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

pub fn print_exchange(outcome: &RequestOutcome) {
    let Some(ctx) = &outcome.ctx else {
        return;
    };

    println!("Request:  {} {}", ctx.request.method, ctx.request.url);
    println!("Status:   {}", ctx.response.status);
    println!("Latency:  {:.2}ms", ctx.response.latency_ms);
    println!("Size:     {} bytes", ctx.response.size_bytes);

    if let Some(error) = &ctx.response.error {
        println!("Error:    {error}");
    }
    if outcome.attempts > 1 {
        println!("Attempts: {}", outcome.attempts);
    }

    if let Some(verdict) = &outcome.verdict {
        println!("\nDecision: {}", verdict.decision);
        if !verdict.reason.is_empty() {
            println!("Reason:   {}", verdict.reason);
        }
    } else if let Some(reason) = &outcome.failure {
        println!("\nDecision: fail");
        println!("Reason:   {reason}");
    }

    if let Some(reason) = &outcome.evaluator_fallback {
        println!("Note:     evaluator fell back to default ({reason})");
    }
}

pub fn print_plan(plan: &ScenarioPlan) {
    println!("scenario: {}", plan.name);
    match plan.load {
        LoadProfile::VusForDuration { vus, duration } => {
            println!("    load: {vus} looping VUs for {}", format_duration(duration));
        }
        LoadProfile::RpsForDuration { rps, duration } => {
            println!("    load: {rps} req/s for {}", format_duration(duration));
        }
        LoadProfile::Iterations { iterations, vus } => {
            println!("    load: {iterations} iterations across {vus} VUs");
        }
    }
    if !plan.variables.is_empty() {
        println!("    vars: {}", plan.variables.len());
    }
    if !plan.setup.is_empty() {
        println!("   setup: {} request(s)", plan.setup.len());
    }
    println!("    flow: {} node(s)", plan.main_node_count());
    for node in &plan.main {
        print_node(node, 1);
    }
    if !plan.teardown.is_empty() {
        println!("teardown: {} request(s)", plan.teardown.len());
    }
}

fn print_node(node: &RequestNode, depth: usize) {
    let indent = "  ".repeat(depth + 2);
    let mut tags = Vec::new();
    if node.parallel {
        tags.push("parallel".to_string());
    }
    if let Some(condition) = &node.condition {
        tags.push(format!("if {}", condition.left));
    }
    if node.think_time.is_some() && node.ir.is_none() {
        tags.push("pause".to_string());
    }

    let suffix = if tags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", tags.join(", "))
    };
    println!("{indent}{}{suffix}", node.name);

    for child in &node.children {
        print_node(child, depth + 1);
    }
}

/// Drain the progress channel until every sender is gone. Per-request
/// lines appear with `verbose`; a periodic one-line status appears with
/// `progress`.
pub async fn print_progress(
    mut rx: mpsc::Receiver<ProgressEvent>,
    progress: bool,
    verbose: bool,
) {
    let mut requests: u64 = 0;
    let mut errors: u64 = 0;
    let mut active_vus: HashSet<u64> = HashSet::new();

    let mut ticker = tokio::time::interval(Duration::from_secs(2));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // discard the immediate first tick

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    ProgressEvent::VuStarted { vu } => {
                        active_vus.insert(vu);
                        if verbose {
                            println!("VU {vu} started");
                        }
                    }
                    ProgressEvent::IterationStarted { vu, iter } => {
                        if verbose {
                            println!("VU {vu} iteration {iter}");
                        }
                    }
                    ProgressEvent::RequestCompleted { vu, name, status, latency_ms, attempts, error, .. } => {
                        requests += 1;
                        let failed = error.is_some() || status.is_none_or(|s| s >= 400);
                        if failed {
                            errors += 1;
                        }
                        if verbose {
                            let mark = if failed { "x" } else { "ok" };
                            let status = status.map_or("-".to_string(), |s| s.to_string());
                            let retry_note = if attempts > 1 {
                                format!(" (attempt {attempts})")
                            } else {
                                String::new()
                            };
                            match error {
                                Some(error) => println!(
                                    "VU {vu} {mark} {name} - {status} ({latency_ms:.0}ms){retry_note}: {error}"
                                ),
                                None => println!(
                                    "VU {vu} {mark} {name} - {status} ({latency_ms:.0}ms){retry_note}"
                                ),
                            }
                        }
                    }
                    ProgressEvent::VuFinished { vu } => {
                        active_vus.remove(&vu);
                        if verbose {
                            println!("VU {vu} finished");
                        }
                    }
                }
            }
            _ = ticker.tick(), if progress => {
                println!(
                    "progress: {requests} requests | {errors} errors | {} active VUs",
                    active_vus.len()
                );
            }
        }
    }

    if progress {
        println!("completed: {requests} requests | {errors} errors");
    }
}

pub fn render_summary(summary: &RunSummary, verbose: bool) {
    let elapsed_s = summary.run_duration.as_secs_f64().max(1e-9);

    println!("\n  HTTP");
    println!(
        "    requests_total..............: {} ({:.2}/s)",
        summary.requests_total, summary.rps
    );
    let failed_pct = if summary.requests_total > 0 {
        summary.failed_total as f64 / summary.requests_total as f64 * 100.0
    } else {
        0.0
    };
    println!(
        "    requests_failed.............: {} ({failed_pct:.2}%)",
        summary.failed_total
    );
    println!(
        "    requests_retried............: {}",
        summary.retried_requests_total
    );
    println!(
        "    transport_errors............: {}",
        summary.transport_errors_total
    );
    println!(
        "    assertion_failures..........: {}",
        summary.assertion_failures_total
    );
    if summary.evaluator_fallbacks_total > 0 {
        println!(
            "    evaluator_fallbacks.........: {}",
            summary.evaluator_fallbacks_total
        );
    }

    let latency = &summary.latency;
    println!("\n  LATENCY");
    println!(
        "    min={:.2}ms avg={:.2}ms max={:.2}ms",
        latency.min_ms, latency.mean_ms, latency.max_ms
    );
    println!(
        "    p50={:.2}ms p90={:.2}ms p95={:.2}ms p99={:.2}ms",
        latency.p50_ms, latency.p90_ms, latency.p95_ms, latency.p99_ms
    );

    println!("\n  EXECUTION");
    println!(
        "    iterations..................: {}",
        summary.iterations_total
    );
    println!(
        "    duration....................: {}",
        format_duration(summary.run_duration)
    );
    if summary.dropped_events_total > 0 {
        println!(
            "    dropped_progress_events.....: {}",
            summary.dropped_events_total
        );
    }

    println!("\n  NETWORK");
    println!(
        "    data_received...............: {} ({}/s)",
        HumanBytes(summary.bytes_received_total),
        HumanBytes((summary.bytes_received_total as f64 / elapsed_s) as u64)
    );

    if verbose && !summary.per_vu.is_empty() {
        println!("\n  PER-VU");
        for vu in &summary.per_vu {
            println!(
                "    VU {:>3}: {} iterations, {} requests (ok {}, failed {}), avg latency {:.1}ms",
                vu.vu,
                vu.iterations,
                vu.requests,
                vu.passed,
                vu.failed,
                vu.avg_latency_ms()
            );
        }
    }

    println!();
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs >= 60.0 {
        format!("{:.0}m{:.0}s", (secs / 60.0).floor(), secs % 60.0)
    } else if secs >= 1.0 {
        format!("{secs:.1}s")
    } else {
        format!("{}ms", duration.as_millis())
    }
}
