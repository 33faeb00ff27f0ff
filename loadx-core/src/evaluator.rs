//! Evaluator gateway: run an external evaluator program over one
//! evaluation context and validate its verdict.
//!
//! The gateway is stateless. The context document goes to the child's
//! stdin as a single JSON document; one verdict document is read from its
//! stdout. Anything that goes wrong — missing program, non-zero exit,
//! malformed JSON, schema violation, timeout — falls back to the built-in
//! default evaluator, and the run records the fallback.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use loadx_ir::{Decision, EvaluationContext, EvaluatorKind, Verdict};
use tokio::io::AsyncWriteExt as _;
use tokio::process::Command;

use crate::runner::CancelSignal;

/// What the gateway produced, and whether the subprocess path failed.
#[derive(Debug, Clone)]
pub struct GatewayOutcome {
    pub verdict: Verdict,
    /// Set when the default evaluator stood in for a failed subprocess;
    /// carries the reason.
    pub fallback: Option<String>,
}

#[derive(Debug, Default)]
pub struct EvaluatorGateway;

impl EvaluatorGateway {
    pub fn new() -> Self {
        Self
    }

    pub async fn evaluate(&self, ctx: &EvaluationContext, cancel: &CancelSignal) -> GatewayOutcome {
        let evaluation = &ctx.ir.evaluation;

        if evaluation.evaluator == EvaluatorKind::Builtin {
            return GatewayOutcome {
                verdict: default_verdict(ctx),
                fallback: None,
            };
        }

        let timeout = Duration::from_millis(evaluation.timeout_ms.max(1));
        match self.run_program(ctx, timeout, cancel).await {
            Ok(verdict) => GatewayOutcome {
                verdict,
                fallback: None,
            },
            Err(reason) => {
                tracing::warn!(
                    evaluator = %evaluation.evaluator,
                    %reason,
                    "evaluator failed, using default evaluator"
                );
                GatewayOutcome {
                    verdict: default_verdict(ctx),
                    fallback: Some(reason),
                }
            }
        }
    }

    async fn run_program(
        &self,
        ctx: &EvaluationContext,
        timeout: Duration,
        cancel: &CancelSignal,
    ) -> Result<Verdict, String> {
        let input =
            serde_json::to_vec(ctx).map_err(|err| format!("context serialization: {err}"))?;

        let (program, args) = command_for(
            ctx.ir.evaluation.evaluator,
            ctx.ir.evaluation.evaluator_path.as_deref(),
        );

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| format!("failed to start `{}`: {err}", program.display()))?;

        let mut stdin = child.stdin.take().ok_or("child stdin unavailable")?;
        stdin
            .write_all(&input)
            .await
            .map_err(|err| format!("failed to write context: {err}"))?;
        drop(stdin);

        let output = tokio::select! {
            result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
                Ok(Ok(output)) => output,
                Ok(Err(err)) => return Err(format!("evaluator io error: {err}")),
                // wait_with_output consumed the child; kill_on_drop already
                // reaped it when the timeout future won.
                Err(_) => return Err(format!("evaluator timeout after {timeout:?}")),
            },
            _ = cancel.cancelled() => {
                return Err("cancelled".to_string());
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "evaluator exited with {}: {}",
                output.status,
                stderr.trim()
            ));
        }

        let verdict: Verdict = serde_json::from_slice(&output.stdout).map_err(|err| {
            format!(
                "malformed verdict: {err} (output: {})",
                String::from_utf8_lossy(&output.stdout).trim()
            )
        })?;

        verdict
            .validate()
            .map_err(|reason| format!("invalid verdict: {reason}"))?;

        Ok(verdict)
    }
}

/// Program + arguments per evaluator kind. `python` prefers a `mojo`
/// executable on the search path over `python3`.
fn command_for(kind: EvaluatorKind, path: Option<&str>) -> (PathBuf, Vec<String>) {
    match kind {
        EvaluatorKind::Bun => {
            let script = path.unwrap_or("evaluator.js");
            (
                PathBuf::from("bun"),
                vec!["run".to_string(), script.to_string()],
            )
        }
        EvaluatorKind::Python => {
            let script = path.unwrap_or("evaluator.py");
            let interpreter = if find_in_path("mojo").is_some() {
                "mojo"
            } else {
                "python3"
            };
            (PathBuf::from(interpreter), vec![script.to_string()])
        }
        EvaluatorKind::Go => {
            let binary = path.unwrap_or("./evaluator");
            (PathBuf::from(binary), Vec::new())
        }
        // Handled before spawning; kept total for safety.
        EvaluatorKind::Builtin => (PathBuf::from("true"), Vec::new()),
    }
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// The built-in default evaluator: pass below 400, fail at or above it,
/// fail on transport errors.
pub fn default_verdict(ctx: &EvaluationContext) -> Verdict {
    if let Some(error) = &ctx.response.error {
        return Verdict::fail(format!("transport error: {error}"));
    }

    if ctx.response.status >= 400 {
        Verdict::fail(format!("HTTP {} error", ctx.response.status))
    } else {
        Verdict::pass(format!("HTTP {}", ctx.response.status))
    }
}
