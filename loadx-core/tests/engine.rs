//! End-to-end engine tests against the in-process test server: the full
//! pipeline from scenario source through the load driver, plus targeted
//! retry-loop tests with on-disk evaluator programs.

use std::time::{Duration, Instant};

use loadx_core::cookies::CookieJar;
use loadx_core::vars::VarMap;
use loadx_core::{
    CancelSignal, EvaluatorGateway, HttpExecutor, RetryPolicy, Runner, run_request,
};
use loadx_ir::{Decision, EvaluatorKind, Ir, Request, ScenarioPlan};
use loadx_testserver::TestServer;

fn compile(source: &str) -> ScenarioPlan {
    loadx_lang::compile_source(source, None).expect("scenario should compile")
}

#[tokio::test]
async fn simple_get_records_one_passing_iteration() -> anyhow::Result<()> {
    let server = TestServer::start().await?;

    let source = format!(
        "request h {{\n\tcurl {}\n\tassert status == 200\n}}\n\nscenario s {{\n\tload {{\n\t\titerations = 1\n\t}}\n\trun h\n}}",
        server.url("/ok")
    );

    let summary = Runner::new(compile(&source)).run().await?;

    assert_eq!(summary.iterations_total, 1);
    assert_eq!(summary.requests_total, 1);
    assert_eq!(summary.passed_total, 1);
    assert_eq!(summary.failed_total, 0);
    assert_eq!(server.stats().requests_total(), 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn sequential_extraction_feeds_later_requests() -> anyhow::Result<()> {
    let server = TestServer::start().await?;

    // `login` binds token and user_id; `fetch` consumes both.
    let source = format!(
        "request login {{\n\tcurl -X POST {} -d '{{\"user\":\"admin\"}}'\n\textract {{\n\t\ttoken = $.access_token\n\t\tuser_id = $.user.id\n\t}}\n}}\n\nrequest fetch {{\n\tcurl {}/users/${{user_id}} -H 'Authorization: Bearer ${{token}}'\n\tassert status == 200\n}}\n\nscenario s {{\n\tload {{\n\t\titerations = 1\n\t}}\n\trun login -> fetch\n}}",
        server.url("/login"),
        server.base_url()
    );

    let summary = Runner::new(compile(&source)).run().await?;

    assert_eq!(summary.failed_total, 0, "both requests should pass");
    assert_eq!(server.stats().last_user_id().as_deref(), Some("1337"));
    assert_eq!(
        server.stats().last_authorization().as_deref(),
        Some("Bearer tok-7f3a")
    );

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn parallel_children_overlap_in_time() -> anyhow::Result<()> {
    let server = TestServer::start().await?;

    let slow = server.url("/slow?ms=150");
    let source = format!(
        "request login {{\n\tcurl -X POST {}\n}}\nrequest a {{\n\tcurl '{slow}'\n}}\nrequest b {{\n\tcurl '{slow}'\n}}\nrequest c {{\n\tcurl '{slow}'\n}}\n\nscenario s {{\n\tload {{\n\t\titerations = 1\n\t}}\n\trun login {{\n\t\trun a | b | c\n\t}}\n}}",
        server.url("/login")
    );

    let started = Instant::now();
    let summary = Runner::new(compile(&source)).run().await?;
    let elapsed = started.elapsed();

    assert_eq!(summary.requests_total, 4);
    assert_eq!(summary.failed_total, 0);
    // Three 150ms children run concurrently: well under the ~450ms a
    // sequential walk would need.
    assert!(
        elapsed < Duration::from_millis(400),
        "parallel children took {elapsed:?}"
    );

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn conditional_branch_follows_extracted_cookie() -> anyhow::Result<()> {
    let server = TestServer::start().await?;

    // `/login` sets `feature=true`; only the then-branch may run.
    let source = format!(
        "request probe {{\n\tcurl -X POST {}\n\textract {{\n\t\tenabled = cookie:feature\n\t}}\n}}\nrequest newapi {{\n\tcurl {}/users/42\n}}\nrequest oldapi {{\n\tcurl {}/status/204\n}}\n\nscenario s {{\n\tload {{\n\t\titerations = 1\n\t}}\n\trun probe\n\tif ${{enabled}} == \"true\" {{\n\t\trun newapi\n\t}} else {{\n\t\trun oldapi\n\t}}\n}}",
        server.url("/login"),
        server.base_url(),
        server.base_url()
    );

    let summary = Runner::new(compile(&source)).run().await?;

    assert_eq!(summary.requests_total, 2, "probe + newapi only");
    assert_eq!(server.stats().users_hits(), 1);
    assert_eq!(server.stats().last_user_id().as_deref(), Some("42"));

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn iterations_split_unevenly_across_vus() -> anyhow::Result<()> {
    let server = TestServer::start().await?;

    let source = format!(
        "request h {{\n\tcurl {}\n}}\n\nscenario s {{\n\tload 5 iterations with 2 vus\n\trun h\n}}",
        server.url("/ok")
    );

    let summary = Runner::new(compile(&source)).run().await?;

    assert_eq!(summary.iterations_total, 5);
    assert_eq!(summary.requests_total, 5);
    let mut counts: Vec<u64> = summary.per_vu.iter().map(|v| v.iterations).collect();
    counts.sort_unstable();
    assert_eq!(counts, vec![2, 3], "first VU takes the remainder");

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn vus_for_duration_runs_every_vu() -> anyhow::Result<()> {
    let server = TestServer::start().await?;

    let source = format!(
        "request h {{\n\tcurl {}\n}}\n\nscenario s {{\n\tload 2 vus for 300ms\n\trun h\n}}",
        server.url("/ok")
    );

    let summary = Runner::new(compile(&source)).run().await?;

    assert_eq!(summary.per_vu.len(), 2);
    for vu in &summary.per_vu {
        assert!(vu.iterations >= 1, "VU {} never iterated", vu.vu);
    }
    assert_eq!(summary.failed_total, 0);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn rps_mode_paces_iterations() -> anyhow::Result<()> {
    let server = TestServer::start().await?;

    let source = format!(
        "request h {{\n\tcurl {}\n}}\n\nscenario s {{\n\tload 20 rps for 500ms\n\trun h\n}}",
        server.url("/ok")
    );

    let summary = Runner::new(compile(&source)).run().await?;

    // ~10 expected; allow generous scheduling slack in both directions.
    assert!(
        summary.iterations_total >= 4 && summary.iterations_total <= 15,
        "unexpected iteration count {}",
        summary.iterations_total
    );

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn setup_failure_terminates_the_run() -> anyhow::Result<()> {
    let server = TestServer::start().await?;

    let source = format!(
        "request seed {{\n\tcurl {}/status/500\n}}\nrequest h {{\n\tcurl {}\n}}\n\nscenario s {{\n\tload {{\n\t\titerations = 3\n\t}}\n\tsetup {{\n\t\trun seed\n\t}}\n\trun h\n}}",
        server.base_url(),
        server.url("/ok")
    );

    let err = Runner::new(compile(&source)).run().await.unwrap_err();
    assert!(matches!(err, loadx_core::Error::SetupFailed(..)));
    // Only the setup request reached the server.
    assert_eq!(server.stats().requests_total(), 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn setup_extractions_seed_every_iteration() -> anyhow::Result<()> {
    let server = TestServer::start().await?;

    let source = format!(
        "request seed {{\n\tcurl -X POST {}\n\textract {{\n\t\tuser_id = $.user.id\n\t}}\n}}\nrequest fetch {{\n\tcurl {}/users/${{user_id}}\n}}\n\nscenario s {{\n\tload {{\n\t\titerations = 2\n\t}}\n\tsetup {{\n\t\trun seed\n\t}}\n\trun fetch\n}}",
        server.url("/login"),
        server.base_url()
    );

    let summary = Runner::new(compile(&source)).run().await?;

    assert_eq!(summary.failed_total, 0);
    assert_eq!(server.stats().users_hits(), 2);
    assert_eq!(server.stats().last_user_id().as_deref(), Some("1337"));

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn cookies_are_isolated_between_jars() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let executor = HttpExecutor::new();

    let login = Ir::new(Request::get(server.url("/login")), "test");
    let echo = {
        let mut ir = Ir::new(Request::get(server.url("/echo")), "test");
        ir.request.method = "POST".to_string();
        ir
    };

    // First VU's jar sees the session cookie from its login.
    let jar_one = CookieJar::new();
    let ctx = executor.execute(&login, &jar_one).await?;
    assert_eq!(ctx.response.status, 200);
    assert!(!jar_one.is_empty());

    let ctx = executor.execute(&echo, &jar_one).await?;
    assert_eq!(ctx.response.status, 200);
    let sent_cookie = server.stats().last_cookie().unwrap_or_default();
    assert!(sent_cookie.contains("session="), "got cookie {sent_cookie:?}");

    // A different VU's fresh jar sends nothing.
    let jar_two = CookieJar::new();
    let ctx = executor.execute(&echo, &jar_two).await?;
    assert_eq!(ctx.response.status, 200);
    assert!(ctx.request.headers.get("Cookie").is_none());

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn redirects_follow_up_to_bound_and_feed_the_jar() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let executor = HttpExecutor::new();

    let jar = CookieJar::new();
    let ir = Ir::new(Request::get(server.url("/redirect")), "test");
    let ctx = executor.execute(&ir, &jar).await?;

    assert_eq!(ctx.response.status, 200, "redirect should be followed");
    assert!(!jar.is_empty(), "the redirect hop's cookie must be stored");

    let mut no_follow = Ir::new(Request::get(server.url("/redirect")), "test");
    no_follow.transport.follow_redirects = false;
    let ctx = executor.execute(&no_follow, &CookieJar::new()).await?;
    assert_eq!(ctx.response.status, 302, "first redirect returned as-is");

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn transport_failure_produces_status_zero_context() -> anyhow::Result<()> {
    let executor = HttpExecutor::new();
    let jar = CookieJar::new();

    // Nothing listens on this port.
    let ir = Ir::new(Request::get("http://127.0.0.1:9/nope"), "test");
    let ctx = executor.execute(&ir, &jar).await?;

    assert_eq!(ctx.response.status, 0);
    assert!(ctx.response.error.is_some());
    Ok(())
}

// ---------------------------------------------------------------------------
// Subprocess evaluator tests. Each writes a small /bin/sh program and wires
// it in as a `go`-kind evaluator (executed directly by path).

#[cfg(unix)]
fn write_evaluator(dir: &tempfile::TempDir, name: &str, script: &str) -> String {
    use std::os::unix::fs::PermissionsExt as _;

    let path = dir.path().join(name);
    std::fs::write(&path, script).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path.to_string_lossy().into_owned()
}

#[cfg(unix)]
fn subprocess_ir(url: String, evaluator_path: String) -> Ir {
    let mut ir = Ir::new(Request::get(url), "test");
    ir.evaluation.evaluator = EvaluatorKind::Go;
    ir.evaluation.evaluator_path = Some(evaluator_path);
    ir
}

#[cfg(unix)]
#[tokio::test]
async fn retry_verdict_waits_and_reexecutes() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let dir = tempfile::tempdir()?;

    let evaluator = write_evaluator(
        &dir,
        "retry_on_429.sh",
        "#!/bin/sh\ninput=$(cat)\nif printf '%s' \"$input\" | grep -q '\"status\":429'; then\n  printf '%s' '{\"decision\":\"retry\",\"reason\":\"rate limited\",\"actions\":{\"retry_after_ms\":1000}}'\nelse\n  printf '%s' '{\"decision\":\"pass\",\"reason\":\"ok\"}'\nfi\n",
    );

    let ir = subprocess_ir(server.url("/flaky"), evaluator);
    let executor = HttpExecutor::new();
    let gateway = EvaluatorGateway::new();
    let jar = CookieJar::new();
    let cancel = CancelSignal::new();
    let mut vars = VarMap::new();

    let started = Instant::now();
    let outcome = run_request(
        &executor,
        &gateway,
        "flaky",
        &ir,
        1,
        1,
        &mut vars,
        &jar,
        &cancel,
        &RetryPolicy::default(),
    )
    .await;
    let elapsed = started.elapsed();

    assert!(outcome.passed, "second attempt should pass: {outcome:?}");
    assert_eq!(outcome.attempts, 2);
    assert!(
        elapsed >= Duration::from_millis(1000),
        "retry delay must be honored, elapsed {elapsed:?}"
    );
    assert_eq!(server.stats().flaky_attempts(), 2);

    server.shutdown().await;
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn max_retries_exhaustion_stops_after_the_bound() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let dir = tempfile::tempdir()?;

    let evaluator = write_evaluator(
        &dir,
        "always_retry.sh",
        "#!/bin/sh\ncat > /dev/null\nprintf '%s' '{\"decision\":\"retry\",\"reason\":\"again\",\"actions\":{\"retry_after_ms\":10,\"max_retries\":3}}'\n",
    );

    let ir = subprocess_ir(server.url("/ok"), evaluator);
    let executor = HttpExecutor::new();
    let gateway = EvaluatorGateway::new();
    let jar = CookieJar::new();
    let cancel = CancelSignal::new();
    let mut vars = VarMap::new();

    let outcome = run_request(
        &executor,
        &gateway,
        "r",
        &ir,
        1,
        1,
        &mut vars,
        &jar,
        &cancel,
        &RetryPolicy::default(),
    )
    .await;

    assert!(!outcome.passed);
    assert_eq!(outcome.attempts, 3, "exactly three attempts");
    assert_eq!(outcome.failure.as_deref(), Some("max retries exceeded"));
    assert_eq!(server.stats().requests_total(), 3);

    server.shutdown().await;
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn mutations_apply_to_the_retried_request() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let dir = tempfile::tempdir()?;

    // First verdict mutates a header and retries; the second attempt's
    // context echoes the mutated request, which the script passes on.
    let evaluator = write_evaluator(
        &dir,
        "mutate_once.sh",
        "#!/bin/sh\ninput=$(cat)\nif printf '%s' \"$input\" | grep -q 'X-Mutated'; then\n  printf '%s' '{\"decision\":\"pass\",\"reason\":\"mutation arrived\"}'\nelse\n  printf '%s' '{\"decision\":\"retry\",\"reason\":\"mutate\",\"mutations\":{\"headers\":{\"X-Mutated\":\"1\"},\"vars\":{\"marker\":\"set\"}}}'\nfi\n",
    );

    let ir = subprocess_ir(server.url("/ok"), evaluator);
    let executor = HttpExecutor::new();
    let gateway = EvaluatorGateway::new();
    let jar = CookieJar::new();
    let cancel = CancelSignal::new();
    let mut vars = VarMap::new();

    let outcome = run_request(
        &executor,
        &gateway,
        "r",
        &ir,
        1,
        1,
        &mut vars,
        &jar,
        &cancel,
        &RetryPolicy::default(),
    )
    .await;

    assert!(outcome.passed, "{outcome:?}");
    assert_eq!(outcome.attempts, 2);
    let ctx = outcome.ctx.unwrap();
    assert_eq!(
        ctx.request.headers.get("X-Mutated").map(String::as_str),
        Some("1")
    );
    assert_eq!(vars.get("marker").and_then(|v| v.as_str()), Some("set"));

    server.shutdown().await;
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn branch_verdict_surfaces_an_explicit_failure() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let dir = tempfile::tempdir()?;

    let evaluator = write_evaluator(
        &dir,
        "branch.sh",
        "#!/bin/sh\ncat > /dev/null\nprintf '%s' '{\"decision\":\"branch\",\"reason\":\"go elsewhere\",\"actions\":{\"goto\":\"fallback\"}}'\n",
    );

    let ir = subprocess_ir(server.url("/ok"), evaluator);
    let executor = HttpExecutor::new();
    let gateway = EvaluatorGateway::new();
    let jar = CookieJar::new();
    let cancel = CancelSignal::new();
    let mut vars = VarMap::new();

    let outcome = run_request(
        &executor,
        &gateway,
        "r",
        &ir,
        1,
        1,
        &mut vars,
        &jar,
        &cancel,
        &RetryPolicy::default(),
    )
    .await;

    assert!(!outcome.passed);
    let failure = outcome.failure.unwrap();
    assert!(failure.contains("branch"), "got failure {failure:?}");
    assert!(failure.contains("fallback"));

    server.shutdown().await;
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn malformed_verdict_falls_back_to_default_once() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let dir = tempfile::tempdir()?;

    let evaluator = write_evaluator(
        &dir,
        "garbage.sh",
        "#!/bin/sh\ncat > /dev/null\nprintf 'this is not json'\n",
    );

    let ir = subprocess_ir(server.url("/ok"), evaluator);
    let executor = HttpExecutor::new();
    let gateway = EvaluatorGateway::new();
    let jar = CookieJar::new();
    let cancel = CancelSignal::new();
    let mut vars = VarMap::new();

    let outcome = run_request(
        &executor,
        &gateway,
        "r",
        &ir,
        1,
        1,
        &mut vars,
        &jar,
        &cancel,
        &RetryPolicy::default(),
    )
    .await;

    // Status 200 → the default evaluator passes, and the fallback is
    // recorded rather than failing the run.
    assert!(outcome.passed);
    assert_eq!(outcome.attempts, 1);
    assert!(outcome.evaluator_fallback.is_some());
    assert_eq!(
        outcome.verdict.map(|v| v.decision),
        Some(Decision::Pass)
    );
    assert_eq!(server.stats().requests_total(), 1);

    server.shutdown().await;
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn evaluator_timeout_falls_back() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let dir = tempfile::tempdir()?;

    let evaluator = write_evaluator(
        &dir,
        "sleepy.sh",
        "#!/bin/sh\ncat > /dev/null\nsleep 30\n",
    );

    let mut ir = subprocess_ir(server.url("/ok"), evaluator);
    ir.evaluation.timeout_ms = 200;

    let executor = HttpExecutor::new();
    let gateway = EvaluatorGateway::new();
    let jar = CookieJar::new();
    let cancel = CancelSignal::new();
    let mut vars = VarMap::new();

    let started = Instant::now();
    let outcome = run_request(
        &executor,
        &gateway,
        "r",
        &ir,
        1,
        1,
        &mut vars,
        &jar,
        &cancel,
        &RetryPolicy::default(),
    )
    .await;

    assert!(outcome.passed, "default evaluator passes a 200");
    assert!(outcome.evaluator_fallback.is_some());
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "the child must be killed at the timeout"
    );

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn cancellation_stops_vus_promptly() -> anyhow::Result<()> {
    let server = TestServer::start().await?;

    let source = format!(
        "request h {{\n\tcurl '{}'\n}}\n\nscenario s {{\n\tload 2 vus for 30s\n\trun h\n}}",
        server.url("/slow?ms=50")
    );

    let runner = Runner::new(compile(&source));
    let cancel = runner.cancel_signal();

    let started = Instant::now();
    let run = tokio::spawn(runner.run());
    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel.cancel();

    let summary = run.await??;
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "cancellation must end the run long before the 30s deadline"
    );
    assert!(summary.iterations_total >= 1);

    server.shutdown().await;
    Ok(())
}
