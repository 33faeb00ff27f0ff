//! End-to-end tests driving the compiled binary, in the same style as the
//! engine's own integration tests: a real test server, real subprocesses.

use std::process::Command;

use loadx_testserver::TestServer;

fn loadx() -> Command {
    Command::new(env!("CARGO_BIN_EXE_loadx"))
}

#[test]
fn convert_emits_a_valid_ir_document() {
    let output = loadx()
        .args([
            "convert", "curl", "-X", "POST", "https://api.invalid/login", "-H",
            "Content-Type: application/json", "-d", r#"{"user":"admin"}"#,
        ])
        .output()
        .expect("run loadx");

    assert!(output.status.success(), "{output:?}");

    let ir: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be one JSON document");
    assert_eq!(ir["version"], "1.0");
    assert_eq!(ir["request"]["method"], "POST");
    assert_eq!(ir["request"]["url"], "https://api.invalid/login");
    assert_eq!(ir["request"]["body"]["type"], "json");
    assert_eq!(ir["metadata"]["source"], "curl");
}

#[test]
fn convert_rejects_command_without_url() {
    let output = loadx()
        .args(["convert", "curl", "-H", "X-Only: 1"])
        .output()
        .expect("run loadx");

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn validate_accepts_a_converted_record() {
    let dir = tempfile::tempdir().unwrap();
    let record = dir.path().join("request.json");

    let output = loadx()
        .args(["convert", "curl", "https://api.invalid/users"])
        .output()
        .expect("run loadx");
    assert!(output.status.success());
    std::fs::write(&record, &output.stdout).unwrap();

    let output = loadx()
        .args(["validate"])
        .arg(&record)
        .output()
        .expect("run loadx");
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("request record is valid"));
}

#[test]
fn validate_rejects_malformed_record() {
    let dir = tempfile::tempdir().unwrap();
    let record = dir.path().join("bad.json");
    std::fs::write(&record, r#"{"version":"1.0"}"#).unwrap();

    let output = loadx()
        .args(["validate"])
        .arg(&record)
        .output()
        .expect("run loadx");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn scenario_validate_reports_declarations() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("smoke.httpx");
    std::fs::write(
        &file,
        "var base = \"https://api.invalid\"\n\nrequest ping {\n\tcurl ${base}/ping\n\tassert status == 200\n}\n\nscenario smoke {\n\tload 1 vus for 1s\n\trun ping\n}\n",
    )
    .unwrap();

    let output = loadx()
        .args(["scenario", "validate"])
        .arg(&file)
        .output()
        .expect("run loadx");

    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("scenario file is valid"));
    assert!(stdout.contains("requests:  1"));
    assert!(stdout.contains("- smoke"));
}

#[test]
fn scenario_validate_fails_on_unknown_request() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("broken.httpx");
    std::fs::write(
        &file,
        "scenario s {\n\tload 1 vus for 1s\n\trun ghost\n}\n",
    )
    .unwrap();

    let output = loadx()
        .args(["scenario", "validate"])
        .arg(&file)
        .output()
        .expect("run loadx");

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ghost"), "stderr: {stderr}");
}

#[test]
fn scenario_dry_run_prints_the_plan_without_executing() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("plan.httpx");
    std::fs::write(
        &file,
        "request a {\n\tcurl https://api.invalid/a\n}\nrequest b {\n\tcurl https://api.invalid/b\n}\n\nscenario s {\n\tload 3 vus for 10s\n\trun a -> b\n}\n",
    )
    .unwrap();

    let output = loadx()
        .args(["scenario", "run", "--dry-run"])
        .arg(&file)
        .output()
        .expect("run loadx");

    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("scenario: s"));
    assert!(stdout.contains("3 looping VUs"));
    assert!(stdout.contains("dry run complete"));
}

#[tokio::test]
async fn scenario_run_completes_against_live_server() {
    let server = TestServer::start().await.expect("start test server");
    let base_url = server.base_url().to_string();

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("live.httpx");
    std::fs::write(
        &file,
        format!(
            "request h {{\n\tcurl {base_url}/ok\n\tassert status == 200\n}}\n\nscenario s {{\n\tload {{\n\t\titerations = 4\n\t}}\n\trun h\n}}\n"
        ),
    )
    .unwrap();

    let file_for_blocking = file.clone();
    let output = tokio::task::spawn_blocking(move || {
        loadx()
            .args(["scenario", "run", "--verbose"])
            .arg(&file_for_blocking)
            .output()
    })
    .await
    .expect("join")
    .expect("run loadx");

    let seen = server.stats().requests_total();
    server.shutdown().await;

    assert!(output.status.success(), "{output:?}");
    assert_eq!(seen, 4);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("requests_total"), "stdout: {stdout}");
    assert!(stdout.contains("PER-VU"), "stdout: {stdout}");
}

#[tokio::test]
async fn exec_reports_verdict_and_exit_code() {
    let server = TestServer::start().await.expect("start test server");
    let ok_url = server.url("/ok");
    let bad_url = server.url("/status/503");

    let output = tokio::task::spawn_blocking(move || {
        loadx().args(["exec", "curl", &ok_url]).output()
    })
    .await
    .expect("join")
    .expect("run loadx");
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Status:   200"));
    assert!(stdout.contains("Decision: pass"));

    let output = tokio::task::spawn_blocking(move || {
        loadx().args(["exec", "curl", &bad_url]).output()
    })
    .await
    .expect("join")
    .expect("run loadx");
    assert_eq!(output.status.code(), Some(1), "fail verdict exits 1");

    server.shutdown().await;
}
