use loadx_core::cookies::CookieJar;
use loadx_core::vars::VarMap;
use loadx_core::{
    CancelSignal, EvaluatorGateway, HttpExecutor, PROGRESS_CAPACITY, RetryPolicy, Runner,
    progress_channel, run_request,
};
use loadx_ir::Ir;

use crate::cli::{CurlArgs, IrFileArgs, ScenarioFileArgs, ScenarioRunArgs, ScenarioSelectArgs};
use crate::exit_codes::ExitCode;
use crate::output;

/// Accept either shell-split arguments or one pre-joined command string.
fn translate_curl(args: &CurlArgs) -> loadx_lang::Result<Ir> {
    if args.curl.len() == 1 && args.curl[0].contains(char::is_whitespace) {
        loadx_lang::curl::parse_command_line(&args.curl[0])
    } else {
        loadx_lang::curl::from_args(&args.curl)
    }
}

pub fn convert(args: CurlArgs) -> ExitCode {
    match translate_curl(&args) {
        Ok(ir) => {
            match serde_json::to_string_pretty(&ir) {
                Ok(json) => println!("{json}"),
                Err(err) => {
                    eprintln!("error: failed to encode record: {err}");
                    return ExitCode::RuntimeError;
                }
            }
            ExitCode::Success
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::InvalidInput
        }
    }
}

pub async fn exec(args: CurlArgs) -> ExitCode {
    let ir = match translate_curl(&args) {
        Ok(ir) => ir,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::InvalidInput;
        }
    };

    execute_single(&ir).await
}

pub async fn run_ir_file(args: IrFileArgs) -> ExitCode {
    let ir = match read_ir(&args) {
        Ok(ir) => ir,
        Err(code) => return code,
    };

    execute_single(&ir).await
}

pub fn validate_ir_file(args: IrFileArgs) -> ExitCode {
    let ir = match read_ir(&args) {
        Ok(ir) => ir,
        Err(code) => return code,
    };

    println!("request record is valid");
    println!("  version: {}", ir.version);
    println!("  method:  {}", ir.request.method);
    println!("  url:     {}", ir.request.url);
    ExitCode::Success
}

fn read_ir(args: &IrFileArgs) -> Result<Ir, ExitCode> {
    let data = std::fs::read_to_string(&args.file).map_err(|err| {
        eprintln!("error: failed to read {}: {err}", args.file.display());
        ExitCode::RuntimeError
    })?;

    let ir: Ir = serde_json::from_str(&data).map_err(|err| {
        eprintln!("error: invalid request record: {err}");
        ExitCode::InvalidInput
    })?;

    ir.validate().map_err(|err| {
        eprintln!("error: invalid request record: {err}");
        ExitCode::InvalidInput
    })?;

    Ok(ir)
}

/// Execute one record through the retry loop and print the result.
async fn execute_single(ir: &Ir) -> ExitCode {
    let executor = HttpExecutor::new();
    let gateway = EvaluatorGateway::new();
    let jar = CookieJar::new();
    let cancel = CancelSignal::new();
    let mut vars = VarMap::new();

    let outcome = run_request(
        &executor,
        &gateway,
        "request",
        ir,
        1,
        1,
        &mut vars,
        &jar,
        &cancel,
        &RetryPolicy::default(),
    )
    .await;

    match (&outcome.ctx, &outcome.failure) {
        (Some(_), _) => {
            output::print_exchange(&outcome);
            if outcome.passed {
                ExitCode::Success
            } else {
                ExitCode::EvaluationFailed
            }
        }
        (None, Some(reason)) => {
            eprintln!("error: {reason}");
            ExitCode::RuntimeError
        }
        (None, None) => ExitCode::RuntimeError,
    }
}

pub fn scenario_validate(args: ScenarioFileArgs) -> ExitCode {
    let source = match std::fs::read_to_string(&args.file) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: failed to read {}: {err}", args.file.display());
            return ExitCode::RuntimeError;
        }
    };

    let mut parser = loadx_lang::Parser::new(&source);
    let program = parser.parse_program();
    if !parser.errors().is_empty() {
        eprintln!("validation failed:");
        for error in parser.errors() {
            eprintln!("  {error}");
        }
        return ExitCode::InvalidInput;
    }

    let names = loadx_lang::scenario_names(&program);
    for name in &names {
        if let Err(err) = loadx_lang::compile(&program, Some(name)) {
            eprintln!("scenario `{name}` failed to compile: {err}");
            return ExitCode::InvalidInput;
        }
    }

    let (variables, requests) = program.statements.iter().fold((0, 0), |(v, r), s| match s {
        loadx_lang::ast::Statement::Variable(_) => (v + 1, r),
        loadx_lang::ast::Statement::Request(_) => (v, r + 1),
        loadx_lang::ast::Statement::Scenario(_) => (v, r),
    });

    println!("scenario file is valid");
    println!("  variables: {variables}");
    println!("  requests:  {requests}");
    println!("  scenarios: {}", names.len());
    for name in &names {
        println!("    - {name}");
    }
    ExitCode::Success
}

pub fn scenario_compile(args: ScenarioSelectArgs) -> ExitCode {
    match compile_file(&args.file, args.scenario.as_deref()) {
        Ok(plan) => {
            output::print_plan(&plan);
            ExitCode::Success
        }
        Err(code) => code,
    }
}

fn compile_file(
    file: &std::path::Path,
    scenario: Option<&str>,
) -> Result<loadx_ir::ScenarioPlan, ExitCode> {
    let source = std::fs::read_to_string(file).map_err(|err| {
        eprintln!("error: failed to read {}: {err}", file.display());
        ExitCode::RuntimeError
    })?;

    loadx_lang::compile_source(&source, scenario).map_err(|err| {
        eprintln!("error: {err}");
        ExitCode::InvalidInput
    })
}

pub async fn scenario_run(args: ScenarioRunArgs) -> ExitCode {
    let plan = match compile_file(&args.file, args.scenario.as_deref()) {
        Ok(plan) => plan,
        Err(code) => return code,
    };

    output::print_plan(&plan);

    if args.dry_run {
        println!("\ndry run complete (no execution)");
        return ExitCode::Success;
    }

    let mut runner = Runner::new(plan);
    let stats = runner.stats();

    let printer = if args.progress || args.verbose {
        let (sender, rx) = progress_channel(PROGRESS_CAPACITY, stats.clone());
        runner = runner.with_progress(sender);
        Some(tokio::spawn(output::print_progress(
            rx,
            args.progress,
            args.verbose,
        )))
    } else {
        None
    };

    // Ctrl-C requests a cooperative shutdown: VUs finish their in-flight
    // request and exit.
    let cancel = runner.cancel_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupted, finishing in-flight requests...");
            cancel.cancel();
        }
    });

    println!("\nrunning...\n");
    let summary = match runner.run().await {
        Ok(summary) => summary,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::RuntimeError;
        }
    };

    if let Some(printer) = printer {
        let _ = printer.await;
    }

    output::render_summary(&summary, args.verbose);
    ExitCode::Success
}
