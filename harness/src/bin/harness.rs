use clap::Parser;
use harness::cli::{Cli, Command};
use harness::error::HarnessError;
use harness::{envelope::RunEnvelope, suite_runner, verifier};
use std::process::ExitCode;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args),
        Command::Verify(args) => verify(args),
    }
}

fn run(args: harness::cli::RunArgs) -> ExitCode {
    let config = match args.resolve_config() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let run_instance_id = args
        .run_instance_id
        .clone()
        .unwrap_or_else(|| chrono::Utc::now().format("%Y%m%dT%H%M%S").to_string());

    tracing::info!(run_id = %args.run_id, run_instance_id = %run_instance_id, "starting suite run");

    match suite_runner::run_suite(
        &args.suite_path,
        &args.run_id,
        &run_instance_id,
        &config.runtime_dir,
        &config,
        None,
    ) {
        Ok((envelope, paths)) => {
            tracing::info!(
                completed = envelope.total_cases_completed,
                expected = envelope.total_cases_expected,
                envelope_path = %paths.envelope_path.display(),
                "suite run finished"
            );
            println!("{}", paths.envelope_path.display());
            ExitCode::SUCCESS
        }
        Err(HarnessError::MissingSuite(path)) => {
            tracing::error!(path = %path.display(), "suite not found");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, "suite run failed");
            ExitCode::FAILURE
        }
    }
}

fn verify(args: harness::cli::VerifyArgs) -> ExitCode {
    let paths = suite_runner::SuiteRunPaths::new(&args.runtime_dir, &args.run_id, &args.run_instance_id);

    let envelope_raw = match std::fs::read_to_string(&paths.envelope_path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::error!(path = %paths.envelope_path.display(), error = %e, "could not read envelope");
            return ExitCode::FAILURE;
        }
    };
    let envelope: RunEnvelope = match serde_json::from_str(&envelope_raw) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(error = %e, "envelope is not valid JSON");
            return ExitCode::FAILURE;
        }
    };

    let report = verifier::verify_run(&envelope, &paths.log_path, args.expected_cases, &args.runtime_dir);
    println!("{}", serde_json::to_string_pretty(&report).expect("VerificationReport always serializes"));

    if report.overall.pass {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
