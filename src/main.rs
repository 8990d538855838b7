#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]
//! Executable entry point (spec §6): resolves configuration, parses the
//! `--task` invocation, dispatches the job, and renders its
//! [`intel_pipeline::tasks::TaskResult`] as JSON or text.

use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use serde_json::json;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

use intel_pipeline::config::cli::{Cli, OutputFormat};
use intel_pipeline::config::Settings;
use intel_pipeline::tasks;

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(error) = fmt().with_env_filter(filter).json().try_init() {
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "tracing init failed: {error}");
    }
}

fn render(result: &tasks::TaskResult, output: OutputFormat) -> String {
    match output {
        OutputFormat::Json => result.to_json().to_string(),
        OutputFormat::Text => result.summary.clone(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(error) => {
            let mut stderr = io::stderr().lock();
            let _ = writeln!(stderr, "{}", json!({"success": false, "error": error.to_string()}));
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&settings.log.level);

    let output = cli.output;
    match tasks::dispatch(&cli, settings).await {
        Ok(result) => {
            let rendered = render(&result, output);
            let mut stdout = io::stdout().lock();
            let _ = writeln!(stdout, "{rendered}");
            if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(error) => {
            error!(error = %error, "fatal adapter wiring failure");
            let mut stderr = io::stderr().lock();
            let _ = writeln!(stderr, "{}", json!({"success": false, "error": error.to_string()}));
            ExitCode::FAILURE
        }
    }
}
