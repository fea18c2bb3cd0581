//! Binary entry point: initializes logging, builds config (CLI flags layered
//! over `EngineConfig::from_env()`), runs the engine, and maps the result to
//! one of the documented exit codes.

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use workflow_core::EngineConfig;
use workflow_engine::{Args, Engine};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let base_config = EngineConfig::from_env();
    let config = args.engine_config(base_config);

    let inputs = match args.run_inputs(config.noninteractive) {
        Ok(inputs) => inputs,
        Err(message) => {
            eprintln!("usage error: {message}");
            std::process::exit(2);
        }
    };

    let engine = Engine::new(config);

    let cancel = CancellationToken::new();
    let run_future = engine.run_cancelable(inputs, cancel.clone());
    tokio::pin!(run_future);

    let outcome = tokio::select! {
        result = &mut run_future => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("received interrupt signal, canceling run");
            cancel.cancel();
            run_future.await
        }
    };

    match outcome {
        Ok(summary) => {
            println!(
                "lane={} completed={} failed={} gates={:?} exit=0",
                summary.lane,
                summary.completed_steps.len(),
                summary.failed_steps.len(),
                summary.quality_result,
            );
            println!("{}", summary.status_path.display());
            std::process::exit(0);
        }
        Err(err) => {
            let code = err.exit_code();
            tracing::error!(error = %err, exit_code = code, "workflow run failed");
            eprintln!("error: {err}");
            for line in err.log_excerpt().iter().rev().take(10).collect::<Vec<_>>().into_iter().rev() {
                eprintln!("  {line}");
            }
            std::process::exit(code);
        }
    }
}
