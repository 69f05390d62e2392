use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use tracing::{debug, error, trace};

use s3_bulk_delete::config::Config;
use s3_bulk_delete::{
    BulkDeletePipeline, CLIArgs, S3BulkDeleteError, create_pipeline_cancellation_token,
    exit_code_from_error,
};

pub mod indicator;
mod tracing_init;
pub mod ui_config;

/// s3-bulk-delete - Adaptive bulk deletion of Amazon S3 objects listed on stdin.
///
/// This binary is a thin wrapper over the s3-bulk-delete library.
#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config_exit_if_err();

    if let Some(shell) = config.auto_complete_shell {
        generate(
            shell,
            &mut CLIArgs::command(),
            "s3-bulk-delete",
            &mut std::io::stdout(),
        );

        return Ok(());
    }

    start_tracing_if_necessary(&config);

    trace!("config = {:?}", config);

    let exit_code = run(config).await?;
    if exit_code != 0 {
        std::process::exit(exit_code);
    }

    Ok(())
}

/// Configuration problems exit with 1. `--help` and `--version` keep clap's
/// own output and exit status.
fn load_config_exit_if_err() -> Config {
    let config_error_exit_code = S3BulkDeleteError::InvalidConfig(String::new()).exit_code();

    let args = match CLIArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            if !e.use_stderr() {
                e.exit();
            }
            let _ = e.print();
            std::process::exit(config_error_exit_code);
        }
    };

    match Config::try_from(args) {
        Ok(config) => config,
        Err(error_message) => {
            let _ = clap::Error::raw(clap::error::ErrorKind::ValueValidation, error_message)
                .with_cmd(&CLIArgs::command())
                .print();
            std::process::exit(config_error_exit_code);
        }
    }
}

fn start_tracing_if_necessary(config: &Config) -> bool {
    let Some(tracing_config) = config.tracing_config.as_ref() else {
        return false;
    };

    tracing_init::init_tracing(tracing_config);
    true
}

/// Write fatal errors to stderr when no tracing subscriber is installed.
fn print_errors_if_untraced(config: &Config, errors: &[anyhow::Error]) {
    if config.tracing_config.is_some() {
        return;
    }
    for line in error_lines(errors) {
        eprintln!("{line}");
    }
}

fn error_lines(errors: &[anyhow::Error]) -> Vec<String> {
    errors.iter().map(|e| format!("error: {e:#}")).collect()
}

async fn run(config: Config) -> Result<i32> {
    let cancellation_token = create_pipeline_cancellation_token();

    let start_time = tokio::time::Instant::now();
    debug!("bulk delete pipeline start.");

    let mut pipeline = match BulkDeletePipeline::for_s3(config.clone(), cancellation_token).await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!(error = format!("{e:#}"), "failed to create the bulk delete pipeline.");
            print_errors_if_untraced(&config, std::slice::from_ref(&e));
            return Ok(exit_code_from_error(&e));
        }
    };

    let indicator_join_handle = indicator::show_indicator(
        pipeline.get_stats_receiver(),
        ui_config::is_progress_indicator_needed(&config),
        ui_config::is_show_result_needed(&config),
    );

    let input = tokio::io::BufReader::new(tokio::io::stdin());
    pipeline.run(input).await;
    indicator_join_handle.await?;

    let duration_sec = format!("{:.3}", start_time.elapsed().as_secs_f32());

    let exit_code = pipeline.exit_code();
    if let Some(errors) = pipeline.get_errors_and_consume() {
        for err in &errors {
            error!("{:#}", err);
        }
        print_errors_if_untraced(&config, &errors);
        error!(
            duration_sec = duration_sec,
            exit_code = exit_code,
            "s3-bulk-delete failed."
        );
        return Ok(exit_code);
    }

    debug!(duration_sec = duration_sec, "s3-bulk-delete has been completed.");
    Ok(0)
}
