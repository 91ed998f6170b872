mod cli;
mod logging;

use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};

use crate::cli::Cli;
use qcmms_core::{JobOutcome, QcError};
use qcmms_core_full::cleanup::{CleanupOptions, cleanup_command};
use qcmms_core_full::commands::{RunOptions, list_processors, run_command};
use qcmms_core_full::config::{merge_fragments, read_fragments};
use qcmms_core_full::processors;

/// Exit status of a finished run
fn outcome_code(outcome: JobOutcome) -> u8 {
    match outcome {
        JobOutcome::Completed => 0,
        JobOutcome::Aborted => 2,
        JobOutcome::DispatchFailed => 3,
        JobOutcome::Rejected => 4,
    }
}

/// Exit status of a run that returned an error
fn error_code(err: &QcError) -> u8 {
    match err {
        QcError::Aborted { .. } => 2,
        _ => 1,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();

    if args.list_processors {
        logging::init(None, args.quiet);
        return match processors::registry() {
            Ok(registry) => {
                print!("{}", list_processors(registry));
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("{}", e);
                ExitCode::from(1)
            }
        };
    }

    let loaded = read_fragments(args.config.as_slice())
        .and_then(|fragments| merge_fragments(&fragments).map(|config| (fragments, config)));
    let (fragments, config) = match loaded {
        Ok(loaded) => loaded,
        Err(e) => {
            logging::init(None, args.quiet);
            error!("{}", e);
            return ExitCode::from(1);
        }
    };
    // A cleanup may remove the log directory, so it logs to the console only
    logging::init((!args.is_cleanup()).then_some(&config), args.quiet);
    info!(
        fragments = fragments.len(),
        fingerprint = %config.fingerprint(),
        "configuration loaded"
    );

    if args.is_cleanup() {
        let options = CleanupOptions {
            job: args.delete_job,
            data: args.delete_data,
        };
        return match cleanup_command(&config, &options) {
            Ok(report) => {
                for path in &report.paths_removed {
                    info!("Removed {}", path.display());
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("{}", e);
                ExitCode::from(error_code(&e))
            }
        };
    }

    let options = RunOptions {
        stages: args.processors.clone(),
        resume: args.resume,
    };

    match run_command(&config, &fragments, &options).await {
        Ok(report) => {
            if !args.quiet {
                if let Some(payload) = &report.payload {
                    print!("{}", payload.as_str());
                }
            }
            let outcome = report.outcome();
            info!(job_id = report.job_id, outcome = %outcome, "run_manager finished");
            ExitCode::from(outcome_code(outcome))
        }
        Err(e) => {
            error!(fingerprint = %config.fingerprint(), "{}", e);
            ExitCode::from(error_code(&e))
        }
    }
}
