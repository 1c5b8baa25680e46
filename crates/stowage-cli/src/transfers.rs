use eyre::Result;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use stowage_core::{
    FailureClass, TaskScheduler, TransferError, TransferOrchestrator, TransferReport,
    TransferRequest,
};

use crate::cli::TransferArgs;
use crate::context::AppContext;

pub const EXIT_SERVER_FAILURE: u8 = 1;
pub const EXIT_CLIENT_FAILURE: u8 = 2;

pub async fn run_transfer(ctx: AppContext, args: &TransferArgs) -> Result<ExitCode> {
    let config = ctx.config;
    let scheduler = TaskScheduler::new(config.max_concurrency);
    let orchestrator = TransferOrchestrator::new(scheduler, config);

    let progress_bar = if !args.progress {
        None
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["-", "\\", "|", "/"]),
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        pb.set_message(format!(
            "Transferring {} director{}",
            args.paths.len(),
            if args.paths.len() == 1 { "y" } else { "ies" }
        ));
        Some(pb)
    };

    let requests: Vec<TransferRequest> = args
        .paths
        .iter()
        .map(|path| {
            let request = TransferRequest::new(path);
            match args.batch_size {
                Some(batch_size) => request.with_batch_size(batch_size),
                None => request,
            }
        })
        .collect();

    // Two sources with the same directory name would share one workspace;
    // only the first of them runs.
    let mut claimed = HashSet::new();
    let mut conflicts = Vec::with_capacity(requests.len());
    for request in &requests {
        let conflict = match orchestrator.workspace_for(request).await {
            Ok(workspace) if !claimed.insert(workspace.root.clone()) => {
                Some(TransferError::InvalidInput(format!(
                    "workspace {} is already the target of another path in this run",
                    workspace.root.display()
                )))
            }
            _ => None,
        };
        conflicts.push(conflict);
    }

    let orchestrator = &orchestrator;
    let results = join_all(requests.into_iter().zip(conflicts).map(
        |(request, conflict)| async move {
            match conflict {
                Some(err) => Err(err),
                None => orchestrator.transfer(request).await,
            }
        },
    ))
    .await;

    if let Some(pb) = progress_bar {
        pb.finish_and_clear();
    }

    let mut worst: Option<FailureClass> = None;
    for (path, result) in args.paths.iter().zip(results) {
        match result {
            Ok(report) => print_report(path, &report, args.json)?,
            Err(err) => {
                print_failure(path, &err);
                worst = Some(match (worst, err.failure_class()) {
                    (Some(FailureClass::Server), _) | (_, FailureClass::Server) => {
                        FailureClass::Server
                    }
                    _ => FailureClass::Client,
                });
            }
        }
    }

    Ok(match worst {
        None => ExitCode::SUCCESS,
        Some(FailureClass::Client) => ExitCode::from(EXIT_CLIENT_FAILURE),
        Some(FailureClass::Server) => ExitCode::from(EXIT_SERVER_FAILURE),
    })
}

fn print_report(path: &Path, report: &TransferReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
        return Ok(());
    }
    println!(
        "Transferred {} → {}: {} file(s), {} in {}",
        path.display(),
        report.workspace.display(),
        report.file_count,
        report.size,
        report.processing_time
    );
    Ok(())
}

fn print_failure(path: &Path, err: &TransferError) {
    eprintln!("error: {}: {err}", path.display());
    if let TransferError::Aggregate(failures) = err {
        for failure in failures.iter().skip(1) {
            eprintln!("  also: {failure}");
        }
    }
}
