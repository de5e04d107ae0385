//! Run one operation through the scheduler and print its outcome.

use std::future::Future;
use std::io::Write;
use std::process::ExitCode;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::info;

use sc64deck_core::client::DeployerClient;
use sc64deck_core::config::DeployerConfig;
use sc64deck_core::models::{
    sort_entries, Listing, OperationEvent, OperationId, OperationOutput, OperationRequest,
    OperationResult, TransferProgress,
};
use sc64deck_core::runner::CommandRunner;
use sc64deck_core::scheduler::OperationScheduler;

/// Exit code for a cancelled operation (128 + SIGINT).
const EXIT_CANCELLED: u8 = 130;

pub async fn run(
    config: DeployerConfig,
    request: OperationRequest,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let scheduler = OperationScheduler::new(DeployerClient::new(config));
    let mut events = scheduler.subscribe();
    let id = scheduler.submit(request).context("failed to submit operation")?;

    let (result, progress_shown) =
        wait_for_result(&scheduler, &id, &mut events, tokio::signal::ctrl_c(), !json).await?;

    if progress_shown {
        eprintln!();
    }
    let mut stdout = std::io::stdout().lock();
    let code = if json {
        serde_json::to_writer_pretty(&mut stdout, &result)?;
        writeln!(stdout)?;
        exit_code(&result)
    } else {
        render(&mut stdout, &result)?
    };
    Ok(code)
}

/// Follow `id` to its terminal result, cancelling it once `interrupt` resolves.
///
/// Returns the result and whether a progress line was drawn on stderr.
async fn wait_for_result<R: CommandRunner + 'static>(
    scheduler: &OperationScheduler<R>,
    id: &OperationId,
    events: &mut mpsc::UnboundedReceiver<OperationEvent>,
    interrupt: impl Future<Output = std::io::Result<()>>,
    show_progress: bool,
) -> anyhow::Result<(OperationResult, bool)> {
    tokio::pin!(interrupt);
    let mut interrupted = false;
    let mut progress_shown = false;
    loop {
        tokio::select! {
            signal = &mut interrupt, if !interrupted => {
                signal.context("failed to listen for Ctrl-C")?;
                info!("Interrupted, cancelling");
                interrupted = true;
                scheduler.cancel(id);
            }
            event = events.recv() => match event {
                Some(OperationEvent::Progress { progress, .. }) if show_progress => {
                    eprint!("\r{}", format_progress(&progress));
                    progress_shown = true;
                }
                Some(OperationEvent::Finished { id: fid, result }) if fid == *id => {
                    return Ok((result, progress_shown));
                }
                Some(_) => {}
                None => anyhow::bail!("scheduler stopped before the operation finished"),
            },
        }
    }
}

fn exit_code(result: &OperationResult) -> ExitCode {
    match result {
        OperationResult::Succeeded { .. } => ExitCode::SUCCESS,
        OperationResult::Failed { .. } => ExitCode::FAILURE,
        OperationResult::Cancelled => ExitCode::from(EXIT_CANCELLED),
    }
}

/// Human-readable rendering. Failures go to stderr.
fn render(out: &mut impl Write, result: &OperationResult) -> anyhow::Result<ExitCode> {
    match result {
        OperationResult::Succeeded { output } => match output {
            OperationOutput::Listing(listing) => write_listing(out, listing)?,
            OperationOutput::Transferred { bytes } => writeln!(out, "{bytes} bytes transferred")?,
            OperationOutput::Stat { text } => writeln!(out, "{text}")?,
            OperationOutput::Done => {}
        },
        OperationResult::Failed { error } => {
            eprintln!("error: {}", error.kind);
            eprintln!("  {}", error.message);
        }
        OperationResult::Cancelled => eprintln!("cancelled"),
    }
    Ok(exit_code(result))
}

fn write_listing(out: &mut impl Write, listing: &Listing) -> std::io::Result<()> {
    let mut entries = listing.entries.clone();
    sort_entries(&mut entries);
    for entry in &entries {
        let modified = entry
            .modified_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let size = if entry.is_directory() {
            "<DIR>".to_string()
        } else {
            entry.size_bytes.to_string()
        };
        writeln!(out, "{size:>12}  {modified:<16}  {}", entry.name)?;
    }
    for warning in &listing.warnings {
        eprintln!(
            "warning: skipped line {} ({}): {}",
            warning.line_number, warning.reason, warning.line
        );
    }
    Ok(())
}

fn format_progress(progress: &TransferProgress) -> String {
    match progress.total {
        Some(total) if total > 0 => {
            let percent = progress.bytes.saturating_mul(100) / total;
            format!("{} / {} bytes ({percent}%)", progress.bytes, total)
        }
        _ => format!("{} bytes", progress.bytes),
    }
}
