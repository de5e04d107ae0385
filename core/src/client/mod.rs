//! Typed façade over `sc64deployer`.
//!
//! [`DeployerClient`] turns one remote operation into one external command:
//! it validates inputs, builds the argument list from the configured
//! templates, picks a timeout, runs the command and maps the outcome to a
//! structured result or an [`OperationError`].

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{expand_template, DeployerConfig, TemplateArgs};
use crate::errors::{ErrorKind, OperationError};
use crate::models::{Listing, OperationKind, OperationOutput, OperationRequest, TransferProgress};
use crate::parser::{detect_error_marker, failure_message, parse_listing};
use crate::paths::{
    join_remote, normalize_remote_path, parent_dir, validate_new_name, validate_remote_path,
};
use crate::runner::{CommandRunner, ProcessRunner, RunOutcome};

/// Callback receiving transfer progress.
pub type ProgressFn = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Per-call context: cancellation and an optional progress sink.
#[derive(Clone, Default)]
pub struct CallContext {
    pub cancel: CancellationToken,
    pub progress: Option<ProgressFn>,
}

impl CallContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Forwards progress reports that are non-decreasing and within the total.
struct ProgressTracker {
    sink: Option<ProgressFn>,
    total: Option<u64>,
    last: Option<u64>,
}

impl ProgressTracker {
    fn new(sink: Option<ProgressFn>, total: Option<u64>) -> Self {
        Self {
            sink,
            total,
            last: None,
        }
    }

    fn report(&mut self, bytes: u64) {
        let Some(sink) = &self.sink else { return };
        let bytes = self.total.map_or(bytes, |total| bytes.min(total));
        if self.last.is_some_and(|last| bytes <= last) {
            return;
        }
        self.last = Some(bytes);
        sink(TransferProgress {
            bytes,
            total: self.total,
        });
    }
}

/// Client for the `sc64deployer` executable.
pub struct DeployerClient<R: CommandRunner = ProcessRunner> {
    runner: Arc<R>,
    config: Arc<DeployerConfig>,
}

impl<R: CommandRunner> Clone for DeployerClient<R> {
    fn clone(&self) -> Self {
        Self {
            runner: Arc::clone(&self.runner),
            config: Arc::clone(&self.config),
        }
    }
}

impl DeployerClient<ProcessRunner> {
    /// Client spawning real processes.
    pub fn new(config: DeployerConfig) -> Self {
        Self::with_runner(ProcessRunner::new(), config)
    }
}

impl<R: CommandRunner> DeployerClient<R> {
    pub fn with_runner(runner: R, config: DeployerConfig) -> Self {
        Self {
            runner: Arc::new(runner),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &DeployerConfig {
        &self.config
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Run a request of any kind.
    pub async fn execute(
        &self,
        request: &OperationRequest,
        ctx: &CallContext,
    ) -> Result<OperationOutput, OperationError> {
        let path = request.target_path.as_str();
        match request.kind {
            OperationKind::List => self.list(path, ctx).await.map(OperationOutput::Listing),
            OperationKind::Upload => {
                let local = required_local(request)?;
                let bytes = self.upload(local, path, ctx).await?;
                Ok(OperationOutput::Transferred { bytes })
            }
            OperationKind::Download => {
                let local = required_local(request)?;
                let bytes = self.download(path, local, ctx).await?;
                Ok(OperationOutput::Transferred { bytes })
            }
            OperationKind::Delete => self.delete(path, ctx).await.map(|_| OperationOutput::Done),
            OperationKind::Mkdir => self.mkdir(path, ctx).await.map(|_| OperationOutput::Done),
            OperationKind::Rename => {
                let new_name = request.new_name.as_deref().ok_or_else(|| {
                    OperationError::invalid_path("rename requires a new name")
                })?;
                self.rename(path, new_name, ctx)
                    .await
                    .map(|_| OperationOutput::Done)
            }
            OperationKind::Stat => self
                .stat(path, ctx)
                .await
                .map(|text| OperationOutput::Stat { text }),
        }
    }

    /// List a directory. Relative entry paths are resolved against `dir`.
    pub async fn list(&self, dir: &str, ctx: &CallContext) -> Result<Listing, OperationError> {
        validate_remote_path(dir)?;
        let dir = normalize_remote_path(dir);
        let stdout = self
            .invoke(
                OperationKind::List,
                TemplateArgs {
                    path: &dir,
                    ..Default::default()
                },
                self.config.timeouts.command(),
                &ctx.cancel,
            )
            .await?;

        let mut listing = parse_listing(&stdout);
        for entry in &mut listing.entries {
            if !entry.path.starts_with('/') {
                entry.path = join_remote(&dir, &entry.path);
            }
        }
        if !listing.warnings.is_empty() {
            warn!(
                dir = %dir,
                skipped = listing.warnings.len(),
                "Skipped malformed listing lines"
            );
        }
        debug!(dir = %dir, entries = listing.entries.len(), "Listed directory");
        Ok(listing)
    }

    /// Upload a local file to `remote`. Returns the number of bytes sent.
    pub async fn upload(
        &self,
        local: &Path,
        remote: &str,
        ctx: &CallContext,
    ) -> Result<u64, OperationError> {
        validate_remote_path(remote)?;
        let remote = normalize_remote_path(remote);
        let metadata = tokio::fs::metadata(local)
            .await
            .map_err(|e| map_local_io_error(e, local))?;
        if !metadata.is_file() {
            return Err(OperationError::invalid_path(format!(
                "not a regular file: {}",
                local.display()
            )));
        }
        let total = metadata.len();
        let local_arg = local.to_string_lossy();

        let mut tracker = ProgressTracker::new(ctx.progress.clone(), Some(total));
        tracker.report(0);
        self.invoke(
            OperationKind::Upload,
            TemplateArgs {
                path: &remote,
                local: Some(&local_arg),
                dest: None,
            },
            self.config.timeouts.transfer(Some(total)),
            &ctx.cancel,
        )
        .await?;
        tracker.report(total);

        info!(local = %local.display(), remote = %remote, bytes = total, "Upload complete");
        Ok(total)
    }

    /// Download `remote` to a local file. Returns the size of the local file.
    ///
    /// A failed transfer may leave a partial local file behind.
    pub async fn download(
        &self,
        remote: &str,
        local: &Path,
        ctx: &CallContext,
    ) -> Result<u64, OperationError> {
        validate_remote_path(remote)?;
        let remote = normalize_remote_path(remote);
        let local_arg = local.to_string_lossy();

        let mut tracker = ProgressTracker::new(ctx.progress.clone(), None);
        let run = self.invoke(
            OperationKind::Download,
            TemplateArgs {
                path: &remote,
                local: Some(&local_arg),
                dest: None,
            },
            self.config.timeouts.transfer(None),
            &ctx.cancel,
        );

        let result = if ctx.progress.is_some() {
            // A file already at the destination is not progress until the tool touches it.
            let baseline = file_stamp(local).await;
            tokio::pin!(run);
            let mut ticker = tokio::time::interval(self.config.progress_poll());
            loop {
                tokio::select! {
                    result = &mut run => break result,
                    _ = ticker.tick() => {
                        match file_stamp(local).await {
                            Some(stamp) if Some(stamp) != baseline => tracker.report(stamp.0),
                            _ => {}
                        }
                    }
                }
            }
        } else {
            run.await
        };
        result?;

        let bytes = tokio::fs::metadata(local)
            .await
            .map(|m| m.len())
            .map_err(|e| {
                OperationError::new(
                    ErrorKind::Unknown,
                    format!("downloaded file missing at {}: {e}", local.display()),
                )
            })?;
        tracker.report(bytes);

        info!(remote = %remote, local = %local.display(), bytes, "Download complete");
        Ok(bytes)
    }

    /// Delete a file or an empty directory.
    pub async fn delete(&self, path: &str, ctx: &CallContext) -> Result<(), OperationError> {
        let path = validated_non_root(path, "delete")?;
        self.invoke(
            OperationKind::Delete,
            TemplateArgs {
                path: &path,
                ..Default::default()
            },
            self.config.timeouts.command(),
            &ctx.cancel,
        )
        .await?;
        info!(path = %path, "Deleted");
        Ok(())
    }

    /// Create a directory.
    pub async fn mkdir(&self, path: &str, ctx: &CallContext) -> Result<(), OperationError> {
        let path = validated_non_root(path, "create")?;
        self.invoke(
            OperationKind::Mkdir,
            TemplateArgs {
                path: &path,
                ..Default::default()
            },
            self.config.timeouts.command(),
            &ctx.cancel,
        )
        .await?;
        info!(path = %path, "Created directory");
        Ok(())
    }

    /// Rename an entry within its directory.
    pub async fn rename(
        &self,
        path: &str,
        new_name: &str,
        ctx: &CallContext,
    ) -> Result<(), OperationError> {
        let path = validated_non_root(path, "rename")?;
        validate_new_name(new_name)?;
        let dest = join_remote(&parent_dir(&path), new_name.trim());
        self.invoke(
            OperationKind::Rename,
            TemplateArgs {
                path: &path,
                local: None,
                dest: Some(&dest),
            },
            self.config.timeouts.command(),
            &ctx.cancel,
        )
        .await?;
        info!(from = %path, to = %dest, "Renamed");
        Ok(())
    }

    /// Raw status text for a path.
    pub async fn stat(&self, path: &str, ctx: &CallContext) -> Result<String, OperationError> {
        validate_remote_path(path)?;
        let path = normalize_remote_path(path);
        let stdout = self
            .invoke(
                OperationKind::Stat,
                TemplateArgs {
                    path: &path,
                    ..Default::default()
                },
                self.config.timeouts.command(),
                &ctx.cancel,
            )
            .await?;
        Ok(stdout.trim().to_string())
    }

    /// Build argv, run it and map the outcome. Returns stdout on exit 0.
    async fn invoke(
        &self,
        kind: OperationKind,
        args: TemplateArgs<'_>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, OperationError> {
        let mut argv = vec![self.config.executable.to_string_lossy().into_owned()];
        argv.extend(expand_template(self.config.templates.for_kind(kind), &args));

        match self.runner.run(&argv, timeout, cancel).await {
            RunOutcome::Completed {
                exit_code: 0,
                stdout,
                ..
            } => Ok(stdout),
            RunOutcome::Completed {
                exit_code,
                stdout,
                stderr,
            } => {
                let error_kind =
                    detect_error_marker(&stdout, &stderr, exit_code).unwrap_or(ErrorKind::Unknown);
                let message = failure_message(&stdout, &stderr, exit_code);
                warn!(op = kind.as_str(), exit_code, ?error_kind, "{message}");
                Err(OperationError::new(error_kind, message))
            }
            RunOutcome::TimedOut => Err(OperationError::new(
                ErrorKind::Timeout,
                format!("{} timed out after {}s", kind.as_str(), timeout.as_secs()),
            )),
            RunOutcome::Cancelled => Err(OperationError::new(
                ErrorKind::Unknown,
                format!("{} cancelled", kind.as_str()),
            )),
            RunOutcome::SpawnFailed { reason } => {
                Err(OperationError::new(ErrorKind::ExecutableUnavailable, reason))
            }
        }
    }
}

/// Length and modification time of a local file, if it exists.
async fn file_stamp(path: &Path) -> Option<(u64, Option<SystemTime>)> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    Some((meta.len(), meta.modified().ok()))
}

fn required_local(request: &OperationRequest) -> Result<&Path, OperationError> {
    request.local_path.as_deref().ok_or_else(|| {
        OperationError::invalid_path(format!("{} requires a local path", request.kind.as_str()))
    })
}

/// Validate and normalize a path that must not be the root.
fn validated_non_root(path: &str, action: &str) -> Result<String, OperationError> {
    validate_remote_path(path)?;
    let path = normalize_remote_path(path);
    if path == "/" {
        return Err(OperationError::invalid_path(format!(
            "cannot {action} the root directory"
        )));
    }
    Ok(path)
}

fn map_local_io_error(e: std::io::Error, path: &Path) -> OperationError {
    let kind = match e.kind() {
        std::io::ErrorKind::NotFound => ErrorKind::NotFound,
        std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
        _ => ErrorKind::Unknown,
    };
    OperationError::new(kind, format!("{}: {e}", path.display()))
}
