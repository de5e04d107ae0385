use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::CoreError;
use crate::models::OperationKind;

/// Placeholder replaced by the remote target path.
pub const PATH_PLACEHOLDER: &str = "{path}";
/// Placeholder replaced by the local file path of a transfer.
pub const LOCAL_PLACEHOLDER: &str = "{local}";
/// Placeholder replaced by the rename destination path.
pub const DEST_PLACEHOLDER: &str = "{dest}";

/// Argument templates for each operation kind.
///
/// Each element becomes exactly one argv element after placeholder
/// substitution; nothing is passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgTemplates {
    #[serde(default = "default_list_template")]
    pub list: Vec<String>,
    #[serde(default = "default_upload_template")]
    pub upload: Vec<String>,
    #[serde(default = "default_download_template")]
    pub download: Vec<String>,
    #[serde(default = "default_delete_template")]
    pub delete: Vec<String>,
    #[serde(default = "default_mkdir_template")]
    pub mkdir: Vec<String>,
    #[serde(default = "default_rename_template")]
    pub rename: Vec<String>,
    #[serde(default = "default_stat_template")]
    pub stat: Vec<String>,
}

impl Default for ArgTemplates {
    fn default() -> Self {
        Self {
            list: default_list_template(),
            upload: default_upload_template(),
            download: default_download_template(),
            delete: default_delete_template(),
            mkdir: default_mkdir_template(),
            rename: default_rename_template(),
            stat: default_stat_template(),
        }
    }
}

impl ArgTemplates {
    pub fn for_kind(&self, kind: OperationKind) -> &[String] {
        match kind {
            OperationKind::List => &self.list,
            OperationKind::Upload => &self.upload,
            OperationKind::Download => &self.download,
            OperationKind::Delete => &self.delete,
            OperationKind::Mkdir => &self.mkdir,
            OperationKind::Rename => &self.rename,
            OperationKind::Stat => &self.stat,
        }
    }
}

/// Values substituted into an [`ArgTemplates`] entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateArgs<'a> {
    pub path: &'a str,
    pub local: Option<&'a str>,
    pub dest: Option<&'a str>,
}

/// Expand a template into discrete arguments.
pub fn expand_template(template: &[String], args: &TemplateArgs<'_>) -> Vec<String> {
    template.iter().map(|e| substitute(e, args)).collect()
}

/// Single left-to-right pass so substituted values are never re-expanded.
fn substitute(element: &str, args: &TemplateArgs<'_>) -> String {
    let values = [
        (PATH_PLACEHOLDER, Some(args.path)),
        (LOCAL_PLACEHOLDER, args.local),
        (DEST_PLACEHOLDER, args.dest),
    ];
    let mut out = String::with_capacity(element.len());
    let mut rest = element;
    'scan: while !rest.is_empty() {
        for (placeholder, value) in values {
            if let (true, Some(value)) = (rest.starts_with(placeholder), value) {
                out.push_str(value);
                rest = &rest[placeholder.len()..];
                continue 'scan;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }
    out
}

/// Per-kind command timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeouts {
    /// Listing, stat, delete, mkdir and rename.
    #[serde(default = "default_command_secs")]
    pub command_secs: u64,
    /// Minimum timeout for an upload or download.
    #[serde(default = "default_transfer_floor_secs")]
    pub transfer_floor_secs: u64,
    /// Upper bound for any transfer; also used when the size is unknown.
    #[serde(default = "default_transfer_ceiling_secs")]
    pub transfer_ceiling_secs: u64,
    /// Slowest expected transfer rate used to scale upload timeouts.
    #[serde(default = "default_min_throughput")]
    pub min_throughput_bytes_per_sec: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command_secs: default_command_secs(),
            transfer_floor_secs: default_transfer_floor_secs(),
            transfer_ceiling_secs: default_transfer_ceiling_secs(),
            min_throughput_bytes_per_sec: default_min_throughput(),
        }
    }
}

impl Timeouts {
    /// Timeout for a non-transfer command.
    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    /// Timeout for a transfer of `size` bytes, or the ceiling when unknown.
    pub fn transfer(&self, size: Option<u64>) -> Duration {
        let ceiling = self.transfer_ceiling_secs;
        let secs = match size {
            Some(bytes) => {
                let scaled = bytes / self.min_throughput_bytes_per_sec.max(1);
                self.transfer_floor_secs.saturating_add(scaled).min(ceiling)
            }
            None => ceiling,
        };
        Duration::from_secs(secs)
    }
}

/// Configuration for talking to `sc64deployer`.
///
/// The executable path is resolved once at startup and treated as read-only
/// for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployerConfig {
    #[serde(default)]
    pub executable: PathBuf,
    #[serde(default)]
    pub templates: ArgTemplates,
    #[serde(default)]
    pub timeouts: Timeouts,
    /// How long a cancelled operation may take to wind down.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
    /// Poll interval for download progress.
    #[serde(default = "default_progress_poll_ms")]
    pub progress_poll_ms: u64,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::new(),
            templates: ArgTemplates::default(),
            timeouts: Timeouts::default(),
            cancel_grace_ms: default_cancel_grace_ms(),
            progress_poll_ms: default_progress_poll_ms(),
        }
    }
}

impl DeployerConfig {
    /// Default configuration for the given executable.
    pub fn with_executable(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            ..Self::default()
        }
    }

    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    pub fn progress_poll(&self) -> Duration {
        Duration::from_millis(self.progress_poll_ms.max(1))
    }

    /// Check values that would otherwise surface as confusing runtime failures.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.executable.as_os_str().is_empty() {
            return Err(CoreError::Config("executable path is not set".into()));
        }
        if !self.executable.is_file() {
            return Err(CoreError::Config(format!(
                "sc64deployer not found at {}",
                self.executable.display()
            )));
        }
        if self.timeouts.command_secs == 0
            || self.timeouts.transfer_floor_secs == 0
            || self.timeouts.transfer_ceiling_secs == 0
        {
            return Err(CoreError::Config("timeouts must be positive".into()));
        }
        if self.timeouts.transfer_floor_secs > self.timeouts.transfer_ceiling_secs {
            return Err(CoreError::Config(
                "transferFloorSecs must not exceed transferCeilingSecs".into(),
            ));
        }
        for kind in [
            OperationKind::List,
            OperationKind::Upload,
            OperationKind::Download,
            OperationKind::Delete,
            OperationKind::Mkdir,
            OperationKind::Rename,
            OperationKind::Stat,
        ] {
            validate_template(kind, self.templates.for_kind(kind))?;
        }
        Ok(())
    }
}

fn validate_template(kind: OperationKind, template: &[String]) -> Result<(), CoreError> {
    if template.is_empty() {
        return Err(CoreError::Config(format!(
            "template for '{}' is empty",
            kind.as_str()
        )));
    }
    let mut required = vec![PATH_PLACEHOLDER];
    match kind {
        OperationKind::Upload | OperationKind::Download => required.push(LOCAL_PLACEHOLDER),
        OperationKind::Rename => required.push(DEST_PLACEHOLDER),
        _ => {}
    }
    for placeholder in required {
        if !template.iter().any(|t| t.contains(placeholder)) {
            return Err(CoreError::Config(format!(
                "template for '{}' is missing {placeholder}",
                kind.as_str()
            )));
        }
    }
    Ok(())
}

// --- Default value functions ---

fn template(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn default_list_template() -> Vec<String> {
    template(&["sd", "ls", PATH_PLACEHOLDER])
}

fn default_upload_template() -> Vec<String> {
    template(&["sd", "upload", LOCAL_PLACEHOLDER, PATH_PLACEHOLDER])
}

fn default_download_template() -> Vec<String> {
    template(&["sd", "download", PATH_PLACEHOLDER, LOCAL_PLACEHOLDER])
}

fn default_delete_template() -> Vec<String> {
    template(&["sd", "rm", PATH_PLACEHOLDER])
}

fn default_mkdir_template() -> Vec<String> {
    template(&["sd", "mkdir", PATH_PLACEHOLDER])
}

fn default_rename_template() -> Vec<String> {
    template(&["sd", "mv", PATH_PLACEHOLDER, DEST_PLACEHOLDER])
}

fn default_stat_template() -> Vec<String> {
    template(&["sd", "stat", PATH_PLACEHOLDER])
}

fn default_command_secs() -> u64 {
    30
}

fn default_transfer_floor_secs() -> u64 {
    30
}

fn default_transfer_ceiling_secs() -> u64 {
    600
}

fn default_min_throughput() -> u64 {
    64 * 1024
}

fn default_cancel_grace_ms() -> u64 {
    2000
}

fn default_progress_poll_ms() -> u64 {
    250
}
