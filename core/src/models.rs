//! Data types exchanged between the caller and the core.
//!
//! Field names are serialized as camelCase for out-of-process callers.

use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::errors::OperationError;

/// Whether a remote entry is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One file or directory on the SD card, as reported by a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    /// Final path component; never contains `/`.
    pub name: String,
    /// Absolute remote path.
    pub path: String,
    pub kind: EntryKind,
    /// Size in bytes. Always `0` for directories.
    pub size_bytes: u64,
    /// Size token exactly as printed by the tool (`512K`, `----`, `<DIR>`).
    pub size_text: String,
    pub modified_at: Option<NaiveDateTime>,
}

impl RemoteEntry {
    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// A non-fatal problem found while parsing a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseWarning {
    /// 1-based line number in the tool output.
    pub line_number: usize,
    pub line: String,
    pub reason: String,
}

/// Parsed directory listing plus any skipped lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub entries: Vec<RemoteEntry>,
    pub warnings: Vec<ParseWarning>,
}

/// Sort entries directories first, then by case-insensitive name.
pub fn sort_entries(entries: &mut [RemoteEntry]) {
    entries.sort_by(|a, b| match (a.is_directory(), b.is_directory()) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    });
}

/// Opaque token identifying one submitted operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OperationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OperationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The remote operation a request performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    List,
    Upload,
    Download,
    Delete,
    Mkdir,
    Rename,
    Stat,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Upload => "upload",
            Self::Download => "download",
            Self::Delete => "delete",
            Self::Mkdir => "mkdir",
            Self::Rename => "rename",
            Self::Stat => "stat",
        }
    }

    /// Whether the operation moves file contents and reports progress.
    pub fn is_transfer(&self) -> bool {
        matches!(self, Self::Upload | Self::Download)
    }
}

/// A unit of work submitted to the scheduler.
///
/// `target_path` is the remote path the operation acts on: the directory for
/// `List`, the destination file for `Upload`, the source file for `Download`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<OperationId>,
    pub kind: OperationKind,
    pub target_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,
}

impl OperationRequest {
    fn new(kind: OperationKind, target_path: impl Into<String>) -> Self {
        Self {
            id: None,
            kind,
            target_path: target_path.into(),
            local_path: None,
            new_name: None,
        }
    }

    pub fn list(dir: impl Into<String>) -> Self {
        Self::new(OperationKind::List, dir)
    }

    pub fn upload(local: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        Self {
            local_path: Some(local.into()),
            ..Self::new(OperationKind::Upload, remote)
        }
    }

    pub fn download(remote: impl Into<String>, local: impl Into<PathBuf>) -> Self {
        Self {
            local_path: Some(local.into()),
            ..Self::new(OperationKind::Download, remote)
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(OperationKind::Delete, path)
    }

    pub fn mkdir(path: impl Into<String>) -> Self {
        Self::new(OperationKind::Mkdir, path)
    }

    pub fn rename(path: impl Into<String>, new_name: impl Into<String>) -> Self {
        Self {
            new_name: Some(new_name.into()),
            ..Self::new(OperationKind::Rename, path)
        }
    }

    pub fn stat(path: impl Into<String>) -> Self {
        Self::new(OperationKind::Stat, path)
    }

    /// Attach a caller-chosen id used for correlation and cancellation.
    pub fn with_id(mut self, id: impl Into<OperationId>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Payload of a successful operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OperationOutput {
    Listing(Listing),
    Transferred { bytes: u64 },
    Stat { text: String },
    Done,
}

/// Terminal outcome of a request, reported exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum OperationResult {
    Succeeded { output: OperationOutput },
    Failed { error: OperationError },
    Cancelled,
}

impl OperationResult {
    pub fn from_client(result: Result<OperationOutput, OperationError>) -> Self {
        match result {
            Ok(output) => Self::Succeeded { output },
            Err(error) => Self::Failed { error },
        }
    }

    pub fn state(&self) -> OperationState {
        match self {
            Self::Succeeded { .. } => OperationState::Succeeded,
            Self::Failed { .. } => OperationState::Failed,
            Self::Cancelled => OperationState::Cancelled,
        }
    }
}

/// Lifecycle state of a request inside the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Transfer progress for Upload/Download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub bytes: u64,
    pub total: Option<u64>,
}

/// Event emitted by the scheduler to its subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum OperationEvent {
    Started {
        id: OperationId,
        kind: OperationKind,
    },
    Progress {
        id: OperationId,
        progress: TransferProgress,
    },
    Finished {
        id: OperationId,
        result: OperationResult,
    },
}

impl OperationEvent {
    pub fn id(&self) -> &OperationId {
        match self {
            Self::Started { id, .. } | Self::Progress { id, .. } | Self::Finished { id, .. } => id,
        }
    }
}
