use std::io;

use thiserror::Error;

use crate::parser::PatchOpKind;

/// Failure of a single patch operation. Sibling operations still run.
#[derive(Debug, Error)]
pub enum PatchOpError {
    #[error("File already exists: {path}")]
    FileExists { path: String },

    #[error("File does not exist: {path}")]
    FileMissing { path: String },

    #[error("Could not find {} in {path}:\n---\n{anchor}\n---", .kind.anchor_label())]
    AnchorNotFound {
        kind: PatchOpKind,
        path: String,
        anchor: String,
    },

    #[error("No old_text given for {} in {path}", .kind.verb())]
    MissingAnchor { kind: PatchOpKind, path: String },

    #[error("Failed to backup {path}: {source}")]
    BackupFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Unknown operation: {verb}")]
    UnknownOperation { verb: String },
}

impl PatchOpError {
    pub(crate) fn io(action: &'static str, path: &str, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_string(),
            source,
        }
    }
}
