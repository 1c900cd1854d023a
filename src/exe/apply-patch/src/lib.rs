//! Backup-before-mutate interpreter for `*** Begin Patch` documents.

mod error;
mod parser;

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

pub use error::PatchOpError;
pub use parser::{PatchBlock, PatchDocument, PatchOpKind, PatchOperation, parse_block, parse_document};

/// Result of one operation: the success line or the reason it failed.
pub type OpOutcome = Result<String, PatchOpError>;

pub const PATCH_APPLIED: &str = "Patch applied successfully.";
pub const PATCH_FAILED: &str = "Some patch operations failed.";
pub const NO_BLOCKS: &str = "Error: No patch blocks found in input";

pub const APPLY_PATCH_TOOL_INSTRUCTIONS: &str = r#"To edit files, use the apply_patch command. The patch must sit between `*** Begin Patch` and `*** End Patch` lines and may contain several operations:

*** create: path/to/new_file.py
<full file content>

*** update: path/to/file.py
old_text:
<exact text currently in the file>
new_text:
<replacement text>

*** insert_before: path/to/file.py
old_text:
<exact marker text>
new_text:
<text to insert before the marker>

*** insert_after: path/to/file.py
old_text:
<exact marker text>
new_text:
<text to insert after the marker>

*** delete: path/to/file.py
old_text:
<exact text to remove>

Anchors are matched verbatim and every occurrence is affected. A backup of each modified file is written next to it as <path>.<timestamp>.bak.
Invoke it from bash as:

apply_patch
*** Begin Patch
*** update: hello.py
old_text:
print("hi")
new_text:
print("hello")
*** End Patch
"#;

#[derive(Debug, Default)]
pub struct PatchReport {
    pub outcomes: Vec<OpOutcome>,
    found_blocks: bool,
}

impl PatchReport {
    /// True only when the document had blocks and every operation succeeded.
    pub fn success(&self) -> bool {
        self.found_blocks && self.outcomes.iter().all(Result::is_ok)
    }

    pub fn render(&self) -> String {
        if !self.found_blocks {
            return NO_BLOCKS.to_string();
        }
        let mut out = String::from(if self.success() { PATCH_APPLIED } else { PATCH_FAILED });
        for outcome in &self.outcomes {
            out.push('\n');
            match outcome {
                Ok(msg) => out.push_str(msg),
                Err(err) => out.push_str(&err.to_string()),
            }
        }
        out
    }
}

/// Applies patch documents relative to a root directory.
///
/// Not safe to run concurrently against the same files; callers keep at most
/// one execution in flight.
#[derive(Debug, Clone)]
pub struct PatchInterpreter {
    root: PathBuf,
}

impl PatchInterpreter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn execute(&self, text: &str) -> PatchReport {
        let doc = parse_document(text);
        if doc.is_empty() {
            tracing::warn!("apply_patch input had no patch blocks");
            return PatchReport::default();
        }
        let outcomes = doc
            .blocks
            .into_iter()
            .flat_map(|block| block.entries)
            .map(|entry| entry.and_then(|op| self.apply(&op)))
            .collect();
        PatchReport {
            outcomes,
            found_blocks: true,
        }
    }

    pub fn apply(&self, op: &PatchOperation) -> OpOutcome {
        let shown = op.filepath.as_str();
        let path = self.root.join(&op.filepath);
        let text = op.new_text.as_deref().unwrap_or_default();
        let anchor = op.old_text.as_deref();
        let outcome = match op.kind {
            PatchOpKind::Create => create_file(&path, shown, text),
            PatchOpKind::Update => edit_file(&path, shown, op.kind, anchor, "Updated text in", |content, anchor| {
                content.replace(anchor, text)
            }),
            PatchOpKind::InsertBefore => {
                edit_file(&path, shown, op.kind, anchor, "Inserted text before marker in", |content, anchor| {
                    content.replace(anchor, &format!("{text}{anchor}"))
                })
            }
            PatchOpKind::InsertAfter => {
                edit_file(&path, shown, op.kind, anchor, "Inserted text after marker in", |content, anchor| {
                    content.replace(anchor, &format!("{anchor}{text}"))
                })
            }
            PatchOpKind::Delete => edit_file(&path, shown, op.kind, anchor, "Deleted text from", |content, anchor| {
                content.replace(anchor, "")
            }),
        };
        match &outcome {
            Ok(msg) => tracing::debug!(path = shown, "{msg}"),
            Err(err) => tracing::debug!(path = shown, error = %err, "patch operation failed"),
        }
        outcome
    }
}

fn create_file(path: &Path, shown: &str, content: &str) -> OpOutcome {
    if path.exists() {
        return Err(PatchOpError::FileExists { path: shown.to_string() });
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PatchOpError::io("create", shown, e))?;
    }
    fs::write(path, content).map_err(|e| PatchOpError::io("create", shown, e))?;
    Ok(format!("Created file: {shown}"))
}

/// Rewrite every occurrence of `anchor` with `rewrite` after taking a backup.
fn edit_file(
    path: &Path,
    shown: &str,
    kind: PatchOpKind,
    anchor: Option<&str>,
    done: &str,
    rewrite: impl FnOnce(&str, &str) -> String,
) -> OpOutcome {
    if !path.is_file() {
        return Err(PatchOpError::FileMissing { path: shown.to_string() });
    }
    let anchor = anchor
        .filter(|a| !a.is_empty())
        .ok_or_else(|| PatchOpError::MissingAnchor { kind, path: shown.to_string() })?;

    let content = fs::read_to_string(path).map_err(|e| PatchOpError::io("read", shown, e))?;
    let occurrences = content.matches(anchor).count();
    if occurrences == 0 {
        return Err(PatchOpError::AnchorNotFound {
            kind,
            path: shown.to_string(),
            anchor: anchor.to_string(),
        });
    }

    backup_file(path, shown)?;
    fs::write(path, rewrite(&content, anchor)).map_err(|e| PatchOpError::io(kind.verb(), shown, e))?;

    let message = format!("{done}: {shown}");
    if occurrences > 1 {
        tracing::warn!(path = shown, occurrences, "anchor matched more than once; all occurrences were changed");
        Ok(format!("{message} ({occurrences} occurrences)"))
    } else {
        Ok(message)
    }
}

/// Copy `path` to `<path>.<YYYYMMDDHHMMSS>.bak`.
fn backup_file(path: &Path, shown: &str) -> Result<PathBuf, PatchOpError> {
    let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{stamp}.bak"));
    let backup = PathBuf::from(name);
    fs::copy(path, &backup).map_err(|source| PatchOpError::BackupFailed {
        path: shown.to_string(),
        source,
    })?;
    tracing::info!("Created backup: {}", backup.display());
    Ok(backup)
}
