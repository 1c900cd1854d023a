//! Line-oriented parser for the patch document format.
//!
//! ```text
//! *** Begin Patch
//! *** update: src/lib.rs
//! old_text:
//! fn old() {}
//! new_text:
//! fn new() {}
//! *** End Patch
//! ```

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::PatchOpError;

static BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\*\*\* Begin Patch\r?\n([\s\S]*?)\r?\n\*\*\* End Patch").expect("valid block regex")
});

const HEADER_PREFIX: &str = "*** ";
const OLD_TEXT_MARKER: &str = "old_text:";
const NEW_TEXT_MARKER: &str = "new_text:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOpKind {
    Create,
    Update,
    InsertBefore,
    InsertAfter,
    Delete,
}

impl PatchOpKind {
    pub fn from_verb(verb: &str) -> Option<Self> {
        match verb {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "insert_before" => Some(Self::InsertBefore),
            "insert_after" => Some(Self::InsertAfter),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn verb(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::InsertBefore => "insert_before",
            Self::InsertAfter => "insert_after",
            Self::Delete => "delete",
        }
    }

    /// Wording used when the anchor cannot be located.
    pub fn anchor_label(self) -> &'static str {
        match self {
            Self::Create => "text for create",
            Self::Update => "text to update",
            Self::InsertBefore => "marker text for insert_before",
            Self::InsertAfter => "marker text for insert_after",
            Self::Delete => "text to delete",
        }
    }

    fn takes_new_text(self) -> bool {
        !matches!(self, Self::Delete)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOperation {
    pub kind: PatchOpKind,
    pub filepath: String,
    /// Anchor for everything but `create`.
    pub old_text: Option<String>,
    /// File content for `create`, replacement or insertion text otherwise.
    pub new_text: Option<String>,
}

/// One `*** Begin Patch` .. `*** End Patch` span. Headers with an unknown
/// verb are kept in place as errors so the report stays in document order.
#[derive(Debug, Default)]
pub struct PatchBlock {
    pub entries: Vec<Result<PatchOperation, PatchOpError>>,
}

#[derive(Debug, Default)]
pub struct PatchDocument {
    pub blocks: Vec<PatchBlock>,
}

impl PatchDocument {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

pub fn parse_document(text: &str) -> PatchDocument {
    let blocks = BLOCK_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| parse_block(m.as_str()))
        .collect();
    PatchDocument { blocks }
}

fn is_header(line: &str) -> bool {
    line.starts_with(HEADER_PREFIX) && line.contains(':')
}

fn is_marker(line: &str, marker: &str) -> bool {
    line.trim() == marker
}

pub fn parse_block(body: &str) -> PatchBlock {
    let lines: Vec<&str> = body.lines().collect();
    let mut entries = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        i += 1;
        if !is_header(line) {
            continue;
        }
        let Some((verb, path)) = line[HEADER_PREFIX.len()..].split_once(':') else {
            continue;
        };
        let verb = verb.trim().to_lowercase();
        let filepath = path.trim().to_string();

        let Some(kind) = PatchOpKind::from_verb(&verb) else {
            entries.push(Err(PatchOpError::UnknownOperation { verb }));
            continue;
        };

        if kind == PatchOpKind::Create {
            let start = i;
            while i < lines.len() && !lines[i].starts_with(HEADER_PREFIX) {
                i += 1;
            }
            entries.push(Ok(PatchOperation {
                kind,
                filepath,
                old_text: None,
                new_text: Some(lines[start..i].join("\n")),
            }));
            continue;
        }

        let old_text = take_section(&lines, &mut i, OLD_TEXT_MARKER, Some(NEW_TEXT_MARKER));
        let new_text = if kind.takes_new_text() {
            take_section(&lines, &mut i, NEW_TEXT_MARKER, None)
        } else {
            None
        };
        entries.push(Ok(PatchOperation {
            kind,
            filepath,
            old_text,
            new_text,
        }));
    }

    PatchBlock { entries }
}

/// Seek `marker` without crossing the next header, then collect lines up to
/// the next header or `stop` marker.
fn take_section(lines: &[&str], i: &mut usize, marker: &str, stop: Option<&str>) -> Option<String> {
    while *i < lines.len() && !lines[*i].starts_with(HEADER_PREFIX) && !is_marker(lines[*i], marker) {
        *i += 1;
    }
    if *i >= lines.len() || !is_marker(lines[*i], marker) {
        return None;
    }
    *i += 1;
    let start = *i;
    while *i < lines.len()
        && !lines[*i].starts_with(HEADER_PREFIX)
        && !stop.is_some_and(|s| is_marker(lines[*i], s))
    {
        *i += 1;
    }
    Some(lines[start..*i].join("\n"))
}
