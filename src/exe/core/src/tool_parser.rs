//! Extraction of tool calls a model wrote into its free-text reply.
//!
//! Recognized forms, in precedence order:
//! 1. `apply_patch` followed by a `*** Begin Patch` .. `*** End Patch` block,
//!    turned into a `bash` call that pipes the block into `apply_patch`;
//! 2. `<tool_call>...</tool_call>` spans;
//! 3. fenced code blocks holding JSON;
//! 4. the whole remaining text when it is bare JSON;
//! 5. a last-resort scan for embedded JSON objects.
//!
//! Accepted JSON shapes are `{"function": {"name", "arguments"}}`,
//! `{"name", "arguments"}`, `{"tool_calls": [...]}` and arrays of these.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::protocol::ToolArguments;

static APPLY_PATCH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^apply_patch\r?\n(\*\*\* Begin Patch\r?\n[\s\S]*?\r?\n\*\*\* End Patch)(?:\r?\n|$)")
        .expect("valid apply_patch regex")
});

static TOOL_CALL_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<tool_call>([\s\S]*?)</tool_call>").expect("valid tool_call tag regex"));

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:[a-zA-Z0-9_]+)?\s*([\s\S]+?)\s*```").expect("valid fence regex"));

static LEADING_COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)^<!--.*?-->\s*").expect("valid comment regex"));
static TRAILING_COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\s*<!--.*?-->$").expect("valid comment regex"));

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
    pub name: String,
    pub arguments: ToolArguments,
}

/// Every tool call found in `text`, left to right.
pub fn extract_tool_calls(text: &str) -> Vec<ParsedToolCall> {
    let mut found: Vec<(usize, ParsedToolCall)> = Vec::new();
    let mut segments: Vec<(usize, &str)> = Vec::new();

    let mut cursor = 0;
    for caps in APPLY_PATCH_RE.captures_iter(text) {
        let (Some(whole), Some(block)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if whole.start() > cursor {
            segments.push((cursor, &text[cursor..whole.start()]));
        }
        found.push((whole.start(), patch_invocation(block.as_str())));
        cursor = whole.end();
    }
    if cursor < text.len() {
        segments.push((cursor, &text[cursor..]));
    }

    let mut json_found = Vec::new();
    for &(base, segment) in &segments {
        if !segment.trim().is_empty() {
            extract_tagged(segment, base, &mut json_found);
        }
    }
    if found.is_empty() && json_found.is_empty() {
        for &(base, segment) in &segments {
            scan_embedded(segment, base, &mut json_found);
        }
    }

    found.extend(json_found);
    found.sort_by_key(|(offset, _)| *offset);
    found.into_iter().map(|(_, call)| call).collect()
}

/// Wrap a raw patch block as `echo '<block>' | apply_patch`.
pub fn patch_invocation(block: &str) -> ParsedToolCall {
    let escaped = block.replace('\'', r"'\''");
    let mut args = Map::new();
    args.insert("command".to_string(), Value::String(format!("echo '{escaped}' | apply_patch")));
    ParsedToolCall {
        name: "bash".to_string(),
        arguments: ToolArguments::Mapping(args),
    }
}

fn extract_tagged(text: &str, base: usize, out: &mut Vec<(usize, ParsedToolCall)>) {
    let mut cursor = 0;
    for caps in TOOL_CALL_TAG_RE.captures_iter(text) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        extract_fenced(&text[cursor..whole.start()], base + cursor, out);

        let mut inner_calls = Vec::new();
        extract_fenced(inner.as_str(), base + inner.start(), &mut inner_calls);
        if inner_calls.is_empty() {
            scan_embedded(inner.as_str(), base + inner.start(), &mut inner_calls);
        }
        out.extend(inner_calls);
        cursor = whole.end();
    }
    extract_fenced(&text[cursor..], base + cursor, out);
}

fn extract_fenced(text: &str, base: usize, out: &mut Vec<(usize, ParsedToolCall)>) {
    let mut any_fence = false;
    for caps in FENCE_RE.captures_iter(text) {
        any_fence = true;
        if let Some(body) = caps.get(1) {
            parse_candidate(body.as_str(), base + body.start(), out);
        }
    }
    if !any_fence {
        let trimmed = text.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            parse_candidate(text, base + (text.len() - trimmed.len()), out);
        }
    }
}

fn parse_candidate(candidate: &str, offset: usize, out: &mut Vec<(usize, ParsedToolCall)>) {
    let cleaned = LEADING_COMMENT_RE.replace(candidate.trim(), "");
    let cleaned = TRAILING_COMMENT_RE.replace(&cleaned, "");
    match serde_json::from_str::<Value>(&cleaned) {
        Ok(value) => out.extend(calls_from_value(value).into_iter().map(|c| (offset, c))),
        Err(_) => scan_embedded(candidate, offset, out),
    }
}

/// Walk `text` and decode a JSON value at every `{` or `[` that starts one.
fn scan_embedded(text: &str, base: usize, out: &mut Vec<(usize, ParsedToolCall)>) {
    let mut i = 0;
    while i < text.len() {
        let Some(rel) = text[i..].find(['{', '[']) else {
            break;
        };
        let start = i + rel;
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) => {
                let calls = calls_from_value(value);
                if calls.is_empty() {
                    i = start + 1;
                } else {
                    out.extend(calls.into_iter().map(|c| (base + start, c)));
                    i = start + stream.byte_offset();
                }
            }
            _ => i = start + 1,
        }
    }
}

fn calls_from_value(value: Value) -> Vec<ParsedToolCall> {
    match value {
        Value::Array(items) => items.into_iter().flat_map(calls_from_value).collect(),
        Value::Object(mut obj) => {
            if let Some(Value::Array(items)) = obj.remove("tool_calls") {
                return items.into_iter().flat_map(calls_from_value).collect();
            }
            if let Some(Value::Object(function)) = obj.get("function") {
                if let Some(call) = call_from_object(function.clone()) {
                    return vec![call];
                }
            }
            call_from_object(obj).into_iter().collect()
        }
        _ => Vec::new(),
    }
}

fn call_from_object(mut obj: Map<String, Value>) -> Option<ParsedToolCall> {
    let name = match obj.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
        _ => return None,
    };
    let arguments = obj.remove("arguments")?;
    Some(ParsedToolCall {
        name,
        arguments: ToolArguments::from_value(arguments),
    })
}
