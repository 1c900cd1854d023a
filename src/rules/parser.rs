use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

static FILE_REF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|[^\w])@([\w.-]+\.\w+)").expect("valid file reference regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleType {
    /// Always spliced into the system prompt.
    Always,
    /// Applied when a mentioned file matches one of the rule's globs.
    AutoAttached,
    /// Listed by description so the model can ask for it.
    AgentRequested,
    /// Only applied when the user writes `@RuleName`.
    Manual,
}

#[derive(Debug, Clone)]
pub struct ProjectRule {
    /// File stem of the `.mdc` file.
    pub name: String,
    pub path: PathBuf,
    pub rule_type: RuleType,
    /// Body after the front matter.
    pub raw_content: String,
    pub description: Option<String>,
    pub globs: Vec<String>,
    pub always_apply: bool,
    /// `@file.ext` references, relative to the rule file.
    pub referenced_files: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Globs {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Default, Deserialize)]
struct FrontMatter {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    globs: Option<Globs>,
    #[serde(default, rename = "alwaysApply")]
    always_apply: bool,
}

impl FrontMatter {
    fn glob_list(&self) -> Vec<String> {
        let raw: Vec<&str> = match &self.globs {
            None => Vec::new(),
            Some(Globs::One(s)) => s.split(',').collect(),
            Some(Globs::Many(v)) => v.iter().map(String::as_str).collect(),
        };
        raw.into_iter()
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Split `---` delimited front matter from the body. Without two `---`
/// lines the whole text is body.
fn split_front_matter(content: &str) -> (&str, &str) {
    let mut dashes = Vec::with_capacity(2);
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        if line.trim() == "---" {
            dashes.push((offset, offset + line.len()));
            if dashes.len() == 2 {
                break;
            }
        }
        offset += line.len();
    }
    match dashes.as_slice() {
        [(_, fm_start), (fm_end, body_start)] => (&content[*fm_start..*fm_end], &content[*body_start..]),
        _ => ("", content),
    }
}

fn parse_front_matter(yaml: &str, path: &Path) -> FrontMatter {
    if yaml.trim().is_empty() {
        tracing::warn!(path = %path.display(), "front matter header not found");
        return FrontMatter::default();
    }
    match serde_yaml::from_str::<serde_yaml::Value>(yaml) {
        Ok(value @ serde_yaml::Value::Mapping(_)) => serde_yaml::from_value(value).unwrap_or_else(|err| {
            tracing::error!(path = %path.display(), error = %err, "unexpected front matter fields");
            FrontMatter::default()
        }),
        Ok(_) => {
            tracing::error!(path = %path.display(), "front matter YAML is not a mapping");
            FrontMatter::default()
        }
        Err(err) => {
            tracing::error!(path = %path.display(), error = %err, "YAML parsing error");
            FrontMatter::default()
        }
    }
}

pub fn file_references(body: &str) -> Vec<String> {
    FILE_REF_RE
        .captures_iter(body)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

pub fn parse_rule_str(content: &str, path: &Path, name: &str) -> ProjectRule {
    let (yaml, body) = split_front_matter(content);
    let meta = parse_front_matter(yaml, path);
    let globs = meta.glob_list();
    let description = meta.description.filter(|d| !d.trim().is_empty());

    let rule_type = if meta.always_apply {
        RuleType::Always
    } else if !globs.is_empty() {
        RuleType::AutoAttached
    } else if description.is_some() {
        RuleType::AgentRequested
    } else {
        RuleType::Manual
    };

    ProjectRule {
        name: name.to_string(),
        path: path.to_path_buf(),
        rule_type,
        raw_content: body.to_string(),
        description,
        globs,
        always_apply: meta.always_apply,
        referenced_files: file_references(body),
    }
}

pub fn parse_rule(path: &Path) -> Result<ProjectRule> {
    let content = std::fs::read_to_string(path).with_context(|| format!("read rule file {}", path.display()))?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(parse_rule_str(&content, path, &name))
}
