use std::collections::HashSet;
use std::path::{Path, PathBuf};

use regex::Regex;
use wildmatch::WildMatch;

use super::parser::{ProjectRule, RuleType, parse_rule};

const SKIP_DIRS: &[&str] = &[".git", "node_modules", "target", ".venv", "__pycache__"];

/// Project rules found under `.cursor/rules/` directories.
#[derive(Debug, Default)]
pub struct RuleManager {
    root: PathBuf,
    rules: Vec<ProjectRule>,
}

impl RuleManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            rules: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn with_rules(root: impl Into<PathBuf>, rules: Vec<ProjectRule>) -> Self {
        Self {
            root: root.into(),
            rules,
        }
    }

    pub fn rules(&self) -> &[ProjectRule] {
        &self.rules
    }

    /// Walk the project root and parse every `.cursor/rules/*.mdc`. Returns
    /// the number of rules loaded.
    pub fn load_rules(&mut self) -> usize {
        let mut files = Vec::new();
        collect_rule_files(&self.root, &mut files);
        files.sort();
        for path in files {
            match parse_rule(&path) {
                Ok(rule) => {
                    tracing::debug!(name = %rule.name, kind = ?rule.rule_type, always = rule.always_apply, "loaded rule");
                    self.rules.push(rule);
                }
                Err(err) => tracing::error!(error = %err, "skipping rule"),
            }
        }
        self.rules.len()
    }

    /// Rule body with each `@file` reference replaced by that file's content,
    /// or by a placeholder when it cannot be read.
    pub fn resolve_rule_content(&self, rule: &ProjectRule) -> String {
        let base = rule.path.parent().unwrap_or_else(|| Path::new("."));
        let mut resolved = rule.raw_content.clone();
        for reference in &rule.referenced_files {
            let replacement = match std::fs::read_to_string(base.join(reference)) {
                Ok(content) => content,
                Err(err) => {
                    tracing::warn!(rule = %rule.name, file = %reference, error = %err, "referenced file not found");
                    format!("[Content of '{reference}' not found]")
                }
            };
            let pattern = format!(r"(^|[^\w])@{}\b", regex::escape(reference));
            let Ok(re) = Regex::new(&pattern) else {
                continue;
            };
            resolved = re
                .replace_all(&resolved, |caps: &regex::Captures<'_>| format!("{}{}", &caps[1], replacement))
                .into_owned();
        }
        resolved
    }

    /// `(name, description)` of rules the user or model may ask for.
    pub fn agent_rules_info(&self) -> Vec<(String, String)> {
        self.rules
            .iter()
            .filter(|r| matches!(r.rule_type, RuleType::AgentRequested | RuleType::Manual))
            .filter_map(|r| r.description.clone().map(|d| (r.name.clone(), d)))
            .collect()
    }

    /// Any rule that is not always applied can be invoked by name.
    pub fn manual_rule(&self, name: &str) -> Option<&ProjectRule> {
        self.rules
            .iter()
            .find(|r| r.name == name && r.rule_type != RuleType::Always)
    }

    /// Always-applied rules, then auto-attached rules whose globs match one
    /// of `files`.
    pub fn applicable_rules(&self, files: &[String]) -> Vec<&ProjectRule> {
        let mut seen: HashSet<(&str, &Path)> = HashSet::new();
        let mut applicable = Vec::new();

        for rule in self.rules.iter().filter(|r| r.rule_type == RuleType::Always) {
            if seen.insert((rule.name.as_str(), rule.path.as_path())) {
                applicable.push(rule);
            }
        }
        for rule in self.rules.iter().filter(|r| r.rule_type == RuleType::AutoAttached) {
            let matched = rule.globs.iter().any(|glob| {
                let pattern = WildMatch::new(glob);
                files.iter().any(|f| pattern.matches(f))
            });
            if matched && seen.insert((rule.name.as_str(), rule.path.as_path())) {
                applicable.push(rule);
            }
        }
        applicable
    }
}

fn collect_rule_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let is_rules_dir = dir.file_name().is_some_and(|n| n == "rules")
        && dir
            .parent()
            .and_then(Path::file_name)
            .is_some_and(|n| n == ".cursor");

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(kind) = entry.file_type() else {
            continue;
        };
        if kind.is_dir() {
            let skip = entry
                .file_name()
                .to_str()
                .is_some_and(|n| SKIP_DIRS.contains(&n));
            if !skip {
                collect_rule_files(&path, out);
            }
        } else if is_rules_dir && path.extension().is_some_and(|e| e == "mdc") {
            out.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, content).expect("write");
    }

    fn fixture() -> (tempfile::TempDir, RuleManager) {
        let dir = tempdir().expect("tempdir");
        let root = dir.path();
        write(root, ".cursor/rules/always.mdc", "---\nalwaysApply: true\n---\nBe concise.\n");
        write(root, ".cursor/rules/python.mdc", "---\nglobs: \"*.py\"\n---\nFollow @style.md please.\n");
        write(root, ".cursor/rules/style.md", "PEP 8");
        write(root, ".cursor/rules/review.mdc", "---\ndescription: Code review checklist\n---\nCheck @missing.md\n");
        write(root, ".cursor/rules/secret.mdc", "no front matter\n");
        write(root, "pkg/.cursor/rules/nested.mdc", "---\ndescription: Nested rule\n---\nnested\n");
        write(root, "node_modules/.cursor/rules/ignored.mdc", "---\nalwaysApply: true\n---\nignored\n");
        write(root, ".cursor/notes.mdc", "---\nalwaysApply: true\n---\nnot in rules dir\n");
        let mut manager = RuleManager::new(root);
        manager.load_rules();
        (dir, manager)
    }

    fn names<'a>(rules: impl IntoIterator<Item = &'a ProjectRule>) -> Vec<&'a str> {
        rules.into_iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn discovers_rules_in_nested_directories() {
        let (_dir, manager) = fixture();
        let mut found = names(manager.rules());
        found.sort();
        assert_eq!(found, ["always", "nested", "python", "review", "secret"]);
    }

    #[test]
    fn applies_always_and_matching_globs() {
        let (_dir, manager) = fixture();
        assert_eq!(names(manager.applicable_rules(&[])), ["always"]);
        assert_eq!(
            names(manager.applicable_rules(&["src/main.py".to_string(), "README.md".to_string()])),
            ["always", "python"]
        );
    }

    #[test]
    fn resolves_references_with_placeholder() {
        let (_dir, manager) = fixture();
        let python = manager.manual_rule("python").expect("python rule");
        assert_eq!(manager.resolve_rule_content(python), "Follow PEP 8 please.\n");
        let review = manager.manual_rule("review").expect("review rule");
        assert_eq!(manager.resolve_rule_content(review), "Check [Content of 'missing.md' not found]\n");
    }

    #[test]
    fn manual_lookup_and_agent_info() {
        let (_dir, manager) = fixture();
        assert!(manager.manual_rule("always").is_none());
        assert!(manager.manual_rule("secret").is_some());
        assert!(manager.manual_rule("unknown").is_none());
        let mut info = manager.agent_rules_info();
        info.sort();
        assert_eq!(
            info,
            [
                ("nested".to_string(), "Nested rule".to_string()),
                ("review".to_string(), "Code review checklist".to_string()),
            ]
        );
    }
}
