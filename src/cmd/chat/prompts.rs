use std::collections::HashSet;

use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use terminaut_apply_patch::APPLY_PATCH_TOOL_INSTRUCTIONS;
use terminaut_core::{Message, Role, SystemPromptSource};

use crate::rules::{ProjectRule, RuleManager};

static TEMPLATE_VAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("valid template regex"));
static CONTEXT_FILE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([./\w-]+\.\w+)\b").expect("valid file mention regex"));

const BASE_PROMPT: &str = "You are a terminal coding assistant working in the user's current directory.
Today is {{weekday}}, {{date}}; the local time is {{time}}.

You can run shell commands with the `bash` tool. Every command is shown to the user, who may refuse it.
Prefer small, inspectable steps: look before you change, and report what a command did.
Keep answers short unless the user asks for detail.";

/// Built-in base prompt, including how to use `apply_patch`.
pub fn default_base_prompt() -> String {
    format!("{BASE_PROMPT}\n\n{APPLY_PATCH_TOOL_INSTRUCTIONS}")
}

/// Replace `{{date}}`, `{{time}}` and `{{weekday}}`. Unknown variables are
/// left as written.
pub fn expand_template(text: &str, now: DateTime<Local>) -> String {
    TEMPLATE_VAR_RE
        .replace_all(text, |caps: &Captures<'_>| match &caps[1] {
            "date" => now.format("%Y-%m-%d").to_string(),
            "time" => now.format("%H:%M:%S").to_string(),
            "weekday" => now.format("%A").to_string(),
            _ => caps[0].to_string(),
        })
        .into_owned()
}

/// File names mentioned in the most recent user message of `inbound`.
pub fn active_context_files(inbound: &[Message]) -> Vec<String> {
    let Some(latest) = inbound
        .iter()
        .rev()
        .find(|m| m.role == Role::User && !m.text().is_empty())
    else {
        return Vec::new();
    };
    CONTEXT_FILE_RE
        .captures_iter(latest.text())
        .map(|c| c[1].to_string())
        .collect()
}

/// Assembles the system prompt for each turn from the base prompt and the
/// project rules that apply to it.
pub struct PromptConstructor {
    base: String,
    rules: Option<RuleManager>,
    agent_rules_info: String,
    manual_rules: Vec<String>,
}

impl PromptConstructor {
    pub fn new(base: impl Into<String>, rules: Option<RuleManager>) -> Self {
        let agent_rules_info = rules.as_ref().map(agent_rules_section).unwrap_or_default();
        Self {
            base: base.into(),
            rules,
            agent_rules_info,
            manual_rules: Vec::new(),
        }
    }

    /// Remember a `@RuleName` invocation for every later turn. Returns false
    /// when no invokable rule has that name.
    pub fn invoke_manual_rule(&mut self, name: &str) -> bool {
        let Some(rules) = &self.rules else {
            return false;
        };
        if rules.manual_rule(name).is_none() {
            return false;
        }
        if !self.manual_rules.iter().any(|n| n == name) {
            self.manual_rules.push(name.to_string());
        }
        true
    }

    pub fn build(&self, inbound: &[Message], now: DateTime<Local>) -> String {
        let mut parts = vec![expand_template(self.base.trim_end(), now)];
        let Some(manager) = &self.rules else {
            return parts.join("\n");
        };

        let files = active_context_files(inbound);
        let mut applied: Vec<&ProjectRule> = manager.applicable_rules(&files);
        let mut seen: HashSet<(String, std::path::PathBuf)> =
            applied.iter().map(|r| (r.name.clone(), r.path.clone())).collect();
        for rule in self.manual_rules.iter().filter_map(|n| manager.manual_rule(n)) {
            if seen.insert((rule.name.clone(), rule.path.clone())) {
                applied.push(rule);
            }
        }
        tracing::debug!(files = ?files, rules = ?applied.iter().map(|r| &r.name).collect::<Vec<_>>(), "rules applied");

        for rule in applied {
            let content = expand_template(&manager.resolve_rule_content(rule), now);
            parts.push(format!("\n\nApplied Project Rule: {}\n---\n{}\n---", rule.name, content));
        }
        if !self.agent_rules_info.is_empty() {
            parts.push(format!("\n{}", self.agent_rules_info));
        }
        parts.join("\n")
    }
}

impl SystemPromptSource for PromptConstructor {
    fn system_prompt(&mut self, inbound: &[Message]) -> String {
        self.build(inbound, Local::now())
    }
}

fn agent_rules_section(manager: &RuleManager) -> String {
    let info = manager.agent_rules_info();
    if info.is_empty() {
        return String::new();
    }
    let mut section = String::from("\nThe following project rules are available and can be manually invoked using @RuleName:\n");
    for (name, description) in info {
        section.push_str(&format!("- {name}: {description}\n"));
    }
    section.push_str("(Agent-requested rules will be considered by the assistant if relevant.)\n");
    section
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    use crate::rules::parse_rule_str;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 15, 9, 30, 5).single().expect("valid time")
    }

    fn rule(name: &str, content: &str) -> ProjectRule {
        parse_rule_str(content, &PathBuf::from(format!("/nowhere/.cursor/rules/{name}.mdc")), name)
    }

    fn manager() -> RuleManager {
        RuleManager::with_rules(
            "/nowhere",
            vec![
                rule("base", "---\nalwaysApply: true\n---\nToday is {{weekday}}."),
                rule("py", "---\nglobs: \"*.py\"\n---\nUse type hints."),
                rule("review", "---\ndescription: Review checklist\n---\nCheck tests."),
            ],
        )
    }

    #[test]
    fn expands_known_variables_only() {
        assert_eq!(
            expand_template("{{date}} {{time}} {{weekday}} {{unknown}}", now()),
            "2024-03-15 09:30:05 Friday {{unknown}}"
        );
    }

    #[test]
    fn context_files_come_from_latest_user_message() {
        let inbound = vec![
            Message::user("look at old.py"),
            Message::user("fix ./src/main.py and utils-2.js please"),
            Message::tool("call_1", "ran setup.py"),
        ];
        assert_eq!(active_context_files(&inbound), ["src/main.py", "utils-2.js"]);
        assert!(active_context_files(&[Message::tool("c", "x.py")]).is_empty());
    }

    #[test]
    fn plain_prompt_without_rules() {
        let prompts = PromptConstructor::new("Date {{date}}\n\n", None);
        assert_eq!(prompts.build(&[], now()), "Date 2024-03-15");
    }

    #[test]
    fn applies_always_matching_and_manual_rules() {
        let mut prompts = PromptConstructor::new("Base", Some(manager()));
        assert!(prompts.invoke_manual_rule("review"));
        assert!(!prompts.invoke_manual_rule("base"));
        assert!(!prompts.invoke_manual_rule("missing"));

        let built = prompts.build(&[Message::user("edit app.py")], now());
        let expected = [
            "Base",
            "\n\nApplied Project Rule: base\n---\nToday is Friday.\n---",
            "\n\nApplied Project Rule: py\n---\nUse type hints.\n---",
            "\n\nApplied Project Rule: review\n---\nCheck tests.\n---",
            "\n\nThe following project rules are available and can be manually invoked using @RuleName:\n- review: Review checklist\n(Agent-requested rules will be considered by the assistant if relevant.)\n",
        ]
        .join("\n");
        assert_eq!(built, expected);
    }

    #[test]
    fn glob_rules_need_a_matching_mention() {
        let prompts = PromptConstructor::new("Base", Some(manager()));
        let built = prompts.build(&[Message::user("hello")], now());
        assert!(built.contains("Applied Project Rule: base"));
        assert!(!built.contains("Applied Project Rule: py"));
        assert!(!built.contains("Applied Project Rule: review"));
    }
}
