//! `bash -c` execution for the `bash` tool.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;

pub const APPLY_PATCH_BIN: &str = "apply_patch";
pub const DEFAULT_BASH_TIMEOUT: Duration = Duration::from_secs(10);
pub const APPLY_PATCH_MISSING: &str = "[error] apply_patch script not found or not executable.";

static APPLY_PATCH_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bapply_patch\b").expect("valid apply_patch regex"));

#[derive(Debug, Clone)]
pub struct BashConfig {
    pub cwd: PathBuf,
    pub timeout: Duration,
    /// Absolute path substituted for `apply_patch` in commands.
    pub apply_patch: Option<PathBuf>,
}

impl BashConfig {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            timeout: DEFAULT_BASH_TIMEOUT,
            apply_patch: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_apply_patch(mut self, path: Option<PathBuf>) -> Self {
        self.apply_patch = path;
        self
    }
}

/// Locate the `apply_patch` binary: next to the running executable first,
/// then on `PATH`.
pub fn discover_apply_patch(current_exe: Option<&Path>) -> Option<PathBuf> {
    let sibling = current_exe
        .and_then(Path::parent)
        .map(|dir| dir.join(APPLY_PATCH_BIN))
        .filter(|p| is_executable(p));
    sibling.or_else(|| which::which(APPLY_PATCH_BIN).ok())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[derive(Debug, Clone)]
pub struct BashExecutor {
    config: BashConfig,
}

impl BashExecutor {
    pub fn new(config: BashConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BashConfig {
        &self.config
    }

    /// Rewrite `apply_patch` to the configured absolute path. Single-quoted
    /// text, such as a piped patch body, is left alone.
    pub fn prepare(&self, command: &str) -> Result<String, &'static str> {
        let spans = unquoted_spans(command);
        if !spans.iter().any(|&(start, end)| APPLY_PATCH_WORD.is_match(&command[start..end])) {
            return Ok(command.to_string());
        }
        let Some(path) = &self.config.apply_patch else {
            return Err(APPLY_PATCH_MISSING);
        };
        let replacement = path.to_string_lossy();
        let mut out = String::with_capacity(command.len() + replacement.len());
        let mut last = 0;
        for (start, end) in spans {
            out.push_str(&command[last..start]);
            out.push_str(&APPLY_PATCH_WORD.replace_all(&command[start..end], regex::NoExpand(&replacement)));
            last = end;
        }
        out.push_str(&command[last..]);
        Ok(out)
    }

    /// Run `command` and format its result for the model.
    pub async fn run(&self, command: &str) -> String {
        let command = match self.prepare(command) {
            Ok(command) => command,
            Err(msg) => return msg.to_string(),
        };
        tracing::debug!(%command, "running bash");

        let child = Command::new("bash")
            .arg("-c")
            .arg(&command)
            .current_dir(&self.config.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(err) => return format!("Error executing command: {err}"),
        };

        match tokio::time::timeout(self.config.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let code = output
                    .status
                    .code()
                    .map_or_else(|| "signal".to_string(), |c| c.to_string());
                format!(
                    "STDOUT:\n{}\nSTDERR:\n{}\nEXIT CODE: {}",
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr),
                    code
                )
            }
            Ok(Err(err)) => format!("Error executing command: {err}"),
            Err(_) => format!("Error: Command timed out after {} seconds", self.config.timeout.as_secs()),
        }
    }
}

/// Byte ranges of `command` that sit outside single quotes.
fn unquoted_spans(command: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (i, ch) in command.char_indices() {
        if quoted {
            if ch == '\'' {
                quoted = false;
                start = i + 1;
            }
        } else if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == '\'' {
            spans.push((start, i));
            quoted = true;
        }
    }
    if !quoted {
        spans.push((start, command.len()));
    }
    spans
}
