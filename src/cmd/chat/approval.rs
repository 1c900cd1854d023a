use std::io::{BufRead, Write};

use terminaut_core::handler::{Approver, AutoApprove};

#[derive(Debug, PartialEq, Eq)]
enum Answer {
    Yes,
    No,
    Unclear,
}

fn parse_answer(raw: &str) -> Answer {
    match raw.trim().to_lowercase().as_str() {
        "y" | "yes" => Answer::Yes,
        "n" | "no" | "" => Answer::No,
        _ => Answer::Unclear,
    }
}

/// Terminal approval gate. It owns the session's input so the REPL reads
/// user lines through the same reader it uses for `[y/N]` answers.
pub struct PromptApprover<R, W> {
    input: R,
    output: W,
    auto: Option<AutoApprove>,
}

impl<R: BufRead, W: Write> PromptApprover<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            auto: None,
        }
    }

    /// Approve every request without asking (`--yes`).
    pub fn auto(input: R, output: W) -> Self {
        Self {
            input,
            output,
            auto: Some(AutoApprove),
        }
    }

    pub fn input_mut(&mut self) -> &mut R {
        &mut self.input
    }

    fn ask(&mut self, action: &str) -> std::io::Result<bool> {
        loop {
            write!(self.output, "[approval] Approve execution of {action}? [y/N]: ")?;
            self.output.flush()?;
            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                writeln!(self.output)?;
                return Ok(false);
            }
            match parse_answer(&line) {
                Answer::Yes => return Ok(true),
                Answer::No => return Ok(false),
                Answer::Unclear => writeln!(self.output, "[approval] Please answer 'y' or 'n'.")?,
            }
        }
    }
}

impl<R: BufRead, W: Write> Approver for PromptApprover<R, W> {
    fn approve(&mut self, tool: &str, action: &str) -> bool {
        let approved = match self.auto.as_mut() {
            Some(auto) => auto.approve(tool, action),
            None => self.ask(action).unwrap_or_else(|err| {
                tracing::error!(error = %err, "approval prompt failed");
                false
            }),
        };
        tracing::info!(tool, approved, "approval decision");
        if let Err(err) = writeln!(
            self.output,
            "[tool_call] User {} execution of: {}",
            if approved { "approved" } else { "denied" },
            action.lines().next().unwrap_or("")
        ) {
            tracing::error!(error = %err, "cannot report approval decision");
        }
        approved
    }
}
