//! Approval gate and dispatch for unified tool calls.

use terminaut_apply_patch::PatchInterpreter;

use crate::bash::BashExecutor;
use crate::openai_tools::{APPLY_PATCH_TOOL, BASH_TOOL};
use crate::protocol::{Message, UnifiedToolCall};

pub const SKIPPED_BY_USER: &str = "Command execution skipped by user.";
pub const MISSING_COMMAND: &str = "Error: Missing or invalid command input";
pub const MISSING_PATCH: &str = "Error: Missing or invalid patch_content input";

/// Decides whether a side-effecting tool call may run.
pub trait Approver {
    /// `action` is the command line or patch text about to be applied.
    fn approve(&mut self, tool: &str, action: &str) -> bool;
}

/// Approves everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

impl Approver for AutoApprove {
    fn approve(&mut self, tool: &str, _action: &str) -> bool {
        tracing::debug!(tool, "auto-approved");
        true
    }
}

pub struct ToolRouter<A> {
    bash: BashExecutor,
    patcher: PatchInterpreter,
    approver: A,
    runtime: tokio::runtime::Runtime,
}

impl<A: Approver> ToolRouter<A> {
    pub fn new(bash: BashExecutor, patcher: PatchInterpreter, approver: A) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            bash,
            patcher,
            approver,
            runtime,
        })
    }

    pub fn approver_mut(&mut self) -> &mut A {
        &mut self.approver
    }

    /// Run one call and wrap its result as a tool message keyed by the call id.
    pub fn handle(&mut self, call: &UnifiedToolCall) -> Message {
        let content = match call.name.as_str() {
            BASH_TOOL => match call.str_arg("command") {
                Some(command) if self.approver.approve(BASH_TOOL, command) => {
                    self.runtime.block_on(self.bash.run(command))
                }
                Some(_) => SKIPPED_BY_USER.to_string(),
                None => {
                    tracing::error!(id = %call.id, "bash call without a command");
                    MISSING_COMMAND.to_string()
                }
            },
            APPLY_PATCH_TOOL => match call.str_arg("patch_content") {
                Some(patch) if self.approver.approve(APPLY_PATCH_TOOL, patch) => self.patcher.execute(patch).render(),
                Some(_) => SKIPPED_BY_USER.to_string(),
                None => {
                    tracing::error!(id = %call.id, "apply_patch call without patch_content");
                    MISSING_PATCH.to_string()
                }
            },
            other => {
                tracing::error!(tool = other, "unsupported tool");
                format!("Error: Unsupported tool: {other}")
            }
        };
        Message::tool(call.id.clone(), content)
    }
}
