pub mod approval;
pub mod console;
pub mod prompts;

use std::io::{self, StdinLock, Stdout};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use anyhow::{Context, Result};
use clap::Args;
use once_cell::sync::Lazy;
use regex::Regex;
use terminaut_apply_patch::PatchInterpreter;
use terminaut_core::bash::{BashConfig, BashExecutor, discover_apply_patch};
use terminaut_core::handler::{SKIPPED_BY_USER, ToolRouter};
use terminaut_core::openai_tools::default_tools;
use terminaut_core::{CancelFlag, Conversation, Message, TurnOptions, UnifiedToolCall};

use crate::common::network::OpenAiTransport;
use crate::config::{DEFAULT_BASE_URL, Overrides, load_config, resolve_from_env};
use crate::logging::init_logging;
use crate::rules::RuleManager;
use approval::PromptApprover;
use console::{Console, Tag};
use prompts::{PromptConstructor, default_base_prompt};

static RULE_MENTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|\s)@(\w[\w.-]*)").expect("valid rule mention regex"));

const EXIT_WORDS: &[&str] = &["exit", "quit", "/exit", "/quit"];

#[derive(Args, Debug, Default)]
pub struct ChatArgs {
    /// Model name (overrides OPENAI_MODEL and the stored config)
    #[arg(long)]
    pub model: Option<String>,
    /// Chat completions base URL, e.g. http://localhost:11434/v1
    #[arg(long)]
    pub base_url: Option<String>,
    /// Messages kept in the context window, including the system prompt (min 3)
    #[arg(long)]
    pub history_limit: Option<usize>,
    /// Wait for whole responses instead of streaming
    #[arg(long)]
    pub no_stream: bool,
    /// Read the base system prompt from a file
    #[arg(long, value_name = "FILE")]
    pub system_prompt: Option<PathBuf>,
    /// Run commands and patches without asking
    #[arg(long, short = 'y')]
    pub yes: bool,
    /// Write debug logs to .logs in the working directory
    #[arg(long)]
    pub debug: bool,
}

type Approval = PromptApprover<StdinLock<'static>, Stdout>;
type Session = Conversation<OpenAiTransport, PromptConstructor>;

/// `@Name` mentions that look like rule names rather than file names.
pub fn rule_mentions(input: &str) -> Vec<String> {
    RULE_MENTION_RE
        .captures_iter(input)
        .map(|c| c[1].trim_end_matches('.').to_string())
        .filter(|name| !name.contains('.'))
        .collect()
}

pub fn is_exit_command(input: &str) -> bool {
    EXIT_WORDS.contains(&input.trim().to_lowercase().as_str())
}

/// Answer every call of an interrupted turn so the next request stays valid.
pub fn skipped_results(calls: &[UnifiedToolCall]) -> Vec<Message> {
    calls
        .iter()
        .map(|c| Message::tool(c.id.clone(), SKIPPED_BY_USER))
        .collect()
}

fn load_rules(cwd: &Path, console: &mut Console) -> Option<RuleManager> {
    let mut manager = RuleManager::new(cwd);
    match manager.load_rules() {
        0 => None,
        n => {
            let names: Vec<&str> = manager.rules().iter().map(|r| r.name.as_str()).collect();
            console.info(&format!("Loaded {n} project rule(s): {}", names.join(", ")));
            Some(manager)
        }
    }
}

/// What the session is doing when Ctrl-C arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Model,
    Tools,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptAction {
    Exit,
    Cancel,
    ForceExit,
}

#[derive(Debug, Default)]
pub struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub fn set(&self, phase: Phase) {
        self.0.store(phase as u8, Ordering::SeqCst);
    }

    pub fn get(&self) -> Phase {
        match self.0.load(Ordering::SeqCst) {
            1 => Phase::Model,
            2 => Phase::Tools,
            _ => Phase::Idle,
        }
    }
}

/// Idle Ctrl-C ends the session. The first one during a turn cancels it and
/// a second one before the turn winds down exits.
pub fn interrupt_action(phase: Phase, already_cancelled: bool) -> InterruptAction {
    match (phase, already_cancelled) {
        (Phase::Idle, _) => InterruptAction::Exit,
        (_, true) => InterruptAction::ForceExit,
        (_, false) => InterruptAction::Cancel,
    }
}

fn spawn_interrupt_watcher(cancel: CancelFlag, phase: Arc<PhaseCell>) -> Result<tokio::runtime::Runtime> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .context("start signal runtime")?;
    runtime.spawn(async move {
        loop {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "cannot listen for Ctrl-C");
                return;
            }
            let current = phase.get();
            match interrupt_action(current, cancel.load(Ordering::SeqCst)) {
                InterruptAction::Exit => {
                    println!("\n[info] Exiting. Goodbye!");
                    std::process::exit(0);
                }
                InterruptAction::Cancel => {
                    tracing::info!(phase = ?current, "interrupt requested");
                    cancel.store(true, Ordering::SeqCst);
                    println!("\n[warning] Interrupting. Press Ctrl-C again to quit.");
                }
                InterruptAction::ForceExit => {
                    tracing::warn!(phase = ?current, "second interrupt; exiting");
                    println!("\n[info] Exiting. Goodbye!");
                    std::process::exit(130);
                }
            }
        }
    });
    Ok(runtime)
}

/// Run `calls` in order. Once `cancel` is set the rest are answered as
/// skipped.
pub fn answer_calls(
    calls: &[UnifiedToolCall],
    cancel: &CancelFlag,
    mut run: impl FnMut(&UnifiedToolCall) -> Message,
) -> Vec<Message> {
    calls
        .iter()
        .map(|call| {
            if cancel.load(Ordering::SeqCst) {
                Message::tool(call.id.clone(), SKIPPED_BY_USER)
            } else {
                run(call)
            }
        })
        .collect()
}

pub fn handle_chat(args: ChatArgs) -> Result<()> {
    let cwd = std::env::current_dir().context("resolve working directory")?;
    let mut console = Console::new();
    if let Some(path) = init_logging(&cwd, args.debug)? {
        console.info(&format!("Debug log: {}", path.display()));
    }

    let cfg = load_config()?;
    let settings = resolve_from_env(
        Overrides {
            model: args.model,
            base_url: args.base_url,
            history_limit: args.history_limit,
        },
        &cfg,
    );
    if settings.api_key.is_none() && settings.base_url == DEFAULT_BASE_URL {
        anyhow::bail!("OPENAI_API_KEY is not set. Export it or run `terminaut config --set-api-key <KEY>`.");
    }
    tracing::info!(model = %settings.model, base_url = %settings.base_url, limit = settings.history_limit.get(), "session settings");

    let base_prompt = match &args.system_prompt {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("read system prompt {}", path.display()))?,
        None => default_base_prompt(),
    };
    let rules = load_rules(&cwd, &mut console);

    let apply_patch = discover_apply_patch(std::env::current_exe().ok().as_deref());
    if apply_patch.is_none() {
        console.warning("apply_patch binary not found; patches are still available through the apply_patch tool.");
    }
    let bash = BashExecutor::new(
        BashConfig::new(&cwd)
            .with_timeout(settings.bash_timeout)
            .with_apply_patch(apply_patch),
    );
    let stdin = io::stdin().lock();
    let approver = if args.yes {
        PromptApprover::auto(stdin, io::stdout())
    } else {
        PromptApprover::new(stdin, io::stdout())
    };
    let mut router = ToolRouter::new(bash, PatchInterpreter::new(&cwd), approver).context("start tool runtime")?;

    let transport = OpenAiTransport::new(&settings)?;
    let mut session = Conversation::new(
        transport,
        PromptConstructor::new(base_prompt, rules),
        settings.history_limit,
        default_tools(),
    );

    let cancel: CancelFlag = Arc::new(AtomicBool::new(false));
    let phase = Arc::new(PhaseCell::default());
    let _signals = spawn_interrupt_watcher(cancel.clone(), phase.clone())?;

    console.info("=== Terminaut: LLM Agent Loop with OpenAI Chat Completions API and Bash Tool ===");
    console.info("Type '/exit' to end the conversation.");

    let options = TurnOptions { stream: !args.no_stream };
    let mut pending: Vec<Message> = Vec::new();
    loop {
        let Some(line) = console.read_user_line(router.approver_mut().input_mut())? else {
            break;
        };
        if is_exit_command(&line) {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }
        for name in rule_mentions(&line) {
            if !session.prompts_mut().invoke_manual_rule(&name) {
                console.warning(&format!("Rule '{name}' not found or not manually invokable."));
            }
        }

        let mut inbound = std::mem::take(&mut pending);
        inbound.push(Message::user(line));
        run_exchange(&mut session, &mut router, &mut console, inbound, options, &cancel, &phase, &mut pending);
    }

    console.info("Exiting agent loop. Goodbye!");
    Ok(())
}

/// Turns until the model stops asking for tools, an error, or an interrupt.
#[allow(clippy::too_many_arguments)]
fn run_exchange(
    session: &mut Session,
    router: &mut ToolRouter<Approval>,
    console: &mut Console,
    mut inbound: Vec<Message>,
    options: TurnOptions,
    cancel: &CancelFlag,
    phase: &PhaseCell,
    pending: &mut Vec<Message>,
) {
    loop {
        cancel.store(false, Ordering::SeqCst);
        phase.set(Phase::Model);
        console.waiting();
        let outcome = session.turn(inbound, options, cancel, &mut |delta: &str| console.stream_delta(delta));
        phase.set(Phase::Idle);
        console.end_stream();

        if let Some(err) = outcome.error {
            console.error(&format!("An error occurred: {err}"));
            return;
        }
        if outcome.interrupted {
            console.warning("Interrupted.");
            pending.extend(skipped_results(&outcome.tool_calls));
            return;
        }
        if outcome.tool_calls.is_empty() {
            return;
        }

        // Children share the terminal's process group, so Ctrl-C reaches a
        // running command directly.
        phase.set(Phase::Tools);
        let results = answer_calls(&outcome.tool_calls, cancel, |call| {
            console.line(Tag::ToolCall, &format!("{} ({})", call.name, call.id));
            let result = router.handle(call);
            console.line(Tag::BashOutput, result.text());
            result
        });
        phase.set(Phase::Idle);

        if cancel.load(Ordering::SeqCst) {
            console.warning("Interrupted.");
            pending.extend(results);
            return;
        }
        inbound = results;
    }
}
