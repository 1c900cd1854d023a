use std::io::{self, BufRead, Write};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::{OwoColorize, Style};

use crate::util::color_enabled_stdout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Info,
    User,
    Agent,
    ToolCall,
    BashOutput,
    Error,
    Warning,
}

impl Tag {
    fn label(self) -> &'static str {
        match self {
            Tag::Info => "info",
            Tag::User => "user",
            Tag::Agent => "agent",
            Tag::ToolCall => "tool_call",
            Tag::BashOutput => "bash_output",
            Tag::Error => "error",
            Tag::Warning => "warning",
        }
    }

    fn style(self) -> Style {
        match self {
            Tag::Info => Style::new().cyan().bold(),
            Tag::User => Style::new().blue().bold(),
            Tag::Agent => Style::new().magenta().bold(),
            Tag::ToolCall => Style::new().cyan().bold(),
            Tag::BashOutput => Style::new().green(),
            Tag::Error => Style::new().red().bold(),
            Tag::Warning => Style::new().yellow().bold(),
        }
    }
}

/// `[tag] first line`, with continuation lines indented under it.
pub fn format_tagged(tag: Tag, message: &str, color: bool) -> String {
    let head = format!("[{}]", tag.label());
    let mut lines = message.lines();
    let first = lines.next().unwrap_or("");
    let mut out = if color {
        format!("{} {first}", head.style(tag.style()))
    } else {
        format!("{head} {first}")
    };
    for line in lines {
        out.push('\n');
        if color {
            out.push_str(&format!("   {}", line.style(tag.style())));
        } else {
            out.push_str("   ");
            out.push_str(line);
        }
    }
    out
}

/// Terminal output for the chat session.
pub struct Console {
    color: bool,
    streaming: bool,
    spinner: Option<ProgressBar>,
}

impl Console {
    pub fn new() -> Self {
        Self {
            color: color_enabled_stdout(),
            streaming: false,
            spinner: None,
        }
    }

    pub fn line(&mut self, tag: Tag, message: &str) {
        self.stop_spinner();
        self.end_stream();
        println!("{}", format_tagged(tag, message, self.color));
    }

    pub fn info(&mut self, message: &str) {
        self.line(Tag::Info, message);
    }

    pub fn error(&mut self, message: &str) {
        self.line(Tag::Error, message);
    }

    pub fn warning(&mut self, message: &str) {
        self.line(Tag::Warning, message);
    }

    /// Show a spinner until the first streamed text or the next line.
    pub fn waiting(&mut self) {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
            pb.set_style(style);
        }
        pb.set_message("thinking...");
        pb.enable_steady_tick(Duration::from_millis(80));
        self.spinner = Some(pb);
    }

    fn stop_spinner(&mut self) {
        if let Some(pb) = self.spinner.take() {
            pb.finish_and_clear();
        }
    }

    /// Print a piece of streamed agent text without a trailing newline.
    pub fn stream_delta(&mut self, text: &str) {
        self.stop_spinner();
        let mut out = io::stdout().lock();
        if !self.streaming {
            self.streaming = true;
            let head = format!("[{}] ", Tag::Agent.label());
            let _ = if self.color {
                write!(out, "{}", head.style(Tag::Agent.style()))
            } else {
                write!(out, "{head}")
            };
        }
        let _ = write!(out, "{text}");
        let _ = out.flush();
    }

    /// Close an open streamed line. Returns whether one was open.
    pub fn end_stream(&mut self) -> bool {
        self.stop_spinner();
        if !self.streaming {
            return false;
        }
        self.streaming = false;
        println!();
        true
    }

    /// Prompt for one line of user input. `None` at end of input.
    pub fn read_user_line(&mut self, input: &mut impl BufRead) -> io::Result<Option<String>> {
        self.end_stream();
        let head = format!("[{}]:", Tag::User.label());
        {
            let mut out = io::stdout().lock();
            if self.color {
                write!(out, "{} ", head.style(Tag::User.style()))?;
            } else {
                write!(out, "{head} ")?;
            }
            out.flush()?;
        }
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            println!();
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}
