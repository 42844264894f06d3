//! Interactive prompts for the command dispatcher.
//!
//! Core operations never read from the terminal; the dispatcher collects
//! values and confirmations through `Prompter` and passes plain values on.

use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};
use crossterm::style::Stylize;

/// Source of free-text answers and yes/no confirmations.
pub trait Prompter {
    /// Asks for a value. Empty input returns `default` (or an empty string).
    fn ask(&mut self, label: &str, default: Option<&str>) -> Result<String>;
    fn confirm(&mut self, question: &str, default: bool) -> Result<bool>;
    /// Prints a non-fatal warning.
    fn warn(&mut self, message: &str) -> Result<()>;
}

/// Line-oriented prompter over any reader/writer pair.
pub struct TerminalPrompter<R, W> {
    input: R,
    output: W,
    assume_yes: bool,
    color: bool,
}

impl TerminalPrompter<io::StdinLock<'static>, io::Stderr> {
    /// Prompts on stderr, reading answers from stdin.
    pub fn stdio(assume_yes: bool) -> Self {
        Self::new(io::stdin().lock(), io::stderr(), assume_yes, true)
    }
}

impl<R: BufRead, W: Write> TerminalPrompter<R, W> {
    pub fn new(input: R, output: W, assume_yes: bool, color: bool) -> Self {
        Self {
            input,
            output,
            assume_yes,
            color,
        }
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let read = self
            .input
            .read_line(&mut line)
            .context("failed to read answer")?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    fn label(&self, text: &str) -> String {
        if self.color {
            format!("{}", text.bold())
        } else {
            text.to_string()
        }
    }
}

impl<R: BufRead, W: Write> Prompter for TerminalPrompter<R, W> {
    fn ask(&mut self, label: &str, default: Option<&str>) -> Result<String> {
        let label = self.label(label);
        match default.filter(|value| !value.is_empty()) {
            Some(value) => write!(self.output, "{} [{}]: ", label, value)?,
            None => write!(self.output, "{}: ", label)?,
        }
        self.output.flush()?;
        let Some(answer) = self.read_line()? else {
            bail!("input closed while waiting for {}", label);
        };
        if answer.is_empty() {
            return Ok(default.unwrap_or_default().to_string());
        }
        Ok(answer)
    }

    fn confirm(&mut self, question: &str, default: bool) -> Result<bool> {
        if self.assume_yes {
            return Ok(true);
        }
        let hint = if default { "Y/n" } else { "y/N" };
        let question = self.label(question);
        write!(self.output, "{} [{}] ", question, hint)?;
        self.output.flush()?;
        let answer = match self.read_line()? {
            Some(answer) => answer,
            None => return Ok(false),
        };
        Ok(match answer.to_ascii_lowercase().as_str() {
            "" => default,
            "y" | "yes" => true,
            _ => false,
        })
    }

    fn warn(&mut self, message: &str) -> Result<()> {
        if self.color {
            writeln!(self.output, "{} {}", "warning:".yellow().bold(), message)?;
        } else {
            writeln!(self.output, "warning: {}", message)?;
        }
        Ok(())
    }
}
