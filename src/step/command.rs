//! Typed command templates.
//!
//! A step command may contain one `{{files}}` placeholder. Rendering replaces
//! it with the job files quoted for the step's shell and never touches any
//! other part of the command.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use shell_quote::{QuoteInto, QuoteRefExt};

use crate::Result;

use super::types::Script;

static FILES_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*files\s*\}\}").expect("valid placeholder regex"));

/// Shell that will interpret a rendered command; decides how paths are quoted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellType {
    Bash,
    Dash,
    Fish,
    Sh,
    Zsh,
    Other(String),
}

impl ShellType {
    pub fn quote(&self, s: &str) -> String {
        match self {
            ShellType::Bash | ShellType::Zsh => s.quoted(shell_quote::Bash),
            ShellType::Fish => s.quoted(shell_quote::Fish),
            ShellType::Dash | ShellType::Sh | ShellType::Other(_) => {
                let mut o = vec![];
                shell_quote::Sh::quote_into(s, &mut o);
                String::from_utf8(o).unwrap_or_default()
            }
        }
    }
}

/// A command split around its `{{files}}` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    before: String,
    /// `None` when the command takes no file list
    after: Option<String>,
}

impl CommandTemplate {
    pub fn parse(script: &str) -> Result<Self> {
        let mut matches = FILES_PLACEHOLDER.find_iter(script);
        let Some(first) = matches.next() else {
            return Ok(Self {
                before: script.to_string(),
                after: None,
            });
        };
        if matches.next().is_some() {
            eyre::bail!("`{script}` has more than one {{{{files}}}} placeholder");
        }
        Ok(Self {
            before: script[..first.start()].to_string(),
            after: Some(script[first.end()..].to_string()),
        })
    }

    pub fn takes_files(&self) -> bool {
        self.after.is_some()
    }

    /// The command text with `files` substituted in.
    pub fn render<P: AsRef<Path>>(&self, files: &[P], shell: &ShellType) -> String {
        match &self.after {
            None => self.before.clone(),
            Some(after) => {
                let files = files
                    .iter()
                    .map(|f| shell.quote(&f.as_ref().to_string_lossy()))
                    .collect::<Vec<_>>()
                    .join(" ");
                format!("{}{files}{after}", self.before)
            }
        }
    }

    /// Full argument vector: the step's shell (default `sh -o errexit -c`)
    /// followed by the rendered command.
    pub fn argv<P: AsRef<Path>>(&self, shell: Option<&Script>, files: &[P]) -> Vec<String> {
        let shell_type = shell_type(shell);
        let mut argv: Vec<String> = match shell {
            Some(shell) => shell
                .to_string()
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            None => vec![],
        };
        if argv.is_empty() {
            argv = ["sh", "-o", "errexit", "-c"].map(String::from).to_vec();
        }
        argv.push(self.render(files, &shell_type));
        argv
    }
}

fn shell_type(shell: Option<&Script>) -> ShellType {
    let shell = shell.map(|s| s.to_string()).unwrap_or_default();
    let shell = shell.split_whitespace().next().unwrap_or_default();
    let shell = shell.split(['/', '\\']).next_back().unwrap_or_default();
    match shell {
        "bash" => ShellType::Bash,
        "dash" => ShellType::Dash,
        "fish" => ShellType::Fish,
        "sh" | "" => ShellType::Sh,
        "zsh" => ShellType::Zsh,
        _ => ShellType::Other(shell.to_string()),
    }
}
