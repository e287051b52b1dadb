use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Helper, Result};
use std::borrow::Cow;

const STATEMENT_KEYWORDS: &[&str] = &[
    "INSERT", "SELECT", "UPDATE", "DELETE", "DROP", "BEGIN", "COMMIT", "ROLLBACK", "EXIT", "QUIT",
];

const DOT_COMMANDS: &[&str] = &[
    ".help", ".exit", ".quit", ".clear", ".tables", ".status", ".history", ".mode", ".timing",
    ".color",
];

#[derive(Debug, PartialEq)]
enum CompletionContext {
    Start,
    DotCommand,
    TableName,
    Keyword(&'static [&'static str]),
    Nothing,
}

/// Keyword, dot-command and table-name completion for the shell.
pub struct TinyCompleter {
    tables: Vec<String>,
}

impl TinyCompleter {
    pub fn new() -> Self {
        Self { tables: Vec::new() }
    }

    /// Replace the table names offered after FROM, INTO, UPDATE and DROP.
    pub fn set_tables(&mut self, tables: Vec<String>) {
        self.tables = tables;
    }

    fn get_context(&self, line: &str, pos: usize) -> CompletionContext {
        let before = &line[..word_start(line, pos)];
        let words: Vec<String> = before
            .split(|c: char| c.is_whitespace() || "(),;".contains(c))
            .filter(|w| !w.is_empty())
            .map(str::to_uppercase)
            .collect();

        if line[..pos].trim_start().starts_with('.') {
            return if words.is_empty() {
                CompletionContext::DotCommand
            } else {
                CompletionContext::Nothing
            };
        }

        let Some(first) = words.first() else {
            return CompletionContext::Start;
        };
        let last = words.last().map(String::as_str).unwrap_or_default();

        match (first.as_str(), last) {
            (_, "FROM" | "INTO") => CompletionContext::TableName,
            ("UPDATE", "UPDATE") => CompletionContext::TableName,
            ("UPDATE", _) if words.len() == 2 => CompletionContext::Keyword(&["SET"]),
            ("DROP", "DROP") => CompletionContext::Keyword(&["TABLE"]),
            ("DROP", "TABLE") => CompletionContext::TableName,
            ("SELECT" | "DELETE", _) if !words.iter().any(|w| w == "FROM") && words.len() > 1 => {
                CompletionContext::Keyword(&["FROM"])
            }
            ("INSERT", _) if line[..pos].contains(')') && !words.iter().any(|w| w == "INTO") => {
                CompletionContext::Keyword(&["INTO"])
            }
            _ => CompletionContext::Nothing,
        }
    }

    fn get_completions(&self, line: &str, pos: usize) -> Vec<Pair> {
        let partial = &line[word_start(line, pos)..pos];
        let partial_upper = partial.to_uppercase();

        let keywords = |candidates: &[&str]| -> Vec<Pair> {
            candidates
                .iter()
                .filter(|k| k.starts_with(&partial_upper))
                .map(|k| pair(k))
                .collect()
        };

        match self.get_context(line, pos) {
            CompletionContext::Start => keywords(STATEMENT_KEYWORDS),
            CompletionContext::Keyword(candidates) => keywords(candidates),
            CompletionContext::DotCommand => DOT_COMMANDS
                .iter()
                .filter(|c| c.starts_with(partial))
                .map(|c| pair(c))
                .collect(),
            CompletionContext::TableName => self
                .tables
                .iter()
                .filter(|t| t.starts_with(partial))
                .map(|t| pair(t))
                .collect(),
            CompletionContext::Nothing => Vec::new(),
        }
    }
}

fn pair(text: &str) -> Pair {
    Pair {
        display: text.to_string(),
        replacement: text.to_string(),
    }
}

/// Start of the word under the cursor.
fn word_start(line: &str, pos: usize) -> usize {
    line[..pos]
        .rfind(|c: char| c.is_whitespace() || "(),;".contains(c))
        .map(|i| i + 1)
        .unwrap_or(0)
}

impl Completer for TinyCompleter {
    type Candidate = Pair;

    fn complete(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Result<(usize, Vec<Pair>)> {
        Ok((word_start(line, pos), self.get_completions(line, pos)))
    }
}

impl Hinter for TinyCompleter {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Option<String> {
        if pos < line.len() {
            return None;
        }

        let hint = match line.to_uppercase().as_str() {
            "INSERT " => "(<key>, <value>) INTO <table>",
            "SELECT " => "* FROM <table>",
            "UPDATE " => "<table> SET (<key>, <value>)",
            "DELETE " => "<key> FROM <table>",
            "DROP " => "<table>",
            _ => return None,
        };
        Some(hint.to_string())
    }
}

impl Highlighter for TinyCompleter {
    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        Cow::Owned(format!("\x1b[2m{}\x1b[0m", hint))
    }
}

impl Validator for TinyCompleter {}

impl Helper for TinyCompleter {}
