use crate::completer::TinyCompleter;
use rustyline::history::{DefaultHistory, History, SearchDirection};
use rustyline::{Editor, Result};
use std::path::PathBuf;
use tracing::debug;

type ShellEditor = Editor<TinyCompleter, DefaultHistory>;

/// Entries listed by `.history`.
const DISPLAY_LIMIT: usize = 20;

/// Persists the line history between sessions. A disabled manager keeps the
/// in-memory history but never touches the file.
pub struct HistoryManager {
    path: PathBuf,
    enabled: bool,
}

impl HistoryManager {
    pub fn new(path: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            path: path.into(),
            enabled,
        }
    }

    pub fn load(&self, editor: &mut ShellEditor) {
        if !self.enabled {
            return;
        }
        // A missing file just means a first session
        if let Err(e) = editor.load_history(&self.path) {
            debug!(path = %self.path.display(), error = %e, "No history loaded");
        }
    }

    pub fn save(&self, editor: &mut ShellEditor) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        editor.save_history(&self.path)
    }

    pub fn display(&self, editor: &ShellEditor) {
        let history = editor.history();
        if history.is_empty() {
            println!("No history available");
            return;
        }

        println!("\nStatement history:");
        println!("{}", "─".repeat(60));

        let start = history.len().saturating_sub(DISPLAY_LIMIT);
        for i in start..history.len() {
            if let Ok(Some(found)) = history.get(i, SearchDirection::Forward) {
                println!("{:4} │ {}", i + 1, elide(&found.entry, 60));
            }
        }

        println!("{}", "─".repeat(60));
        println!("Use .history <n> to run entry n again");
    }

    /// Entry `n`, counting from 1.
    pub fn get_entry(&self, editor: &ShellEditor, n: usize) -> Option<String> {
        if n == 0 {
            return None;
        }
        editor
            .history()
            .get(n - 1, SearchDirection::Forward)
            .ok()
            .flatten()
            .map(|found| found.entry.into_owned())
    }
}

fn elide(entry: &str, width: usize) -> String {
    if entry.chars().count() > width {
        let head: String = entry.chars().take(width - 3).collect();
        format!("{}...", head)
    } else {
        entry.to_string()
    }
}
