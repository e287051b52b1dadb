mod commands;
mod completer;
pub mod display;
mod history;
mod prompt;

use anyhow::Context;
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor, Result};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tiny_core::Database;
use tracing_subscriber::EnvFilter;

pub use self::commands::CommandHandler;
pub use self::display::{DisplayConfig, OutputMode};

const HISTORY_FILE: &str = ".tinysql_history";

/// Interactive shell for the TinySQL key-value engine.
#[derive(Parser, Debug)]
#[command(name = "tinysql", version)]
struct Cli {
	/// Script to run instead of starting the interactive shell
	script: Option<PathBuf>,

	/// Execute a statement and exit (may be repeated)
	#[arg(short, long, value_name = "STATEMENT")]
	execute: Vec<String>,

	/// Read statements from standard input
	#[arg(long, conflicts_with_all = ["script", "execute"])]
	stdin: bool,

	/// Configuration file
	#[arg(short, long, default_value = "tinysql.toml")]
	config: PathBuf,

	/// Data directory, overriding the configuration
	#[arg(short, long)]
	data_dir: Option<String>,

	/// Output format
	#[arg(short, long, value_enum)]
	mode: Option<OutputMode>,

	/// Only print statement results
	#[arg(short, long)]
	quiet: bool,

	/// Stop at the first failing statement
	#[arg(long)]
	exit_on_error: bool,

	/// Do not read or write the history file
	#[arg(long)]
	no_history: bool,

	/// Log filter, e.g. `debug` or `tiny_core=trace` (default: RUST_LOG, then `warn`)
	#[arg(long, value_name = "FILTER")]
	log_level: Option<String>,
}

pub struct Repl {
	editor: Editor<completer::TinyCompleter, DefaultHistory>,
	command_handler: CommandHandler,
	display_config: DisplayConfig,
	db: Database,
	history: history::HistoryManager,
	query_count: usize,
	failed: bool,
	start_time: Instant,
}

#[derive(Debug, Clone)]
pub enum InputSource {
	Interactive,
	File(PathBuf),
	Stdin,
	CommandLine(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct ReplOptions {
	pub input_source: InputSource,
	pub quiet: bool,
	pub exit_on_error: bool,
	pub no_history: bool,
	pub output_format: Option<OutputMode>,
}

impl From<&Cli> for ReplOptions {
	fn from(cli: &Cli) -> Self {
		let input_source = if cli.stdin {
			InputSource::Stdin
		} else if let Some(path) = &cli.script {
			InputSource::File(path.clone())
		} else if !cli.execute.is_empty() {
			InputSource::CommandLine(cli.execute.clone())
		} else {
			InputSource::Interactive
		};

		Self {
			input_source,
			quiet: cli.quiet,
			exit_on_error: cli.exit_on_error,
			no_history: cli.no_history,
			output_format: cli.mode,
		}
	}
}

impl Repl {
	pub fn with_options(db: Database, options: &ReplOptions) -> Result<Self> {
		let config = Config::builder()
			.history_ignore_space(true)
			.completion_type(rustyline::CompletionType::List)
			.edit_mode(rustyline::EditMode::Emacs)
			.build();

		let mut completer = completer::TinyCompleter::new();
		completer.set_tables(db.table_names());

		let mut editor = Editor::with_config(config)?;
		editor.set_helper(Some(completer));

		let history = history::HistoryManager::new(HISTORY_FILE, !options.no_history);
		history.load(&mut editor);

		let mut display_config = DisplayConfig::default();
		if let Some(format) = options.output_format {
			display_config.output_mode = format;
		} else if !matches!(options.input_source, InputSource::Interactive) {
			display_config.output_mode = OutputMode::Plain;
		}

		Ok(Self {
			editor,
			command_handler: CommandHandler::new(),
			display_config,
			db,
			history,
			query_count: 0,
			failed: false,
			start_time: Instant::now(),
		})
	}

	/// Run until input is exhausted. Returns whether every statement succeeded.
	pub fn run(&mut self, options: &ReplOptions) -> Result<bool> {
		match &options.input_source {
			InputSource::Interactive => self.run_interactive(options.quiet)?,
			InputSource::File(path) => self.run_file(path, options)?,
			InputSource::Stdin => self.run_stdin(options)?,
			InputSource::CommandLine(commands) => self.run_commands(commands, options),
		}
		Ok(!self.failed)
	}

	fn run_interactive(&mut self, quiet: bool) -> Result<()> {
		if !quiet {
			display::print_welcome();
			self.show_status_line();
		}

		loop {
			let prompt_str = prompt::generate_prompt(
				self.db.active_transaction().as_ref(),
				self.query_count,
				&self.display_config,
			);

			match self.editor.readline(&prompt_str) {
				Ok(line) => {
					if !self.handle_line(line)? {
						break;
					}
				}
				Err(ReadlineError::Interrupted) => {
					display::print_hint("Use .exit or Ctrl+D to quit");
				}
				Err(ReadlineError::Eof) => {
					println!();
					display::print_goodbye(self.query_count, self.start_time.elapsed());
					break;
				}
				Err(err) => {
					display::print_error(&format!("Readline error: {:?}", err));
					break;
				}
			}
		}

		self.history.save(&mut self.editor)
	}

	fn run_file(&mut self, path: &Path, options: &ReplOptions) -> Result<()> {
		if !options.quiet {
			display::print_info(&format!("Executing file: {}", path.display()));
		}

		let content = fs::read_to_string(path)?;
		self.execute_script(&content, options);
		Ok(())
	}

	fn run_stdin(&mut self, options: &ReplOptions) -> Result<()> {
		let mut content = String::new();
		io::stdin().read_to_string(&mut content)?;
		self.execute_script(&content, options);
		Ok(())
	}

	fn run_commands(&mut self, commands: &[String], options: &ReplOptions) {
		for command in commands {
			if !self.execute_line(command, options) {
				break;
			}
		}
	}

	/// One statement or dot-command per line; blank lines and `--` comments
	/// are skipped.
	fn execute_script(&mut self, content: &str, options: &ReplOptions) {
		for (line_num, line) in content.lines().enumerate() {
			let trimmed = line.trim();
			if trimmed.is_empty() || trimmed.starts_with("--") {
				continue;
			}

			if !self.execute_line(trimmed, options) {
				if self.failed && options.exit_on_error && !options.quiet {
					display::print_error(&format!("Stopped at line {}", line_num + 1));
				}
				return;
			}
		}
	}

	/// Execute one line outside the interactive loop. Returns false when
	/// processing should stop.
	fn execute_line(&mut self, line: &str, options: &ReplOptions) -> bool {
		let trimmed = line.trim();
		if trimmed.is_empty() {
			return true;
		}

		if trimmed.starts_with('.') {
			return match self.command_handler.handle(trimmed, &mut self.display_config, &self.db) {
				commands::CommandResult::Exit => false,
				commands::CommandResult::Error(msg) => {
					display::print_error(&msg);
					self.failed = true;
					!options.exit_on_error
				}
				commands::CommandResult::ShowHistory
				| commands::CommandResult::ExecuteFromHistory(_) => {
					display::print_warning("History is only available interactively");
					true
				}
				commands::CommandResult::Continue | commands::CommandResult::ClearScreen => true,
			};
		}

		if is_exit_keyword(trimmed) {
			return false;
		}

		let ok = self.execute_query(trimmed);
		ok || !options.exit_on_error
	}

	fn handle_line(&mut self, line: String) -> Result<bool> {
		let trimmed = line.trim();
		if trimmed.is_empty() {
			return Ok(true);
		}

		self.editor.add_history_entry(trimmed)?;

		if trimmed.starts_with('.') {
			return Ok(self.handle_command(trimmed));
		}

		if is_exit_keyword(trimmed) {
			display::print_goodbye(self.query_count, self.start_time.elapsed());
			return Ok(false);
		}

		self.execute_query(trimmed);
		Ok(true)
	}

	fn handle_command(&mut self, line: &str) -> bool {
		match self
			.command_handler
			.handle(line, &mut self.display_config, &self.db)
		{
			commands::CommandResult::Continue => true,
			commands::CommandResult::Exit => {
				display::print_goodbye(self.query_count, self.start_time.elapsed());
				false
			}
			commands::CommandResult::Error(msg) => {
				display::print_error(&msg);
				true
			}
			commands::CommandResult::ClearScreen => {
				display::clear_screen();
				display::print_welcome();
				self.show_status_line();
				true
			}
			commands::CommandResult::ShowHistory => {
				self.history.display(&self.editor);
				true
			}
			commands::CommandResult::ExecuteFromHistory(n) => {
				match self.history.get_entry(&self.editor, n) {
					Some(entry) if entry.trim_start().starts_with('.') => {
						display::print_error("History entry is a command, not a statement");
					}
					Some(entry) => {
						self.execute_query(&entry);
					}
					None => display::print_error(&format!("History entry {} not found", n)),
				}
				true
			}
		}
	}

	/// Parse, execute and print one statement. Returns whether it succeeded.
	fn execute_query(&mut self, query: &str) -> bool {
		self.query_count += 1;

		let start = Instant::now();
		let outcome = tiny_core::parse(query)
			.map_err(|e| format!("Parse error: {}", e))
			.and_then(|statement| {
				self.db
					.execute(&statement)
					.map(|result| (statement.is_read_only(), result))
					.map_err(|e| e.to_string())
			});
		let duration = start.elapsed();

		match outcome {
			Ok((read_only, result)) => {
				display::print_result(&result, duration, &self.display_config);
				if !read_only && let Some(helper) = self.editor.helper_mut() {
					helper.set_tables(self.db.table_names());
				}
				true
			}
			Err(msg) => {
				display::print_query_error(&msg, &self.display_config);
				self.failed = true;
				false
			}
		}
	}

	fn show_status_line(&self) {
		let tables = self.db.table_names().len();
		display::print_success(&format!(
			"Opened {} ({} table(s))",
			self.db.wal_path().display(),
			tables
		));
	}
}

fn is_exit_keyword(line: &str) -> bool {
	let word = line.trim_end_matches(';').trim();
	word.eq_ignore_ascii_case("EXIT") || word.eq_ignore_ascii_case("QUIT")
}

fn get_env_filter(level: Option<&str>) -> EnvFilter {
	if let Some(level) = level {
		EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
	} else if std::env::var_os("RUST_LOG").is_some() {
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
	} else {
		EnvFilter::new("warn")
	}
}

fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();

	tracing_subscriber::fmt()
		.with_env_filter(get_env_filter(cli.log_level.as_deref()))
		.with_writer(io::stderr)
		.with_target(false)
		.compact()
		.init();

	let mut config = tiny_core::Config::load_from_path(&cli.config)?;
	if let Some(dir) = &cli.data_dir {
		config.storage.data_dir = dir.clone();
	}

	let db = Database::open(&config)
		.with_context(|| format!("failed to open database at {}", config.wal_path().display()))?;

	let options = ReplOptions::from(&cli);
	let mut repl = Repl::with_options(db, &options)?;
	let succeeded = repl.run(&options)?;

	if !succeeded && options.exit_on_error {
		std::process::exit(1);
	}
	Ok(())
}
