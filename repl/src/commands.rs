use super::display::{self, DisplayConfig, OutputMode};
use colored::Colorize;
use tiny_core::Database;

pub enum CommandResult {
    Continue,
    Exit,
    Error(String),
    ClearScreen,
    ShowHistory,
    ExecuteFromHistory(usize),
}

pub struct CommandHandler;

impl CommandHandler {
    pub fn new() -> Self {
        CommandHandler
    }

    pub fn handle(
        &self,
        line: &str,
        display_config: &mut DisplayConfig,
        db: &Database,
    ) -> CommandResult {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(&command) = parts.first() else {
            return CommandResult::Continue;
        };

        match command {
            ".help" | ".h" | ".?" => {
                self.show_help();
                CommandResult::Continue
            }
            ".exit" | ".quit" | ".q" => CommandResult::Exit,
            ".clear" | ".cls" => CommandResult::ClearScreen,
            ".tables" => {
                self.show_tables(db);
                CommandResult::Continue
            }
            ".status" => {
                self.show_status(db);
                CommandResult::Continue
            }
            ".timing" | ".time" => {
                display_config.show_timing = !display_config.show_timing;
                display::print_toggle("Statement timing", display_config.show_timing);
                CommandResult::Continue
            }
            ".color" | ".colors" => {
                display_config.use_colors = !display_config.use_colors;
                colored::control::set_override(display_config.use_colors);
                display::print_toggle("Colors", display_config.use_colors);
                CommandResult::Continue
            }
            ".history" | ".hist" => match parts.get(1) {
                Some(n) => match n.parse::<usize>() {
                    Ok(n) => CommandResult::ExecuteFromHistory(n),
                    Err(_) => CommandResult::Error(format!("Invalid history number: {}", n)),
                },
                None => CommandResult::ShowHistory,
            },
            ".mode" => match parts.get(1) {
                Some(mode) => {
                    let new_mode = match *mode {
                        "plain" => OutputMode::Plain,
                        "table" => OutputMode::Table,
                        "json" => OutputMode::Json,
                        _ => return CommandResult::Error(format!("Unknown mode: {}", mode)),
                    };
                    display_config.output_mode = new_mode;
                    display::print_info(&format!("Output mode set to: {}", mode));
                    CommandResult::Continue
                }
                None => {
                    display::print_info(&format!(
                        "Current output mode: {:?}",
                        display_config.output_mode
                    ));
                    CommandResult::Continue
                }
            },
            _ => CommandResult::Error(format!(
                "Unknown command: {}. Type .help for help.",
                command
            )),
        }
    }

    fn show_help(&self) {
        println!("\n{}", "TinySQL Shell Commands".bright_cyan().bold());
        println!("{}", "─".repeat(50).bright_black());

        let commands = [
            (".help, .h, .?", "Show this help message"),
            (".exit, .quit, .q", "Exit the shell (EXIT and QUIT work too)"),
            (".clear, .cls", "Clear the screen"),
            (".tables", "List committed tables"),
            (".status", "Show the active transaction and WAL location"),
            (".timing, .time", "Toggle statement timing"),
            (".color, .colors", "Toggle colored output"),
            (".mode <format>", "Set output format (plain/table/json)"),
            (".history, .hist", "Show statement history"),
            (".history <n>", "Run history entry n again"),
        ];

        for (cmd, desc) in commands {
            println!("  {:20} {}", cmd.bright_green(), desc.bright_white());
        }

        println!("\n{}", "Statements:".bright_yellow());
        let statements = [
            "INSERT (key, value), (key, value) INTO table",
            "SELECT * FROM table",
            "SELECT key, key FROM table",
            "UPDATE table SET (key, value)",
            "DELETE key, key FROM table",
            "DROP [TABLE] table",
            "BEGIN | COMMIT | ROLLBACK",
        ];
        for statement in statements {
            println!("  {}", statement);
        }
        println!("\n  Keys, values and table names cannot contain spaces.");
        println!();
    }

    fn show_tables(&self, db: &Database) {
        let tables = db.table_names();
        if tables.is_empty() {
            display::print_info("No tables found");
            return;
        }

        display::print_info(&format!("Found {} table(s):", tables.len()));
        for table in &tables {
            let len = db.table_len(table).unwrap_or_default();
            println!("  • {} ({} key(s))", table.bright_green(), len);
        }
    }

    fn show_status(&self, db: &Database) {
        match db.active_transaction() {
            Some(id) => display::print_warning(&format!("Transaction {} is active", id)),
            None => display::print_info("No active transaction"),
        }
        display::print_info(&format!("WAL: {}", db.wal_path().display()));
        display::print_info(&format!("Tables: {}", db.table_names().len()));
    }
}
