use colored::Colorize;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use std::time::Duration;
use tiny_core::{QueryResult, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputMode {
	/// The engine's own result text, one `key: value` line per row
	Plain,
	/// SELECT results as a bordered table
	Table,
	/// One JSON document per statement
	Json,
}

#[derive(Debug, Clone)]
pub struct DisplayConfig {
	pub show_timing: bool,
	pub use_colors: bool,
	pub output_mode: OutputMode,
	pub max_column_width: usize,
}

impl Default for DisplayConfig {
	fn default() -> Self {
		Self {
			show_timing: false,
			use_colors: true,
			output_mode: OutputMode::Table,
			max_column_width: 40,
		}
	}
}

pub fn print_welcome() {
	println!("\n{}", "TinySQL shell".bright_cyan().bold());
	println!(
		"Type {} for help, {} to exit",
		".help".bright_green(),
		".exit".bright_green()
	);
	println!();
}

pub fn print_goodbye(query_count: usize, duration: Duration) {
	println!();
	println!("{}", "─".repeat(40).bright_black());
	println!("   Executed {} statement(s) in {:.1?}", query_count, duration);
	println!();
}

pub fn clear_screen() {
	print!("\x1B[2J\x1B[1;1H");
}

pub fn print_error(msg: &str) {
	println!("{} {}", "✗".bright_red().bold(), msg.bright_red());
}

pub fn print_warning(msg: &str) {
	println!("{} {}", "⚠".bright_yellow(), msg.bright_yellow());
}

pub fn print_info(msg: &str) {
	println!("{} {}", "ℹ".bright_blue(), msg.bright_white());
}

pub fn print_success(msg: &str) {
	println!("{} {}", "✓".bright_green().bold(), msg.bright_green());
}

pub fn print_hint(msg: &str) {
	println!("{} {}", "»".bright_white(), msg.bright_white().dimmed());
}

pub fn print_toggle(feature: &str, enabled: bool) {
	let status = if enabled {
		"ON".bright_green().bold()
	} else {
		"OFF".bright_red()
	};
	println!("{}: {}", feature, status);
}

pub fn print_result(result: &QueryResult, duration: Duration, config: &DisplayConfig) {
	match (result, config.output_mode) {
		(_, OutputMode::Json) => println!("{}", result_json(result)),
		(QueryResult::Rows(rows), OutputMode::Table) if !rows.is_empty() => {
			println!("{}", render_rows(rows, config.max_column_width));
			println!("  {} row(s)", rows.len().to_string().bright_white());
		}
		(QueryResult::Rows(_), _) | (_, OutputMode::Plain) => println!("{}", result),
		(_, OutputMode::Table) => print_success(&result.to_string()),
	}

	if config.show_timing {
		println!(
			"  {} {:.3}ms",
			"Time:".bright_black(),
			duration.as_secs_f64() * 1000.0
		);
	}
}

pub fn print_query_error(error_msg: &str, config: &DisplayConfig) {
	match config.output_mode {
		OutputMode::Json => println!("{}", serde_json::json!({ "error": error_msg })),
		OutputMode::Plain => println!("{}", error_msg),
		OutputMode::Table => print_error(error_msg),
	}
}

fn result_json(result: &QueryResult) -> String {
	let value = match result {
		QueryResult::Rows(rows) => serde_json::json!({ "rows": rows }),
		other => serde_json::json!({
			"message": other.to_string(),
			"affected": other.affected(),
		}),
	};
	serde_json::to_string_pretty(&value).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
}

fn render_rows(rows: &[Row], max_width: usize) -> Table {
	let pending = rows.iter().any(|row| row.pending.is_some());

	let mut table = Table::new();
	table
		.load_preset(UTF8_FULL)
		.set_content_arrangement(ContentArrangement::Dynamic);

	let mut header = vec!["key", "value"];
	if pending {
		header.push("pending in");
	}
	table.set_header(header);

	for row in rows {
		let mut cells = vec![
			truncate(&row.key, max_width),
			truncate(&row.value, max_width),
		];
		if pending {
			cells.push(row.pending.as_ref().map(ToString::to_string).unwrap_or_default());
		}
		table.add_row(cells);
	}

	table
}

fn truncate(text: &str, max_width: usize) -> String {
	if text.chars().count() <= max_width {
		return text.to_string();
	}
	let cut: String = text.chars().take(max_width.saturating_sub(1)).collect();
	format!("{}…", cut)
}

#[cfg(test)]
mod tests {
	use super::*;
	use tiny_core::TxnId;

	#[test]
	fn test_truncate() {
		assert_eq!(truncate("short", 10), "short");
		assert_eq!(truncate("abcdefghij", 5), "abcd…");
	}

	#[test]
	fn test_pending_column_only_when_needed() {
		let committed = render_rows(&[Row::committed("a", "1")], 40).to_string();
		assert!(!committed.contains("pending in"));

		let mixed = render_rows(
			&[Row::committed("a", "1"), Row::pending("b", "2", TxnId::from("tx_1"))],
			40,
		)
		.to_string();
		assert!(mixed.contains("pending in"));
		assert!(mixed.contains("tx_1"));
	}

	#[test]
	fn test_json_output() {
		let rows = QueryResult::Rows(vec![Row::committed("a", "1")]);
		let value: serde_json::Value = serde_json::from_str(&result_json(&rows)).unwrap();
		assert_eq!(value["rows"][0]["key"], "a");
		assert!(value["rows"][0].get("pending").is_none());

		let dropped = QueryResult::Dropped { table: "t".into() };
		let value: serde_json::Value = serde_json::from_str(&result_json(&dropped)).unwrap();
		assert_eq!(value["message"], "Table 't' dropped");
	}
}
