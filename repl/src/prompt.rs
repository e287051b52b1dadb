use super::display::DisplayConfig;
use colored::Colorize;
use tiny_core::TxnId;

/// Characters of the transaction id shown in the prompt.
const TXN_PREFIX_LEN: usize = 11;

pub fn generate_prompt(active_txn: Option<&TxnId>, query_count: usize, config: &DisplayConfig) -> String {
    let base = "tinysql";
    let txn = active_txn.map(|id| {
        let short: String = id.as_str().chars().take(TXN_PREFIX_LEN).collect();
        format!("({})", short)
    });

    if config.use_colors {
        format!(
            "{}{}{}> ",
            base.bright_cyan().bold(),
            txn.unwrap_or_default().bright_yellow(),
            format!("[{}]", query_count).bright_black()
        )
    } else {
        format!("{}{}[{}]> ", base, txn.unwrap_or_default(), query_count)
    }
}
