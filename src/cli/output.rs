//! Colored terminal output helpers.
//!
//! All user-facing output goes through these functions so we get
//! consistent styling across every command.

use comfy_table::{ContentArrangement, Table};
use console::style;

use crate::audit::AuditRecord;
use crate::vault::SecretSummary;

/// Print a green success message: "check_mark {msg}"
pub fn success(msg: &str) {
    println!("{} {}", style("\u{2713}").green().bold(), msg);
}

/// Print a red error message: "x_mark {msg}"
pub fn error(msg: &str) {
    eprintln!("{} {}", style("\u{2717}").red().bold(), msg);
}

/// Print a yellow warning: "warning_sign {msg}"
pub fn warning(msg: &str) {
    eprintln!("{} {}", style("\u{26a0}").yellow().bold(), msg);
}

/// Print a blue info message: "info_sign {msg}"
pub fn info(msg: &str) {
    println!("{} {}", style("\u{2139}").blue().bold(), msg);
}

/// Print a dim tip/hint: "arrow {msg}"
pub fn tip(msg: &str) {
    println!("{} {}", style("\u{2192}").dim(), style(msg).dim());
}

/// Print a table of secret summaries.
pub fn print_secrets_table(secrets: &[SecretSummary]) {
    if secrets.is_empty() {
        info("No secrets in this vault yet.");
        tip("Run `secretctl set <KEY>` to add your first secret.");
        return;
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Key", "Tags", "Expires", "Notes", "URL", "Updated"]);

    for s in secrets {
        table.add_row(vec![
            s.key.clone(),
            s.tags.join(", "),
            s.expires_at
                .map(|t| t.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            if s.has_notes { "yes".into() } else { String::new() },
            if s.has_url { "yes".into() } else { String::new() },
            s.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]);
    }

    println!("{table}");
}

/// Print a table of audit records.
pub fn print_audit_table(records: &[AuditRecord]) {
    if records.is_empty() {
        info("No matching audit records.");
        return;
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Id", "Timestamp", "Action", "Source", "Ok", "Error"]);

    for r in records {
        table.add_row(vec![
            r.id.to_string(),
            r.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            r.action.to_string(),
            r.source.to_string(),
            if r.success { "yes".into() } else { "no".into() },
            r.error.clone().unwrap_or_default(),
        ]);
    }

    println!("{table}");
}
