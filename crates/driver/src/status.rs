//! Command tags and transaction tracking.
//!
//! The simple query protocol reports only an affected-row count, and the
//! driver does not surface the server's ready-for-query status. Both are
//! reconstructed here from the statement text.

use sqlrun_core::TransactionStatus;

/// Leading keywords of a statement, uppercased, punctuation trimmed.
fn keywords(sql: &str) -> impl Iterator<Item = String> + '_ {
    sql.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                .to_ascii_uppercase()
        })
        .filter(|w| !w.is_empty())
}

/// Synthesize the command tag the server would report for `sql`.
pub fn command_tag(sql: &str, affected: u64) -> String {
    let mut words = keywords(sql);
    let first = match words.next() {
        Some(w) => w,
        None => return String::new(),
    };

    match first.as_str() {
        "INSERT" => format!("INSERT 0 {}", affected),
        "UPDATE" | "DELETE" | "SELECT" | "COPY" | "FETCH" | "MOVE" => {
            format!("{} {}", first, affected)
        }
        "CREATE" | "DROP" | "ALTER" => {
            let mut object = words.find(|w| {
                !matches!(
                    w.as_str(),
                    "OR" | "REPLACE" | "TEMP" | "TEMPORARY" | "UNIQUE" | "UNLOGGED"
                )
            });
            if object.as_deref() == Some("MATERIALIZED") {
                object = words.next().map(|w| format!("MATERIALIZED {}", w));
            }
            match object {
                Some(object) => format!("{} {}", first, object),
                None => first,
            }
        }
        "START" => "START TRANSACTION".to_string(),
        "END" => "COMMIT".to_string(),
        "ABORT" => "ROLLBACK".to_string(),
        _ => first,
    }
}

/// Transaction status after running `sql` from `current`.
pub fn next_transaction_status(
    current: TransactionStatus,
    sql: &str,
    succeeded: bool,
) -> TransactionStatus {
    let mut words = keywords(sql);
    let first = words.next().unwrap_or_default();
    let second = words.next();

    if !succeeded {
        return match current {
            TransactionStatus::InTransaction | TransactionStatus::InError => TransactionStatus::InError,
            other => other,
        };
    }

    match first.as_str() {
        "BEGIN" | "START" => TransactionStatus::InTransaction,
        "ROLLBACK" if second.as_deref() == Some("TO") => TransactionStatus::InTransaction,
        "COMMIT" | "END" | "ROLLBACK" | "ABORT" => TransactionStatus::Idle,
        _ => current,
    }
}
