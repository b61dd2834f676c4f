//! Pipeline tests: ordering, error policy, special dispatch and the
//! expanded-output lifecycle.

use sqlrun_core::{Error, ResultRecord, Result};

use super::mock::{connect, server, MockSpecial, Reply, PROTOCOL_MESSAGE};
use crate::special::SpecialCommands;

fn format_error(err: &Error) -> String {
    format!("formatted: {}", err)
}

fn all_ok(records: Vec<Result<ResultRecord>>) -> Vec<ResultRecord> {
    records.into_iter().map(|r| r.unwrap()).collect()
}

fn statuses(records: &[ResultRecord]) -> Vec<Option<&str>> {
    records.iter().map(|r| r.status.as_deref()).collect()
}

// =============================================================================
// Ordering and empty input
// =============================================================================

#[test]
fn test_records_follow_statement_order() {
    let state = server();
    let mut session = connect(&state);
    let records = all_ok(session.run("select 1; select 2; select 3", None, None, false).collect());

    assert_eq!(records.len(), 3);
    let fragments: Vec<&str> = records.iter().map(|r| r.fragment.as_str()).collect();
    assert_eq!(fragments, vec!["select 1", "select 2", "select 3"]);
    assert!(records.iter().all(|r| r.succeeded && !r.is_special));
    assert_eq!(
        statuses(&records),
        vec![Some("SELECT 1"), Some("SELECT 1"), Some("SELECT 1")]
    );
}

#[test]
fn test_row_records_carry_headers_and_rows() {
    let state = server();
    let mut session = connect(&state);
    let mut records = all_ok(session.run("select 42", None, None, false).collect());

    let record = &mut records[0];
    assert_eq!(record.headers(), Some(&["?column?".to_string()][..]));
    let rows: Vec<_> = record.take_rows().unwrap().collect();
    assert_eq!(rows, vec![vec![Some("42".to_string())]]);
}

#[test]
fn test_status_only_record_has_no_rows() {
    let state = server();
    let mut session = connect(&state);
    let records = all_ok(session.run("create table t (a int)", None, None, false).collect());

    assert!(records[0].result.is_none());
    assert_eq!(records[0].status.as_deref(), Some("CREATE TABLE"));
}

#[test]
fn test_empty_input_yields_single_sentinel() {
    let state = server();
    let mut session = connect(&state);
    for raw in ["", "   \n", ";;", "-- nothing here"] {
        let records = all_ok(session.run(raw, None, None, false).collect());
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert!(record.title.is_none());
        assert!(record.result.is_none());
        assert!(record.headers().is_none());
        assert!(record.status.is_none());
        assert_eq!(record.fragment, raw);
        assert!(!record.succeeded);
        assert!(!record.is_special);
    }
}

#[test]
fn test_run_is_lazy() {
    let state = server();
    let mut session = connect(&state);
    let before = state.lock().log.len();

    let mut run = session.run("select 'a'; select 'b'", None, None, false);
    assert_eq!(state.lock().log.len(), before);

    run.next().unwrap().unwrap();
    assert_eq!(state.lock().log.len(), before + 1);
}

#[test]
fn test_notices_become_title_oldest_first() {
    let state = server();
    state.lock().notices.insert(
        "drop table if exists t".to_string(),
        vec![
            "NOTICE:  table \"t\" does not exist, skipping\n".to_string(),
            "NOTICE:  second\n".to_string(),
        ],
    );
    let mut session = connect(&state);
    let records = all_ok(session.run("drop table if exists t; select 1", None, None, false).collect());

    assert_eq!(
        records[0].title.as_deref(),
        Some("NOTICE:  table \"t\" does not exist, skipping\nNOTICE:  second\n")
    );
    assert!(records[1].title.is_none());
}

#[test]
fn test_protocol_error_in_ordinary_statement_is_status() {
    let state = server();
    state.lock().reply("SHOW UNSUPPORTED", Reply::Protocol);
    let mut session = connect(&state);
    let records = all_ok(session.run("SHOW UNSUPPORTED; select 2", None, None, false).collect());

    assert_eq!(records.len(), 2);
    assert!(records[0].succeeded);
    assert!(records[0].result.is_none());
    assert_eq!(records[0].status.as_deref(), Some(PROTOCOL_MESSAGE));
    assert!(records[1].succeeded);
}

// =============================================================================
// Error policy
// =============================================================================

#[test]
fn test_stop_on_error() {
    let state = server();
    let mut session = connect(&state);
    let records = all_ok(
        session
            .run("SELECT 1; BAD SQL; SELECT 2;", None, Some(&format_error), false)
            .collect(),
    );

    assert_eq!(records.len(), 2);
    assert!(records[0].succeeded);
    assert!(!records[1].succeeded);
    assert_eq!(records[1].fragment, "BAD SQL");
    assert!(records[1].status.as_deref().unwrap().starts_with("formatted: ERROR:  syntax error"));
    assert_eq!(state.lock().count("SELECT 2"), 0);
}

#[test]
fn test_continue_on_error() {
    let state = server();
    let mut session = connect(&state);
    let records = all_ok(
        session
            .run("SELECT 1; BAD SQL; SELECT 2;", None, Some(&format_error), true)
            .collect(),
    );

    assert_eq!(records.len(), 3);
    assert!(!records[1].succeeded);
    assert!(records[2].succeeded);
    assert_eq!(records[2].fragment, "SELECT 2");
}

#[test]
fn test_fault_without_formatter_propagates() {
    let state = server();
    let mut session = connect(&state);
    let records: Vec<_> = session.run("select 1; bad; select 2", None, None, true).collect();

    assert_eq!(records.len(), 2);
    assert!(records[0].is_ok());
    assert!(matches!(records[1], Err(Error::Database(_))));
    assert_eq!(state.lock().count("select 2"), 0);
}

#[test]
fn test_fault_on_closed_connection_is_fatal() {
    let state = server();
    state.lock().reply("select 'dies'", Reply::CloseConnection);
    let mut session = connect(&state);
    let records: Vec<_> = session
        .run("select 'dies'; select 2", None, Some(&format_error), true)
        .collect();

    assert_eq!(records.len(), 1);
    assert!(matches!(records[0], Err(Error::Database(_))));

    // Every later statement fails on the dead connection, formatter or not.
    let records: Vec<_> = session
        .run("select 3", None, Some(&format_error), true)
        .collect();
    assert_eq!(records.len(), 1);
    assert!(records[0].is_err());
    assert_eq!(state.lock().count("select 2"), 0);
}

#[test]
fn test_stopping_early_skips_remaining_fragments() {
    let state = server();
    let mut session = connect(&state);
    let mut run = session.run("select 'x'; select 'y'", None, None, false);
    run.next().unwrap().unwrap();
    drop(run);
    assert_eq!(state.lock().count("select 'y'"), 0);
}

#[test]
fn test_interrupt_between_statements_ends_run() {
    let state = server();
    let mut session = connect(&state);
    let mut run = session.run("select 1; select 2; select 3", None, Some(&format_error), true);
    assert!(run.next().unwrap().is_ok());

    state.lock().held_interrupt = true;
    assert!(matches!(run.next(), Some(Err(Error::Interrupted))));
    assert!(run.next().is_none());
    drop(run);

    let state = state.lock();
    assert_eq!(state.count("select 2"), 0);
    assert_eq!(state.count("select 3"), 0);
    assert!(!state.held_interrupt);
}

#[test]
fn test_interrupt_before_run_stops_first_statement() {
    let state = server();
    let mut session = connect(&state);
    state.lock().held_interrupt = true;

    let records: Vec<_> = session.run("select 1", None, None, false).collect();
    assert_eq!(records.len(), 1);
    assert!(matches!(records[0], Err(Error::Interrupted)));
    assert_eq!(state.lock().count("select 1"), 0);

    // Consumed: the next run goes through.
    let records = all_ok(session.run("select 1", None, None, false).collect());
    assert_eq!(records.len(), 1);
}

// =============================================================================
// Special commands
// =============================================================================

#[test]
fn test_special_command_records_are_normalized() {
    let state = server();
    let mut session = connect(&state);
    let mut special = MockSpecial::default();
    let records = all_ok(
        session
            .run("\\dt; \\two; select 9", Some(&mut special), None, false)
            .collect(),
    );

    assert_eq!(records.len(), 4);
    assert_eq!(records[0].title.as_deref(), Some("List of relations"));
    assert_eq!(records[0].headers(), Some(&["name".to_string()][..]));
    assert_eq!(records[0].fragment, "\\dt");
    assert!(records[0].succeeded && records[0].is_special);
    assert_eq!(statuses(&records[1..3]), vec![Some("first"), Some("second")]);
    assert!(records[1..3].iter().all(|r| r.fragment == "\\two" && r.is_special));
    assert!(!records[3].is_special);
    assert_eq!(special.display.lock().cursor_seen, vec![true, true, true]);
}

#[test]
fn test_complete_special_record_passes_through() {
    let state = server();
    let mut session = connect(&state);
    let mut special = MockSpecial::default();
    let records = all_ok(session.run("\\i file.sql", Some(&mut special), None, false).collect());

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].fragment, "select 42");
    assert!(!records[0].is_special);
}

#[test]
fn test_special_protocol_error_forces_reconnect() {
    let state = server();
    state.lock().reply("SHOW UNSUPPORTED", Reply::Protocol);
    let mut session = connect(&state);
    let mut special = MockSpecial::default();
    let raw = "\\unsupported; select 1";

    let mut run = session.run(raw, Some(&mut special), None, false);
    let first = run.next().unwrap().unwrap();
    assert!(!first.succeeded);
    assert!(!first.is_special);
    assert_eq!(first.fragment, raw);
    assert_eq!(first.status.as_deref(), Some(PROTOCOL_MESSAGE));
    assert_eq!(state.lock().connects, 1);

    let second = run.next().unwrap().unwrap();
    assert!(second.succeeded);
    assert!(run.next().is_none());
    drop(run);

    assert_eq!(session.generation(), 1);
    let state = state.lock();
    assert_eq!(state.connects, 2);
    assert_eq!(state.closes, 1);
}

#[test]
fn test_reconnect_runs_when_run_is_dropped() {
    let state = server();
    state.lock().reply("SHOW UNSUPPORTED", Reply::Protocol);
    let mut session = connect(&state);
    let mut special = MockSpecial::default();

    let mut run = session.run("\\unsupported", Some(&mut special), None, false);
    run.next().unwrap().unwrap();
    drop(run);

    assert_eq!(session.generation(), 1);
}

#[test]
fn test_special_fault_uses_error_policy() {
    let state = server();
    let mut session = connect(&state);
    let mut special = MockSpecial::default();
    let records = all_ok(
        session
            .run("\\fail; select 1", Some(&mut special), Some(&format_error), true)
            .collect(),
    );

    assert_eq!(records.len(), 2);
    assert!(!records[0].succeeded);
    assert_eq!(records[0].fragment, "\\fail");
    assert!(records[1].succeeded);
}

#[test]
fn test_special_gets_no_cursor_on_closed_connection() {
    let state = server();
    state.lock().reply("select 'dies'", Reply::CloseConnection);
    let mut session = connect(&state);
    assert!(session.execute_normal_sql("select 'dies'").is_err());

    let mut special = MockSpecial::default();
    let records = all_ok(session.run("\\q", Some(&mut special), None, false).collect());
    assert_eq!(records[0].status.as_deref(), Some("Goodbye"));
    assert_eq!(special.display.lock().cursor_seen, vec![false]);
}

// =============================================================================
// Expanded output
// =============================================================================

#[test]
fn test_expanded_directive_toggles_once_per_statement() {
    let state = server();
    let mut session = connect(&state);
    let mut special = MockSpecial::default();

    for _ in 0..2 {
        let records = all_ok(session.run("SELECT 1\\G", Some(&mut special), None, false).collect());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fragment, "SELECT 1");
        assert!(!special.expanded_output());
    }
    assert_eq!(special.display.lock().toggles, vec![true, false, true, false]);
    assert_eq!(state.lock().count("SELECT 1"), 3);
}

#[test]
fn test_expanded_stays_on_while_record_is_consumed() {
    let state = server();
    let mut session = connect(&state);
    let special = MockSpecial::default();
    let display = special.display.clone();
    let mut special = special;

    let mut run = session.run("select 1\\G; select 2", Some(&mut special), None, false);
    run.next().unwrap().unwrap();
    assert!(display.lock().expanded);

    run.next().unwrap().unwrap();
    assert!(!display.lock().expanded);
    drop(run);
    assert_eq!(display.lock().toggles, vec![true, false]);
}

#[test]
fn test_expanded_already_on_is_not_reset() {
    let state = server();
    let mut session = connect(&state);
    let mut special = MockSpecial::expanded(true);

    all_ok(session.run("select 1\\G", Some(&mut special), None, false).collect());
    assert!(special.expanded_output());
    assert!(special.display.lock().toggles.is_empty());
}

#[test]
fn test_expanded_reset_after_failure_and_fatal_fault() {
    let state = server();
    let mut session = connect(&state);
    let mut special = MockSpecial::default();

    let records = all_ok(
        session
            .run("bad one\\G", Some(&mut special), Some(&format_error), false)
            .collect(),
    );
    assert!(!records[0].succeeded);
    assert!(!special.expanded_output());

    let records: Vec<_> = session
        .run("bad two\\G", Some(&mut special), None, false)
        .collect();
    assert!(records[0].is_err());
    assert!(!special.expanded_output());
    assert_eq!(special.display.lock().toggles, vec![true, false, true, false]);
}

#[test]
fn test_expanded_reset_after_special_protocol_error() {
    let state = server();
    state.lock().reply("SHOW UNSUPPORTED", Reply::Protocol);
    let mut session = connect(&state);
    let mut special = MockSpecial::default();

    let records = all_ok(session.run("\\unsupported\\G", Some(&mut special), None, false).collect());
    assert_eq!(records.len(), 1);
    assert!(!special.expanded_output());
    assert_eq!(session.generation(), 1);
}

#[test]
fn test_directive_without_dispatcher_is_stripped() {
    let state = server();
    let mut session = connect(&state);
    let records = all_ok(session.run("select 5\\G", None, None, false).collect());

    assert_eq!(records[0].fragment, "select 5");
    assert_eq!(state.lock().count("select 5"), 1);
}
