//! Cursor tests: protocol violations become data, other faults propagate.

use std::sync::Arc;

use sqlrun_core::{Connection, Error};

use super::mock::{server, syntax_error, text_rows, MockConnection, Reply, PROTOCOL_MESSAGE};
use crate::cursor::ProtocolSafeCursor;
use crate::typecast::TypeCasters;

fn row(values: &[&str]) -> Vec<Option<String>> {
    values.iter().map(|v| Some(v.to_string())).collect()
}

// =============================================================================
// Protocol violations
// =============================================================================

#[test]
fn test_protocol_error_synthesizes_message_row() {
    let state = server();
    state.lock().reply("SHOW UNSUPPORTED", Reply::Protocol);
    let mut conn = MockConnection::new(state.clone());
    let casters = TypeCasters::new();
    let mut cursor = ProtocolSafeCursor::new(&mut conn, &casters);

    cursor.execute("SHOW UNSUPPORTED", &[]).unwrap();
    assert!(cursor.protocol_error());
    assert_eq!(cursor.protocol_message(), PROTOCOL_MESSAGE);
    assert!(cursor.description().is_none());

    assert_eq!(cursor.fetch_one(), Some(row(&[PROTOCOL_MESSAGE])));
    assert_eq!(cursor.fetch_one(), Some(row(&[PROTOCOL_MESSAGE])));
    assert_eq!(cursor.fetch_all(), vec![row(&[PROTOCOL_MESSAGE])]);
}

#[test]
fn test_protocol_error_does_not_leak_into_next_execute() {
    let state = server();
    state.lock().reply("SHOW UNSUPPORTED", Reply::Protocol);
    let mut conn = MockConnection::new(state.clone());
    let casters = TypeCasters::new();
    let mut cursor = ProtocolSafeCursor::new(&mut conn, &casters);

    cursor.execute("SHOW UNSUPPORTED", &[]).unwrap();
    assert!(cursor.protocol_error());

    cursor.execute("select 7", &[]).unwrap();
    assert!(!cursor.protocol_error());
    assert_eq!(cursor.protocol_message(), "");
    assert_eq!(cursor.fetch_one(), Some(row(&["7"])));
    assert_eq!(cursor.fetch_one(), None);
}

#[test]
fn test_protocol_error_rows_iterate_empty() {
    let state = server();
    state.lock().reply("SHOW UNSUPPORTED", Reply::Protocol);
    let mut conn = MockConnection::new(state.clone());
    let casters = TypeCasters::new();
    let mut cursor = ProtocolSafeCursor::new(&mut conn, &casters);

    cursor.execute("SHOW UNSUPPORTED", &[]).unwrap();
    assert_eq!(cursor.into_rows().count(), 0);
}

// =============================================================================
// Other faults and normal results
// =============================================================================

#[test]
fn test_database_fault_propagates() {
    let state = server();
    state.lock().reply("bad", syntax_error("syntax error at or near \"bad\""));
    let mut conn = MockConnection::new(state.clone());
    let casters = TypeCasters::new();
    let mut cursor = ProtocolSafeCursor::new(&mut conn, &casters);

    let err = cursor.execute("bad", &[]).unwrap_err();
    assert!(matches!(&err, Error::Database(fault) if fault.code.as_deref() == Some("42601")));
    assert!(!cursor.protocol_error());
}

#[test]
fn test_closed_connection_fault_propagates() {
    let state = server();
    let mut conn = MockConnection::new(state.clone());
    conn.close();
    let casters = TypeCasters::new();
    let mut cursor = ProtocolSafeCursor::new(&mut conn, &casters);

    assert!(cursor.execute("select 1", &[]).is_err());
    assert!(!cursor.protocol_error());
}

#[test]
fn test_fetch_applies_casters_and_status() {
    let state = server();
    state.lock().reply(
        "select d",
        Reply::Rows(
            vec![sqlrun_core::Column::new("d", 1082)],
            vec![row(&["2020-01-01"]), vec![None]],
        ),
    );
    let mut conn = MockConnection::new(state.clone());
    let mut casters = TypeCasters::new();
    casters.register(&[1082], Arc::new(|v: &str| format!("date {}", v)));
    let mut cursor = ProtocolSafeCursor::new(&mut conn, &casters);

    cursor.execute("select d", &[]).unwrap();
    assert_eq!(cursor.status_message(), Some("SELECT 2"));
    assert_eq!(cursor.description().map(|c| c.len()), Some(1));
    assert_eq!(cursor.fetch_all(), vec![row(&["date 2020-01-01"]), vec![None]]);
}

#[test]
fn test_into_rows_is_lazy_and_cast() {
    let state = server();
    state.lock().reply("select many", text_rows(&["n"], &[&["1"], &["2"], &["3"]]));
    let mut conn = MockConnection::new(state.clone());
    let mut casters = TypeCasters::new();
    casters.register(&[25], Arc::new(|v: &str| format!("<{}>", v)));
    let mut cursor = ProtocolSafeCursor::new(&mut conn, &casters);

    cursor.execute("select many", &[]).unwrap();
    assert_eq!(cursor.fetch_one(), Some(row(&["<1>"])));
    let rest: Vec<_> = cursor.into_rows().collect();
    assert_eq!(rest, vec![row(&["<2>"]), row(&["<3>"])]);
}

#[test]
fn test_notices_drain_in_order() {
    let state = server();
    state.lock().notices.insert(
        "vacuum".to_string(),
        vec!["NOTICE:  first\n".to_string(), "WARNING:  second\n".to_string()],
    );
    let mut conn = MockConnection::new(state.clone());
    let casters = TypeCasters::new();
    let mut cursor = ProtocolSafeCursor::new(&mut conn, &casters);

    cursor.execute("vacuum", &[]).unwrap();
    assert_eq!(cursor.status_message(), Some("VACUUM"));
    assert_eq!(
        cursor.take_notices(),
        vec!["NOTICE:  first\n".to_string(), "WARNING:  second\n".to_string()]
    );
    assert!(cursor.take_notices().is_empty());
}
